#[cfg(test)]
mod tests {
    use crate::{User, default_users, pg_connector, seed_users};
    use cursor_iterator::{
        Connector, CursorIterator, CursorState, CursorTransaction, Operation, PgConnector,
        PgParam, Step,
    };
    use futures_util::TryStreamExt;
    use std::{sync::Arc, time::Duration};
    use tracing_test::traced_test;

    async fn expect_values(iter: &CursorIterator<PgConnector, User>, expected: &[User]) {
        for user in expected {
            assert!(iter.advance().await);
            assert!(iter.last_error().await.is_none());
            assert_eq!(&*iter.current().await.expect("value available"), user);
        }
        assert!(!iter.advance().await);
        assert!(iter.last_error().await.is_none());
    }

    fn select_all(table: &str) -> String {
        format!("SELECT * FROM {table} ORDER BY id")
    }

    async fn transaction_read_only(connector: &PgConnector) -> String {
        let client = connector.lock_client().await;
        client
            .query_one("SHOW transaction_read_only", &[])
            .await
            .expect("show transaction_read_only")
            .get(0)
    }

    // Scenario: five users, a buffer of two.
    // Expected Outcome: the value index cycles 0,1,0,1,0 and then reports exhaustion.
    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn value_index() {
        let connector = pg_connector().await;
        seed_users(&connector, "users_value_index", &default_users()).await;

        let iter = CursorIterator::new(
            connector,
            vec![User::default(); 2],
            Duration::from_secs(60),
            select_all("users_value_index"),
            vec![],
        )
        .unwrap();

        assert_eq!(iter.raw_index().await, -2);
        for expected in [0, 1, 0, 1, 0] {
            assert!(iter.advance().await);
            assert!(iter.last_error().await.is_none());
            assert_eq!(iter.raw_index().await, expected);
        }
        assert!(!iter.advance().await);
        assert!(iter.last_error().await.is_none());
        assert_eq!(iter.raw_index().await, -1);
        assert!(!iter.advance().await);
        assert_eq!(iter.raw_index().await, -1);
        assert!(iter.close().await.is_ok());
        assert!(iter.last_error().await.is_none());
    }

    // Scenario: buffers from one to ten slots over the same five users.
    // Expected Outcome: every user comes back exactly once, in order.
    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn cache_sizes() {
        let connector = Arc::new(pg_connector().await);
        seed_users(&connector, "users_cache_sizes", &default_users()).await;

        for size in 1..=10 {
            let iter = CursorIterator::new(
                PgConnector::clone(&connector),
                vec![User::default(); size],
                Duration::from_secs(60),
                select_all("users_cache_sizes"),
                vec![],
            )
            .unwrap();

            expect_values(&iter, &default_users()).await;
            assert!(iter.close().await.is_ok());
        }
    }

    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn empty_table() {
        let connector = pg_connector().await;
        seed_users(&connector, "users_empty", &[]).await;

        let iter = CursorIterator::new(
            connector,
            vec![User::default(); 3],
            Duration::from_secs(60),
            select_all("users_empty"),
            vec![],
        )
        .unwrap();

        expect_values(&iter, &[]).await;
        assert!(iter.close().await.is_ok());
    }

    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn next_after_close() {
        let connector = pg_connector().await;
        seed_users(&connector, "users_after_close", &default_users()).await;

        let iter = CursorIterator::new(
            connector,
            vec![User::default(); 3],
            Duration::from_secs(60),
            select_all("users_after_close"),
            vec![],
        )
        .unwrap();

        assert!(iter.advance().await);
        assert_eq!(iter.raw_index().await, 0);
        assert!(iter.close().await.is_ok());
        assert_eq!(iter.raw_index().await, -1);
        assert!(iter.last_error().await.is_none());
        assert!(!iter.advance().await);
        assert_eq!(iter.raw_index().await, -1);
    }

    // Scenario: one-second deadline, the caller idles three seconds between advances.
    // Expected Outcome: every round trip gets a fresh deadline, nothing times out.
    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn timeout() {
        let connector = pg_connector().await;
        seed_users(&connector, "users_timeout", &default_users()).await;

        let iter = CursorIterator::new(
            connector,
            vec![User::default(); 1],
            Duration::from_secs(1),
            select_all("users_timeout"),
            vec![],
        )
        .unwrap();

        assert!(iter.advance().await);
        assert_eq!(iter.raw_index().await, 0);
        assert!(iter.last_error().await.is_none());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(iter.advance().await);
        assert_eq!(iter.raw_index().await, 0);
        assert!(iter.last_error().await.is_none());
        assert!(iter.close().await.is_ok());
    }

    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn query_arguments() {
        let connector = pg_connector().await;
        seed_users(&connector, "users_arguments", &default_users()).await;

        let iter = CursorIterator::new(
            connector,
            vec![User::default(); 2],
            Duration::from_secs(60),
            "SELECT * FROM users_arguments WHERE id > $1 AND name <> $2 ORDER BY id",
            vec![PgParam::new(1_i32), PgParam::new("Mike".to_string())],
        )
        .unwrap();

        expect_values(
            &iter,
            &[User::new(2, "Alice"), User::new(3, "Bob"), User::new(5, "Maria")],
        )
        .await;
    }

    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn declare_failure() {
        let connector = pg_connector().await;

        let iter = CursorIterator::new(
            connector,
            vec![User::default(); 2],
            Duration::from_secs(60),
            "SELECT * FORM users",
            vec![],
        )
        .unwrap();

        assert_eq!(iter.step().await, Step::Failed);
        let err = iter.last_error().await.unwrap();
        assert_eq!(err.operation(), Some(Operation::Declare));
        assert!(err.to_string().starts_with("unable to declare cursor"));
        assert_eq!(iter.state().await, CursorState::Exhausted);
    }

    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn decode_failure() {
        let connector = pg_connector().await;

        let iter = CursorIterator::new(
            connector,
            vec![User::default(); 2],
            Duration::from_secs(60),
            "SELECT 1 AS id, NULL::varchar AS name",
            vec![],
        )
        .unwrap();

        assert_eq!(iter.step().await, Step::Failed);
        let err = iter.last_error().await.unwrap();
        assert!(
            err.to_string()
                .starts_with("unable to scan into values element: cannot decode column 'name'"),
            "got {err}"
        );
    }

    // Scenario: two iterators share one connection.
    // Expected Outcome: the second cannot begin while the first holds the
    // connection, and succeeds once the first is closed.
    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn shared_connection_is_exclusive() {
        let connector = Arc::new(pg_connector().await);
        seed_users(&connector, "users_shared", &default_users()).await;

        let first = CursorIterator::new(
            connector.clone(),
            vec![User::default(); 2],
            Duration::from_secs(60),
            select_all("users_shared"),
            vec![],
        )
        .unwrap();
        let second = CursorIterator::new(
            connector.clone(),
            vec![User::default(); 2],
            Duration::from_millis(200),
            select_all("users_shared"),
            vec![],
        )
        .unwrap();

        assert!(first.advance().await);

        assert_eq!(second.step().await, Step::Retry);
        let err = second.last_error().await.unwrap();
        assert!(err.is_timeout());
        assert_eq!(err.operation(), Some(Operation::Begin));

        assert!(first.close().await.is_ok());
        let mut count = 0;
        while second.advance().await {
            count += 1;
        }
        assert_eq!(count, 5);
        assert!(second.last_error().await.is_none());
    }

    // Scenario: a transaction is dropped without an explicit rollback.
    // Expected Outcome: the client is handed back outside of any transaction.
    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn dropped_transaction_is_rolled_back() {
        let connector = pg_connector().await;

        let transaction = connector.begin().await.unwrap();
        drop(transaction);

        // the scheduled rollback keeps the client locked until it completes
        assert_eq!(transaction_read_only(&connector).await, "off");
        seed_users(&connector, "users_dropped", &default_users()).await;
    }

    // Scenario: a begin is abandoned after BEGIN READ ONLY went out.
    // Expected Outcome: the shared client is not left in a read-only transaction.
    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn abandoned_begin_is_rolled_back() {
        let connector = pg_connector().await;

        let mut begin = connector.begin();
        let _ = futures_util::poll!(&mut begin);
        drop(begin);

        assert_eq!(transaction_read_only(&connector).await, "off");
        seed_users(&connector, "users_abandoned", &default_users()).await;
    }

    // Scenario: a retried fetch on a scrollable cursor.
    // Expected Outcome: MOVE ABSOLUTE puts the cursor back, FETCH resumes there.
    #[traced_test]
    #[tokio::test]
    #[ignore = "requires a running postgres (CURSOR_TEST_PG_URL)"]
    async fn scroll_cursor_repositions() {
        let connector = pg_connector().await;
        seed_users(&connector, "users_scroll", &default_users()).await;

        let mut transaction = connector.begin().await.unwrap();
        transaction
            .execute(
                &cursor_iterator::sql::declare_cursor("curs", &select_all("users_scroll")),
                &[],
            )
            .await
            .unwrap();
        transaction.execute("FETCH 2 IN curs", &[]).await.unwrap();
        transaction
            .execute(&cursor_iterator::sql::move_absolute("curs", 1), &[])
            .await
            .unwrap();

        let rows: Vec<_> = transaction
            .query("FETCH 2 IN curs")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let ids: Vec<i32> = rows.iter().map(|row| row.get("id")).collect();
        assert_eq!(ids, vec![2, 3]);
        transaction.rollback().await.unwrap();
    }
}
