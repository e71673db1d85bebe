use crate::{
    connector::{Connector, CursorTransaction, RowStream},
    error::{DbError, DecodeError},
    postgres::utils::connect_client,
};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::{
    runtime::Handle,
    sync::{OwnedRwLockWriteGuard, RwLock, RwLockWriteGuard},
};
use tokio_postgres::{
    Client, Row,
    types::{FromSql, ToSql},
};
use tracing::{debug, warn};

/// Connection provider backed by one `tokio_postgres` client.
///
/// A transaction holds the client's write lock until it is rolled back, so
/// statements of other users never interleave with the cursor's.
#[derive(Clone)]
pub struct PgConnector {
    client: Arc<RwLock<Client>>,
    read_only: bool,
}

impl PgConnector {
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        Ok(Self::from_client(connect_client(url).await?))
    }

    pub fn from_client(client: Client) -> Self {
        Self::from_shared(Arc::new(RwLock::new(client)))
    }

    pub fn from_shared(client: Arc<RwLock<Client>>) -> Self {
        PgConnector {
            client,
            read_only: true,
        }
    }

    /// Open transactions without the `READ ONLY` access mode, e.g. for
    /// queries calling volatile functions.
    pub fn read_write(mut self) -> Self {
        self.read_only = false;
        self
    }

    /// Exclusive access to the client outside of any cursor transaction.
    pub async fn lock_client(&self) -> RwLockWriteGuard<'_, Client> {
        self.client.write().await
    }

    fn begin_statement(&self) -> &'static str {
        if self.read_only {
            "BEGIN READ ONLY"
        } else {
            "BEGIN"
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Transaction = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, DbError> {
        // Wrapped before BEGIN is sent: if this future is dropped mid-flight
        // the transaction's Drop still rolls back the shared client.
        let transaction = PgTransaction {
            client: Some(self.client.clone().write_owned().await),
        };
        let statement = self.begin_statement();
        debug!(statement, "Opening transaction");
        transaction.client()?.batch_execute(statement).await?;
        Ok(transaction)
    }
}

/// A transaction opened by [`PgConnector`].
///
/// Dropping it without [`rollback`](CursorTransaction::rollback) schedules the
/// rollback on the current runtime.
pub struct PgTransaction {
    client: Option<OwnedRwLockWriteGuard<Client>>,
}

impl PgTransaction {
    fn client(&self) -> Result<&Client, DbError> {
        self.client
            .as_deref()
            .ok_or_else(|| DbError::Unknown("transaction already finished".to_string()))
    }
}

#[async_trait]
impl CursorTransaction for PgTransaction {
    type Row = Row;

    async fn execute(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DbError> {
        let client = self.client()?;
        Ok(client.execute(sql, params).await?)
    }

    async fn query<'a>(&'a mut self, sql: &str) -> Result<RowStream<'a, Row>, DbError> {
        let client = self.client()?;
        let rows = client
            .query_raw(sql, std::iter::empty::<&(dyn ToSql + Sync)>())
            .await?;
        Ok(rows.map_err(DbError::from).boxed())
    }

    async fn rollback(mut self) -> Result<(), DbError> {
        let client = self
            .client
            .take()
            .ok_or_else(|| DbError::Unknown("transaction already finished".to_string()))?;
        client.batch_execute("ROLLBACK").await?;
        Ok(())
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = client.batch_execute("ROLLBACK").await {
                        warn!(%err, "Rollback of abandoned transaction failed");
                    }
                });
            }
            Err(_) => warn!("Transaction dropped outside of a runtime, it was not rolled back"),
        }
    }
}

/// Reads `column` from `row`, reporting failures as [`DecodeError`].
pub fn decode_column<'a, V>(row: &'a Row, column: &str) -> Result<V, DecodeError>
where
    V: FromSql<'a>,
{
    row.try_get(column).map_err(|source| DecodeError::Column {
        column: column.to_string(),
        source,
    })
}
