//! The batched cursor iterator.
//!
//! The first advance opens a transaction, declares a server-side cursor for
//! the query and fetches the first batch into the caller's buffer. Further
//! advances walk the buffer and refill it with `FETCH <batch size>` once every
//! slot has been read. When a fetch comes back empty the transaction is rolled
//! back and the iterator is exhausted for good.
//!
//! A fetch that times out before its first row may still run on the server.
//! The cursor is scrollable, and the retry first moves it back to the last row
//! handed out, so an abandoned fetch never skips rows.

pub mod builder;
pub mod state;

use crate::{
    config::CursorConfig,
    connector::{Connector, CursorTransaction, DecodeRow, RowOf},
    error::{BuildError, CursorError, DbError, Operation},
    postgres::params::{PgParam, PgParamStore},
    sql,
};
use builder::CursorIteratorBuilder;
use futures_util::StreamExt;
use state::{CursorState, Step};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::{MappedMutexGuard, Mutex, MutexGuard},
    time::{Instant, timeout, timeout_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Stands in for deadlines that do not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Iterates over the rows of a query in batches the size of a reusable buffer.
///
/// Every operation takes the same lock, so concurrent callers observe a
/// strictly ordered sequence of advances. Slots of the buffer are overwritten
/// on every refill; read them through [`current`](Self::current) or
/// [`with_values`](Self::with_values) before advancing again.
///
/// # Example
///
/// ```rust,ignore
/// let connector = PgConnector::connect("postgres://localhost/app").await?;
/// let iter = CursorIterator::new(
///     connector,
///     vec![User::default(); 1000],
///     Duration::from_secs(60),
///     "SELECT * FROM users WHERE role = $1",
///     vec![PgParam::new("Guest".to_string())],
/// )?;
///
/// while iter.advance().await {
///     if let Some(user) = iter.current().await {
///         println!("Name: {}", user.name);
///     }
/// }
/// iter.close().await?;
/// ```
pub struct CursorIterator<C: Connector, T> {
    connector: C,
    query: String,
    params: PgParamStore,
    cursor_name: String,
    declare_sql: String,
    fetch_sql: String,
    batch_size: usize,
    max_db_execution_time: Duration,
    cancel: CancellationToken,
    inner: Mutex<Inner<C::Transaction, T>>,
}

struct Inner<X, T> {
    state: CursorState,
    values: Vec<T>,
    transaction: Option<X>,
    last_error: Option<Arc<CursorError>>,
    /// Rows received by completed fetches.
    consumed: u64,
    /// Set after an abandoned fetch: the cursor position is unknown until the
    /// next fetch moves it back to `consumed`.
    resync: bool,
}

enum FetchOutcome {
    Filled(usize),
    Drained,
    Retry(CursorError),
    Fatal(CursorError),
}

impl<C, T> CursorIterator<C, T>
where
    C: Connector,
    T: DecodeRow<RowOf<C>>,
{
    pub fn builder() -> CursorIteratorBuilder<C, T> {
        CursorIteratorBuilder::new()
    }

    /// Creates an iterator with the default [`CursorConfig`].
    pub fn new(
        connector: C,
        values: Vec<T>,
        max_db_execution_time: Duration,
        query: impl Into<String>,
        params: Vec<PgParam>,
    ) -> Result<Self, BuildError> {
        Self::builder()
            .connector(connector)
            .values(values)
            .max_db_execution_time(max_db_execution_time)
            .query(query)
            .params(params)
            .build()
    }

    pub(crate) fn assemble(
        connector: C,
        values: Vec<T>,
        max_db_execution_time: Duration,
        query: String,
        params: PgParamStore,
        cursor_name: String,
        cancel: CancellationToken,
    ) -> Self {
        let batch_size = values.len();
        Self {
            connector,
            declare_sql: sql::declare_cursor(&cursor_name, &query),
            fetch_sql: sql::fetch_forward(&cursor_name, batch_size),
            query,
            params,
            cursor_name,
            batch_size,
            max_db_execution_time,
            cancel,
            inner: Mutex::new(Inner {
                state: CursorState::NotStarted,
                values,
                transaction: None,
                last_error: None,
                consumed: 0,
                resync: false,
            }),
        }
    }

    /// Returns true if a next value is available, fetching the next batch
    /// when the current one has been read.
    ///
    /// False means either drained or failed; check [`last_error`](Self::last_error)
    /// or use [`step`](Self::step) to tell them apart.
    pub async fn advance(&self) -> bool {
        self.step().await.has_value()
    }

    pub async fn step(&self) -> Step {
        let mut inner = self.inner.lock().await;
        let state = inner.state;
        match state {
            CursorState::Exhausted if inner.last_error.is_some() => Step::Failed,
            CursorState::Exhausted => Step::Done,
            CursorState::NotStarted => self.open(&mut inner).await,
            CursorState::Active { .. } => match inner.state.advance_in_batch() {
                Some(index) => Step::Value(index),
                None => self.refill(&mut inner).await,
            },
        }
    }

    /// Index of the current value in the buffer, if there is one.
    pub async fn value_index(&self) -> Option<usize> {
        self.inner.lock().await.state.value_index()
    }

    /// Like [`value_index`](Self::value_index), with `-2` before the first
    /// value and `-1` once exhausted.
    pub async fn raw_index(&self) -> isize {
        self.inner.lock().await.state.raw_index()
    }

    pub async fn state(&self) -> CursorState {
        self.inner.lock().await.state
    }

    /// The last recorded failure. Reading it does not clear it.
    pub async fn last_error(&self) -> Option<Arc<CursorError>> {
        self.inner.lock().await.last_error.clone()
    }

    /// The current value. The iterator stays locked while the guard lives.
    pub async fn current(&self) -> Option<MappedMutexGuard<'_, T>> {
        let guard = self.inner.lock().await;
        MutexGuard::try_map(guard, |inner| {
            let index = inner.state.value_index()?;
            inner.values.get_mut(index)
        })
        .ok()
    }

    /// Runs `f` over the valid slots of the current batch.
    pub async fn with_values<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[T]) -> R,
    {
        let inner = self.inner.lock().await;
        let filled = inner.state.filled();
        f(&inner.values[..filled])
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn cursor_name(&self) -> &str {
        &self.cursor_name
    }

    /// Rolls back the open transaction, if any, and exhausts the iterator.
    ///
    /// The rollback outcome replaces the recorded error; without an open
    /// transaction the recorded error is cleared. Safe to call repeatedly.
    pub async fn close(&self) -> Result<(), Arc<CursorError>> {
        let mut inner = self.inner.lock().await;
        let rollback = self.release(&mut inner).await;
        inner.last_error = rollback.err().map(Arc::new);
        match &inner.last_error {
            Some(err) => {
                warn!(cursor = %self.cursor_name, error = %err, "Closing cursor failed");
                Err(err.clone())
            }
            None => Ok(()),
        }
    }

    /// Gives the buffer back. Close the iterator first: an open transaction
    /// is dropped without being awaited.
    pub fn into_buffer(self) -> Vec<T> {
        self.inner.into_inner().values
    }

    async fn open(&self, inner: &mut Inner<C::Transaction, T>) -> Step {
        debug!(cursor = %self.cursor_name, "Starting transaction");
        let mut transaction = match self.guarded(Operation::Begin, self.connector.begin()).await {
            Ok(transaction) => {
                // a retried begin that succeeds supersedes its earlier failure
                inner.last_error = None;
                transaction
            }
            Err(err) => {
                warn!(cursor = %self.cursor_name, error = %err, "Transaction could not be started");
                inner.last_error = Some(Arc::new(err));
                return Step::Retry;
            }
        };

        debug!(cursor = %self.cursor_name, query = %self.query, params = self.params.len(), "Declaring cursor");
        let params = self.params.as_refs();
        let declared = self
            .guarded(
                Operation::Declare,
                transaction.execute(&self.declare_sql, &params),
            )
            .await;
        inner.transaction = Some(transaction);

        if let Err(err) = declared {
            return self.finish(inner, Some(err)).await;
        }

        inner.state = CursorState::Active {
            position: 0,
            filled: 0,
        };
        self.refill(inner).await
    }

    async fn refill(&self, inner: &mut Inner<C::Transaction, T>) -> Step {
        let outcome = match inner.transaction.as_mut() {
            Some(transaction) => {
                let resume_at = inner.resync.then_some(inner.consumed);
                self.fetch_batch(transaction, resume_at, &mut inner.values)
                    .await
            }
            None => FetchOutcome::Drained,
        };

        match outcome {
            FetchOutcome::Filled(filled) => {
                debug!(cursor = %self.cursor_name, filled, "Buffer refilled");
                inner.consumed += filled as u64;
                inner.resync = false;
                inner.state = CursorState::Active {
                    position: 0,
                    filled,
                };
                Step::Value(0)
            }
            FetchOutcome::Drained => self.finish(inner, None).await,
            FetchOutcome::Retry(err) => {
                warn!(cursor = %self.cursor_name, error = %err, "Fetch failed, next advance retries it");
                inner.last_error = Some(Arc::new(err));
                inner.resync = true;
                Step::Retry
            }
            FetchOutcome::Fatal(err) => self.finish(inner, Some(err)).await,
        }
    }

    async fn fetch_batch(
        &self,
        transaction: &mut C::Transaction,
        resume_at: Option<u64>,
        values: &mut [T],
    ) -> FetchOutcome {
        if let Some(position) = resume_at {
            let statement = sql::move_absolute(&self.cursor_name, position);
            debug!(cursor = %self.cursor_name, %statement, "Repositioning cursor");
            let moved = self
                .guarded(Operation::Fetch, transaction.execute(&statement, &[]))
                .await;
            match moved {
                Ok(_) => {}
                Err(err) if err.is_timeout() => return FetchOutcome::Retry(err),
                Err(err) => return FetchOutcome::Fatal(err),
            }
        }

        debug!(cursor = %self.cursor_name, statement = %self.fetch_sql, "Fetching next batch");
        let deadline = self.deadline();

        let query = transaction.query(&self.fetch_sql);
        let mut rows = match self.guarded_until(Operation::Fetch, deadline, query).await {
            Ok(rows) => rows,
            Err(err) if err.is_no_rows() => return FetchOutcome::Drained,
            Err(err) if err.is_timeout() => return FetchOutcome::Retry(err),
            Err(err) => return FetchOutcome::Fatal(err),
        };

        let mut filled = 0;
        loop {
            let next = self
                .guarded_until(Operation::Fetch, deadline, async {
                    rows.next().await.transpose()
                })
                .await;

            let row = match next {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(err) if err.is_no_rows() => break,
                // nothing received yet, the retry repositions the cursor
                Err(err) if err.is_timeout() && filled == 0 => return FetchOutcome::Retry(err),
                Err(err) => return FetchOutcome::Fatal(err),
            };

            let Some(slot) = values.get_mut(filled) else {
                return FetchOutcome::Fatal(CursorError::TooManyRows {
                    expected: self.batch_size,
                });
            };
            if let Err(err) = slot.decode_row(&row) {
                return FetchOutcome::Fatal(CursorError::Decode(err));
            }
            filled += 1;
        }

        if filled == 0 {
            FetchOutcome::Drained
        } else {
            FetchOutcome::Filled(filled)
        }
    }

    /// Exhausts the iterator, rolls back and records `failure` (or else the
    /// rollback error) as the sticky error.
    async fn finish(
        &self,
        inner: &mut Inner<C::Transaction, T>,
        failure: Option<CursorError>,
    ) -> Step {
        let rollback = self.release(inner).await;
        match failure.or(rollback.err()) {
            Some(err) => {
                warn!(cursor = %self.cursor_name, error = %err, "Cursor iteration failed");
                inner.last_error = Some(Arc::new(err));
                Step::Failed
            }
            None => {
                debug!(cursor = %self.cursor_name, "Cursor drained");
                inner.last_error = None;
                Step::Done
            }
        }
    }

    /// Marks the iterator exhausted and rolls back the open transaction.
    ///
    /// The rollback ignores the cancellation token so a cancelled caller
    /// still releases the transaction.
    async fn release(&self, inner: &mut Inner<C::Transaction, T>) -> Result<(), CursorError> {
        inner.state = CursorState::Exhausted;
        let Some(transaction) = inner.transaction.take() else {
            return Ok(());
        };

        debug!(cursor = %self.cursor_name, "Rolling back transaction");
        let after = self.max_db_execution_time;
        match timeout(after, transaction.rollback()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(CursorError::Database {
                operation: Operation::Rollback,
                source,
            }),
            Err(_) => Err(CursorError::Timeout {
                operation: Operation::Rollback,
                after,
            }),
        }
    }

    async fn guarded<F, O>(&self, operation: Operation, fut: F) -> Result<O, CursorError>
    where
        F: Future<Output = Result<O, DbError>>,
    {
        self.guarded_until(operation, self.deadline(), fut).await
    }

    fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.max_db_execution_time)
            .unwrap_or_else(|| now + FAR_FUTURE)
    }

    /// Runs one database round trip bounded by `deadline` and the
    /// cancellation token.
    async fn guarded_until<F, O>(
        &self,
        operation: Operation,
        deadline: Instant,
        fut: F,
    ) -> Result<O, CursorError>
    where
        F: Future<Output = Result<O, DbError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CursorError::Cancelled { operation }),
            result = timeout_at(deadline, fut) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => Err(CursorError::Database { operation, source }),
                Err(_) => Err(CursorError::Timeout {
                    operation,
                    after: self.max_db_execution_time,
                }),
            },
        }
    }
}

impl<C, T> CursorIterator<C, T>
where
    C: Connector,
    T: DecodeRow<RowOf<C>> + Default + Clone,
{
    /// Creates an iterator over a fresh buffer of `batch_size` default values.
    pub fn with_batch_size(
        connector: C,
        batch_size: usize,
        config: CursorConfig,
        query: impl Into<String>,
        params: Vec<PgParam>,
    ) -> Result<Self, BuildError> {
        Self::builder()
            .connector(connector)
            .values(vec![T::default(); batch_size])
            .config(config)
            .query(query)
            .params(params)
            .build()
    }
}
