use crate::{
    config::CursorConfig,
    connector::{Connector, DecodeRow, RowOf},
    error::BuildError,
    iterator::CursorIterator,
    postgres::params::{PgParam, PgParamStore},
    sql,
};
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_util::sync::CancellationToken;

/// Collects the inputs of a [`CursorIterator`] and validates them in [`build`](Self::build).
pub struct CursorIteratorBuilder<C, T> {
    connector: Option<C>,
    values: Option<Vec<T>>,
    max_db_execution_time: Option<Duration>,
    query: String,
    params: PgParamStore,
    config: CursorConfig,
    cancellation: Option<CancellationToken>,
}

impl<C, T> Default for CursorIteratorBuilder<C, T> {
    fn default() -> Self {
        Self {
            connector: None,
            values: None,
            max_db_execution_time: None,
            query: String::new(),
            params: PgParamStore::default(),
            config: CursorConfig::default(),
            cancellation: None,
        }
    }
}

impl<C, T> CursorIteratorBuilder<C, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(mut self, connector: C) -> Self {
        self.connector = Some(connector);
        self
    }

    /// The reusable buffer. Its length is the batch size of every `FETCH`.
    pub fn values(mut self, values: Vec<T>) -> Self {
        self.values = Some(values);
        self
    }

    /// Overrides the deadline from [`config`](Self::config).
    pub fn max_db_execution_time(mut self, duration: Duration) -> Self {
        self.max_db_execution_time = Some(duration);
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Appends one positional bind argument (`$1`, `$2`, ...).
    pub fn param<V>(mut self, value: V) -> Self
    where
        V: ToSql + Sync + Send + 'static,
    {
        self.params.push(PgParam::new(value));
        self
    }

    pub fn params(mut self, params: impl Into<PgParamStore>) -> Self {
        self.params = params.into();
        self
    }

    pub fn config(mut self, config: CursorConfig) -> Self {
        self.config = config;
        self
    }

    /// Token standing in for the caller's context: cancelling it aborts the
    /// in-flight database operation.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl<C, T> CursorIteratorBuilder<C, T>
where
    C: Connector,
    T: DecodeRow<RowOf<C>>,
{
    pub fn build(self) -> Result<CursorIterator<C, T>, BuildError> {
        let connector = self.connector.ok_or(BuildError::MissingConnector)?;
        let values = self.values.ok_or(BuildError::MissingValues)?;
        if values.is_empty() {
            return Err(BuildError::EmptyValues);
        }

        let query = self.query.trim();
        if query.is_empty() {
            return Err(BuildError::EmptyQuery);
        }

        let max_db_execution_time = self
            .max_db_execution_time
            .unwrap_or_else(|| self.config.max_db_execution_time());
        if max_db_execution_time.is_zero() {
            return Err(BuildError::ZeroExecutionTime);
        }

        sql::validate_cursor_name(&self.config.cursor_name)?;

        Ok(CursorIterator::assemble(
            connector,
            values,
            max_db_execution_time,
            query.to_string(),
            self.params,
            self.config.cursor_name,
            self.cancellation.unwrap_or_else(CancellationToken::new),
        ))
    }
}
