use crate::error::{DbError, DecodeError};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use tokio_postgres::types::ToSql;

/// Rows produced by a single statement, in order.
pub type RowStream<'a, R> = BoxStream<'a, Result<R, DbError>>;

/// Row type produced by the transactions of connector `C`.
pub type RowOf<C> = <<C as Connector>::Transaction as CursorTransaction>::Row;

/// Anything able to start a transaction on the target database: a single
/// connection, a pool, or a test double.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transaction: CursorTransaction;

    async fn begin(&self) -> Result<Self::Transaction, DbError>;
}

#[async_trait]
impl<C: Connector> Connector for Arc<C> {
    type Transaction = C::Transaction;

    async fn begin(&self) -> Result<Self::Transaction, DbError> {
        self.as_ref().begin().await
    }
}

/// An open transaction the cursor lives in.
///
/// The iterator never commits; it only rolls back.
#[async_trait]
pub trait CursorTransaction: Send {
    type Row: Send;

    async fn execute(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, DbError>;

    async fn query<'a>(&'a mut self, sql: &str) -> Result<RowStream<'a, Self::Row>, DbError>;

    async fn rollback(self) -> Result<(), DbError>;
}

/// Writes one database row into a pre-allocated buffer slot.
///
/// Slots are reused across batches, so implementations should overwrite every
/// field they own.
pub trait DecodeRow<R>: Send {
    fn decode_row(&mut self, row: &R) -> Result<(), DecodeError>;
}
