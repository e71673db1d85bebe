//! Iterate over arbitrarily large Postgres result sets in fixed-size batches.
//!
//! A [`CursorIterator`] declares a server-side cursor inside a transaction
//! and refills a caller-provided buffer with `FETCH <n>` on demand, so only one
//! batch of rows is ever held in memory. The transaction is never committed;
//! it is rolled back once the cursor is drained or the iterator is closed.

pub mod config;
pub mod connector;
pub mod error;
pub mod iterator;
pub mod postgres;
pub mod sql;


pub use config::CursorConfig;
pub use connector::{Connector, CursorTransaction, DecodeRow, RowOf, RowStream};
pub use error::{BuildError, ConfigError, CursorError, DbError, DecodeError, Operation};
pub use iterator::{
    CursorIterator,
    builder::CursorIteratorBuilder,
    state::{CursorState, Step},
};
pub use postgres::{PgConnector, PgParam, PgParamStore, PgTransaction, decode_column};
