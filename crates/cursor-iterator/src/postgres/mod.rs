pub mod connector;
pub mod params;
pub mod utils;

pub use connector::{PgConnector, PgTransaction, decode_column};
pub use params::{PgParam, PgParamStore};
