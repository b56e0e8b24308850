//! Driver-agnostic database connection pool (ambient DB layer
//! supplemented from `original_source/dbc`).

pub mod error;
pub mod pool;

pub use error::{DbcError, SqlException, SqlWarning};
pub use pool::{Connection, ConnectionPool, Driver, PoolOptions, PooledConnection};
