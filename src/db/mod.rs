mod connection;
mod query;

pub use connection::*;
pub use query::*;
