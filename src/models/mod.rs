//! Data models shared by the router, the facade and the remote bridge.

pub mod command;
pub mod connection;
pub mod query;

// Re-export commonly used types
pub use command::{CommandDescriptor, CommandKind};
pub use connection::{ConnectionConfigError, DatabaseType};
pub use query::{ExecuteOutcome, QueryParam, Row, params_from_json, scalar_i64, sum_field};
