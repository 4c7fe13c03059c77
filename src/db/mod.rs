//! Connection lifecycle and routing.
//!
//! This module provides:
//! - The driver, pool and connector contracts plus the exclusive [`ConnectionHandle`]
//! - Task identities and the per-task [`TaskRegistry`]
//! - The [`ConnectionRouter`] deciding where each call's connection comes from
//! - The [`TransactionCoordinator`] pinning one connection from begin to commit/rollback
//! - sqlx-backed implementations of the contracts for MySQL, PostgreSQL and SQLite

pub mod connection;
#[macro_use]
pub mod macros;
pub mod params;
pub mod router;
pub mod sqlx_driver;
pub mod task;
pub mod task_registry;
pub mod transaction;
pub mod types;

pub use connection::{
    ConnectionHandle, ConnectionOrigin, ConnectionPool, Connector, DriverConnection,
};
pub use router::{ConnectionRouter, POOL_ACQUIRE_TIMEOUT, RoutedConnection};
pub use sqlx_driver::{SqlxConnection, SqlxConnector, SqlxPool};
pub use task::TaskIdentity;
pub use task_registry::TaskRegistry;
pub use transaction::TransactionCoordinator;
