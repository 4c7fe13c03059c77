//! sqlroute
//!
//! Connection lifecycle and execution routing beneath a SQL facade: per-task
//! connection registry, transaction pinning, pooled or ad-hoc connection
//! sourcing, and an optional bridge that runs statements on a remote backend.

pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod facade;
pub mod models;

pub use config::{Config, Settings};
pub use db::TaskIdentity;
pub use error::{DbError, DbResult};
pub use facade::{Database, DatabaseBuilder};
