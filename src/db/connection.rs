//! Driver contracts and the exclusive connection handle.
//!
//! A [`DriverConnection`] is one live database connection. It knows how to give
//! itself back: a pooled connection returns to its pool, an ad-hoc connection is
//! closed. [`ConnectionHandle`] wraps exactly one of them and carries the
//! `transactional` flag the router and the transaction coordinator agree on.

use crate::error::{DbError, DbResult};
use crate::models::{ExecuteOutcome, QueryParam, Row};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// One live driver connection.
#[async_trait]
pub trait DriverConnection: Send {
    /// Run a statement and collect every row.
    async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>>;

    /// Run a statement that does not return rows.
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecuteOutcome>;

    async fn begin(&mut self) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Hand the connection back to where it came from.
    ///
    /// `error` is the failure that ended the call, if any. Pools use it to decide
    /// whether the connection may be recycled.
    async fn release(self: Box<Self>, error: Option<&DbError>);

    /// Close the connection without recycling it.
    async fn close(self: Box<Self>);
}

/// Source of pooled connections. The router bounds how long `acquire` may wait.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    async fn acquire(&self) -> DbResult<Box<dyn DriverConnection>>;
}

/// Opens ad-hoc connections from static settings.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> DbResult<Box<dyn DriverConnection>>;
}

/// Where a handle's connection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOrigin {
    Pooled,
    AdHoc,
}

impl std::fmt::Display for ConnectionOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pooled => write!(f, "pooled"),
            Self::AdHoc => write!(f, "ad-hoc"),
        }
    }
}

/// Exclusive owner of one driver connection.
///
/// Operations lock the inner connection, so statements issued through one
/// handle run in program order. Once released or closed the handle is dead and
/// every operation fails with a connection error.
pub struct ConnectionHandle {
    id: String,
    origin: ConnectionOrigin,
    opened_at: DateTime<Utc>,
    transactional: AtomicBool,
    live: AtomicBool,
    connection: Mutex<Option<Box<dyn DriverConnection>>>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("opened_at", &self.opened_at)
            .field("transactional", &self.is_transactional())
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    pub fn new(connection: Box<dyn DriverConnection>, origin: ConnectionOrigin) -> Arc<Self> {
        Arc::new(Self {
            id: generate_handle_id(),
            origin,
            opened_at: Utc::now(),
            transactional: AtomicBool::new(false),
            live: AtomicBool::new(true),
            connection: Mutex::new(Some(connection)),
        })
    }

    /// Identifier for log correlation.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn origin(&self) -> ConnectionOrigin {
        self.origin
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional.load(Ordering::Acquire)
    }

    pub fn set_transactional(&self, transactional: bool) {
        self.transactional.store(transactional, Ordering::Release);
    }

    /// False once the connection has been released or closed.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or_else(|| released_error(&self.id))?;
        conn.fetch_all(sql, params).await
    }

    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecuteOutcome> {
        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or_else(|| released_error(&self.id))?;
        conn.execute(sql, params).await
    }

    pub async fn begin(&self) -> DbResult<()> {
        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or_else(|| released_error(&self.id))?;
        conn.begin().await
    }

    pub async fn commit(&self) -> DbResult<()> {
        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or_else(|| released_error(&self.id))?;
        conn.commit().await
    }

    pub async fn rollback(&self) -> DbResult<()> {
        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or_else(|| released_error(&self.id))?;
        conn.rollback().await
    }

    /// Give the connection back to its origin. Idempotent.
    ///
    /// This ignores the `transactional` flag; ordinary call paths go through
    /// [`ConnectionRouter::release`](crate::db::ConnectionRouter::release) instead.
    pub async fn release(&self, error: Option<&DbError>) {
        let taken = self.take().await;
        if let Some(conn) = taken {
            debug!(
                handle_id = %self.id,
                origin = %self.origin,
                with_error = error.is_some(),
                "Releasing connection"
            );
            conn.release(error).await;
        }
    }

    /// Close the connection without recycling it. Idempotent.
    pub async fn close(&self) {
        let taken = self.take().await;
        if let Some(conn) = taken {
            debug!(handle_id = %self.id, origin = %self.origin, "Closing connection");
            conn.close().await;
        }
    }

    async fn take(&self) -> Option<Box<dyn DriverConnection>> {
        let mut guard = self.connection.lock().await;
        self.live.store(false, Ordering::Release);
        guard.take()
    }
}

fn released_error(handle_id: &str) -> DbError {
    DbError::connection(
        format!("Connection handle {} has already been released", handle_id),
        "Acquire a new connection for this call",
    )
}

fn generate_handle_id() -> String {
    format!("conn_{}", uuid::Uuid::new_v4().simple())
}
