//! Per-call connection sourcing.
//!
//! For every facade call the router picks, in order:
//! 1. the connection bound to the calling task by an open transaction,
//! 2. a pooled connection (pooling enabled and a concurrent scheduler present),
//! 3. a fresh ad-hoc connection.
//!
//! Only connections from 2 and 3 are released when the call finishes; a bound
//! connection belongs to the transaction coordinator.

use crate::db::connection::{ConnectionHandle, ConnectionOrigin, ConnectionPool, Connector};
use crate::db::task::TaskIdentity;
use crate::db::task_registry::TaskRegistry;
use crate::error::{DbError, DbResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long a call may wait for a pooled connection.
pub const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// A connection obtained for one call.
#[derive(Debug, Clone)]
pub struct RoutedConnection {
    pub handle: Arc<ConnectionHandle>,
    /// True when the handle came from the task's open transaction.
    pub transactional: bool,
}

pub struct ConnectionRouter {
    registry: Arc<TaskRegistry>,
    pool: Option<Arc<dyn ConnectionPool>>,
    connector: Arc<dyn Connector>,
    acquire_timeout: Duration,
}

impl std::fmt::Debug for ConnectionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRouter")
            .field("registry", &self.registry)
            .field("pooling", &self.pool.is_some())
            .field("acquire_timeout", &self.acquire_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionRouter {
    /// Router that opens ad-hoc connections only.
    pub fn new(registry: Arc<TaskRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            pool: None,
            connector,
            acquire_timeout: POOL_ACQUIRE_TIMEOUT,
        }
    }

    /// Enable pooled acquisition for tasks running on a concurrent scheduler.
    pub fn with_pool(mut self, pool: Arc<dyn ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Whether calls from `identity` draw from the pool.
    pub fn uses_pool(&self, identity: TaskIdentity) -> bool {
        self.pool.is_some() && identity.is_concurrent()
    }

    /// Get the connection this call should run on.
    pub async fn acquire(&self, identity: TaskIdentity) -> DbResult<RoutedConnection> {
        if let Some(handle) = self.registry.lookup(identity) {
            debug!(task = %identity, handle_id = %handle.id(), "Using transactional connection");
            return Ok(RoutedConnection {
                handle,
                transactional: true,
            });
        }

        let handle = self.acquire_dedicated(identity).await?;
        Ok(RoutedConnection {
            handle,
            transactional: false,
        })
    }

    /// Get a connection that is not shared with any binding: pooled when the
    /// task runs on a concurrent scheduler and pooling is enabled, ad-hoc
    /// otherwise.
    pub async fn acquire_dedicated(&self, identity: TaskIdentity) -> DbResult<Arc<ConnectionHandle>> {
        match &self.pool {
            Some(pool) if identity.is_concurrent() => {
                let connection = tokio::time::timeout(self.acquire_timeout, pool.acquire())
                    .await
                    .map_err(|_| {
                        DbError::connection(
                            format!(
                                "No pooled connection became available within {:.1}s",
                                self.acquire_timeout.as_secs_f64()
                            ),
                            "The pool is exhausted; retry later or raise max_connections",
                        )
                    })??;
                let handle = ConnectionHandle::new(connection, ConnectionOrigin::Pooled);
                debug!(task = %identity, handle_id = %handle.id(), "Acquired pooled connection");
                Ok(handle)
            }
            _ => {
                let connection = self.connector.open().await?;
                let handle = ConnectionHandle::new(connection, ConnectionOrigin::AdHoc);
                debug!(task = %identity, handle_id = %handle.id(), "Opened ad-hoc connection");
                Ok(handle)
            }
        }
    }

    /// Release a connection at the end of a call.
    ///
    /// No-op for transactional handles; their release belongs to the
    /// transaction coordinator.
    pub async fn release(&self, handle: &ConnectionHandle, error: Option<&DbError>) {
        if handle.is_transactional() {
            return;
        }
        handle.release(error).await;
    }

    /// Release `routed` with the call's error attached, returning the result unchanged.
    pub async fn finish<T>(&self, routed: RoutedConnection, result: DbResult<T>) -> DbResult<T> {
        self.release(&routed.handle, result.as_ref().err()).await;
        result
    }
}
