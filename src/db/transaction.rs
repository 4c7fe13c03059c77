//! Transaction coordination.
//!
//! [`TransactionCoordinator::run`] pins one dedicated connection to the calling
//! task for the duration of a unit of work:
//!
//! 1. acquire a dedicated connection (pooled or ad-hoc, never a bound one)
//! 2. mark it transactional and bind it to the task
//! 3. begin
//! 4. run the work; facade calls made by the task resolve to the bound handle
//! 5. commit and release, or roll back and release with the error attached
//! 6. unmark and unbind, on every exit path
//!
//! Step 6 lives in a drop guard, so it also runs if the work panics or the
//! future is dropped before completion.

use crate::db::connection::ConnectionHandle;
use crate::db::router::ConnectionRouter;
use crate::db::task::TaskIdentity;
use crate::db::task_registry::TaskRegistry;
use crate::error::{DbError, DbResult};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    router: Arc<ConnectionRouter>,
}

impl TransactionCoordinator {
    pub fn new(router: Arc<ConnectionRouter>) -> Self {
        Self { router }
    }

    /// Run `work` inside a transaction bound to `identity`.
    ///
    /// Nested use on a task that already has an open transaction is rejected
    /// before any connection is acquired.
    pub async fn run<F, Fut, T>(&self, identity: TaskIdentity, work: F) -> DbResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let registry = self.router.registry();
        if let Some(outer) = registry.lookup(identity) {
            return Err(DbError::transaction(format!(
                "Task {} already has an open transaction on connection {}; nested transactions are not supported",
                identity,
                outer.id()
            )));
        }

        let handle = self.router.acquire_dedicated(identity).await?;
        handle.set_transactional(true);
        if !registry.bind(identity, handle.clone()).await {
            // bind() already released the handle
            handle.set_transactional(false);
            return Err(DbError::transaction(format!(
                "Task {} was bound to another transaction concurrently",
                identity
            )));
        }
        let mut binding = BindingGuard {
            registry: registry.clone(),
            identity,
            handle: handle.clone(),
            finished: false,
        };

        if let Err(err) = handle.begin().await {
            error!(task = %identity, handle_id = %handle.id(), error = %err, "Failed to begin transaction");
            handle.release(Some(&err)).await;
            binding.finished = true;
            return Err(err);
        }
        info!(task = %identity, handle_id = %handle.id(), origin = %handle.origin(), "Transaction started");

        let result = match work().await {
            Ok(value) => match handle.commit().await {
                Ok(()) => {
                    info!(task = %identity, handle_id = %handle.id(), "Transaction committed");
                    handle.release(None).await;
                    Ok(value)
                }
                Err(err) => {
                    error!(task = %identity, handle_id = %handle.id(), error = %err, "Commit failed");
                    if let Err(rollback_err) = handle.rollback().await {
                        warn!(task = %identity, error = %rollback_err, "Rollback after failed commit also failed");
                    }
                    handle.release(Some(&err)).await;
                    Err(err)
                }
            },
            Err(cause) => {
                if let Err(rollback_err) = handle.rollback().await {
                    warn!(task = %identity, handle_id = %handle.id(), error = %rollback_err, "Rollback failed");
                }
                let err = DbError::rolled_back(cause);
                error!(
                    task = %identity,
                    handle_id = %handle.id(),
                    error = %err,
                    "Transaction rolled back"
                );
                handle.release(Some(&err)).await;
                Err(err)
            }
        };

        binding.finished = true;
        result
    }
}

/// Unmarks and unbinds the transaction's handle when dropped.
struct BindingGuard {
    registry: Arc<TaskRegistry>,
    identity: TaskIdentity,
    handle: Arc<ConnectionHandle>,
    /// False if the work never reached commit/rollback (panic or cancellation).
    finished: bool,
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        self.handle.set_transactional(false);
        self.registry.unbind_handle(self.identity, &self.handle);

        if self.finished || !self.handle.is_live() {
            return;
        }

        // Interrupted mid-transaction: discard the connection so the open
        // transaction dies with it instead of returning to a pool.
        warn!(
            task = %self.identity,
            handle_id = %self.handle.id(),
            "Transaction interrupted before completion; closing its connection"
        );
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let handle = Arc::clone(&self.handle);
            runtime.spawn(async move {
                handle.close().await;
            });
        }
    }
}
