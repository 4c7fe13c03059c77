//! Facade operations.
//!
//! Every operation takes the [`TaskIdentity`] it runs on behalf of and picks a
//! route for the call:
//!
//! - remote, when a bridge is configured and the task has no open transaction
//! - local otherwise, on the connection the router hands out
//!
//! Transactions never cross to the remote side: while a task holds a binding all
//! of its calls stay on the bound connection.

use crate::bridge::RemoteExecutionBridge;
use crate::bridge::protocol::{decode_integer, decode_row, decode_rows, decode_sum};
use crate::config::{RemoteSettings, Settings};
use crate::db::{
    ConnectionPool, ConnectionRouter, Connector, SqlxConnector, SqlxPool, TaskIdentity,
    TaskRegistry, TransactionCoordinator,
};
use crate::error::{DbError, DbResult};
use crate::models::{CommandKind, ExecuteOutcome, QueryParam, Row, scalar_i64, sum_field};
use std::backtrace::Backtrace;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Entry point for running SQL. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    router: Arc<ConnectionRouter>,
    coordinator: TransactionCoordinator,
    bridge: Option<RemoteExecutionBridge>,
    log_queries: bool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("router", &self.inner.router)
            .field("bridge", &self.inner.bridge)
            .field("log_queries", &self.inner.log_queries)
            .finish()
    }
}

impl Database {
    /// Build a database from settings, creating the pool when pooling is enabled.
    pub async fn connect(settings: &Settings) -> DbResult<Self> {
        let connector = Arc::new(SqlxConnector::new(settings.database.clone()));
        let mut builder = Self::builder(connector).log_queries(settings.log_queries);
        if settings.pooling {
            let pool = SqlxPool::connect(&settings.database).await?;
            builder = builder.pool(Arc::new(pool));
        }
        if let Some(remote) = &settings.remote {
            info!(addr = %remote.address(), "Remote execution enabled");
            builder = builder.remote(remote.clone());
        }
        Ok(builder.build())
    }

    pub fn builder(connector: Arc<dyn Connector>) -> DatabaseBuilder {
        DatabaseBuilder {
            registry: None,
            connector,
            pool: None,
            bridge: None,
            log_queries: false,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        self.inner.router.registry()
    }

    pub fn router(&self) -> &Arc<ConnectionRouter> {
        &self.inner.router
    }

    pub fn has_remote(&self) -> bool {
        self.inner.bridge.is_some()
    }

    /// All rows of a query.
    pub async fn select(
        &self,
        task: TaskIdentity,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<Row>> {
        let kind = CommandKind::Select;
        let result = match self.remote_route(task, kind.name(), sql, params) {
            Some(bridge) => self
                .dispatch(bridge, task, kind, sql, params)
                .await
                .map(|payload| decode_rows(&payload)),
            None => self.fetch_local(task, sql, params).await,
        };
        self.observe(task, kind.name(), sql, result)
    }

    /// The first row of a query, if any.
    pub async fn first(
        &self,
        task: TaskIdentity,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<Row>> {
        let kind = CommandKind::First;
        let result = match self.remote_route(task, kind.name(), sql, params) {
            Some(bridge) => self
                .dispatch(bridge, task, kind, sql, params)
                .await
                .map(|payload| decode_row(&payload)),
            None => self
                .fetch_local(task, sql, params)
                .await
                .map(|rows| rows.into_iter().next()),
        };
        self.observe(task, kind.name(), sql, result)
    }

    /// Integer in the first column of the first row (e.g. `SELECT COUNT(*) ...`).
    pub async fn count(&self, task: TaskIdentity, sql: &str, params: &[QueryParam]) -> DbResult<i64> {
        let kind = CommandKind::Count;
        let result = match self.remote_route(task, kind.name(), sql, params) {
            Some(bridge) => self
                .dispatch(bridge, task, kind, sql, params)
                .await
                .map(|payload| decode_integer(&payload)),
            None => self
                .fetch_local(task, sql, params)
                .await
                .map(|rows| rows.first().map(scalar_i64).unwrap_or(0)),
        };
        self.observe(task, kind.name(), sql, result)
    }

    /// The `sum` column of the first row (e.g. `SELECT SUM(x) AS sum ...`).
    pub async fn sum(&self, task: TaskIdentity, sql: &str, params: &[QueryParam]) -> DbResult<f64> {
        let kind = CommandKind::Sum;
        let result = match self.remote_route(task, kind.name(), sql, params) {
            Some(bridge) => self
                .dispatch(bridge, task, kind, sql, params)
                .await
                .map(|payload| decode_sum(&payload)),
            None => self
                .fetch_local(task, sql, params)
                .await
                .map(|rows| rows.first().map(sum_field).unwrap_or(0.0)),
        };
        self.observe(task, kind.name(), sql, result)
    }

    /// Run an insert and return the generated id, or 0 when the driver reports none.
    pub async fn insert(&self, task: TaskIdentity, sql: &str, params: &[QueryParam]) -> DbResult<i64> {
        let kind = CommandKind::Insert;
        let result = match self.remote_route(task, kind.name(), sql, params) {
            Some(bridge) => self
                .dispatch(bridge, task, kind, sql, params)
                .await
                .map(|payload| decode_integer(&payload)),
            None => self
                .execute_local(task, sql, params)
                .await
                .map(|outcome| outcome.last_insert_id.unwrap_or(0)),
        };
        self.observe(task, kind.name(), sql, result)
    }

    /// Run an update and return the affected row count.
    pub async fn update(&self, task: TaskIdentity, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let operation = CommandKind::Update.name();
        let result = self.affected_rows(task, operation, sql, params).await;
        self.observe(task, operation, sql, result)
    }

    /// Run a delete and return the affected row count. Remotely this travels as
    /// an update; the protocol has no separate delete kind.
    pub async fn delete(&self, task: TaskIdentity, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let result = self.affected_rows(task, "delete", sql, params).await;
        self.observe(task, "delete", sql, result)
    }

    /// Run a statement and discard whatever it returns.
    pub async fn execute(&self, task: TaskIdentity, sql: &str, params: &[QueryParam]) -> DbResult<()> {
        let kind = CommandKind::Execute;
        let result = match self.remote_route(task, kind.name(), sql, params) {
            Some(bridge) => self.dispatch(bridge, task, kind, sql, params).await.map(|_| ()),
            None => self.execute_local(task, sql, params).await.map(|_| ()),
        };
        self.observe(task, kind.name(), sql, result)
    }

    /// Run `work` inside a transaction pinned to `task`.
    ///
    /// `work` receives a clone of this database; calls it makes with the same
    /// `task` run on the transaction's connection. The transaction commits when
    /// `work` returns `Ok` and rolls back otherwise.
    ///
    /// ```ignore
    /// db.transaction(task, |tx| async move {
    ///     tx.update(task, "UPDATE accounts SET balance = balance - ? WHERE id = ?", &[amount, from]).await?;
    ///     tx.update(task, "UPDATE accounts SET balance = balance + ? WHERE id = ?", &[amount, to]).await?;
    ///     Ok(())
    /// })
    /// .await?;
    /// ```
    pub async fn transaction<F, Fut, T>(&self, task: TaskIdentity, work: F) -> DbResult<T>
    where
        F: FnOnce(Database) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let db = self.clone();
        let result = self.inner.coordinator.run(task, move || work(db)).await;
        if let Err(err) = &result {
            log_failure(task, "transaction", "", err);
        }
        result
    }

    async fn affected_rows(
        &self,
        task: TaskIdentity,
        operation: &str,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let kind = CommandKind::Update;
        match self.remote_route(task, operation, sql, params) {
            Some(bridge) => self
                .dispatch(bridge, task, kind, sql, params)
                .await
                .map(|payload| decode_integer(&payload).max(0) as u64),
            None => self
                .execute_local(task, sql, params)
                .await
                .map(|outcome| outcome.rows_affected),
        }
    }

    /// The bridge to use for this call, or `None` to run locally.
    fn remote_route(
        &self,
        task: TaskIdentity,
        operation: &str,
        sql: &str,
        params: &[QueryParam],
    ) -> Option<&RemoteExecutionBridge> {
        let bridge = self
            .inner
            .bridge
            .as_ref()
            .filter(|_| self.registry().lookup(task).is_none());
        if self.inner.log_queries {
            let route = if bridge.is_some() { "remote" } else { "local" };
            info!(task = %task, operation, route, sql = %sql, params = ?params, "Executing statement");
        }
        bridge
    }

    async fn dispatch(
        &self,
        bridge: &RemoteExecutionBridge,
        task: TaskIdentity,
        kind: CommandKind,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<String> {
        bridge.dispatch(task, kind, sql, params).await.into_result()
    }

    async fn fetch_local(&self, task: TaskIdentity, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        let router = &self.inner.router;
        let routed = router.acquire(task).await?;
        let result = routed.handle.fetch_all(sql, params).await;
        router.finish(routed, result).await
    }

    async fn execute_local(
        &self,
        task: TaskIdentity,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecuteOutcome> {
        let router = &self.inner.router;
        let routed = router.acquire(task).await?;
        let result = routed.handle.execute(sql, params).await;
        router.finish(routed, result).await
    }

    fn observe<T: ResultSize>(
        &self,
        task: TaskIdentity,
        operation: &str,
        sql: &str,
        result: DbResult<T>,
    ) -> DbResult<T> {
        match &result {
            Ok(value) if self.inner.log_queries => {
                debug!(task = %task, operation, rows = value.result_size(), "Statement finished");
            }
            Ok(_) => {}
            Err(err) => log_failure(task, operation, sql, err),
        }
        result
    }
}

fn log_failure(task: TaskIdentity, operation: &str, sql: &str, err: &DbError) {
    let cause = std::error::Error::source(err).map(|s| s.to_string());
    error!(
        task = %task,
        operation,
        sql = %sql,
        error = %err,
        cause = ?cause,
        backtrace = %Backtrace::force_capture(),
        "Database operation failed"
    );
}

/// Number of rows a result stands for, for statement logging.
trait ResultSize {
    fn result_size(&self) -> u64;
}

impl ResultSize for Vec<Row> {
    fn result_size(&self) -> u64 {
        self.len() as u64
    }
}

impl ResultSize for Option<Row> {
    fn result_size(&self) -> u64 {
        self.is_some() as u64
    }
}

impl ResultSize for i64 {
    fn result_size(&self) -> u64 {
        1
    }
}

impl ResultSize for f64 {
    fn result_size(&self) -> u64 {
        1
    }
}

impl ResultSize for u64 {
    fn result_size(&self) -> u64 {
        *self
    }
}

impl ResultSize for () {
    fn result_size(&self) -> u64 {
        0
    }
}

/// Assembles a [`Database`] from its collaborators.
pub struct DatabaseBuilder {
    registry: Option<Arc<TaskRegistry>>,
    connector: Arc<dyn Connector>,
    pool: Option<Arc<dyn ConnectionPool>>,
    bridge: Option<RemoteExecutionBridge>,
    log_queries: bool,
}

impl DatabaseBuilder {
    /// Share an existing registry instead of creating one.
    pub fn registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn pool(mut self, pool: Arc<dyn ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn remote(self, settings: RemoteSettings) -> Self {
        self.bridge(RemoteExecutionBridge::new(settings))
    }

    pub fn bridge(mut self, bridge: RemoteExecutionBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn log_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn build(self) -> Database {
        let registry = self.registry.unwrap_or_default();
        let mut router = ConnectionRouter::new(registry, self.connector);
        if let Some(pool) = self.pool {
            router = router.with_pool(pool);
        }
        let router = Arc::new(router);
        Database {
            inner: Arc::new(Inner {
                coordinator: TransactionCoordinator::new(router.clone()),
                router,
                bridge: self.bridge,
                log_queries: self.log_queries,
            }),
        }
    }
}
