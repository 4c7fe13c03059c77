//! In-memory doubles for the driver, pool and connector contracts.
//!
//! The fake database is a list of string values. Statements understood:
//!
//! - `INSERT` appends the first parameter
//! - `SELECT values` returns one `{"value": ..}` row per value
//! - `SELECT count` returns `{"count": n}`
//! - `SELECT connection` returns `{"connection": serial}` for the serving connection
//! - `FAIL` raises a database error
//!
//! Writes made inside a transaction stay private to that connection until commit.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use sqlroute::db::{ConnectionPool, Connector, DriverConnection};
use sqlroute::models::{ExecuteOutcome, QueryParam, Row};
use sqlroute::{Database, DbError, DbResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Default)]
pub struct Stats {
    pub opened: AtomicUsize,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub released_with_error: AtomicUsize,
    pub closed: AtomicUsize,
    pub begun: AtomicUsize,
    pub committed: AtomicUsize,
    pub rolled_back: AtomicUsize,
    serial: AtomicUsize,
}

impl Stats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Shared state of the fake database.
#[derive(Debug, Default, Clone)]
pub struct FakeBackend {
    pub stats: Arc<Stats>,
    pub committed: Arc<Mutex<Vec<String>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> Vec<String> {
        self.committed.lock().unwrap().clone()
    }

    fn connection(&self, permit: Option<OwnedSemaphorePermit>) -> FakeConnection {
        FakeConnection {
            serial: self.stats.serial.fetch_add(1, Ordering::SeqCst) + 1,
            backend: self.clone(),
            pending: None,
            _permit: permit,
        }
    }
}

pub struct FakeConnection {
    serial: usize,
    backend: FakeBackend,
    pending: Option<Vec<String>>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl FakeConnection {
    fn visible(&self) -> Vec<String> {
        match &self.pending {
            Some(pending) => pending.clone(),
            None => self.backend.values(),
        }
    }
}

#[async_trait]
impl DriverConnection for FakeConnection {
    async fn fetch_all(&mut self, sql: &str, _params: &[QueryParam]) -> DbResult<Vec<Row>> {
        let rows = match sql {
            "SELECT values" => self.visible().into_iter().map(|v| json!({ "value": v })).collect(),
            "SELECT count" => vec![json!({ "count": self.visible().len() })],
            "SELECT connection" => vec![json!({ "connection": self.serial })],
            "FAIL" => return Err(DbError::database("fake failure", None, "none")),
            other => return Err(DbError::database(format!("unknown statement: {}", other), None, "none")),
        };
        Ok(rows
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect())
    }

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecuteOutcome> {
        if sql == "FAIL" {
            return Err(DbError::database("fake failure", None, "none"));
        }
        if !sql.starts_with("INSERT") {
            return Ok(ExecuteOutcome::default());
        }
        let value = match params.first() {
            Some(QueryParam::String(s)) => s.clone(),
            Some(other) => format!("{:?}", other),
            None => String::new(),
        };
        let len = match &mut self.pending {
            Some(pending) => {
                pending.push(value);
                pending.len()
            }
            None => {
                let mut committed = self.backend.committed.lock().unwrap();
                committed.push(value);
                committed.len()
            }
        };
        Ok(ExecuteOutcome {
            rows_affected: 1,
            last_insert_id: Some(len as i64),
        })
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.backend.stats.begun.fetch_add(1, Ordering::SeqCst);
        self.pending = Some(self.backend.values());
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.backend.stats.committed.fetch_add(1, Ordering::SeqCst);
        if let Some(pending) = self.pending.take() {
            *self.backend.committed.lock().unwrap() = pending;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.backend.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
        self.pending = None;
        Ok(())
    }

    async fn release(self: Box<Self>, error: Option<&DbError>) {
        self.backend.stats.released.fetch_add(1, Ordering::SeqCst);
        if error.is_some() {
            self.backend
                .stats
                .released_with_error
                .fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn close(self: Box<Self>) {
        self.backend.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pool with a fixed number of slots; `acquire` waits for a free slot forever.
pub struct FakePool {
    backend: FakeBackend,
    slots: Arc<Semaphore>,
}

impl FakePool {
    pub fn new(backend: FakeBackend, size: usize) -> Self {
        Self {
            backend,
            slots: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[async_trait]
impl ConnectionPool for FakePool {
    async fn acquire(&self) -> DbResult<Box<dyn DriverConnection>> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DbError::connection("pool closed", "none"))?;
        self.backend.stats.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.backend.connection(Some(permit))))
    }
}

pub struct FakeConnector {
    backend: FakeBackend,
}

impl FakeConnector {
    pub fn new(backend: FakeBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self) -> DbResult<Box<dyn DriverConnection>> {
        self.backend.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.backend.connection(None)))
    }
}

/// Database over the fake backend with a pool of `pool_size` connections.
pub fn pooled_database(backend: &FakeBackend, pool_size: usize) -> (Database, Arc<FakePool>) {
    let pool = Arc::new(FakePool::new(backend.clone(), pool_size));
    let db = Database::builder(Arc::new(FakeConnector::new(backend.clone())))
        .pool(pool.clone())
        .build();
    (db, pool)
}

pub fn string(value: &str) -> QueryParam {
    QueryParam::String(value.to_string())
}
