//! Task identities.
//!
//! A [`TaskIdentity`] names the logical task a call runs on behalf of. Entry
//! points take it as an explicit argument; [`TaskIdentity::current`] derives
//! one from the tokio runtime for callers that do not track their own.

use std::hash::{DefaultHasher, Hash, Hasher};

/// Worker sentinel meaning "no concurrent scheduler".
pub const DETACHED_WORKER: i64 = -1;

/// Worker id assigned to tasks spawned on the tokio runtime. Tokio task ids are
/// unique per process, so one scheduler id is enough to keep keys distinct.
pub const TOKIO_WORKER: i64 = 0;

/// Composite `(worker, task)` key identifying the currently executing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskIdentity {
    worker_id: i64,
    task_id: u64,
}

impl TaskIdentity {
    pub fn new(worker_id: i64, task_id: u64) -> Self {
        Self { worker_id, task_id }
    }

    /// Identity used when no cooperative scheduler is present. Every detached
    /// identity shares the single global registry slot.
    pub fn detached() -> Self {
        Self {
            worker_id: DETACHED_WORKER,
            task_id: 0,
        }
    }

    /// Identity of the tokio task currently being polled, or the detached
    /// identity outside of any task (e.g. inside `block_on`).
    pub fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => Self::new(TOKIO_WORKER, task_id_to_u64(id)),
            None => Self::detached(),
        }
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Whether a cooperative scheduler is driving this task.
    pub fn is_concurrent(&self) -> bool {
        self.worker_id >= 0
    }
}

impl std::fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_concurrent() {
            write!(f, "{}:{}", self.worker_id, self.task_id)
        } else {
            write!(f, "global")
        }
    }
}

fn task_id_to_u64(id: tokio::task::Id) -> u64 {
    // Display renders the numeric id; hash it if that ever changes.
    id.to_string().parse().unwrap_or_else(|_| {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        hasher.finish()
    })
}
