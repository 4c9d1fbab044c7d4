//! Effects — the deferred, post-commit side of a state transition.
//!
//! Every transactional state-machine method returns an [`Effect`] instead of
//! performing dispatch itself. The caller commits the database transaction
//! first, then runs the effect. This avoids racing a worker's `startTask`
//! callback against a task row that isn't visible yet outside the
//! transaction (§5, "Dispatch RPCs are issued after transaction commit").
//!
//! `taskmesh-core` only describes effects; executing one (an HTTP RPC to a
//! worker) is `taskmesh-dispatch`'s job, so this crate never depends on the
//! RPC stack.

use crate::model::{Instance, Job, Task};

/// What a dispatch intent asks the worker to do with the named tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOperation {
    /// Normal admission: hand the tasks to the worker's timing wheel.
    Execute,
    /// Out-of-band request to pause currently-executing tasks.
    Pause,
    /// Out-of-band request to cancel currently-executing tasks.
    Cancel,
}

/// One group of tasks (all belonging to the same instance) that should be
/// sent through the dispatcher together.
#[derive(Debug, Clone)]
pub struct DispatchIntent {
    pub job: Job,
    pub instance: Instance,
    pub tasks: Vec<Task>,
    pub operation: DispatchOperation,
}

/// The full set of post-commit actions produced by a single state
/// transition. Most transitions produce zero or one intent; `PAUSE`/`CANCEL`
/// across a workflow can fan out to many node instances at once.
#[derive(Debug, Clone, Default)]
pub struct Effect {
    pub intents: Vec<DispatchIntent>,
}

impl Effect {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn single(intent: DispatchIntent) -> Self {
        Self { intents: vec![intent] }
    }

    pub fn merge(mut self, other: Effect) -> Self {
        self.intents.extend(other.intents);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

impl Extend<DispatchIntent> for Effect {
    fn extend<T: IntoIterator<Item = DispatchIntent>>(&mut self, iter: T) {
        self.intents.extend(iter);
    }
}
