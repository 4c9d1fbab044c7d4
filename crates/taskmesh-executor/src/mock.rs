//! `MockExecutor` — a test double for `JobExecutor`.
//!
//! Useful in unit and integration tests where a real executor implementation
//! is either unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::{traits::ExecutionContext, ExecutorError, JobExecutor, TaskPayload, TaskReport};

/// Behaviour injected into `MockExecutor` at construction time.
pub enum MockBehaviour {
    /// Succeed and return a specific JSON output.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Timeout` error.
    FailTimeout(String),
}

/// A mock executor that records every task it receives and returns a
/// programmer-specified result.
pub struct MockExecutor {
    /// Label used in test assertions.
    pub name: String,
    pub behaviour: MockBehaviour,
    /// All payloads seen by this executor (in call order).
    pub calls: Arc<Mutex<Vec<TaskPayload>>>,
}

impl MockExecutor {
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::ReturnValue(value),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailFatal(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailRetryable(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_timeout(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailTimeout(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times this executor has run a task.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl JobExecutor for MockExecutor {
    async fn execute(
        &self,
        payload: TaskPayload,
        _ctx: &ExecutionContext,
    ) -> Result<TaskReport, ExecutorError> {
        self.calls.lock().unwrap().push(payload);

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(TaskReport {
                output: Some(json!({ "executor": self.name, "result": v })),
                snapshot: None,
            }),
            MockBehaviour::FailRetryable(msg) => Err(ExecutorError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(ExecutorError::Fatal(msg.clone())),
            MockBehaviour::FailTimeout(msg) => Err(ExecutorError::Timeout(msg.clone())),
        }
    }
}
