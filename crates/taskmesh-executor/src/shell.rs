//! `ShellExecutor` — runs a task's `executor_text` as a shell command line.
//!
//! `job_param` (if present) is appended as a single extra argument; the
//! task's JSON-encoded payload is not interpolated into the command, only
//! passed via the `TASKMESH_TASK_ID`/`TASKMESH_JOB_PARAM` environment
//! variables, so a hostile `job_param` can't break out of argument parsing.

use tokio::process::Command;

use crate::{ExecutionContext, ExecutorError, JobExecutor, TaskPayload, TaskReport};

pub struct ShellExecutor {
    pub shell: String,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self { shell: "/bin/sh".to_string() }
    }
}

#[async_trait::async_trait]
impl JobExecutor for ShellExecutor {
    async fn execute(&self, payload: TaskPayload, _ctx: &ExecutionContext) -> Result<TaskReport, ExecutorError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&payload.executor_text)
            .env("TASKMESH_TASK_ID", payload.task_id.to_string())
            .env("TASKMESH_JOB_PARAM", payload.job_param.clone().unwrap_or_default())
            .output()
            .await
            .map_err(|err| ExecutorError::Fatal(format!("failed to spawn shell: {err}")))?;

        if output.status.success() {
            Ok(TaskReport {
                output: Some(serde_json::json!({
                    "stdout": String::from_utf8_lossy(&output.stdout),
                })),
                snapshot: None,
            })
        } else {
            Err(ExecutorError::Retryable(format!(
                "shell exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )))
        }
    }
}
