//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the scheduling state machine (DAG validation, model
/// decoding, and transition execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Model decoding ------
    #[error("unknown {0} discriminant: {1}")]
    UnknownDiscriminant(&'static str, i32),

    #[error("unknown {0} variant: '{1}'")]
    UnknownVariant(&'static str, String),

    // ------ Workflow DAG validation ------
    /// Two or more edges target the same node from different sources at the
    /// same sequence, or a node id collides with `START`/`END`.
    #[error("duplicate node id: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node that doesn't appear as a source or target
    /// elsewhere in the graph.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference { node_id: String, side: &'static str },

    #[error("workflow graph contains a cycle")]
    CycleDetected,

    // ------ Transition execution ------
    #[error("job {0} not found")]
    JobNotFound(i64),

    #[error("job {0} is disabled")]
    JobDisabled(i64),

    #[error("instance {0} not found")]
    InstanceNotFound(i64),

    #[error("task {0} not found")]
    TaskNotFound(i64),

    /// A CAS (version or state-guarded update) affected zero rows. The
    /// operation must be treated as a no-op: the caller retries on the next
    /// scanner sweep rather than escalating.
    #[error("concurrent modification: {0} did not match expected state")]
    CasConflict(String),

    /// Job param could not be split into at least one task.
    #[error("invalid split for job {job_id}: {reason}")]
    InvalidSplit { job_id: i64, reason: String },

    /// `triggerValue` could not be interpreted under the job's `triggerType`
    /// (malformed cron expression, non-numeric period/epoch value).
    #[error("invalid trigger value for job {job_id} ({trigger_type:?}): {reason}")]
    InvalidTriggerValue { job_id: i64, trigger_type: crate::model::TriggerType, reason: String },

    /// A referenced job or instance is missing from the store in a way that
    /// indicates data corruption rather than a race; the caller finalizes
    /// the instance as CANCELED with `errorMsg = "job missing"`.
    #[error("data invalid: {0}")]
    DataInvalid(String),

    #[error("persistence error: {0}")]
    Store(#[from] taskmesh_store::StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] taskmesh_registry::RegistryError),
}
