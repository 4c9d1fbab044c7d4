//! Conversions between `taskmesh-store` row structs and the domain types in
//! [`crate::model`]. The store never depends on the domain model — this
//! module is the only place that bridges the two.

use std::str::FromStr;

use taskmesh_registry::{Role, ServerEndpoint};
use taskmesh_store::models::{DependEdgeRow, InstanceRow, JobRow, TaskRow, WorkflowEdgeRow};

use crate::model::{
    CollisionStrategy, DependEdge, ExecuteState, Instance, InstanceAttach, Job, JobState, JobType,
    RetryType, RouteStrategy, RunState, RunType, Task, TriggerType, WorkflowEdge,
};
use crate::EngineError;

impl TryFrom<JobRow> for Job {
    type Error = EngineError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            job_id: row.job_id,
            group: row.group_name,
            job_type: JobType::from_str(&row.job_type)?,
            job_state: JobState::from_str(&row.job_state)?,
            trigger_type: TriggerType::from_str(&row.trigger_type)?,
            trigger_value: row.trigger_value,
            route_strategy: RouteStrategy::from_str(&row.route_strategy)?,
            retry_type: RetryType::from_str(&row.retry_type)?,
            retry_count: row.retry_count.max(0) as u32,
            retry_interval_ms: row.retry_interval_ms,
            collision_strategy: CollisionStrategy::from_str(&row.collision_strategy)?,
            executor_text: row.executor_text,
            job_param: row.job_param,
            next_trigger_time: row.next_trigger_time,
            last_trigger_time: row.last_trigger_time,
        })
    }
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        JobRow {
            job_id: job.job_id,
            group_name: job.group.clone(),
            job_type: job.job_type.to_string(),
            job_state: job.job_state.to_string(),
            trigger_type: job.trigger_type.to_string(),
            trigger_value: job.trigger_value.clone(),
            route_strategy: job.route_strategy.to_string(),
            retry_type: job.retry_type.to_string(),
            retry_count: job.retry_count as i32,
            retry_interval_ms: job.retry_interval_ms,
            collision_strategy: job.collision_strategy.to_string(),
            executor_text: job.executor_text.clone(),
            job_param: job.job_param.clone(),
            next_trigger_time: job.next_trigger_time,
            last_trigger_time: job.last_trigger_time,
        }
    }
}

impl TryFrom<InstanceRow> for Instance {
    type Error = EngineError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        let attach = match row.attach {
            Some(v) => serde_json::from_value(v).map_err(|e| EngineError::DataInvalid(e.to_string()))?,
            None => InstanceAttach::default(),
        };
        Ok(Instance {
            instance_id: row.instance_id,
            job_id: row.job_id,
            rnstance_id: row.rnstance_id,
            pnstance_id: row.pnstance_id,
            wnstance_id: row.wnstance_id,
            run_type: RunType::from_str(&row.run_type)?,
            trigger_time: row.trigger_time,
            run_state: RunState::try_from(row.run_state)?,
            run_start_time: row.run_start_time,
            run_end_time: row.run_end_time,
            retried_count: row.retried_count.max(0) as u32,
            version: row.version,
            attach,
        })
    }
}

impl From<&Instance> for InstanceRow {
    fn from(instance: &Instance) -> Self {
        InstanceRow {
            instance_id: instance.instance_id,
            job_id: instance.job_id,
            rnstance_id: instance.rnstance_id,
            pnstance_id: instance.pnstance_id,
            wnstance_id: instance.wnstance_id,
            run_type: instance.run_type.to_string(),
            trigger_time: instance.trigger_time,
            run_state: instance.run_state.as_i16(),
            run_start_time: instance.run_start_time,
            run_end_time: instance.run_end_time,
            retried_count: instance.retried_count as i32,
            version: instance.version,
            attach: serde_json::to_value(&instance.attach).ok(),
        }
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = EngineError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let worker = row
            .worker
            .as_deref()
            .and_then(|w| ServerEndpoint::from_wire(Role::Worker, w));
        Ok(Task {
            task_id: row.task_id,
            instance_id: row.instance_id,
            task_no: row.task_no.max(0) as u32,
            task_count: row.task_count.max(0) as u32,
            task_param: row.task_param,
            execute_state: ExecuteState::try_from(row.execute_state)?,
            worker,
            execute_start_time: row.execute_start_time,
            execute_end_time: row.execute_end_time,
            execute_snapshot: row.execute_snapshot,
            dispatch_failed_count: row.dispatch_failed_count.max(0) as u32,
            error_msg: row.error_msg,
        })
    }
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        TaskRow {
            task_id: task.task_id,
            instance_id: task.instance_id,
            task_no: task.task_no as i32,
            task_count: task.task_count as i32,
            task_param: task.task_param.clone(),
            execute_state: task.execute_state.as_i16(),
            worker: task.worker.as_ref().map(ServerEndpoint::to_wire),
            execute_start_time: task.execute_start_time,
            execute_end_time: task.execute_end_time,
            execute_snapshot: task.execute_snapshot.clone(),
            dispatch_failed_count: task.dispatch_failed_count as i32,
            error_msg: task.error_msg.clone(),
        }
    }
}

impl TryFrom<WorkflowEdgeRow> for WorkflowEdge {
    type Error = EngineError;

    fn try_from(row: WorkflowEdgeRow) -> Result<Self, Self::Error> {
        Ok(WorkflowEdge {
            wnstance_id: row.wnstance_id,
            source_node: row.source_node,
            target_node: row.target_node,
            sequence: row.sequence.max(0) as u32,
            run_state: RunState::try_from(row.run_state)?,
            instance_id: row.instance_id,
        })
    }
}

impl From<&WorkflowEdge> for WorkflowEdgeRow {
    fn from(edge: &WorkflowEdge) -> Self {
        WorkflowEdgeRow {
            wnstance_id: edge.wnstance_id,
            source_node: edge.source_node.clone(),
            target_node: edge.target_node.clone(),
            sequence: edge.sequence as i32,
            run_state: edge.run_state.as_i16(),
            instance_id: edge.instance_id,
        }
    }
}

impl From<DependEdgeRow> for DependEdge {
    fn from(row: DependEdgeRow) -> Self {
        DependEdge {
            parent_job_id: row.parent_job_id,
            child_job_id: row.child_job_id,
            sequence: row.sequence.max(0) as u32,
        }
    }
}
