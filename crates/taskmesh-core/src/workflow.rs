//! Workflow DAG progression — the pure decision logic behind §4.2.
//!
//! `taskmesh-core`'s async layer loads a workflow's edges, calls [`advance`]
//! (and persists whatever it returns), then creates any newly-ready node
//! instances. Keeping the fold logic pure means it can be exercised directly
//! in unit tests without a database.

use serde::Deserialize;

use crate::dag::{predecessors, successors};
use crate::model::{RunState, WorkflowEdge, END_NODE, START_NODE};
use crate::EngineError;

/// The outcome of folding one node's completion into the rest of the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStep {
    /// Every edge is now terminal; the lead instance should end in this state.
    Terminal(RunState),
    /// These target nodes are newly unblocked and should get fresh node instances.
    Ready(Vec<String>),
    /// Still waiting on other in-flight nodes.
    Pending,
}

/// Fold `completed_node`'s terminal state into the edge set.
///
/// Mutates `edges` in place (marking the completed edge, and any
/// short-circuit cancellations) and returns what the caller should do next.
pub fn advance(edges: &mut [WorkflowEdge], completed_node: &str, terminal_state: RunState) -> WorkflowStep {
    for edge in edges.iter_mut() {
        if edge.target_node == completed_node {
            edge.run_state = terminal_state;
        }
    }

    if terminal_state == RunState::Canceled {
        short_circuit_cancel(edges);
    }

    if edges.iter().all(|e| e.run_state.is_terminal()) {
        let end_failed = predecessors(edges, END_NODE)
            .iter()
            .any(|e| e.run_state == RunState::Canceled);
        return WorkflowStep::Terminal(if end_failed { RunState::Canceled } else { RunState::Finished });
    }

    let ready = ready_successors_of(edges, completed_node);
    if ready.is_empty() {
        WorkflowStep::Pending
    } else {
        WorkflowStep::Ready(ready)
    }
}

/// Nodes directly reachable from `START` — used once, right after a
/// workflow's edges are first materialized.
pub fn initial_ready_nodes(edges: &[WorkflowEdge]) -> Vec<String> {
    successors(edges, START_NODE)
        .into_iter()
        .map(|e| e.target_node.clone())
        .filter(|node| node != END_NODE)
        .collect()
}

/// Repeatedly cancel any still-`WAITING` edge whose predecessors are all
/// terminal — a failure anywhere downstream of `START` cancels everything
/// that can no longer possibly run, without creating their instances.
fn short_circuit_cancel(edges: &mut [WorkflowEdge]) {
    loop {
        let to_cancel: Vec<String> = edges
            .iter()
            .filter(|e| e.run_state == RunState::Waiting)
            .map(|e| e.target_node.clone())
            .filter(|node| predecessors(edges, node).iter().all(|p| p.run_state.is_terminal()))
            .collect();
        if to_cancel.is_empty() {
            return;
        }
        for edge in edges.iter_mut() {
            if to_cancel.contains(&edge.target_node) {
                edge.run_state = RunState::Canceled;
            }
        }
    }
}

fn ready_successors_of(edges: &[WorkflowEdge], completed_node: &str) -> Vec<String> {
    successors(edges, completed_node)
        .into_iter()
        .map(|e| e.target_node.clone())
        .filter(|node| node != END_NODE)
        .filter(|node| {
            let edge = edges.iter().find(|e| &e.target_node == node);
            edge.map(|e| e.instance_id.is_none() && e.run_state == RunState::Waiting).unwrap_or(false)
        })
        .filter(|node| predecessors(edges, node).iter().all(|p| p.run_state == RunState::Finished))
        .collect()
}

// ---------------------------------------------------------------------------
// Workflow template — the DAG shape a WORKFLOW job materializes at TRIGGER.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EdgeTemplate {
    from: String,
    to: String,
    #[serde(default)]
    seq: u32,
}

/// Parse a `WORKFLOW` job's `jobParam` (a JSON array of `{from, to, seq}`)
/// into `(source, target, sequence)` triples, ready to become edges once a
/// `wnstanceId` is known.
pub fn parse_workflow_template(job_id: i64, job_param: Option<&str>) -> Result<Vec<(String, String, u32)>, EngineError> {
    let raw = job_param.ok_or_else(|| EngineError::InvalidSplit {
        job_id,
        reason: "WORKFLOW job has no jobParam (expected a JSON edge list)".into(),
    })?;

    let templates: Vec<EdgeTemplate> = serde_json::from_str(raw).map_err(|e| EngineError::InvalidSplit {
        job_id,
        reason: format!("jobParam is not a valid workflow edge list: {e}"),
    })?;

    if templates.is_empty() {
        return Err(EngineError::InvalidSplit { job_id, reason: "workflow edge list is empty".into() });
    }

    Ok(templates.into_iter().map(|t| (t.from, t.to, t.seq)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from: &str, to: &str, state: RunState) -> WorkflowEdge {
        WorkflowEdge { wnstance_id: 1, source_node: from.into(), target_node: to.into(), sequence: 0, run_state: state, instance_id: None }
    }

    #[test]
    fn initial_ready_nodes_finds_starts_successors() {
        let edges = vec![
            edge("START", "a", RunState::Waiting),
            edge("a", "END", RunState::Waiting),
        ];
        assert_eq!(initial_ready_nodes(&edges), vec!["a"]);
    }

    #[test]
    fn linear_success_reaches_terminal_finished() {
        let mut edges = vec![edge("START", "a", RunState::Finished), edge("a", "END", RunState::Waiting)];
        let step = advance(&mut edges, "a", RunState::Finished);
        assert_eq!(step, WorkflowStep::Terminal(RunState::Finished));
    }

    #[test]
    fn diamond_a_then_b_then_c_then_d_succeeds() {
        // START -> a -> {b, c} -> d -> END
        let mut edges = vec![
            edge("START", "a", RunState::Finished),
            edge("a", "b", RunState::Waiting),
            edge("a", "c", RunState::Waiting),
            edge("b", "d", RunState::Waiting),
            edge("c", "d", RunState::Waiting),
            edge("d", "END", RunState::Waiting),
        ];

        let step = advance(&mut edges, "a", RunState::Finished);
        assert_eq!(step, WorkflowStep::Ready(vec!["b".into(), "c".into()]));

        let step = advance(&mut edges, "b", RunState::Finished);
        assert_eq!(step, WorkflowStep::Pending); // d still waits on c

        let step = advance(&mut edges, "c", RunState::Finished);
        assert_eq!(step, WorkflowStep::Ready(vec!["d".into()]));

        let step = advance(&mut edges, "d", RunState::Finished);
        assert_eq!(step, WorkflowStep::Terminal(RunState::Finished));
    }

    #[test]
    fn failure_short_circuits_sibling_and_downstream() {
        // START -> a -> {b, c} -> d -> END ; c fails before b finishes
        let mut edges = vec![
            edge("START", "a", RunState::Finished),
            edge("a", "b", RunState::Waiting),
            edge("a", "c", RunState::Waiting),
            edge("b", "d", RunState::Waiting),
            edge("c", "d", RunState::Waiting),
            edge("d", "END", RunState::Waiting),
        ];
        advance(&mut edges, "a", RunState::Finished);

        let step = advance(&mut edges, "c", RunState::Canceled);
        // b has not finished yet, so d cannot be short-circuited until b resolves.
        assert_eq!(step, WorkflowStep::Pending);
        assert_eq!(edges.iter().find(|e| e.target_node == "c").unwrap().run_state, RunState::Canceled);

        let step = advance(&mut edges, "b", RunState::Finished);
        // Now d's only remaining predecessor state is known: c failed, so d is
        // short-circuited to CANCELED directly, which completes the graph.
        assert_eq!(step, WorkflowStep::Terminal(RunState::Canceled));
        assert_eq!(edges.iter().find(|e| e.target_node == "d").unwrap().run_state, RunState::Canceled);
    }

    #[test]
    fn parses_workflow_template_from_json() {
        let json = r#"[{"from":"START","to":"a","seq":0},{"from":"a","to":"END","seq":0}]"#;
        let parsed = parse_workflow_template(1, Some(json)).unwrap();
        assert_eq!(parsed, vec![("START".into(), "a".into(), 0), ("a".into(), "END".into(), 0)]);
    }

    #[test]
    fn rejects_missing_param() {
        assert!(parse_workflow_template(1, None).is_err());
    }
}
