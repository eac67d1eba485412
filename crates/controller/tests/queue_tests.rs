//! Workspace Queue Tests
//!
//! Exercises queue derivation and the workspace status decision the way a
//! sequence of reconciliations would drive them.

use controller::crds::condition::is_true_for;
use controller::crds::{Workspace, WorkspaceSpec, WorkspaceStatus, CONDITION_HEALTHY};
use controller::tasks::workspace::controller::WorkspaceObservation;
use controller::tasks::workspace::{next_status, recompute_queue};

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn workspace_with_status(status: WorkspaceStatus) -> Workspace {
    let mut ws = Workspace::new("dev", WorkspaceSpec::default());
    ws.status = Some(status);
    ws
}

#[test]
fn test_completed_run_leaves_queue_and_newcomer_appends() {
    let current = names(&["a", "b", "c"]);

    // b completes
    let queue = recompute_queue(&current, &names(&["a", "c"]));
    assert_eq!(queue, names(&["a", "c"]));

    // d arrives; list order from the store is irrelevant to survivors
    let queue = recompute_queue(&queue, &names(&["d", "c", "a"]));
    assert_eq!(queue, names(&["a", "c", "d"]));
}

#[test]
fn test_survivors_keep_relative_order() {
    let current = names(&["x", "y", "z"]);
    let queue = recompute_queue(&current, &names(&["z", "x", "y", "w"]));
    assert_eq!(queue, names(&["x", "y", "z", "w"]));
}

#[test]
fn test_converged_workspace_needs_no_status_write() {
    let ws = Workspace::new("dev", WorkspaceSpec::default());
    let observed = WorkspaceObservation {
        missing: vec![],
        pending: names(&["a", "b"]),
    };

    let first = next_status(&ws, &observed).expect("first reconciliation writes status");
    let converged = workspace_with_status(first);

    assert_eq!(next_status(&converged, &observed), None);
}

#[test]
fn test_unhealthy_workspace_recovers_when_prerequisites_appear() {
    let ws = Workspace::new("dev", WorkspaceSpec::default());
    let missing = WorkspaceObservation {
        missing: names(&["ServiceAccount/runner"]),
        pending: vec![],
    };
    let unhealthy = workspace_with_status(next_status(&ws, &missing).unwrap());
    assert!(!is_true_for(unhealthy.conditions(), CONDITION_HEALTHY));
    assert!(unhealthy.queue().is_empty());

    let found = WorkspaceObservation {
        missing: vec![],
        pending: names(&["run-1"]),
    };
    let healthy = next_status(&unhealthy, &found).unwrap();
    assert!(is_true_for(&healthy.conditions, CONDITION_HEALTHY));
    assert_eq!(healthy.queue, names(&["run-1"]));
}
