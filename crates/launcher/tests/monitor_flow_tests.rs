//! Monitoring a run end to end with scripted watch streams

use controller::crds::condition::Condition;
use controller::crds::{
    Run, RunCommand, RunSpec, RunStatus, Workspace, WorkspaceSpec, WorkspaceStatus,
    CONDITION_ATTACHABLE, CONDITION_COMPLETED, REASON_FRONT_OF_QUEUE, REASON_QUEUED,
    REASON_UNAPPROVED,
};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use launcher::monitor::{self, Monitor};
use launcher::LaunchError;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RUN: &str = "run-x7k2p";
const ENQUEUE: Duration = Duration::from_secs(10);
const QUEUE: Duration = Duration::from_secs(3600);
const RECONCILE: Duration = Duration::from_secs(10);
const READY: Duration = Duration::from_secs(60);

fn workspace(queue: &[&str]) -> Result<Workspace, watcher::Error> {
    let mut ws = Workspace::new("dev", WorkspaceSpec::default());
    ws.status = Some(WorkspaceStatus {
        queue: queue.iter().map(|s| (*s).to_string()).collect(),
        conditions: vec![],
    });
    Ok(ws)
}

fn run(conditions: Vec<Condition>) -> Result<Run, watcher::Error> {
    let mut run = Run::new(
        RUN,
        RunSpec {
            command: RunCommand::Apply,
            args: vec![],
            config_map: RUN.into(),
            config_map_key: "config.tar.gz".into(),
            handshake: true,
            handshake_timeout_seconds: 10,
        },
    );
    run.status = Some(RunStatus {
        conditions,
        ..Default::default()
    });
    Ok(run)
}

fn pod(phase: &str, ready: bool) -> Result<Pod, watcher::Error> {
    Ok(serde_json::from_value(json!({
        "metadata": { "name": RUN },
        "status": {
            "phase": phase,
            "conditions": [{ "type": "Ready", "status": if ready { "True" } else { "False" } }]
        }
    }))
    .unwrap())
}

/// Spawn the four watchers over scripted streams
fn monitor_with<Q, R, P>(
    parent: &CancellationToken,
    workspace_lookup: Result<Workspace, kube::Error>,
    queue: Q,
    runs: R,
    pods: P,
) -> Monitor
where
    Q: futures::Stream<Item = Result<Workspace, watcher::Error>> + Send + 'static,
    R: futures::Stream<Item = Result<Run, watcher::Error>> + Send + 'static,
    P: futures::Stream<Item = Result<Pod, watcher::Error>> + Send + 'static,
{
    let mut watchers = Monitor::new(parent);
    watchers.spawn("workspace", move |tx, _cancel| async move {
        monitor::workspace::check_workspace(workspace_lookup, "dev", tx).await
    });
    watchers.spawn("queue", move |_tx, cancel| async move {
        monitor::queue::watch_queue(queue, RUN, ENQUEUE, QUEUE, cancel).await
    });
    watchers.spawn("run", move |_tx, cancel| {
        monitor::run::watch_run(runs, RECONCILE, READY, cancel)
    });
    watchers.spawn("pod", move |tx, cancel| monitor::pod::watch_pod(pods, tx, cancel));
    watchers
}

#[tokio::test(start_paused = true)]
async fn queued_run_proceeds_to_ready_pod() {
    let parent = CancellationToken::new();
    let queue = futures::stream::iter(vec![
        workspace(&["run-older", RUN]),
        workspace(&[RUN]),
    ])
    .chain(futures::stream::pending());
    let runs = futures::stream::iter(vec![
        run(vec![Condition::new(
            CONDITION_ATTACHABLE,
            false,
            REASON_QUEUED,
            "In workspace queue position 1",
        )]),
        run(vec![Condition::new(CONDITION_ATTACHABLE, true, REASON_FRONT_OF_QUEUE, "")]),
    ])
    .chain(futures::stream::pending());
    let pods = futures::stream::iter(vec![pod("Pending", false), pod("Running", true)])
        .chain(futures::stream::pending());

    let watchers = monitor_with(
        &parent,
        Ok(Workspace::new("dev", WorkspaceSpec::default())),
        queue,
        runs,
        pods,
    );

    let ready = watchers.wait().await.unwrap();
    assert_eq!(ready.metadata.name.as_deref(), Some(RUN));
    assert!(!parent.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn missing_workspace_stops_monitoring() {
    let parent = CancellationToken::new();
    let not_found = kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".into(),
        message: "workspaces.runq.dev \"dev\" not found".into(),
        reason: "NotFound".into(),
        code: 404,
    });

    let watchers = monitor_with(
        &parent,
        Err(not_found),
        futures::stream::pending(),
        futures::stream::pending(),
        futures::stream::pending(),
    );

    let err = watchers.wait().await.unwrap_err();
    assert!(matches!(err, LaunchError::WorkspaceNotFound(ws) if ws == "dev"));
}

#[tokio::test(start_paused = true)]
async fn unapproved_run_is_completed_and_fatal() {
    let parent = CancellationToken::new();
    let runs = futures::stream::iter(vec![run(vec![Condition::new(
        CONDITION_COMPLETED,
        true,
        REASON_UNAPPROVED,
        "apply requires approval",
    )])])
    .chain(futures::stream::pending());

    let watchers = monitor_with(
        &parent,
        Ok(Workspace::new("dev", WorkspaceSpec::default())),
        futures::stream::iter(vec![workspace(&[RUN])]).chain(futures::stream::pending()),
        runs,
        futures::stream::pending(),
    );

    let err = watchers.wait().await.unwrap_err();
    assert!(matches!(err, LaunchError::RunFailed { reason, .. } if reason == REASON_UNAPPROVED));
}

#[tokio::test(start_paused = true)]
async fn run_never_queued_hits_enqueue_timeout() {
    let parent = CancellationToken::new();
    let runs = futures::stream::iter(vec![run(vec![Condition::new(
        CONDITION_ATTACHABLE,
        false,
        REASON_QUEUED,
        "",
    )])])
    .chain(futures::stream::pending());

    let watchers = monitor_with(
        &parent,
        Ok(Workspace::new("dev", WorkspaceSpec::default())),
        futures::stream::iter(vec![workspace(&["run-older"])]).chain(futures::stream::pending()),
        runs,
        futures::stream::pending(),
    );

    let err = watchers.wait().await.unwrap_err();
    assert!(matches!(err, LaunchError::EnqueueTimeout(d) if d == ENQUEUE));
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_parent_cancels_monitoring() {
    let parent = CancellationToken::new();
    let watchers = monitor_with(
        &parent,
        Ok(Workspace::new("dev", WorkspaceSpec::default())),
        futures::stream::iter(vec![workspace(&["run-older", RUN])]).chain(futures::stream::pending()),
        futures::stream::pending(),
        futures::stream::pending(),
    );

    let canceller = parent.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let err = watchers.wait().await.unwrap_err();
    assert!(matches!(err, LaunchError::Cancelled));
}
