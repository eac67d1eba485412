//! Run monitoring
//!
//! Four watchers run concurrently in a [`JoinSet`] and report to a single
//! merge loop over a bounded channel:
//!
//! - workspace: confirms the workspace exists (single get)
//! - queue: follows the run's queue position under the enqueue and queue deadlines
//! - run: watches the run's conditions under the reconcile and ready deadlines
//! - pod: reports when the run's pod is running and ready
//!
//! The merge loop returns once the pod is ready and the workspace has been
//! confirmed, or with the first fatal error. Either way all watchers are
//! cancelled before it returns.

pub mod pod;
pub mod queue;
pub mod run;
pub mod workspace;

use crate::error::LaunchError;
use k8s_openapi::api::core::v1::Pod;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SIGNAL_BUFFER: usize = 8;

/// Message from a watcher to the merge loop
#[derive(Debug)]
pub enum Signal {
    PodReady(Box<Pod>),
    WorkspaceExists,
    Fatal(LaunchError),
}

pub struct Monitor {
    tasks: JoinSet<()>,
    tx: mpsc::Sender<Signal>,
    rx: mpsc::Receiver<Signal>,
    cancel: CancellationToken,
}

impl Monitor {
    /// Watchers are cancelled when `parent` is, or when monitoring ends
    pub fn new(parent: &CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        Self {
            tasks: JoinSet::new(),
            tx,
            rx,
            cancel: parent.child_token(),
        }
    }

    /// Spawn a watcher. An error it returns is forwarded as [`Signal::Fatal`]
    /// unless monitoring has already been cancelled.
    pub fn spawn<W, Fut>(&mut self, name: &'static str, watcher: W)
    where
        W: FnOnce(mpsc::Sender<Signal>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), LaunchError>> + Send + 'static,
    {
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        let fut = watcher(tx.clone(), cancel.clone());

        self.tasks.spawn(async move {
            match fut.await {
                Ok(()) => debug!(watcher = name, "Watcher finished"),
                Err(err) if cancel.is_cancelled() => {
                    debug!(watcher = name, error = %err, "Watcher stopped after cancellation");
                }
                Err(err) => {
                    debug!(watcher = name, error = %err, "Watcher failed");
                    let _ = tx.send(Signal::Fatal(err)).await;
                }
            }
        });
    }

    /// Run the merge loop, then cancel every watcher and wait for it to exit
    pub async fn wait(self) -> Result<Pod, LaunchError> {
        let Monitor {
            mut tasks,
            tx,
            mut rx,
            cancel,
        } = self;
        drop(tx);

        let result = merge_signals(&mut rx, &cancel).await;

        cancel.cancel();
        while tasks.join_next().await.is_some() {}
        result
    }
}

/// Wait until both a ready pod and the workspace have been reported
pub async fn merge_signals(
    rx: &mut mpsc::Receiver<Signal>,
    cancel: &CancellationToken,
) -> Result<Pod, LaunchError> {
    let mut ready_pod: Option<Pod> = None;
    let mut workspace_exists = false;

    loop {
        if workspace_exists {
            if let Some(pod) = ready_pod.take() {
                return Ok(pod);
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LaunchError::Cancelled),
            signal = rx.recv() => match signal {
                Some(Signal::PodReady(pod)) => ready_pod = Some(*pod),
                Some(Signal::WorkspaceExists) => workspace_exists = true,
                Some(Signal::Fatal(err)) => return Err(err),
                None => return Err(LaunchError::WatchClosed("monitor")),
            },
        }
    }
}

/// Sleep until `deadline`, or forever when there is none
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
