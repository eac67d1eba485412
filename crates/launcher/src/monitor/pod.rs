use super::Signal;
use crate::error::LaunchError;
use controller::crds::CONTAINER_NAME;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Waiting reasons the runner container will not recover from on its own
const FATAL_WAITING_REASONS: &[&str] = &[
    "ErrImagePull",
    "ImagePullBackOff",
    "CrashLoopBackOff",
    "CreateContainerConfigError",
    "InvalidImageName",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodState {
    Pending,
    /// Running with the Ready condition set
    Ready,
    /// Already terminated; the session streams its logs and relays the exit
    Finished,
    Failed(String),
}

pub fn pod_state(pod: &Pod) -> PodState {
    let Some(status) = pod.status.as_ref() else {
        return PodState::Pending;
    };

    match status.phase.as_deref() {
        Some("Succeeded") | Some("Failed") => return PodState::Finished,
        Some("Unknown") => return PodState::Failed("pod phase is Unknown".to_string()),
        _ => {}
    }

    let waiting = status
        .container_statuses
        .as_ref()
        .and_then(|statuses| statuses.iter().find(|cs| cs.name == CONTAINER_NAME))
        .and_then(|cs| cs.state.as_ref())
        .and_then(|state| state.waiting.as_ref());
    if let Some(waiting) = waiting {
        let reason = waiting.reason.as_deref().unwrap_or_default();
        if FATAL_WAITING_REASONS.contains(&reason) {
            let message = waiting.message.as_deref().unwrap_or_default();
            return PodState::Failed(format!("{reason}: {message}"));
        }
    }

    let ready = status
        .conditions
        .as_ref()
        .is_some_and(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"));

    if status.phase.as_deref() == Some("Running") && ready {
        PodState::Ready
    } else {
        PodState::Pending
    }
}

/// Report the run's pod once it can be attached to (or has already finished)
pub async fn watch_pod<S>(
    events: S,
    tx: mpsc::Sender<Signal>,
    cancel: CancellationToken,
) -> Result<(), LaunchError>
where
    S: Stream<Item = Result<Pod, watcher::Error>>,
{
    let mut events = std::pin::pin!(events);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            event = events.next() => match event {
                Some(Ok(pod)) => match pod_state(&pod) {
                    PodState::Pending => debug!("Pod {} not ready yet", pod.name_any()),
                    PodState::Ready | PodState::Finished => {
                        info!("Pod {} is ready", pod.name_any());
                        let _ = tx.send(Signal::PodReady(Box::new(pod))).await;
                        return Ok(());
                    }
                    PodState::Failed(reason) => {
                        return Err(LaunchError::PodFailed {
                            pod: pod.name_any(),
                            reason,
                        });
                    }
                },
                Some(Err(err)) => return Err(err.into()),
                None => return Err(LaunchError::WatchClosed("pod")),
            },
        }
    }
}
