use super::sleep_until_opt;
use crate::error::LaunchError;
use controller::crds::{is_failure_reason, Run, CONDITION_COMPLETED};
use futures::{Stream, StreamExt};
use kube::runtime::watcher;
use kube::ResourceExt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Watch the run's conditions until cancelled.
///
/// Fails when the controller has not stamped any condition within
/// `reconcile_timeout`, when the run completes for a reason that means it
/// will never execute, or when monitoring has not finished within
/// `ready_timeout` of the run becoming attachable.
pub async fn watch_run<S>(
    events: S,
    reconcile_timeout: Duration,
    ready_timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), LaunchError>
where
    S: Stream<Item = Result<Run, watcher::Error>>,
{
    let mut events = std::pin::pin!(events);
    let started = Instant::now();
    let mut acknowledged = false;
    let mut attachable_since: Option<Instant> = None;

    loop {
        let deadline = if acknowledged {
            attachable_since.map(|since| since + ready_timeout)
        } else {
            Some(started + reconcile_timeout)
        };

        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            () = sleep_until_opt(deadline) => {
                return Err(if acknowledged {
                    LaunchError::ReadyTimeout(ready_timeout)
                } else {
                    LaunchError::ReconcileTimeout(reconcile_timeout)
                });
            }
            event = events.next() => match event {
                Some(Ok(run)) => {
                    if !run.conditions().is_empty() && !acknowledged {
                        debug!("Run {} acknowledged by controller", run.name_any());
                        acknowledged = true;
                    }

                    if let Some(completed) = run.condition(CONDITION_COMPLETED).filter(|c| c.is_true()) {
                        if is_failure_reason(completed.reason()) {
                            return Err(LaunchError::RunFailed {
                                reason: completed.reason().to_string(),
                                message: completed.message().to_string(),
                            });
                        }
                    }

                    if run.is_attachable() && attachable_since.is_none() {
                        info!("Run {} is attachable", run.name_any());
                        attachable_since = Some(Instant::now());
                    }
                }
                Some(Err(err)) => return Err(err.into()),
                None => return Err(LaunchError::WatchClosed("run")),
            },
        }
    }
}
