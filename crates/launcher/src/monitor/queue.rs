use crate::error::LaunchError;
use controller::crds::Workspace;
use futures::{Stream, StreamExt};
use kube::runtime::watcher;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Follow the run's position in the workspace queue until it reaches the front.
///
/// Until the run first appears in the queue the enqueue deadline applies; from
/// then on only the queue deadline does, counted from when it was first seen.
pub async fn watch_queue<S>(
    events: S,
    run_name: &str,
    enqueue_timeout: Duration,
    queue_timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), LaunchError>
where
    S: Stream<Item = Result<Workspace, watcher::Error>>,
{
    let mut events = std::pin::pin!(events);
    let started = Instant::now();
    let mut queued_since: Option<Instant> = None;
    let mut last_position: Option<usize> = None;

    loop {
        let deadline = match queued_since {
            None => started + enqueue_timeout,
            Some(since) => since + queue_timeout,
        };

        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            () = tokio::time::sleep_until(deadline) => {
                return Err(match queued_since {
                    None => LaunchError::EnqueueTimeout(enqueue_timeout),
                    Some(_) => LaunchError::QueueTimeout(queue_timeout),
                });
            }
            event = events.next() => match event {
                Some(Ok(workspace)) => {
                    let Some(position) = workspace.queue_position(run_name) else {
                        continue;
                    };
                    if queued_since.is_none() {
                        queued_since = Some(Instant::now());
                    }
                    if position == 0 {
                        info!("Run {} is at the front of the queue", run_name);
                        return Ok(());
                    }
                    if last_position != Some(position) {
                        info!(position, "Run {} is queued behind {} run(s)", run_name, position);
                        last_position = Some(position);
                    }
                }
                Some(Err(err)) => return Err(err.into()),
                None => return Err(LaunchError::WatchClosed("workspace queue")),
            },
        }
    }
}
