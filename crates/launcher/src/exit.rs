use crate::error::LaunchError;
use controller::tasks::run::pod::terminated_exit_code;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use tracing::info;

/// Watch the run's pod until the runner container terminates.
///
/// Exit code 0 is success; anything else becomes [`LaunchError::ExitCode`].
pub async fn relay_exit_code<S>(events: S) -> Result<(), LaunchError>
where
    S: Stream<Item = Result<Pod, watcher::Error>>,
{
    let mut events = std::pin::pin!(events);

    while let Some(event) = events.next().await {
        let pod = event?;
        if let Some(code) = terminated_exit_code(&pod) {
            info!(exit_code = code, "Runner container terminated");
            return match code {
                0 => Ok(()),
                code => Err(LaunchError::ExitCode(code)),
            };
        }
    }

    Err(LaunchError::WatchClosed("exit code"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(state: serde_json::Value) -> Result<Pod, watcher::Error> {
        Ok(serde_json::from_value(json!({
            "metadata": { "name": "run-a" },
            "status": {
                "containerStatuses": [{
                    "name": "runner", "image": "runner", "imageID": "", "ready": false,
                    "restartCount": 0, "state": state
                }]
            }
        }))
        .unwrap())
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_relayed() {
        let events = futures::stream::iter(vec![
            pod(json!({ "running": {} })),
            pod(json!({ "terminated": { "exitCode": 3 } })),
        ]);
        let err = relay_exit_code(events).await.unwrap_err();
        assert!(matches!(err, LaunchError::ExitCode(3)));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn zero_exit_code_is_success() {
        let events = futures::stream::iter(vec![pod(json!({ "terminated": { "exitCode": 0 } }))]);
        assert!(relay_exit_code(events).await.is_ok());
    }

    #[tokio::test]
    async fn stream_ending_before_termination_is_an_error() {
        let events = futures::stream::iter(vec![pod(json!({ "running": {} }))]);
        assert!(matches!(
            relay_exit_code(events).await,
            Err(LaunchError::WatchClosed(_))
        ));
    }
}
