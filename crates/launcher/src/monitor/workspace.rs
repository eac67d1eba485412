use super::Signal;
use crate::error::LaunchError;
use controller::crds::Workspace;
use tokio::sync::mpsc;
use tracing::debug;

/// Confirm the workspace exists from the result of a single get
pub async fn check_workspace(
    lookup: Result<Workspace, kube::Error>,
    workspace_name: &str,
    tx: mpsc::Sender<Signal>,
) -> Result<(), LaunchError> {
    match lookup {
        Ok(_) => {
            debug!("Workspace {} exists", workspace_name);
            let _ = tx.send(Signal::WorkspaceExists).await;
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            Err(LaunchError::WorkspaceNotFound(workspace_name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controller::crds::WorkspaceSpec;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "boom".into(),
            reason: "Test".into(),
            code,
        })
    }

    #[tokio::test]
    async fn existing_workspace_is_signalled() {
        let (tx, mut rx) = mpsc::channel(1);
        let ws = Workspace::new("dev", WorkspaceSpec::default());
        check_workspace(Ok(ws), "dev", tx).await.unwrap();
        assert!(matches!(rx.recv().await, Some(Signal::WorkspaceExists)));
    }

    #[tokio::test]
    async fn missing_workspace_is_fatal() {
        let (tx, _rx) = mpsc::channel(1);
        let err = check_workspace(Err(api_error(404)), "dev", tx).await.unwrap_err();
        assert!(matches!(err, LaunchError::WorkspaceNotFound(name) if name == "dev"));
    }

    #[tokio::test]
    async fn other_errors_are_fatal_too() {
        let (tx, _rx) = mpsc::channel(1);
        let err = check_workspace(Err(api_error(403)), "dev", tx).await.unwrap_err();
        assert!(matches!(err, LaunchError::Kube(_)));
    }
}
