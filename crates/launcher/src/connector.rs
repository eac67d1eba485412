use crate::error::LaunchError;
use async_trait::async_trait;
use controller::crds::{Run, CLIENT_ANNOTATION, CLIENT_READY, CONTAINER_NAME, HANDSHAKE_TOKEN};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, LogParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, info};

/// Connects the local session to a run's pod
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PodConnector: Send + Sync {
    /// Attach to the runner container, complete the handshake, mark the run
    /// as having a client, then relay terminal I/O until the process exits
    async fn attach(&self, pod_name: &str, run_name: &str) -> Result<(), LaunchError>;

    /// Follow the runner container's output until it exits
    async fn stream_logs(&self, pod_name: &str) -> Result<(), LaunchError>;
}

pub struct KubeConnector {
    pods: Api<Pod>,
    runs: Api<Run>,
    output: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    handshake_timeout: Duration,
}

impl KubeConnector {
    pub fn new(client: Client, namespace: &str, handshake_timeout: Duration) -> Self {
        Self {
            pods: Api::namespaced(client.clone(), namespace),
            runs: Api::namespaced(client, namespace),
            output: Mutex::new(Box::new(tokio::io::stdout())),
            handshake_timeout,
        }
    }

    /// Send pod output somewhere other than stdout (CI log buffers, files)
    #[must_use]
    pub fn with_output<W>(mut self, output: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.output = Mutex::new(Box::new(output));
        self
    }

    async fn mark_client_ready(&self, run_name: &str) -> Result<(), LaunchError> {
        let patch = json!({
            "metadata": {
                "annotations": {
                    CLIENT_ANNOTATION: CLIENT_READY
                }
            }
        });
        self.runs
            .patch(run_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("Marked run {} client ready", run_name);
        Ok(())
    }
}

#[async_trait]
impl PodConnector for KubeConnector {
    async fn attach(&self, pod_name: &str, run_name: &str) -> Result<(), LaunchError> {
        let params = AttachParams::interactive_tty().container(CONTAINER_NAME);
        let mut attached = self.pods.attach(pod_name, &params).await?;

        let mut pod_out = attached
            .stdout()
            .ok_or_else(|| LaunchError::Attach("no stdout stream".to_string()))?;
        let mut pod_in = attached
            .stdin()
            .ok_or_else(|| LaunchError::Attach("no stdin stream".to_string()))?;

        let leftover = tokio::time::timeout(
            self.handshake_timeout,
            read_until_token(&mut pod_out, HANDSHAKE_TOKEN),
        )
        .await
        .map_err(|_| {
            LaunchError::Attach(format!(
                "no handshake from pod within {:?}",
                self.handshake_timeout
            ))
        })??;

        pod_in
            .write_all(format!("{HANDSHAKE_TOKEN}\n").as_bytes())
            .await?;
        pod_in.flush().await?;
        self.mark_client_ready(run_name).await?;
        info!("Attached to pod {}", pod_name);

        let mut output = self.output.lock().await;
        output.write_all(&leftover).await?;

        let input = tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let _ = tokio::io::copy(&mut stdin, &mut pod_in).await;
        });

        tokio::io::copy(&mut pod_out, &mut *output).await?;
        output.flush().await?;
        input.abort();

        attached
            .join()
            .await
            .map_err(|e| LaunchError::Attach(e.to_string()))
    }

    async fn stream_logs(&self, pod_name: &str) -> Result<(), LaunchError> {
        let params = LogParams {
            container: Some(CONTAINER_NAME.to_string()),
            follow: true,
            ..LogParams::default()
        };
        let logs = self.pods.log_stream(pod_name, &params).await?;
        let mut logs = Box::pin(logs).compat();

        let mut output = self.output.lock().await;
        tokio::io::copy(&mut logs, &mut *output).await?;
        output.flush().await?;
        Ok(())
    }
}

/// Consume pod output up to and including the handshake token and its line
/// ending, returning whatever arrived after it
pub async fn read_until_token<R>(reader: &mut R, token: &str) -> Result<Vec<u8>, LaunchError>
where
    R: AsyncRead + Unpin,
{
    let needle = token.as_bytes();
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Err(LaunchError::Attach(
                "pod output ended before handshake".to_string(),
            ));
        }
        buffer.extend_from_slice(&chunk[..read]);

        if let Some(start) = buffer.windows(needle.len()).position(|w| w == needle) {
            let rest = &buffer[start + needle.len()..];
            let skip = rest
                .iter()
                .take_while(|b| **b == b'\r' || **b == b'\n')
                .count();
            return Ok(rest[skip..].to_vec());
        }
    }
}
