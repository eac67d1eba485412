use controller::crds::run::UnsupportedCommand;
use std::time::Duration;
use thiserror::Error;

/// Everything that can stop a launch short of a clean exit
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The payload or the run could not be created
    #[error("failed to create {resource}: {source}")]
    Admission {
        resource: String,
        #[source]
        source: kube::Error,
    },

    #[error("invalid configuration: {0:#}")]
    Config(#[from] anyhow::Error),

    #[error(transparent)]
    UnsupportedCommand(#[from] UnsupportedCommand),

    #[error("configuration archive is {size} bytes, exceeding the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("run was not added to the workspace queue within {0:?}")]
    EnqueueTimeout(Duration),

    #[error("run did not reach the front of the workspace queue within {0:?}")]
    QueueTimeout(Duration),

    #[error("controller did not respond within {0:?}")]
    ReconcileTimeout(Duration),

    #[error("run pod was not ready within {0:?} of the run becoming attachable")]
    ReadyTimeout(Duration),

    #[error("exit code was not reported within {0:?} of the session ending")]
    ExitRelayTimeout(Duration),

    #[error("workspace {0} not found")]
    WorkspaceNotFound(String),

    #[error("workspace was not ready within {0:?}")]
    WorkspaceReadyTimeout(Duration),

    #[error("workspace {workspace} is unhealthy: {message}")]
    WorkspaceUnhealthy { workspace: String, message: String },

    /// The controller completed the run without executing it
    #[error("run failed ({reason}): {message}")]
    RunFailed { reason: String, message: String },

    #[error("pod {pod} failed: {reason}")]
    PodFailed { pod: String, reason: String },

    #[error("command exited with code {0}")]
    ExitCode(i32),

    #[error("attach to pod failed: {0}")]
    Attach(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("watch error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    #[error("{0} watch ended unexpectedly")]
    WatchClosed(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("launch cancelled")]
    Cancelled,
}

impl LaunchError {
    /// Process exit code the CLI should terminate with
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::ExitCode(code) => *code,
            _ => 1,
        }
    }
}
