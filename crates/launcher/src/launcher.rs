use crate::archive::create_archive;
use crate::config::LauncherConfig;
use crate::connector::PodConnector;
use crate::error::LaunchError;
use crate::exit::relay_exit_code;
use crate::monitor::{self, Monitor};
use crate::naming::generate_run_name;
use crate::submit::{build_config_map, build_run, submit};
use controller::crds::{Run, RunCommand, Workspace};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// How the local session connects to a ready pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub pod_name: String,
    pub run_name: String,

    /// Attach with a handshake; otherwise follow logs
    pub attach: bool,
}

impl Session {
    /// Finished pods cannot be attached to, so their logs are streamed instead
    pub fn for_pod(pod: &Pod, run_name: &str, interactive: bool) -> Self {
        let finished = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|phase| phase == "Succeeded" || phase == "Failed");

        Self {
            pod_name: pod.name_any(),
            run_name: run_name.to_string(),
            attach: interactive && !finished,
        }
    }
}

pub struct Launcher<C> {
    client: Client,
    config: LauncherConfig,
    connector: C,
    cancel: CancellationToken,
}

impl<C: PodConnector> Launcher<C> {
    pub fn new(client: Client, config: LauncherConfig, connector: C, cancel: CancellationToken) -> Self {
        Self {
            client,
            config,
            connector,
            cancel,
        }
    }

    /// Submit `command` against the configured workspace with the contents of
    /// `path` as its payload, follow it to completion and relay its exit code
    #[instrument(skip(self, args), fields(workspace = %self.config.workspace, namespace = %self.config.namespace))]
    pub async fn run(&self, path: &Path, command: &str, args: Vec<String>) -> Result<(), LaunchError> {
        let command: RunCommand = command.parse()?;
        let payload = create_archive(path)?;
        let run_name = generate_run_name();

        let config_map = build_config_map(&run_name, payload, &self.config);
        let run = build_run(&run_name, command, args, &self.config);
        submit(&self.client, &config_map, &run).await?;
        info!("Submitted run {} ({})", run_name, command);

        let pod = self.monitor(&run_name).await?;
        let session = Session::for_pod(&pod, &run_name, self.config.interactive);

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let exit_events = watcher(pods, by_name(&run_name)).default_backoff().applied_objects();

        connect_and_relay(
            &self.connector,
            &session,
            relay_exit_code(exit_events),
            self.config.timeouts.exit_grace,
            &self.cancel,
        )
        .await
    }

    /// Run the four watchers until the pod is ready and the workspace confirmed
    async fn monitor(&self, run_name: &str) -> Result<Pod, LaunchError> {
        let timeouts = self.config.timeouts;
        let workspace_name = self.config.workspace.clone();
        let workspaces: Api<Workspace> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let runs: Api<Run> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.config.namespace);

        let mut watchers = Monitor::new(&self.cancel);

        watchers.spawn("workspace", {
            let api = workspaces.clone();
            let name = workspace_name.clone();
            move |tx, _cancel| async move {
                let lookup = api.get(&name).await;
                monitor::workspace::check_workspace(lookup, &name, tx).await
            }
        });

        watchers.spawn("queue", {
            let events = watcher(workspaces, by_name(&workspace_name))
                .default_backoff()
                .applied_objects();
            let run_name = run_name.to_string();
            move |_tx, cancel| async move {
                monitor::queue::watch_queue(events, &run_name, timeouts.enqueue, timeouts.queue, cancel)
                    .await
            }
        });

        watchers.spawn("run", {
            let events = watcher(runs, by_name(run_name)).default_backoff().applied_objects();
            move |_tx, cancel| monitor::run::watch_run(events, timeouts.reconcile, timeouts.ready, cancel)
        });

        watchers.spawn("pod", {
            let events = watcher(pods, by_name(run_name)).default_backoff().applied_objects();
            move |tx, cancel| monitor::pod::watch_pod(events, tx, cancel)
        });

        watchers.wait().await
    }
}

fn by_name(name: &str) -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={name}"))
}

/// Attach to or stream from the pod, then wait at most `exit_grace` for the
/// exit code. The exit relay starts before the session so no termination is
/// missed, and is aborted on every path out of here.
///
/// A failed session is returned at once without waiting for the exit code.
/// Cancellation is observed during both the session and the grace wait.
pub async fn connect_and_relay<C, F>(
    connector: &C,
    session: &Session,
    exit: F,
    exit_grace: Duration,
    cancel: &CancellationToken,
) -> Result<(), LaunchError>
where
    C: PodConnector + ?Sized,
    F: Future<Output = Result<(), LaunchError>> + Send + 'static,
{
    let mut exit = tokio::spawn(exit);
    let result = relay_session(connector, session, &mut exit, exit_grace, cancel).await;
    exit.abort();
    result
}

async fn relay_session<C>(
    connector: &C,
    session: &Session,
    exit: &mut JoinHandle<Result<(), LaunchError>>,
    exit_grace: Duration,
    cancel: &CancellationToken,
) -> Result<(), LaunchError>
where
    C: PodConnector + ?Sized,
{
    let connected = async {
        if session.attach {
            connector.attach(&session.pod_name, &session.run_name).await
        } else {
            connector.stream_logs(&session.pod_name).await
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(LaunchError::Cancelled),
        result = connected => result?,
    }

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(LaunchError::Cancelled),
        waited = tokio::time::timeout(exit_grace, exit) => match waited {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(LaunchError::Io(std::io::Error::other(join_error))),
            Err(_) => Err(LaunchError::ExitRelayTimeout(exit_grace)),
        },
    }
}
