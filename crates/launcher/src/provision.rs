//! Workspace Provisioning
//!
//! `runq workspace new` creates a workspace, waits for the controller to
//! report it ready and writes the environment marker so later launches from
//! the same directory default to it. A workspace that never becomes ready is
//! deleted again unless cleanup is disabled.

use crate::config::EnvironmentMarker;
use crate::error::LaunchError;
use controller::crds::condition;
use controller::crds::{
    Workspace, WorkspaceCacheSpec, WorkspaceSpec, WorkspaceVcsSpec, CONDITION_HEALTHY,
    CONDITION_READY,
};
use futures::{Stream, StreamExt};
use kube::api::{Api, DeleteParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Settings for a new workspace
#[derive(Debug, Clone)]
pub struct NewWorkspace {
    pub name: String,
    pub namespace: String,

    /// Cache volume size; the CRD default applies when unset
    pub cache_size: Option<String>,

    /// Storage class for the cache volume. `Some("")` is kept as is, which
    /// disables dynamic provisioning.
    pub storage_class: Option<String>,

    pub service_account: Option<String>,
    pub secret: Option<String>,
    pub privileged_commands: Vec<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub working_dir: Option<String>,

    /// Time allowed before the controller stamps any condition
    pub reconcile_timeout: Duration,

    /// Time allowed for the workspace to become ready
    pub ready_timeout: Duration,

    /// Delete the workspace again if it fails to become ready
    pub cleanup: bool,
}

impl NewWorkspace {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            cache_size: None,
            storage_class: None,
            service_account: None,
            secret: None,
            privileged_commands: Vec::new(),
            repository: None,
            branch: None,
            working_dir: None,
            reconcile_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(60),
            cleanup: true,
        }
    }

    pub fn build(&self) -> Workspace {
        let mut cache = WorkspaceCacheSpec::default();
        if let Some(size) = &self.cache_size {
            cache.size = size.clone();
        }
        cache.storage_class = self.storage_class.clone();

        let mut workspace = Workspace::new(
            &self.name,
            WorkspaceSpec {
                cache,
                service_account_name: self.service_account.clone(),
                secret_name: self.secret.clone(),
                privileged_commands: self.privileged_commands.clone(),
                vcs: WorkspaceVcsSpec {
                    repository: self.repository.clone(),
                    branch: self.branch.clone(),
                    working_dir: self.working_dir.clone(),
                },
            },
        );
        workspace.metadata.namespace = Some(self.namespace.clone());
        workspace
    }

    fn marker(&self) -> EnvironmentMarker {
        EnvironmentMarker {
            namespace: self.namespace.clone(),
            workspace: self.name.clone(),
        }
    }
}

/// Create the workspace, wait for it and record it in `dir`'s marker file
#[instrument(skip(client, spec, cancel), fields(workspace = %spec.name, namespace = %spec.namespace))]
pub async fn provision(
    client: &Client,
    spec: &NewWorkspace,
    dir: &Path,
    cancel: &CancellationToken,
) -> Result<(), LaunchError> {
    let api: Api<Workspace> = Api::namespaced(client.clone(), &spec.namespace);

    api.create(&PostParams::default(), &spec.build())
        .await
        .map_err(|source| LaunchError::Admission {
            resource: format!("Workspace/{}", spec.name),
            source,
        })?;
    info!("Created workspace {}/{}", spec.namespace, spec.name);

    let events = watcher(
        api.clone(),
        watcher::Config::default().fields(&format!("metadata.name={}", spec.name)),
    )
    .default_backoff()
    .applied_objects();

    let result = match wait_until_ready(events, spec.reconcile_timeout, spec.ready_timeout, cancel).await {
        Ok(()) => spec
            .marker()
            .write(dir)
            .map(|path| info!("Wrote {}", path.display()))
            .map_err(LaunchError::from),
        Err(err) => Err(err),
    };

    let name = spec.name.clone();
    finish_or_clean_up(result, spec.cleanup, || async move {
        api.delete(&name, &DeleteParams::default()).await.map(|_| ())
    })
    .await
}

/// Pass a successful result through; on failure delete the workspace first
/// when cleanup is enabled. A failed delete is logged, never returned.
pub async fn finish_or_clean_up<F, Fut>(
    result: Result<(), LaunchError>,
    cleanup: bool,
    delete: F,
) -> Result<(), LaunchError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), kube::Error>>,
{
    let Err(err) = result else {
        return Ok(());
    };

    if !cleanup {
        warn!("Leaving workspace in place after failure");
        return Err(err);
    }

    match delete().await {
        Ok(()) => info!("Deleted workspace after failure"),
        Err(delete_err) => warn!(error = %delete_err, "Failed to delete workspace after failure"),
    }
    Err(err)
}

/// Follow the workspace until it reports `Ready=True`.
///
/// The reconcile deadline applies until the controller stamps any condition;
/// the ready deadline counts from the start. `Healthy=False` is fatal.
pub async fn wait_until_ready<S>(
    events: S,
    reconcile_timeout: Duration,
    ready_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), LaunchError>
where
    S: Stream<Item = Result<Workspace, watcher::Error>>,
{
    let mut events = std::pin::pin!(events);
    let started = Instant::now();
    let mut acknowledged = false;

    loop {
        let deadline = if acknowledged {
            started + ready_timeout
        } else {
            started + reconcile_timeout.min(ready_timeout)
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LaunchError::Cancelled),
            () = tokio::time::sleep_until(deadline) => {
                return Err(if acknowledged {
                    LaunchError::WorkspaceReadyTimeout(ready_timeout)
                } else {
                    LaunchError::ReconcileTimeout(reconcile_timeout)
                });
            }
            event = events.next() => match event {
                Some(Ok(workspace)) => {
                    let conditions = workspace.conditions();
                    if !conditions.is_empty() && !acknowledged {
                        debug!("Workspace {} acknowledged by controller", workspace.name_any());
                        acknowledged = true;
                    }

                    if condition::is_false_for(conditions, CONDITION_HEALTHY) {
                        let message = condition::find(conditions, CONDITION_HEALTHY)
                            .map(|c| c.message().to_string())
                            .unwrap_or_default();
                        return Err(LaunchError::WorkspaceUnhealthy {
                            workspace: workspace.name_any(),
                            message,
                        });
                    }

                    if condition::is_true_for(conditions, CONDITION_READY) {
                        info!("Workspace {} is ready", workspace.name_any());
                        return Ok(());
                    }
                }
                Some(Err(err)) => return Err(err.into()),
                None => return Err(LaunchError::WatchClosed("workspace")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controller::crds::condition::Condition;
    use controller::crds::{
        WorkspaceStatus, REASON_ALL_RESOURCES_FOUND, REASON_MISSING_RESOURCE,
        REASON_RESOURCES_ENSURED,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    fn workspace(conditions: Vec<Condition>) -> Result<Workspace, watcher::Error> {
        let mut ws = Workspace::new("networking", WorkspaceSpec::default());
        ws.status = Some(WorkspaceStatus {
            queue: vec![],
            conditions,
        });
        Ok(ws)
    }

    fn healthy() -> Condition {
        Condition::new(CONDITION_HEALTHY, true, REASON_ALL_RESOURCES_FOUND, "")
    }

    fn ready() -> Condition {
        Condition::new(CONDITION_READY, true, REASON_RESOURCES_ENSURED, "")
    }

    const RECONCILE: Duration = Duration::from_secs(10);
    const READY: Duration = Duration::from_secs(60);

    #[test]
    fn build_applies_cache_and_credentials() {
        let mut spec = NewWorkspace::new("networking", "team-a");
        spec.cache_size = Some("999Gi".into());
        spec.storage_class = Some("fast".into());
        spec.service_account = Some("terraform".into());
        spec.secret = Some("cloud-creds".into());
        spec.privileged_commands = vec!["apply".into(), "destroy".into()];
        spec.working_dir = Some("infra".into());

        let ws = spec.build();
        assert_eq!(ws.metadata.namespace.as_deref(), Some("team-a"));
        assert_eq!(ws.spec.cache.size, "999Gi");
        assert_eq!(ws.spec.cache.storage_class.as_deref(), Some("fast"));
        assert_eq!(ws.spec.service_account_name.as_deref(), Some("terraform"));
        assert_eq!(ws.spec.secret_name.as_deref(), Some("cloud-creds"));
        assert_eq!(ws.spec.privileged_commands, vec!["apply", "destroy"]);
        assert_eq!(ws.spec.vcs.working_dir.as_deref(), Some("infra"));
    }

    #[test]
    fn build_keeps_defaults_and_explicit_empty_storage_class() {
        let ws = NewWorkspace::new("networking", "default").build();
        assert_eq!(ws.spec.cache.size, "1Gi");
        assert!(ws.spec.cache.storage_class.is_none());

        let mut spec = NewWorkspace::new("networking", "default");
        spec.storage_class = Some(String::new());
        assert_eq!(spec.build().spec.cache.storage_class.as_deref(), Some(""));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_workspace_finishes_wait() {
        let events = futures::stream::iter(vec![
            workspace(vec![]),
            workspace(vec![healthy()]),
            workspace(vec![healthy(), ready()]),
        ])
        .chain(futures::stream::pending());

        let result = wait_until_ready(events, RECONCILE, READY, &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_prerequisite_is_fatal() {
        let events = futures::stream::iter(vec![workspace(vec![Condition::new(
            CONDITION_HEALTHY,
            false,
            REASON_MISSING_RESOURCE,
            "Missing: Secret/cloud-creds",
        )])])
        .chain(futures::stream::pending());

        let err = wait_until_ready(events, RECONCILE, READY, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LaunchError::WorkspaceUnhealthy { message, .. } if message.contains("Secret/cloud-creds")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn absent_controller_hits_reconcile_timeout() {
        let events = futures::stream::iter(vec![workspace(vec![])]).chain(futures::stream::pending());

        let err = wait_until_ready(events, RECONCILE, READY, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::ReconcileTimeout(d) if d == RECONCILE));
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_but_never_ready_hits_ready_timeout() {
        let events =
            futures::stream::iter(vec![workspace(vec![healthy()])]).chain(futures::stream::pending());

        let err = wait_until_ready(events, RECONCILE, READY, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::WorkspaceReadyTimeout(d) if d == READY));
    }

    #[tokio::test]
    async fn failure_deletes_workspace_when_cleanup_enabled() {
        let deleted = AtomicBool::new(false);
        let result = finish_or_clean_up(Err(LaunchError::ReconcileTimeout(RECONCILE)), true, || async {
            deleted.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(LaunchError::ReconcileTimeout(_))));
        assert!(deleted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failure_keeps_workspace_without_cleanup() {
        let deleted = AtomicBool::new(false);
        let result = finish_or_clean_up(Err(LaunchError::ReconcileTimeout(RECONCILE)), false, || async {
            deleted.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(result.is_err());
        assert!(!deleted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn success_never_deletes() {
        let deleted = AtomicBool::new(false);
        let result = finish_or_clean_up(Ok(()), true, || async {
            deleted.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(result.is_ok());
        assert!(!deleted.load(Ordering::SeqCst));
    }
}
