use crate::crds::{Run, Workspace};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Secret, ServiceAccount};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, Instrument};

pub mod config;
pub mod run;
pub mod types;
pub mod workspace;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use run::reconcile_run;
pub use types::{Error, Result};
pub use workspace::reconcile_workspace;

use types::Context;

/// Main entry point: runs the Workspace and Run controllers until both stop
#[instrument(skip(client, config), fields(namespace = %namespace))]
pub async fn run_controllers(
    client: Client,
    namespace: String,
    config: ControllerConfig,
) -> Result<()> {
    info!("Starting runq controllers in namespace: {}", namespace);

    if let Err(validation_error) = config.validate() {
        error!("Configuration validation failed: {}", validation_error);
        return Err(Error::ConfigError(validation_error.to_string()));
    }

    let context = Arc::new(Context {
        client: client.clone(),
        namespace: namespace.clone(),
        config: Arc::new(config),
    });

    let workspace_controller_handle = tokio::spawn({
        let context = context.clone();
        let client = client.clone();
        let namespace = namespace.clone();
        async move { run_workspace_controller(client, namespace, context).await }
    });

    let run_controller_handle = tokio::spawn({
        let context = context.clone();
        async move { run_run_controller(client, namespace, context).await }
    });

    debug!("Both controllers started, waiting for completion...");

    match tokio::try_join!(workspace_controller_handle, run_controller_handle) {
        Ok((workspace_result, run_result)) => {
            if let Err(e) = workspace_result {
                error!("Workspace controller failed: {:?}", e);
            }
            if let Err(e) = run_result {
                error!("Run controller failed: {:?}", e);
            }
        }
        Err(e) => {
            error!("Controller task join error: {:?}", e);
        }
    }

    info!("runq controllers shutting down");
    Ok(())
}

/// Workspaces are re-reconciled when their PVC, a referenced ServiceAccount or
/// Secret, or any run labelled for them changes
#[instrument(skip(client, context), fields(namespace = %namespace))]
async fn run_workspace_controller(
    client: Client,
    namespace: String,
    context: Arc<Context>,
) -> Result<()> {
    info!("Starting Workspace controller");

    let workspaces: Api<Workspace> = Api::namespaced(client.clone(), &namespace);
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), &namespace);
    let service_accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), &namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let runs: Api<Run> = Api::namespaced(client, &namespace);
    let watcher_config = Config::default().any_semantic();

    let controller = Controller::new(workspaces, watcher_config.clone());
    let sa_store = controller.store();
    let secret_store = controller.store();

    controller
        .owns(pvcs, watcher_config.clone())
        .watches(service_accounts, watcher_config.clone(), move |sa| {
            let sa_name = sa.name_any();
            sa_store
                .state()
                .into_iter()
                .filter(|ws| ws.spec.service_account_name.as_deref() == Some(sa_name.as_str()))
                .map(|ws| ObjectRef::from_obj(ws.as_ref()))
                .collect::<Vec<_>>()
        })
        .watches(secrets, watcher_config.clone(), move |secret| {
            let secret_name = secret.name_any();
            secret_store
                .state()
                .into_iter()
                .filter(|ws| ws.spec.secret_name.as_deref() == Some(secret_name.as_str()))
                .map(|ws| ObjectRef::from_obj(ws.as_ref()))
                .collect::<Vec<_>>()
        })
        .watches(runs, watcher_config, |run: Run| {
            let namespace = run.namespace();
            run.workspace_name().map(|ws_name| {
                let workspace_ref = ObjectRef::<Workspace>::new(ws_name);
                match namespace {
                    Some(ns) => workspace_ref.within(&ns),
                    None => workspace_ref,
                }
            })
        })
        .run(reconcile_workspace, error_policy_workspace, context)
        .for_each(|reconciliation_result| {
            let workspace_span = tracing::info_span!("workspace_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok(workspace_resource) => {
                        debug!(
                            resource = ?workspace_resource,
                            "Workspace reconciliation successful"
                        );
                    }
                    Err(reconciliation_err) => {
                        error!(
                            error = ?reconciliation_err,
                            "Workspace reconciliation error"
                        );
                    }
                }
            }
            .instrument(workspace_span)
        })
        .await;

    info!("Workspace controller shutting down");
    Ok(())
}

/// Runs are re-reconciled when their pod changes or their workspace's queue
/// or health changes
#[instrument(skip(client, context), fields(namespace = %namespace))]
async fn run_run_controller(client: Client, namespace: String, context: Arc<Context>) -> Result<()> {
    info!("Starting Run controller");

    let runs: Api<Run> = Api::namespaced(client.clone(), &namespace);
    let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let workspaces: Api<Workspace> = Api::namespaced(client, &namespace);
    let watcher_config = Config::default().any_semantic();

    let controller = Controller::new(runs, watcher_config.clone());
    let run_store = controller.store();

    controller
        .owns(pods, watcher_config.clone())
        .watches(workspaces, watcher_config, move |ws: Workspace| {
            let ws_name = ws.name_any();
            run_store
                .state()
                .into_iter()
                .filter(|run| run.workspace_name() == Some(ws_name.as_str()))
                .map(|run| ObjectRef::from_obj(run.as_ref()))
                .collect::<Vec<_>>()
        })
        .run(reconcile_run, error_policy_run, context)
        .for_each(|reconciliation_result| {
            let run_span = tracing::info_span!("run_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok(run_resource) => {
                        debug!(resource = ?run_resource, "Run reconciliation successful");
                    }
                    Err(reconciliation_err) => {
                        error!(error = ?reconciliation_err, "Run reconciliation error");
                    }
                }
            }
            .instrument(run_span)
        })
        .await;

    info!("Run controller shutting down");
    Ok(())
}

fn requeue_after(err: &Error, ctx: &Context) -> Action {
    if err.is_conflict() {
        Action::requeue(ctx.config.requeue.after_conflict())
    } else {
        Action::requeue(ctx.config.requeue.after_error())
    }
}

#[instrument(skip(ctx), fields(workspace = %workspace.name_any(), namespace = %ctx.namespace))]
fn error_policy_workspace(workspace: Arc<Workspace>, err: &Error, ctx: Arc<Context>) -> Action {
    error!(
        error = ?err,
        workspace = %workspace.name_any(),
        "Workspace reconciliation failed, requeueing"
    );
    requeue_after(err, &ctx)
}

#[instrument(skip(ctx), fields(run = %run.name_any(), namespace = %ctx.namespace))]
fn error_policy_run(run: Arc<Run>, err: &Error, ctx: Arc<Context>) -> Action {
    if err.is_conflict() {
        debug!(run = %run.name_any(), "Run status conflict, requeueing");
    } else {
        error!(error = ?err, run = %run.name_any(), "Run reconciliation failed, requeueing");
    }
    requeue_after(err, &ctx)
}
