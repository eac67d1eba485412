use super::pod::{adopt_config_map, build_pod, create_or_get_pod, terminated_exit_code};
use crate::crds::condition::{self, set_condition, Condition};
use crate::crds::{
    Run, RunStatus, Workspace, CONDITION_ATTACHABLE, CONDITION_CLIENT_READY, CONDITION_COMPLETED,
    CONDITION_HEALTHY, REASON_CLIENT_ATTACHED, REASON_FRONT_OF_QUEUE, REASON_POD_DELETED,
    REASON_POD_FAILED, REASON_POD_SUCCEEDED, REASON_QUEUED, REASON_RUN_COMPLETED,
    REASON_UNAPPROVED, REASON_UNSCHEDULED, REASON_WORKSPACE_NOT_FOUND,
    REASON_WORKSPACE_UNHEALTHY, REASON_WORKSPACE_UNSPECIFIED, WORKSPACE_LABEL,
};
use crate::tasks::types::{Context, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Outcome of resolving a run's workspace label
#[derive(Debug, Clone, Copy)]
pub enum WorkspaceLookup<'a> {
    /// The run carries no (or an empty) workspace label
    Unspecified,
    NotFound(&'a str),
    Found(&'a Workspace),
}

/// What a reconciliation should write and create
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPlan {
    /// New status, present only when it differs from the current one
    pub status: Option<RunStatus>,

    /// Whether the execution pod should be created
    pub create_pod: bool,
}

/// Decide the next state of a run from what was observed.
///
/// Completed runs are never touched again. The pod is only requested for the
/// head of the queue, and only once: a run whose recorded pod has disappeared
/// completes instead of executing a second time.
///
/// A workspace reported unhealthy completes every run that is not yet
/// attachable, even if the workspace recovers a moment later.
pub fn plan_run(run: &Run, workspace: WorkspaceLookup<'_>, pod: Option<&Pod>) -> RunPlan {
    if run.is_completed() {
        return RunPlan::default();
    }

    let name = run.name_any();
    let current = run.status.clone().unwrap_or_default();
    let mut next = current.clone();
    let mut create_pod = false;

    match workspace {
        WorkspaceLookup::Unspecified => complete(
            &mut next,
            REASON_WORKSPACE_UNSPECIFIED,
            format!("Run is missing the {WORKSPACE_LABEL} label"),
        ),
        WorkspaceLookup::NotFound(ws_name) => complete(
            &mut next,
            REASON_WORKSPACE_NOT_FOUND,
            format!("Workspace {ws_name} not found"),
        ),
        WorkspaceLookup::Found(ws) => {
            if let Some(code) = pod.and_then(terminated_exit_code) {
                let reason = if code == 0 {
                    REASON_POD_SUCCEEDED
                } else {
                    REASON_POD_FAILED
                };
                complete(&mut next, reason, format!("Runner exited with code {code}"));
                next.exit_code = Some(code);
            } else if pod.is_none() && current.pod_name.is_some() {
                complete(
                    &mut next,
                    REASON_POD_DELETED,
                    format!("Pod {name} was deleted before the runner exited"),
                );
            } else if condition::is_false_for(ws.conditions(), CONDITION_HEALTHY)
                && !run.is_attachable()
            {
                let detail = condition::find(ws.conditions(), CONDITION_HEALTHY)
                    .map(Condition::message)
                    .unwrap_or_default();
                complete(
                    &mut next,
                    REASON_WORKSPACE_UNHEALTHY,
                    format!("Workspace {} is unhealthy: {detail}", ws.name_any()),
                );
            } else {
                match ws.queue_position(&name) {
                    None => set_attachable(
                        &mut next,
                        false,
                        REASON_UNSCHEDULED,
                        "Not in workspace queue".to_string(),
                    ),
                    Some(0)
                        if ws.is_privileged(run.spec.command.as_str())
                            && !ws.is_approved(&name) =>
                    {
                        complete(
                            &mut next,
                            REASON_UNAPPROVED,
                            format!(
                                "Command {} is privileged and run {name} has not been approved",
                                run.spec.command
                            ),
                        )
                    }
                    Some(0) => {
                        set_attachable(
                            &mut next,
                            true,
                            REASON_FRONT_OF_QUEUE,
                            "At front of workspace queue".to_string(),
                        );
                        next.pod_name = Some(name.clone());
                        create_pod = pod.is_none();
                    }
                    Some(position) => set_attachable(
                        &mut next,
                        false,
                        REASON_QUEUED,
                        format!("In workspace queue position {position}"),
                    ),
                }
            }
        }
    }

    if run.client_ready() {
        set_condition(
            &mut next.conditions,
            Condition::new(
                CONDITION_CLIENT_READY,
                true,
                REASON_CLIENT_ATTACHED,
                "Client has attached",
            ),
        );
    }

    RunPlan {
        status: (next != current).then_some(next),
        create_pod,
    }
}

/// Completion also withdraws attachability so a finished run never shares
/// the head with its successor
fn complete(status: &mut RunStatus, reason: &str, message: String) {
    set_attachable(
        status,
        false,
        REASON_RUN_COMPLETED,
        format!("Run completed: {reason}"),
    );
    set_condition(
        &mut status.conditions,
        Condition::new(CONDITION_COMPLETED, true, reason, message),
    );
}

fn set_attachable(status: &mut RunStatus, attachable: bool, reason: &str, message: String) {
    set_condition(
        &mut status.conditions,
        Condition::new(CONDITION_ATTACHABLE, attachable, reason, message),
    );
}

#[instrument(skip(ctx), fields(run = %run.name_any(), namespace = %ctx.namespace))]
pub async fn reconcile_run(run: Arc<Run>, ctx: Arc<Context>) -> Result<Action> {
    let name = run.name_any();

    if run.is_completed() {
        debug!("Run {} already completed, nothing to do", name);
        return Ok(Action::await_change());
    }

    let workspaces: Api<Workspace> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let configmaps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    adopt_config_map(&configmaps, &run).await?;

    let workspace = match run.workspace_name() {
        Some(ws_name) => workspaces.get_opt(ws_name).await?,
        None => None,
    };
    let lookup = match (run.workspace_name(), workspace.as_ref()) {
        (None, _) => WorkspaceLookup::Unspecified,
        (Some(ws_name), None) => WorkspaceLookup::NotFound(ws_name),
        (Some(_), Some(ws)) => WorkspaceLookup::Found(ws),
    };

    let pod = pods.get_opt(&name).await?;
    let plan = plan_run(&run, lookup, pod.as_ref());

    if plan.create_pod {
        if let Some(ws) = workspace.as_ref() {
            let desired = build_pod(&run, ws, &ctx.config)?;
            create_or_get_pod(&pods, &desired).await?;
        }
    }

    match plan.status {
        Some(status) => update_run_status(&run, &ctx, &status).await?,
        None => debug!("Run {} status unchanged, skipping update", name),
    }

    Ok(Action::await_change())
}

/// Merge-patch the status subresource, guarded by the observed resourceVersion
async fn update_run_status(run: &Run, ctx: &Context, status: &RunStatus) -> Result<()> {
    let runs: Api<Run> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    let status_patch = json!({
        "metadata": {
            "resourceVersion": run.resource_version(),
        },
        "status": status,
    });

    runs.patch_status(
        &run.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&status_patch),
    )
    .await?;

    let summary: Vec<String> = status
        .conditions
        .iter()
        .map(|c| format!("{}={}({})", c.condition_type, c.status, c.reason()))
        .collect();
    info!(conditions = ?summary, "Updated status of Run {}", run.name_any());
    Ok(())
}
