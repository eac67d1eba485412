use super::queue::recompute_queue;
use super::resources::WorkspaceResourceManager;
use crate::crds::condition::{set_condition, Condition};
use crate::crds::{
    Run, Workspace, WorkspaceStatus, CONDITION_HEALTHY, CONDITION_READY,
    REASON_ALL_RESOURCES_FOUND, REASON_MISSING_RESOURCE, REASON_RESOURCES_ENSURED,
    WORKSPACE_LABEL,
};
use crate::tasks::types::{Context, Result};
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What one reconciliation observed about a workspace's surroundings
#[derive(Debug, Clone, Default)]
pub struct WorkspaceObservation {
    /// Referenced ServiceAccount/Secret that do not exist
    pub missing: Vec<String>,

    /// Names of labelled runs that have not completed, in list order
    pub pending: Vec<String>,
}

/// Status the workspace should have, or `None` when it already has it.
///
/// A workspace with missing prerequisites keeps its queue untouched.
pub fn next_status(workspace: &Workspace, observed: &WorkspaceObservation) -> Option<WorkspaceStatus> {
    let current = workspace.status.clone().unwrap_or_default();
    let mut next = current.clone();

    if observed.missing.is_empty() {
        set_condition(
            &mut next.conditions,
            Condition::new(
                CONDITION_HEALTHY,
                true,
                REASON_ALL_RESOURCES_FOUND,
                "All referenced resources found",
            ),
        );
        set_condition(
            &mut next.conditions,
            Condition::new(
                CONDITION_READY,
                true,
                REASON_RESOURCES_ENSURED,
                "Cache volume and RBAC resources ensured",
            ),
        );
        next.queue = recompute_queue(&current.queue, &observed.pending);
    } else {
        let message = format!("Missing: {}", observed.missing.join(", "));
        set_condition(
            &mut next.conditions,
            Condition::new(CONDITION_HEALTHY, false, REASON_MISSING_RESOURCE, message.clone()),
        );
        set_condition(
            &mut next.conditions,
            Condition::new(CONDITION_READY, false, REASON_MISSING_RESOURCE, message),
        );
    }

    (next != current).then_some(next)
}

#[instrument(skip(ctx), fields(workspace = %workspace.name_any(), namespace = %ctx.namespace))]
pub async fn reconcile_workspace(workspace: Arc<Workspace>, ctx: Arc<Context>) -> Result<Action> {
    let name = workspace.name_any();
    debug!("Reconciling Workspace {}", name);

    let resources = WorkspaceResourceManager::new(&ctx, &workspace);
    let mut observed = WorkspaceObservation {
        missing: resources.missing_prerequisites().await?,
        ..Default::default()
    };

    if observed.missing.is_empty() {
        resources.ensure_all().await?;

        let runs: Api<Run> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
        let labelled = runs
            .list(&ListParams::default().labels(&format!("{WORKSPACE_LABEL}={name}")))
            .await?;
        observed.pending = labelled
            .items
            .iter()
            .filter(|run| !run.is_completed())
            .map(ResourceExt::name_any)
            .collect();
    } else {
        warn!(
            missing = ?observed.missing,
            "Workspace {} is missing prerequisites", name
        );
    }

    match next_status(&workspace, &observed) {
        Some(status) => {
            update_workspace_status(&workspace, &ctx, &status).await?;
        }
        None => {
            debug!("Workspace {} status unchanged, skipping update", name);
        }
    }

    Ok(Action::await_change())
}

/// Merge-patch the status subresource, guarded by the observed resourceVersion
async fn update_workspace_status(
    workspace: &Workspace,
    ctx: &Context,
    status: &WorkspaceStatus,
) -> Result<()> {
    let workspaces: Api<Workspace> = Api::namespaced(ctx.client.clone(), &ctx.namespace);

    let status_patch = json!({
        "metadata": {
            "resourceVersion": workspace.resource_version(),
        },
        "status": status,
    });

    workspaces
        .patch_status(
            &workspace.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&status_patch),
        )
        .await?;

    info!(
        queue = ?status.queue,
        "Updated status of Workspace {}",
        workspace.name_any()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::condition::is_true_for;
    use crate::crds::WorkspaceSpec;

    #[test]
    fn missing_secret_marks_workspace_unhealthy_and_keeps_queue() {
        let mut ws = Workspace::new("dev", WorkspaceSpec::default());
        ws.status = Some(WorkspaceStatus {
            queue: vec!["run-a".into()],
            conditions: vec![],
        });
        let observed = WorkspaceObservation {
            missing: vec!["Secret/creds".into()],
            pending: vec![],
        };

        let status = next_status(&ws, &observed).unwrap();
        assert_eq!(status.queue, vec!["run-a"]);
        assert!(!is_true_for(&status.conditions, CONDITION_HEALTHY));
        let healthy = status
            .conditions
            .iter()
            .find(|c| c.condition_type == CONDITION_HEALTHY)
            .unwrap();
        assert_eq!(healthy.reason(), REASON_MISSING_RESOURCE);
        assert!(healthy.message().contains("Secret/creds"));
    }

    #[test]
    fn new_workspace_becomes_healthy_and_ready() {
        let ws = Workspace::new("dev", WorkspaceSpec::default());
        let observed = WorkspaceObservation {
            missing: vec![],
            pending: vec!["run-a".into()],
        };

        let status = next_status(&ws, &observed).unwrap();
        assert!(is_true_for(&status.conditions, CONDITION_HEALTHY));
        assert!(is_true_for(&status.conditions, CONDITION_READY));
        assert_eq!(status.queue, vec!["run-a"]);
    }
}
