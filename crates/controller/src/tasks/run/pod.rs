use super::templates::{RunScriptGenerator, WORKSPACE_DIR};
use crate::crds::{Run, Workspace, CONTAINER_NAME, WORKSPACE_LABEL};
use crate::tasks::config::ControllerConfig;
use crate::tasks::types::{is_already_exists, Error, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const RUN_LABEL: &str = "runq.dev/run";

const PAYLOAD_MOUNT_PATH: &str = "/payload";

/// Execution pod for a run at the head of its workspace queue
pub fn build_pod(run: &Run, workspace: &Workspace, config: &ControllerConfig) -> Result<Pod> {
    let name = run.name_any();
    let owner = run.controller_owner_ref(&()).ok_or(Error::MissingObjectKey)?;
    let script = RunScriptGenerator::generate(run, workspace)?;
    let cache_path = config.runner.cache_mount_path.as_str();

    let labels = BTreeMap::from([
        ("app.kubernetes.io/managed-by".to_string(), "runq".to_string()),
        (WORKSPACE_LABEL.to_string(), workspace.name_any()),
        (RUN_LABEL.to_string(), name.clone()),
    ]);

    let mut container = json!({
        "name": CONTAINER_NAME,
        "image": config.runner.image.reference(),
        "command": ["/bin/sh", "-c", script],
        "workingDir": WORKSPACE_DIR,
        "stdin": run.spec.handshake,
        "stdinOnce": run.spec.handshake,
        "tty": run.spec.handshake,
        "env": [
            {"name": "RUNQ_RUN", "value": name},
            {"name": "RUNQ_WORKSPACE", "value": workspace.name_any()},
            {"name": "TF_DATA_DIR", "value": format!("{cache_path}/.terraform")},
            {"name": "TF_IN_AUTOMATION", "value": "true"}
        ],
        "volumeMounts": [
            {"name": "cache", "mountPath": cache_path},
            {"name": "payload", "mountPath": PAYLOAD_MOUNT_PATH, "readOnly": true},
            {"name": "workspace", "mountPath": WORKSPACE_DIR}
        ]
    });

    if let Some(secret) = &workspace.spec.secret_name {
        container["envFrom"] = json!([{ "secretRef": { "name": secret } }]);
    }

    let mut spec = json!({
        "restartPolicy": "Never",
        "containers": [container],
        "volumes": [
            {
                "name": "cache",
                "persistentVolumeClaim": { "claimName": workspace.pvc_name() }
            },
            {
                "name": "payload",
                "configMap": {
                    "name": run.spec.config_map,
                    "items": [{ "key": run.spec.config_map_key, "path": run.spec.config_map_key }]
                }
            },
            { "name": "workspace", "emptyDir": {} }
        ]
    });

    if let Some(sa) = &workspace.spec.service_account_name {
        spec["serviceAccountName"] = json!(sa);
    }

    if !config.runner.image_pull_secrets.is_empty() {
        let secrets: Vec<_> = config
            .runner
            .image_pull_secrets
            .iter()
            .map(|s| json!({ "name": s }))
            .collect();
        spec["imagePullSecrets"] = json!(secrets);
    }

    let pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "labels": labels,
            "ownerReferences": [owner]
        },
        "spec": spec
    });

    Ok(serde_json::from_value(pod)?)
}

/// Create the run's pod unless one already exists under its name
pub async fn create_or_get_pod(pods: &Api<Pod>, desired: &Pod) -> Result<Pod> {
    let name = desired.name_any();
    match pods.create(&PostParams::default(), desired).await {
        Ok(pod) => {
            info!("Created pod {}", name);
            Ok(pod)
        }
        Err(e) if is_already_exists(&e) => {
            debug!("Pod {} already exists", name);
            Ok(pods.get(&name).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Exit code of the runner container once it has terminated
pub fn terminated_exit_code(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|cs| cs.name == CONTAINER_NAME)?
        .state
        .as_ref()?
        .terminated
        .as_ref()
        .map(|t| t.exit_code)
}

/// Make the payload ConfigMap a dependent of the run so it is garbage
/// collected along with it
pub async fn adopt_config_map(configmaps: &Api<ConfigMap>, run: &Run) -> Result<()> {
    let Some(cm) = configmaps.get_opt(&run.spec.config_map).await? else {
        warn!("Payload ConfigMap {} not found", run.spec.config_map);
        return Ok(());
    };

    let Some(uid) = run.uid() else {
        return Err(Error::MissingObjectKey);
    };

    let mut owners = cm.metadata.owner_references.clone().unwrap_or_default();
    if owners.iter().any(|o| o.uid == uid) {
        return Ok(());
    }

    let mut owner = run.controller_owner_ref(&()).ok_or(Error::MissingObjectKey)?;
    owner.controller = None;
    owners.push(owner);

    let patch = json!({
        "metadata": {
            "resourceVersion": cm.resource_version(),
            "ownerReferences": owners,
        }
    });
    configmaps
        .patch(&cm.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    info!("Adopted payload ConfigMap {}", cm.name_any());
    Ok(())
}
