use crate::crds::Workspace;
use crate::tasks::config::ControllerConfig;
use crate::tasks::types::{is_already_exists, is_not_found, Context, Error, Result};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, PostParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, info};

/// Service account bound to the workspace role when none is configured
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

pub fn role_name(workspace_name: &str) -> String {
    format!("runq-workspace-{workspace_name}")
}

pub struct WorkspaceResourceManager<'a> {
    pub pvcs: Api<PersistentVolumeClaim>,
    pub roles: Api<Role>,
    pub role_bindings: Api<RoleBinding>,
    pub service_accounts: Api<ServiceAccount>,
    pub secrets: Api<Secret>,
    pub workspace: &'a Workspace,
    pub config: &'a ControllerConfig,
    pub namespace: &'a str,
}

impl<'a> WorkspaceResourceManager<'a> {
    pub fn new(ctx: &'a Context, workspace: &'a Workspace) -> Self {
        let client = ctx.client.clone();
        let namespace = ctx.namespace.as_str();
        Self {
            pvcs: Api::namespaced(client.clone(), namespace),
            roles: Api::namespaced(client.clone(), namespace),
            role_bindings: Api::namespaced(client.clone(), namespace),
            service_accounts: Api::namespaced(client.clone(), namespace),
            secrets: Api::namespaced(client, namespace),
            workspace,
            config: &ctx.config,
            namespace,
        }
    }

    /// Referenced prerequisites that do not exist, as `Kind/name` strings.
    /// Absent references are not prerequisites.
    pub async fn missing_prerequisites(&self) -> Result<Vec<String>> {
        let mut missing = Vec::new();

        if let Some(sa) = &self.workspace.spec.service_account_name {
            if self.service_accounts.get_opt(sa).await?.is_none() {
                missing.push(format!("ServiceAccount/{sa}"));
            }
        }

        if let Some(secret) = &self.workspace.spec.secret_name {
            if self.secrets.get_opt(secret).await?.is_none() {
                missing.push(format!("Secret/{secret}"));
            }
        }

        Ok(missing)
    }

    pub async fn ensure_all(&self) -> Result<()> {
        let owner = self.owner_reference()?;
        let name = self.workspace.name_any();

        let pvc = build_pvc(self.workspace, self.config, owner.clone())?;
        ensure_exists(&self.pvcs, &self.workspace.pvc_name(), &pvc).await?;

        let role = build_role(&name, owner.clone());
        ensure_exists(&self.roles, &role_name(&name), &role).await?;

        let binding = build_role_binding(self.workspace, self.namespace, owner);
        ensure_exists(&self.role_bindings, &role_name(&name), &binding).await?;

        Ok(())
    }

    fn owner_reference(&self) -> Result<OwnerReference> {
        self.workspace
            .controller_owner_ref(&())
            .ok_or(Error::MissingObjectKey)
    }
}

/// Get-or-create, tolerating a concurrent creator
async fn ensure_exists<K>(api: &Api<K>, name: &str, desired: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    K::DynamicType: Default,
{
    match api.get(name).await {
        Ok(_) => {
            debug!("{} {} already exists", K::kind(&Default::default()), name);
            Ok(())
        }
        Err(e) if is_not_found(&e) => match api.create(&PostParams::default(), desired).await {
            Ok(_) => {
                info!("Created {} {}", K::kind(&Default::default()), name);
                Ok(())
            }
            Err(e) if is_already_exists(&e) => {
                info!("{} {} was created concurrently", K::kind(&Default::default()), name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        Err(e) => Err(e.into()),
    }
}

fn workspace_labels(workspace_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/managed-by".to_string(), "runq".to_string()),
        (
            crate::crds::WORKSPACE_LABEL.to_string(),
            workspace_name.to_string(),
        ),
    ])
}

/// Cache volume for the workspace; size falls back to the controller default
pub fn build_pvc(
    workspace: &Workspace,
    config: &ControllerConfig,
    owner: OwnerReference,
) -> Result<PersistentVolumeClaim> {
    let size = if workspace.spec.cache.size.trim().is_empty() {
        config.cache.default_size.clone()
    } else {
        workspace.spec.cache.size.clone()
    };

    let mut spec = json!({
        "accessModes": ["ReadWriteOnce"],
        "resources": {
            "requests": {
                "storage": size
            }
        }
    });

    if let Some(storage_class) = &workspace.spec.cache.storage_class {
        spec["storageClassName"] = json!(storage_class);
    }

    let pvc = json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {
            "name": workspace.pvc_name(),
            "labels": workspace_labels(&workspace.name_any()),
            "ownerReferences": [owner]
        },
        "spec": spec
    });

    Ok(serde_json::from_value(pvc)?)
}

/// Read access to runq resources for the workspace's runners
pub fn build_role(workspace_name: &str, owner: OwnerReference) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(role_name(workspace_name)),
            labels: Some(workspace_labels(workspace_name)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["runq.dev".to_string()]),
            resources: Some(vec!["workspaces".to_string(), "runs".to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        }]),
    }
}

pub fn build_role_binding(workspace: &Workspace, namespace: &str, owner: OwnerReference) -> RoleBinding {
    let workspace_name = workspace.name_any();
    let service_account = workspace
        .spec
        .service_account_name
        .clone()
        .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string());

    RoleBinding {
        metadata: ObjectMeta {
            name: Some(role_name(&workspace_name)),
            labels: Some(workspace_labels(&workspace_name)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role_name(&workspace_name),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account,
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}
