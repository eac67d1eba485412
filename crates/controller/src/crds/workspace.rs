//! `Workspace` Custom Resource Definition

use super::condition::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CONDITION_HEALTHY: &str = "Healthy";
pub const CONDITION_READY: &str = "Ready";

pub const REASON_MISSING_RESOURCE: &str = "MissingResource";
pub const REASON_ALL_RESOURCES_FOUND: &str = "AllResourcesFound";
pub const REASON_RESOURCES_ENSURED: &str = "ResourcesEnsured";

/// Annotation prefix granting a privileged run permission to execute,
/// e.g. `approvals.runq.dev/run-12345: approved`
pub const APPROVAL_ANNOTATION_PREFIX: &str = "approvals.runq.dev/";

/// Default function for `size` field
fn default_cache_size() -> String {
    "1Gi".to_string()
}

/// Cache volume settings
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct WorkspaceCacheSpec {
    /// Requested size of the cache volume
    #[serde(default = "default_cache_size")]
    pub size: String,

    /// Storage class for the cache volume (cluster default when unset)
    #[serde(default, rename = "storageClass", skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

impl Default for WorkspaceCacheSpec {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            storage_class: None,
        }
    }
}

/// Version control settings the workspace's configuration is sourced from
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct WorkspaceVcsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Path of the configuration within the repository
    #[serde(default, rename = "workingDir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// `Workspace` CRD: a named execution context with a queue of runs
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "runq.dev", version = "v1alpha1", kind = "Workspace")]
#[kube(namespaced)]
#[kube(status = "WorkspaceStatus")]
#[kube(shortname = "ws")]
#[kube(printcolumn = r#"{"name":"Queue","type":"string","jsonPath":".status.queue"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct WorkspaceSpec {
    #[serde(default)]
    pub cache: WorkspaceCacheSpec,

    /// ServiceAccount the run pods execute as
    #[serde(default, rename = "serviceAccountName", skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Secret exposed to run pods as environment variables
    #[serde(default, rename = "secretName", skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Commands that need an explicit approval annotation before they run
    #[serde(default, rename = "privilegedCommands")]
    pub privileged_commands: Vec<String>,

    #[serde(default)]
    pub vcs: WorkspaceVcsSpec,
}

/// Status of the `Workspace`
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct WorkspaceStatus {
    /// Names of pending runs; the head is the run allowed to execute
    #[serde(default)]
    pub queue: Vec<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Workspace {
    pub fn queue(&self) -> &[String] {
        self.status.as_ref().map_or(&[], |s| s.queue.as_slice())
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    /// Position of a run in the queue; `None` when not (yet) queued
    pub fn queue_position(&self, run_name: &str) -> Option<usize> {
        self.queue().iter().position(|name| name == run_name)
    }

    pub fn is_privileged(&self, command: &str) -> bool {
        self.spec.privileged_commands.iter().any(|c| c == command)
    }

    pub fn is_approved(&self, run_name: &str) -> bool {
        let key = format!("{APPROVAL_ANNOTATION_PREFIX}{run_name}");
        self.metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(&key))
    }

    /// Name of the cache PersistentVolumeClaim; shares the workspace's name
    pub fn pvc_name(&self) -> String {
        kube::ResourceExt::name_any(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn spec_defaults_from_empty_object() {
        let spec: WorkspaceSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.cache.size, "1Gi");
        assert!(spec.cache.storage_class.is_none());
        assert!(spec.privileged_commands.is_empty());
        assert!(spec.service_account_name.is_none());
    }

    #[test]
    fn queue_position_is_linear_index() {
        let mut ws = Workspace::new("default", WorkspaceSpec::default());
        ws.status = Some(WorkspaceStatus {
            queue: vec!["run-a".into(), "run-b".into(), "run-c".into()],
            conditions: vec![],
        });
        assert_eq!(ws.queue_position("run-a"), Some(0));
        assert_eq!(ws.queue_position("run-c"), Some(2));
        assert_eq!(ws.queue_position("run-z"), None);
    }

    #[test]
    fn approval_requires_annotation_for_the_run() {
        let mut ws = Workspace::new("default", WorkspaceSpec::default());
        ws.spec.privileged_commands = vec!["apply".into()];
        assert!(ws.is_privileged("apply"));
        assert!(!ws.is_privileged("plan"));
        assert!(!ws.is_approved("run-1"));

        ws.metadata.annotations = Some(BTreeMap::from([(
            "approvals.runq.dev/run-1".to_string(),
            "approved".to_string(),
        )]));
        assert!(ws.is_approved("run-1"));
        assert!(!ws.is_approved("run-2"));
    }
}
