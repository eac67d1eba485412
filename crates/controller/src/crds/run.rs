//! `Run` Custom Resource Definition: a single command queued against a workspace

use super::condition::{self, Condition};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Label naming the workspace a run is queued against
pub const WORKSPACE_LABEL: &str = "runq.dev/workspace";

/// Annotation the client sets once it has attached to the run's pod
pub const CLIENT_ANNOTATION: &str = "runq.dev/client";
pub const CLIENT_READY: &str = "Ready";

/// Name of the container that executes the command; shared by the pod spec,
/// attach, log streaming and exit code relay
pub const CONTAINER_NAME: &str = "runner";

/// Sentinel printed by the pod entrypoint when it is ready for an interactive
/// client. The client echoes it back before any user input is relayed.
pub const HANDSHAKE_TOKEN: &str = "runq-handshake-3f1c";

pub const DEFAULT_CONFIG_MAP_KEY: &str = "config.tar.gz";

pub const CONDITION_COMPLETED: &str = "Completed";
pub const CONDITION_ATTACHABLE: &str = "Attachable";
pub const CONDITION_CLIENT_READY: &str = "ClientReady";

pub const REASON_UNSCHEDULED: &str = "Unscheduled";
pub const REASON_QUEUED: &str = "Queued";
pub const REASON_FRONT_OF_QUEUE: &str = "FrontOfQueue";
pub const REASON_CLIENT_ATTACHED: &str = "ClientAttached";
pub const REASON_WORKSPACE_UNSPECIFIED: &str = "WorkspaceUnspecified";
pub const REASON_WORKSPACE_NOT_FOUND: &str = "WorkspaceNotFound";
pub const REASON_WORKSPACE_UNHEALTHY: &str = "WorkspaceUnhealthy";
pub const REASON_UNAPPROVED: &str = "Unapproved";
pub const REASON_POD_SUCCEEDED: &str = "PodSucceeded";
pub const REASON_POD_FAILED: &str = "PodFailed";
/// The execution pod vanished before its runner terminated
pub const REASON_POD_DELETED: &str = "PodDeleted";
/// Attachable reason once the run has completed
pub const REASON_RUN_COMPLETED: &str = "Completed";

/// Commands a run may execute. Every kind shares the same resource, so the set
/// of supported operations is checked here rather than by resource kind.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunCommand {
    Init,
    Plan,
    Apply,
    Destroy,
    Validate,
    Refresh,
    Output,
    Show,
    Console,
    Sh,
}

impl RunCommand {
    pub const ALL: [RunCommand; 10] = [
        RunCommand::Init,
        RunCommand::Plan,
        RunCommand::Apply,
        RunCommand::Destroy,
        RunCommand::Validate,
        RunCommand::Refresh,
        RunCommand::Output,
        RunCommand::Show,
        RunCommand::Console,
        RunCommand::Sh,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RunCommand::Init => "init",
            RunCommand::Plan => "plan",
            RunCommand::Apply => "apply",
            RunCommand::Destroy => "destroy",
            RunCommand::Validate => "validate",
            RunCommand::Refresh => "refresh",
            RunCommand::Output => "output",
            RunCommand::Show => "show",
            RunCommand::Console => "console",
            RunCommand::Sh => "sh",
        }
    }

    /// Program and leading arguments executed in the runner container
    pub fn program(self) -> Vec<&'static str> {
        match self {
            RunCommand::Sh => vec!["sh"],
            other => vec!["terraform", other.as_str()],
        }
    }

    /// Commands that read from a terminal and only make sense attached
    pub fn needs_tty(self) -> bool {
        matches!(self, RunCommand::Console | RunCommand::Sh)
    }
}

impl fmt::Display for RunCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedCommand(pub String);

impl fmt::Display for UnsupportedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let supported: Vec<&str> = RunCommand::ALL.iter().map(|c| c.as_str()).collect();
        write!(
            f,
            "unsupported command '{}' (supported: {})",
            self.0,
            supported.join(", ")
        )
    }
}

impl std::error::Error for UnsupportedCommand {}

impl FromStr for RunCommand {
    type Err = UnsupportedCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunCommand::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnsupportedCommand(s.to_string()))
    }
}

fn default_config_map_key() -> String {
    DEFAULT_CONFIG_MAP_KEY.to_string()
}

fn default_handshake_timeout() -> u64 {
    10
}

/// `Run` CRD for a single command execution
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "runq.dev", version = "v1alpha1", kind = "Run")]
#[kube(namespaced)]
#[kube(status = "RunStatus")]
#[kube(printcolumn = r#"{"name":"Command","type":"string","jsonPath":".spec.command"}"#)]
#[kube(printcolumn = r#"{"name":"Workspace","type":"string","jsonPath":".metadata.labels.runq\\.dev/workspace"}"#)]
#[kube(printcolumn = r#"{"name":"Exit","type":"integer","jsonPath":".status.exitCode"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct RunSpec {
    pub command: RunCommand,

    #[serde(default)]
    pub args: Vec<String>,

    /// ConfigMap holding the configuration archive
    #[serde(rename = "configMap")]
    pub config_map: String,

    /// Key within the ConfigMap's binary data
    #[serde(default = "default_config_map_key", rename = "configMapKey")]
    pub config_map_key: String,

    /// Whether the pod waits for an interactive client before running
    #[serde(default)]
    pub handshake: bool,

    /// Seconds the pod waits for the client to complete the handshake
    #[serde(default = "default_handshake_timeout", rename = "handshakeTimeoutSeconds")]
    pub handshake_timeout_seconds: u64,
}

/// Status of the `Run`
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct RunStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Exit code of the runner container once it has terminated
    #[serde(default, rename = "exitCode", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, rename = "podName", skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
}

impl Run {
    pub fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        condition::find(self.conditions(), condition_type)
    }

    pub fn is_completed(&self) -> bool {
        condition::is_true_for(self.conditions(), CONDITION_COMPLETED)
    }

    pub fn is_attachable(&self) -> bool {
        condition::is_true_for(self.conditions(), CONDITION_ATTACHABLE)
    }

    pub fn workspace_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(WORKSPACE_LABEL))
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn client_ready(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(CLIENT_ANNOTATION))
            .is_some_and(|v| v == CLIENT_READY)
    }
}

/// Completion reasons that mean the run never executed and never will
pub fn is_failure_reason(reason: &str) -> bool {
    matches!(
        reason,
        REASON_WORKSPACE_UNSPECIFIED
            | REASON_WORKSPACE_NOT_FOUND
            | REASON_WORKSPACE_UNHEALTHY
            | REASON_UNAPPROVED
            | REASON_POD_DELETED
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn run_with_labels(labels: BTreeMap<String, String>) -> Run {
        let mut run = Run::new(
            "run-1",
            RunSpec {
                command: RunCommand::Plan,
                args: vec![],
                config_map: "run-1".into(),
                config_map_key: default_config_map_key(),
                handshake: false,
                handshake_timeout_seconds: 10,
            },
        );
        run.metadata.labels = Some(labels);
        run
    }

    #[test]
    fn command_round_trips_through_names() {
        for command in RunCommand::ALL {
            assert_eq!(command.as_str().parse::<RunCommand>(), Ok(command));
        }
        let err = "import".parse::<RunCommand>().unwrap_err();
        assert!(err.to_string().contains("unsupported command 'import'"));
    }

    #[test]
    fn command_program_wraps_terraform() {
        assert_eq!(RunCommand::Plan.program(), vec!["terraform", "plan"]);
        assert_eq!(RunCommand::Sh.program(), vec!["sh"]);
    }

    #[test]
    fn spec_applies_defaults() {
        let spec: RunSpec = serde_json::from_value(serde_json::json!({
            "command": "apply",
            "configMap": "run-abc"
        }))
        .unwrap();
        assert_eq!(spec.command, RunCommand::Apply);
        assert_eq!(spec.config_map_key, DEFAULT_CONFIG_MAP_KEY);
        assert_eq!(spec.handshake_timeout_seconds, 10);
        assert!(!spec.handshake);
    }

    #[test]
    fn workspace_label_must_be_non_empty() {
        let run = run_with_labels(BTreeMap::new());
        assert_eq!(run.workspace_name(), None);

        let run = run_with_labels(BTreeMap::from([(WORKSPACE_LABEL.into(), String::new())]));
        assert_eq!(run.workspace_name(), None);

        let run = run_with_labels(BTreeMap::from([(WORKSPACE_LABEL.into(), "dev".into())]));
        assert_eq!(run.workspace_name(), Some("dev"));
    }

    #[test]
    fn failure_reasons_exclude_pod_outcomes() {
        assert!(is_failure_reason(REASON_WORKSPACE_NOT_FOUND));
        assert!(is_failure_reason(REASON_UNAPPROVED));
        assert!(!is_failure_reason(REASON_POD_FAILED));
        assert!(!is_failure_reason(REASON_POD_SUCCEEDED));
        assert!(is_failure_reason(REASON_POD_DELETED));
    }
}
