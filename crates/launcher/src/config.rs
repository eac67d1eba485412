//! Launcher Configuration
//!
//! Namespace and workspace come from flags, falling back to the
//! `.runq/environment` marker in the configuration directory.

use anyhow::{anyhow, Context as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Marker file, relative to the configuration directory
pub const ENVIRONMENT_FILE: &str = ".runq/environment";

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_WORKSPACE: &str = "default";

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub namespace: String,
    pub workspace: String,

    /// Attach with a handshake instead of following logs
    pub interactive: bool,

    pub timeouts: Timeouts,
}

/// Phase deadlines observed while monitoring a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Time allowed before the run first shows up in the workspace queue
    pub enqueue: Duration,

    /// Time allowed waiting behind other runs once queued
    pub queue: Duration,

    /// Time allowed before the controller stamps any condition on the run
    pub reconcile: Duration,

    /// Time allowed between the run becoming attachable and its pod being ready
    pub ready: Duration,

    /// Time allowed for the exit code to arrive after the session ends
    pub exit_grace: Duration,

    /// How long the pod waits for the client to answer the handshake
    pub handshake: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            enqueue: Duration::from_secs(10),
            queue: Duration::from_secs(60 * 60),
            reconcile: Duration::from_secs(10),
            ready: Duration::from_secs(60),
            exit_grace: Duration::from_secs(10),
            handshake: Duration::from_secs(10),
        }
    }
}

/// Contents of the environment marker: `namespace/workspace`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentMarker {
    pub namespace: String,
    pub workspace: String,
}

impl EnvironmentMarker {
    pub fn parse(contents: &str) -> Result<Self, anyhow::Error> {
        let trimmed = contents.trim();
        let (namespace, workspace) = trimmed
            .split_once('/')
            .ok_or_else(|| anyhow!("expected 'namespace/workspace', got '{trimmed}'"))?;

        if namespace.is_empty() || workspace.is_empty() || workspace.contains('/') {
            return Err(anyhow!("expected 'namespace/workspace', got '{trimmed}'"));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            workspace: workspace.to_string(),
        })
    }

    /// Read the marker from a configuration directory; `None` if absent
    pub fn read(dir: &Path) -> Result<Option<Self>, anyhow::Error> {
        let path = dir.join(ENVIRONMENT_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Invalid environment file {}", path.display()))
            .map(Some)
    }

    /// Write the marker into a configuration directory, replacing any
    /// existing one
    pub fn write(&self, dir: &Path) -> Result<PathBuf, anyhow::Error> {
        let path = dir.join(ENVIRONMENT_FILE);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, format!("{}/{}\n", self.namespace, self.workspace))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

impl LauncherConfig {
    /// Flags win over the marker file, which wins over the defaults
    pub fn resolve(
        dir: &Path,
        namespace: Option<String>,
        workspace: Option<String>,
    ) -> Result<Self, anyhow::Error> {
        let marker = EnvironmentMarker::read(dir)?;

        let namespace = namespace
            .or_else(|| marker.as_ref().map(|m| m.namespace.clone()))
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let workspace = workspace
            .or_else(|| marker.as_ref().map(|m| m.workspace.clone()))
            .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string());

        Ok(Self {
            namespace,
            workspace,
            interactive: false,
            timeouts: Timeouts::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_marker(dir: &Path, contents: &str) {
        std::fs::create_dir_all(dir.join(".runq")).unwrap();
        std::fs::write(dir.join(ENVIRONMENT_FILE), contents).unwrap();
    }

    #[test]
    fn test_marker_parsing() {
        let marker = EnvironmentMarker::parse("team-a/networking\n").unwrap();
        assert_eq!(marker.namespace, "team-a");
        assert_eq!(marker.workspace, "networking");

        assert!(EnvironmentMarker::parse("networking").is_err());
        assert!(EnvironmentMarker::parse("/networking").is_err());
        assert!(EnvironmentMarker::parse("a/b/c").is_err());
    }

    #[test]
    fn test_defaults_without_marker_or_flags() {
        let dir = tempfile::tempdir().unwrap();
        let config = LauncherConfig::resolve(dir.path(), None, None).unwrap();
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.workspace, DEFAULT_WORKSPACE);
        assert_eq!(config.timeouts, Timeouts::default());
    }

    #[test]
    fn test_marker_fills_in_missing_flags() {
        let dir = tempfile::tempdir().unwrap();
        write_marker(dir.path(), "team-a/networking");

        let config = LauncherConfig::resolve(dir.path(), None, Some("dns".into())).unwrap();
        assert_eq!(config.namespace, "team-a");
        assert_eq!(config.workspace, "dns");
    }

    #[test]
    fn test_malformed_marker_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_marker(dir.path(), "garbage");
        assert!(LauncherConfig::resolve(dir.path(), None, None).is_err());
    }

    #[test]
    fn test_written_marker_is_picked_up_by_resolve() {
        let dir = tempfile::tempdir().unwrap();
        write_marker(dir.path(), "old/stale");

        let marker = EnvironmentMarker {
            namespace: "team-b".into(),
            workspace: "storage".into(),
        };
        let path = marker.write(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(ENVIRONMENT_FILE));

        let config = LauncherConfig::resolve(dir.path(), None, None).unwrap();
        assert_eq!(config.namespace, "team-b");
        assert_eq!(config.workspace, "storage");
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.enqueue, Duration::from_secs(10));
        assert_eq!(timeouts.queue, Duration::from_secs(3600));
        assert_eq!(timeouts.exit_grace, Duration::from_secs(10));
    }
}
