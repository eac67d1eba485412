//! Controller Configuration
//!
//! Loaded from a mounted YAML file; every section has defaults so a partial
//! file (or none at all) still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main controller configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Runner pod configuration
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Workspace cache defaults
    #[serde(default)]
    pub cache: CacheConfig,

    /// Requeue behaviour after failed reconciliations
    #[serde(default)]
    pub requeue: RequeueConfig,
}

/// Runner pod configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Container image the runner executes
    #[serde(default = "default_runner_image")]
    pub image: ImageConfig,

    /// Image pull secrets for private registries
    #[serde(default, rename = "imagePullSecrets")]
    pub image_pull_secrets: Vec<String>,

    /// Where the workspace cache volume is mounted in the runner
    #[serde(default = "default_cache_mount_path", rename = "cacheMountPath")]
    pub cache_mount_path: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            image: default_runner_image(),
            image_pull_secrets: Vec::new(),
            cache_mount_path: default_cache_mount_path(),
        }
    }
}

/// Image configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ImageConfig {
    /// Image repository (e.g., "ghcr.io/runq-dev/runner")
    pub repository: String,

    /// Image tag (e.g., "latest", "1.9.5")
    pub tag: String,
}

impl ImageConfig {
    /// Returns `true` when both repository and tag are populated.
    pub fn is_configured(&self) -> bool {
        !self.repository.trim().is_empty() && !self.tag.trim().is_empty()
    }

    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

fn default_runner_image() -> ImageConfig {
    ImageConfig {
        repository: "ghcr.io/runq-dev/runner".to_string(),
        tag: "latest".to_string(),
    }
}

fn default_cache_mount_path() -> String {
    "/cache".to_string()
}

/// Workspace cache defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Size used when a workspace does not request one
    #[serde(default = "default_cache_size", rename = "defaultSize")]
    pub default_size: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_size: default_cache_size(),
        }
    }
}

fn default_cache_size() -> String {
    "1Gi".to_string()
}

/// Requeue delays after a failed reconciliation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequeueConfig {
    /// Delay after a generic error
    #[serde(default = "default_error_seconds", rename = "errorSeconds")]
    pub error_seconds: u64,

    /// Delay after an optimistic concurrency conflict
    #[serde(default = "default_conflict_seconds", rename = "conflictSeconds")]
    pub conflict_seconds: u64,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            error_seconds: default_error_seconds(),
            conflict_seconds: default_conflict_seconds(),
        }
    }
}

fn default_error_seconds() -> u64 {
    15
}

fn default_conflict_seconds() -> u64 {
    1
}

impl RequeueConfig {
    pub fn after_error(&self) -> Duration {
        Duration::from_secs(self.error_seconds)
    }

    pub fn after_conflict(&self) -> Duration {
        Duration::from_secs(self.conflict_seconds)
    }
}

impl ControllerConfig {
    /// Validate that configuration has required fields
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.runner.image.is_configured() {
            return Err(anyhow::anyhow!(
                "Runner image is not configured. Provide runner.image.repository and runner.image.tag."
            ));
        }

        if !self.runner.cache_mount_path.starts_with('/') {
            return Err(anyhow::anyhow!(format!(
                "runner.cacheMountPath must be absolute, got '{}'",
                self.runner.cache_mount_path
            )));
        }

        if self.cache.default_size.trim().is_empty() {
            return Err(anyhow::anyhow!("cache.defaultSize must not be empty"));
        }

        Ok(())
    }

    /// Load configuration from mounted ConfigMap file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, anyhow::Error> {
        let config: ControllerConfig = serde_yaml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let yaml = r#"
runner:
  image:
    repository: "registry.local/runner"
    tag: "1.9.5"
  imagePullSecrets: ["regcred"]
  cacheMountPath: "/var/cache/runq"

cache:
  defaultSize: "5Gi"

requeue:
  errorSeconds: 30
  conflictSeconds: 2
"#;

        let config = ControllerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.runner.image.reference(), "registry.local/runner:1.9.5");
        assert_eq!(config.runner.image_pull_secrets, vec!["regcred"]);
        assert_eq!(config.runner.cache_mount_path, "/var/cache/runq");
        assert_eq!(config.cache.default_size, "5Gi");
        assert_eq!(config.requeue.after_error(), Duration::from_secs(30));
        assert_eq!(config.requeue.after_conflict(), Duration::from_secs(2));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config = ControllerConfig::from_yaml("cache:\n  defaultSize: 2Gi\n").unwrap();
        assert_eq!(config.cache.default_size, "2Gi");
        assert_eq!(config.runner.image.repository, "ghcr.io/runq-dev/runner");
        assert_eq!(config.requeue.error_seconds, 15);
    }

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runner.cache_mount_path, "/cache");
        assert_eq!(config.cache.default_size, "1Gi");
    }

    #[test]
    fn validate_rejects_blank_image_tag() {
        let yaml = "runner:\n  image:\n    repository: registry.local/runner\n    tag: \"\"\n";
        assert!(ControllerConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn validate_rejects_relative_cache_mount() {
        let mut config = ControllerConfig::default();
        config.runner.cache_mount_path = "cache".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_mounted_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "requeue:\n  errorSeconds: 3").unwrap();
        let config = ControllerConfig::from_mounted_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.requeue.error_seconds, 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ControllerConfig::from_mounted_file("/nonexistent/runq/config.yaml").is_err());
    }
}
