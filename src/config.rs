//! Node configuration loaded from YAML.
//!
//! The CLI reads a [`NodeConfig`]; library callers usually build a
//! [`ClusterConfig`] and a [`cruntime::Config`](crate::cruntime::Config)
//! directly.

use std::fs::File;
use std::io::BufReader;

use camino::{Utf8Path, Utf8PathBuf};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::network::CniPaths;

/// Kubernetes-level settings relevant to the container runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// Target Kubernetes version, with or without a leading `v`.
    pub kubernetes_version: String,
    /// Name of the selected runtime (e.g. "docker").
    pub container_runtime: String,
    /// Registry mirror prefix; empty means the upstream default.
    pub image_repository: String,
    /// Network plugin handed to the CRI shim ("" or "cni").
    pub network_plugin: String,
}

/// The cluster configuration consumed by `Manager::preload`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Machine driver name (e.g. "kvm2", "docker", "none").
    pub driver: String,
    #[serde(rename = "kubernetes")]
    pub kubernetes_config: KubernetesConfig,
}

/// Runtime adapter options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// CRI socket override; empty selects the runtime default.
    pub socket: String,
    /// Stop competing runtimes when enabling this one.
    pub disable_others: bool,
    /// Force the systemd cgroup driver.
    pub force_systemd: bool,
}

/// Where preload tarballs live and which images they must provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadOptions {
    pub cache_dir: Utf8PathBuf,
    pub arch: String,
    /// Explicit expected image set; empty derives it from the Kubernetes version.
    pub images: Vec<String>,
}

impl Default for PreloadOptions {
    fn default() -> Self {
        Self {
            cache_dir: Utf8PathBuf::from("/var/cache/kuberuntime/preloaded-tarball"),
            arch: std::env::consts::ARCH.replace("x86_64", "amd64").replace("aarch64", "arm64"),
            images: Vec::new(),
        }
    }
}

/// Top-level YAML document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    #[serde(flatten)]
    pub cluster: ClusterConfig,
    pub runtime: RuntimeOptions,
    pub preload: PreloadOptions,
    pub cni: CniPaths,
}

impl NodeConfig {
    /// Validates fields that cannot be checked by deserialization alone.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.cluster.kubernetes_config.container_runtime.trim().is_empty() {
            return Err(RuntimeError::Validation(
                "kubernetes.container_runtime must not be empty".to_string(),
            ));
        }
        parse_kubernetes_version(&self.cluster.kubernetes_config.kubernetes_version)?;
        Ok(())
    }

    /// Returns the parsed Kubernetes version.
    pub fn kubernetes_version(&self) -> Result<Version, RuntimeError> {
        parse_kubernetes_version(&self.cluster.kubernetes_config.kubernetes_version)
    }
}

/// Parses a Kubernetes version such as `v1.28.3` or `1.24.0-rc.1`.
pub fn parse_kubernetes_version(version: &str) -> Result<Version, RuntimeError> {
    let trimmed = version.trim();
    if trimmed.is_empty() {
        return Err(RuntimeError::Validation(
            "kubernetes.kubernetes_version must not be empty".to_string(),
        ));
    }
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(bare).map_err(|e| {
        RuntimeError::Validation(format!("invalid kubernetes version '{}': {}", version, e))
    })
}

/// Loads a node configuration from a YAML file.
pub fn load_config(path: &Utf8Path) -> Result<NodeConfig, RuntimeError> {
    let file = File::open(path).map_err(|e| RuntimeError::io(path.as_str(), e))?;
    let reader = BufReader::new(file);
    serde_yaml::from_reader(reader)
        .map_err(|e| RuntimeError::Config(format!("failed to parse yaml {}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_accepts_leading_v() {
        let v = parse_kubernetes_version("v1.28.3").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 28, 3));
    }

    #[test]
    fn version_accepts_prerelease() {
        let v = parse_kubernetes_version("1.24.0-rc.1").unwrap();
        assert_eq!(v.minor, 24);
        assert!(!v.pre.is_empty());
    }

    #[test]
    fn version_rejects_garbage() {
        assert!(matches!(parse_kubernetes_version("latest"), Err(RuntimeError::Validation(_))));
        assert!(matches!(parse_kubernetes_version(" "), Err(RuntimeError::Validation(_))));
    }

    #[test]
    fn parses_full_document() {
        let yaml = r#"
driver: kvm2
kubernetes:
  kubernetes_version: v1.28.3
  container_runtime: docker
  network_plugin: cni
runtime:
  disable_others: true
preload:
  cache_dir: /tmp/preload
  arch: amd64
cni:
  conf_dir: /etc/cni/custom.d
"#;
        let config: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cluster.driver, "kvm2");
        assert_eq!(config.cluster.kubernetes_config.network_plugin, "cni");
        assert!(config.runtime.disable_others);
        assert!(!config.runtime.force_systemd);
        assert_eq!(config.preload.cache_dir, "/tmp/preload");
        assert_eq!(config.cni.conf_dir, "/etc/cni/custom.d");
        assert_eq!(config.cni.bin_dir, "/opt/cni/bin");
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_missing_runtime() {
        let config: NodeConfig =
            serde_yaml::from_str("kubernetes:\n  kubernetes_version: v1.28.3\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("container_runtime must not be empty"));
    }
}
