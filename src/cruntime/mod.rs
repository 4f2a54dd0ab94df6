//! Container runtime adapters.
//!
//! This module defines [`Manager`], the capability contract the bootstrapper
//! drives without knowing which engine is installed, together with the
//! option and record types shared by every adapter and the helpers adapters
//! use to sequence multi-step host changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8Path;
use semver::Version;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::ClusterConfig;
use crate::error::RuntimeError;
use crate::executor::{CommandRunner, CommandSpec};
use crate::network::CniPaths;
use crate::preload::{ImageResolver, PreloadSource};
use crate::sysinit::ServiceManager;

pub mod cri;
pub mod docker;

pub use docker::Docker;

/// Prefix of every container the kubelet creates through the engine.
pub const KUBERNETES_CONTAINER_PREFIX: &str = "k8s_";

/// Socket of the shim built into older kubelets.
pub const INTERNAL_DOCKER_CRI_SOCKET: &str = "/var/run/dockershim.sock";

/// Socket of the standalone cri-dockerd shim.
pub const EXTERNAL_DOCKER_CRI_SOCKET: &str = "/var/run/cri-dockerd.sock";

/// Runtime services that compete for the kubelet's CRI endpoint.
pub const RUNTIME_SERVICES: &[&str] = &["docker", "containerd", "crio"];

/// Which containers a listing should include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum ContainerState {
    #[default]
    All,
    Running,
    Paused,
}

/// Options for [`Manager::list_containers`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListContainersOptions {
    pub state: ContainerState,
    /// Substring of the container name, after the Kubernetes prefix.
    pub name: String,
    /// Pod namespaces to restrict the listing to; empty means all.
    pub namespaces: Vec<String>,
}

impl ListContainersOptions {
    /// Builds the engine name filter: `k8s_<name>` or `k8s_<name>.*_(ns1|ns2)_`.
    ///
    /// Namespaces are embedded verbatim; they are caller-controlled and not
    /// escaped.
    pub fn name_filter(&self) -> String {
        let filter = format!("{}{}", KUBERNETES_CONTAINER_PREFIX, self.name);
        if self.namespaces.is_empty() {
            filter
        } else {
            format!("{}.*_({})_", filter, self.namespaces.join("|"))
        }
    }
}

/// Options for [`Manager::list_images`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListImagesOptions {}

/// An image known to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListImage {
    /// Content digest without the algorithm prefix.
    pub id: String,
    /// Registry-qualified tags.
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    /// Size in bytes, as a decimal string.
    pub size: String,
}

/// Parameters of [`Manager::build_image`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildImageOptions {
    /// Build context directory or URL.
    pub src: String,
    /// Dockerfile path; empty uses the engine default.
    pub file: String,
    /// Tag to apply; empty builds an untagged image.
    pub tag: String,
    /// Push `tag` after a successful build.
    pub push: bool,
    /// Extra `KEY=VALUE` environment entries for the build.
    pub env: Vec<String>,
    /// Extra build flags without the leading `--`.
    pub opts: Vec<String>,
}

/// Console style used when announcing the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Style {
    Docker,
}

impl Style {
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Docker => "🐳",
        }
    }
}

/// The capability contract every runtime adapter implements.
///
/// Image and container operations wrap exactly one external invocation
/// (build with push is two) and fail with an error labelled by the
/// sub-operation. Nothing is retried here.
pub trait Manager: Send + Sync {
    /// Human-readable runtime name.
    fn name(&self) -> &'static str;

    fn style(&self) -> Style;

    /// Server version; fails when the daemon is unreachable.
    fn version(&self) -> Result<String>;

    /// Configured socket, or the runtime default.
    fn socket_path(&self) -> String;

    /// Fails if the executables this runtime needs are not on PATH.
    fn available(&self) -> Result<()>;

    fn active(&self) -> bool;

    /// Idempotently brings the runtime to an enabled, running state.
    fn enable(&self, disable_others: bool, force_systemd: bool, in_user_namespace: bool)
    -> Result<()>;

    /// Idempotently stops and masks the runtime.
    fn disable(&self) -> Result<()>;

    fn restart(&self) -> Result<()>;

    /// Whether `name` exists, optionally also matching `sha`.
    fn image_exists(&self, name: &str, sha: &str) -> bool;

    /// Lists images; any unparsable row fails the whole call.
    fn list_images(&self, opts: &ListImagesOptions) -> Result<Vec<ListImage>>;

    fn load_image(&self, path: &Utf8Path) -> Result<()>;

    fn pull_image(&self, name: &str) -> Result<()>;

    fn save_image(&self, name: &str, path: &Utf8Path) -> Result<()>;

    fn remove_image(&self, name: &str) -> Result<()>;

    fn tag_image(&self, source: &str, target: &str) -> Result<()>;

    fn build_image(&self, opts: &BuildImageOptions) -> Result<()>;

    fn push_image(&self, name: &str) -> Result<()>;

    /// Whether every image in `images` is already present.
    fn images_preloaded(&self, images: &[String]) -> bool;

    fn list_containers(&self, opts: &ListContainersOptions) -> Result<Vec<String>>;

    /// Forcibly removes containers. An empty list is a no-op.
    fn kill_containers(&self, ids: &[String]) -> Result<()>;

    /// Stops containers. An empty list is a no-op.
    fn stop_containers(&self, ids: &[String]) -> Result<()>;

    /// Pauses containers. An empty list is a no-op.
    fn pause_containers(&self, ids: &[String]) -> Result<()>;

    /// Unpauses containers. An empty list is a no-op.
    fn unpause_containers(&self, ids: &[String]) -> Result<()>;

    /// Shell command that prints a container's logs.
    fn container_log_cmd(&self, id: &str, lines: usize, follow: bool) -> String;

    /// Shell command that prints the runtime's own service logs.
    fn system_log_cmd(&self, lines: usize) -> String;

    /// The cgroup driver in use ("cgroupfs" or "systemd").
    fn cgroup_driver(&self) -> Result<String>;

    /// Kubelet flags needed to talk to this runtime.
    fn kubelet_options(&self) -> BTreeMap<String, String>;

    /// Seeds the runtime's image store from a preload bundle, if one applies.
    fn preload(&self, cc: &ClusterConfig) -> Result<()>;

    /// Retargets the runtime's networking at `network_plugin`.
    fn configure_network_plugin(&self, network_plugin: &str) -> Result<()>;
}

/// Everything needed to construct an adapter.
#[derive(Clone)]
pub struct Config {
    /// Runtime name (e.g. "docker").
    pub name: String,
    /// CRI socket override; empty selects the default.
    pub socket: String,
    pub runner: Arc<dyn CommandRunner>,
    pub init: Arc<dyn ServiceManager>,
    pub image_repository: String,
    pub kubernetes_version: Version,
    pub cni: CniPaths,
    pub preload_source: Arc<dyn PreloadSource>,
    pub image_resolver: Arc<dyn ImageResolver>,
}

/// Returns true when `version` needs an external CRI shim for Docker.
pub fn requires_external_cri(version: &Version) -> bool {
    // 1.24 pre-releases already dropped dockershim.
    let base = Version::new(version.major, version.minor, version.patch);
    base >= Version::new(1, 24, 0)
}

/// Constructs the adapter named in `config`.
pub fn new_runtime(config: Config) -> Result<Box<dyn Manager>, RuntimeError> {
    match config.name.to_ascii_lowercase().as_str() {
        "docker" => Ok(Box::new(Docker::new(config))),
        other => Err(RuntimeError::UnsupportedRuntime(other.to_string())),
    }
}

/// Runs a step whose failure must abort the operation, labelling the error.
pub(crate) fn must_succeed(step: &str, result: Result<()>) -> Result<()> {
    result.with_context(|| step.to_string())
}

/// Runs a best-effort step: failures are logged and swallowed.
pub(crate) fn log_only(step: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!(step = step, "best-effort step failed: {:#}", e);
    }
}

/// Stops and disables every competing runtime service not listed in `keep`.
///
/// Failures for individual services are logged; the call only fails when a
/// competitor is still active afterwards.
pub fn disable_others(keep: &[&str], init: &dyn ServiceManager) -> Result<()> {
    let mut still_active = Vec::new();
    for service in RUNTIME_SERVICES.iter().filter(|s| !keep.contains(*s)) {
        if !init.active(service) {
            continue;
        }
        tracing::info!("disabling competing runtime: {}", service);
        log_only(&format!("stop {}", service), init.stop(service));
        log_only(&format!("disable {}", service), init.disable(service));
        if init.active(service) {
            still_active.push(*service);
        }
    }
    if !still_active.is_empty() {
        anyhow::bail!("competing runtimes still active: {}", still_active.join(", "));
    }
    Ok(())
}

/// Whether the docker unit is bound to containerd (stopping it would stop docker).
pub(crate) fn docker_bound_to_containerd(runner: &dyn CommandRunner) -> bool {
    match runner.run_cmd(&CommandSpec::sudo("systemctl", ["cat", "docker.service"])) {
        Ok(rr) => rr.stdout.contains("\nBindsTo=containerd"),
        Err(e) => {
            tracing::warn!("unable to check if docker is bound to containerd: {:#}", e);
            false
        }
    }
}
