//! Network plugin configuration for the Docker CRI shim.
//!
//! cri-dockerd picks its network plugin from command-line flags, so
//! switching to CNI means overriding its unit's `ExecStart` with a systemd
//! drop-in and restarting the shim.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tera::Tera;

use crate::assets::Asset;
use crate::error::RuntimeError;
use crate::executor::{CommandRunner, CommandSpec};
use crate::sysinit::ServiceManager;

/// Drop-in that overrides cri-dockerd's start command.
pub const CRI_DOCKER_SERVICE_CONF_FILE: &str =
    "/etc/systemd/system/cri-docker.service.d/10-cni.conf";

/// Service restarted after the drop-in is written.
pub const CRI_DOCKER_SERVICE: &str = "cri-docker";

const TEMPLATE_NAME: &str = "cri-docker-10-cni.conf";

const TEMPLATE_SOURCE: &str = "[Service]
ExecStart=
ExecStart=/usr/bin/cri-dockerd --container-runtime-endpoint fd:// \
--network-plugin={{ network_plugin }}{{ extra_arguments }}";

static TEMPLATES: LazyLock<Result<Tera, String>> = LazyLock::new(|| {
    let mut tera = Tera::default();
    tera.add_raw_template(TEMPLATE_NAME, TEMPLATE_SOURCE)
        .map_err(|e| e.to_string())?;
    Ok(tera)
});

/// CNI directories passed to the shim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CniPaths {
    pub bin_dir: String,
    pub cache_dir: String,
    pub conf_dir: String,
}

impl Default for CniPaths {
    fn default() -> Self {
        Self {
            bin_dir: "/opt/cni/bin".to_string(),
            cache_dir: "/var/lib/cni/cache".to_string(),
            conf_dir: "/etc/cni/net.d".to_string(),
        }
    }
}

impl CniPaths {
    /// Flags appended to the shim command line for the `cni` plugin.
    pub fn extra_arguments(&self) -> String {
        format!(
            " --cni-bin-dir={} --cni-cache-dir={} --cni-conf-dir={} --hairpin-mode=promiscuous-bridge",
            self.bin_dir, self.cache_dir, self.conf_dir
        )
    }
}

/// Renders the cri-dockerd drop-in for `network_plugin`.
pub fn render_cri_docker_override(
    network_plugin: &str,
    paths: &CniPaths,
) -> Result<Vec<u8>, RuntimeError> {
    let tera = TEMPLATES
        .as_ref()
        .map_err(|e| RuntimeError::Template(e.clone()))?;

    let extra_arguments = if network_plugin == "cni" {
        paths.extra_arguments()
    } else {
        String::new()
    };

    let mut context = tera::Context::new();
    context.insert("network_plugin", network_plugin);
    context.insert("extra_arguments", &extra_arguments);

    tera.render(TEMPLATE_NAME, &context)
        .map(String::into_bytes)
        .map_err(|e| RuntimeError::Template(format!("failed to execute template: {}", e)))
}

/// Points the CRI shim at `network_plugin` and restarts it.
///
/// An empty plugin keeps the engine's default networking and touches
/// nothing. Rendering happens before any write so a bad template never
/// leaves a half-written override behind.
pub fn configure_network_plugin(
    runner: &dyn CommandRunner,
    init: &dyn ServiceManager,
    network_plugin: &str,
    paths: &CniPaths,
) -> Result<()> {
    if network_plugin.is_empty() {
        return Ok(());
    }

    let rendered = render_cri_docker_override(network_plugin, paths)?;

    let conf = Utf8Path::new(CRI_DOCKER_SERVICE_CONF_FILE);
    let conf_dir = conf.parent().unwrap_or(Utf8Path::new("/"));
    runner
        .run_cmd(&CommandSpec::sudo("mkdir", ["-p", conf_dir.as_str()]))
        .context("failed to create directory")?;

    let asset = Asset::memory_target(rendered, conf, "0644");
    runner.copy(&asset).context("failed to copy template")?;

    tracing::info!("configured {} network plugin for {}", network_plugin, CRI_DOCKER_SERVICE);
    init.restart(CRI_DOCKER_SERVICE)
}
