//! Docker runtime adapter.
//!
//! Kubernetes 1.24 removed the built-in dockershim, so from that version on
//! the kubelet reaches Docker through the external cri-dockerd shim. The
//! adapter picks its control path once, at construction, and stores it in
//! `use_cri`. Container listing, bulk container operations, pull, remove and
//! log commands go through [`cri`](super::cri) in that mode. Version checks,
//! build, tag, push, save and load always use the docker CLI.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{
    BuildImageOptions, Config, ContainerState, EXTERNAL_DOCKER_CRI_SOCKET,
    INTERNAL_DOCKER_CRI_SOCKET, ListContainersOptions, ListImage, ListImagesOptions, Manager,
    Style, cri, docker_bound_to_containerd, log_only, must_succeed, requires_external_cri,
};
use crate::assets::Asset;
use crate::config::ClusterConfig;
use crate::error::RuntimeError;
use crate::executor::{CommandRunner, CommandSpec, RunResult};
use crate::image::add_docker_io;
use crate::network::{self, CniPaths};
use crate::preload::{
    ImageMetadataStore, ImageResolver, PreloadSource, PreloadTarget, Preloader, ReferenceStore,
    all_images_present,
};
use crate::sysinit::ServiceManager;
use crate::units::from_human_size;

pub const DOCKER_SERVICE: &str = "docker";
pub const DOCKER_SERVICE_UNIT: &str = "docker.service";
pub const DOCKER_SOCKET_UNIT: &str = "docker.socket";

/// Socket-activated unit of the external shim.
pub const CRI_DOCKER_SOCKET_UNIT: &str = "cri-docker.socket";

/// runc state directory used by Docker's containerd namespace.
pub const DOCKER_RUNC_ROOT: &str = "/run/docker/runtime-runc/moby";

const DAEMON_CONFIG_DIR: &str = "/etc/docker";
const DAEMON_CONFIG_NAME: &str = "daemon.json";

const FORCE_SYSTEMD_DAEMON_CONFIG: &str = r#"{
"exec-opts": ["native.cgroupdriver=systemd"],
"log-driver": "json-file",
"log-opts": {
	"max-size": "100m"
},
"storage-driver": "overlay2"
}
"#;

/// One row of `docker images --format {{json .}}`.
#[derive(Debug, Deserialize)]
struct DockerImageRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Repository")]
    repository: String,
    #[serde(rename = "Tag")]
    tag: String,
    #[serde(rename = "Size")]
    size: String,
}

/// Parses JSON-lines image output. The first bad row fails the whole listing.
pub(crate) fn parse_image_rows(stdout: &str) -> Result<Vec<ListImage>, RuntimeError> {
    let mut images = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let row: DockerImageRow = serde_json::from_str(line)
            .map_err(|e| RuntimeError::Parse(format!("image row {}: {}", line, e)))?;
        let size = from_human_size(&row.size)?;
        let id = row.id.strip_prefix("sha256:").unwrap_or(&row.id).to_string();
        images.push(ListImage {
            id,
            repo_tags: vec![add_docker_io(&format!("{}:{}", row.repository, row.tag))],
            repo_digests: Vec::new(),
            size: size.to_string(),
        });
    }
    Ok(images)
}

/// The Docker engine, driven natively or through cri-dockerd.
pub struct Docker {
    socket: String,
    runner: Arc<dyn CommandRunner>,
    image_repository: String,
    init: Arc<dyn ServiceManager>,
    use_cri: bool,
    cri_service: String,
    cni: CniPaths,
    preload_source: Arc<dyn PreloadSource>,
    image_resolver: Arc<dyn ImageResolver>,
}

impl Docker {
    pub fn new(config: Config) -> Self {
        let use_cri = requires_external_cri(&config.kubernetes_version);
        let (socket, cri_service) = if use_cri {
            let socket = if config.socket.is_empty() {
                EXTERNAL_DOCKER_CRI_SOCKET.to_string()
            } else {
                config.socket
            };
            (socket, CRI_DOCKER_SOCKET_UNIT.to_string())
        } else {
            (config.socket, String::new())
        };
        debug!(
            "docker adapter for kubernetes {}: use_cri={}, socket={:?}",
            config.kubernetes_version, use_cri, socket
        );

        Self {
            socket,
            runner: config.runner,
            image_repository: config.image_repository,
            init: config.init,
            use_cri,
            cri_service,
            cni: config.cni,
            preload_source: config.preload_source,
            image_resolver: config.image_resolver,
        }
    }

    fn docker<I, S>(&self, args: I) -> Result<RunResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run_cmd(&CommandSpec::new("docker", args))
    }

    fn docker_ids(&self, verb: &[&str], ids: &[String], label: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut args: Vec<String> = verb.iter().map(|s| s.to_string()).collect();
        args.extend(ids.iter().cloned());
        self.docker(args).context(label.to_string())?;
        Ok(())
    }

    fn disable_other_runtimes(&self) -> Result<()> {
        let mut keep = vec![DOCKER_SERVICE];
        if docker_bound_to_containerd(self.runner.as_ref()) {
            keep.push("containerd");
        }
        super::disable_others(&keep, self.init.as_ref())
    }

    fn force_systemd(&self) -> Result<()> {
        info!("Forcing docker to use systemd as cgroup manager");
        let asset = Asset::memory(
            FORCE_SYSTEMD_DAEMON_CONFIG,
            DAEMON_CONFIG_DIR,
            DAEMON_CONFIG_NAME,
            "0644",
        );
        self.runner.copy(&asset)
    }

    fn present_images(&self) -> Result<Vec<String>> {
        let rr = self
            .docker(["images", "--format", "{{.Repository}}:{{.Tag}}"])
            .context("docker images")?;
        Ok(rr.stdout_lines().map(|l| l.trim().to_string()).collect())
    }

    fn preloaded(&self, images: &[String]) -> bool {
        match self.present_images() {
            Ok(present) => all_images_present(images, present.iter().map(String::as_str)),
            Err(e) => {
                warn!("failed to list images: {:#}", e);
                false
            }
        }
    }
}

impl Manager for Docker {
    fn name(&self) -> &'static str {
        "Docker"
    }

    fn style(&self) -> Style {
        Style::Docker
    }

    fn version(&self) -> Result<String> {
        let rr = self
            .docker(["version", "--format", "{{.Server.Version}}"])
            .context("docker version")?;
        Ok(rr.first_line().trim().to_string())
    }

    fn socket_path(&self) -> String {
        if self.socket.is_empty() {
            INTERNAL_DOCKER_CRI_SOCKET.to_string()
        } else {
            self.socket.clone()
        }
    }

    fn available(&self) -> Result<()> {
        if self.use_cri {
            self.runner.look_path("cri-dockerd")?;
            self.runner.look_path("dockerd")?;
        }
        self.runner.look_path("docker")?;
        Ok(())
    }

    fn active(&self) -> bool {
        self.init.active(DOCKER_SERVICE)
    }

    fn enable(
        &self,
        disable_others: bool,
        force_systemd: bool,
        in_user_namespace: bool,
    ) -> Result<()> {
        if in_user_namespace {
            return Err(RuntimeError::Validation(
                "inUserNamespace must not be true for docker".to_string(),
            )
            .into());
        }

        if disable_others {
            log_only("disable other runtimes", self.disable_other_runtimes());
        }

        must_succeed(
            "populate crictl config",
            cri::populate_cri_config(self.runner.as_ref(), &self.socket_path()),
        )?;
        must_succeed("unmask docker.service", self.init.unmask(DOCKER_SERVICE_UNIT))?;
        log_only("enable docker.socket", self.init.enable(DOCKER_SOCKET_UNIT));

        if force_systemd {
            must_succeed("force systemd", self.force_systemd())?;
        }

        must_succeed("restart docker", self.init.restart(DOCKER_SERVICE))?;

        if !self.cri_service.is_empty() {
            must_succeed(
                &format!("enable {}", self.cri_service),
                self.init.enable(&self.cri_service),
            )?;
            must_succeed(
                &format!("start {}", self.cri_service),
                self.init.start(&self.cri_service),
            )?;
        }
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        if !self.cri_service.is_empty() {
            must_succeed(
                &format!("stop {}", self.cri_service),
                self.init.stop(&self.cri_service),
            )?;
            must_succeed(
                &format!("disable {}", self.cri_service),
                self.init.disable(&self.cri_service),
            )?;
        }
        log_only("stop docker.socket", self.init.force_stop(DOCKER_SOCKET_UNIT));
        must_succeed("stop docker.service", self.init.force_stop(DOCKER_SERVICE_UNIT))?;
        log_only("disable docker.socket", self.init.disable(DOCKER_SOCKET_UNIT));
        self.init.mask(DOCKER_SERVICE_UNIT)
    }

    fn restart(&self) -> Result<()> {
        self.init.restart(DOCKER_SERVICE)
    }

    fn image_exists(&self, name: &str, sha: &str) -> bool {
        match self.docker(["image", "inspect", "--format", "{{.Id}}", name]) {
            Ok(rr) => sha.is_empty() || rr.stdout.contains(sha),
            Err(_) => false,
        }
    }

    fn list_images(&self, _opts: &ListImagesOptions) -> Result<Vec<ListImage>> {
        let rr = self
            .docker(["images", "--no-trunc", "--format", "{{json .}}"])
            .context("docker images")?;
        Ok(parse_image_rows(&rr.stdout)?)
    }

    fn load_image(&self, path: &Utf8Path) -> Result<()> {
        info!("Loading image: {}", path);
        let script = format!("sudo cat {} | docker load", path);
        self.runner
            .run_cmd(&CommandSpec::bash(script))
            .context("loadimage docker")?;
        Ok(())
    }

    fn pull_image(&self, name: &str) -> Result<()> {
        info!("Pulling image: {}", name);
        if self.use_cri {
            return cri::pull_cri_image(self.runner.as_ref(), name);
        }
        self.docker(["pull", name]).context("pull image docker")?;
        Ok(())
    }

    fn save_image(&self, name: &str, path: &Utf8Path) -> Result<()> {
        info!("Saving image {}: {}", name, path);
        let script = format!("docker save '{}' | sudo tee {} >/dev/null", name, path);
        self.runner
            .run_cmd(&CommandSpec::bash(script))
            .context("saveimage docker")?;
        Ok(())
    }

    fn remove_image(&self, name: &str) -> Result<()> {
        info!("Removing image: {}", name);
        if self.use_cri {
            return cri::remove_cri_image(self.runner.as_ref(), name);
        }
        self.docker(["rmi", name]).context("remove image docker")?;
        Ok(())
    }

    fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        info!("Tagging image {}: {}", source, target);
        self.docker(["tag", source, target]).context("tag image docker")?;
        Ok(())
    }

    fn build_image(&self, opts: &BuildImageOptions) -> Result<()> {
        info!("Building image: {}", opts.src);
        let mut args = vec!["build".to_string()];
        if !opts.file.is_empty() {
            args.push("-f".to_string());
            args.push(opts.file.clone());
        }
        if !opts.tag.is_empty() {
            args.push("-t".to_string());
            args.push(opts.tag.clone());
        }
        args.push(opts.src.clone());
        args.extend(opts.opts.iter().map(|opt| format!("--{}", opt)));

        let env = opts.env.iter().filter_map(|entry| {
            let pair = entry.split_once('=');
            if pair.is_none() {
                warn!("ignoring build environment entry without '=': {}", entry);
            }
            pair
        });
        let spec = CommandSpec::new("docker", args).with_envs(env);
        self.runner.run_cmd(&spec).context("buildimage docker")?;

        if opts.push && !opts.tag.is_empty() {
            self.docker(["push", opts.tag.as_str()])
                .context("pushimage docker")?;
        }
        Ok(())
    }

    fn push_image(&self, name: &str) -> Result<()> {
        info!("Pushing image: {}", name);
        self.docker(["push", name]).context("push image docker")?;
        Ok(())
    }

    fn images_preloaded(&self, images: &[String]) -> bool {
        self.preloaded(images)
    }

    fn list_containers(&self, opts: &ListContainersOptions) -> Result<Vec<String>> {
        if self.use_cri {
            return cri::list_cri_containers(self.runner.as_ref(), DOCKER_RUNC_ROOT, opts);
        }

        let mut args = vec!["ps".to_string()];
        match opts.state {
            ContainerState::All => args.push("-a".to_string()),
            ContainerState::Running => {
                args.push("--filter".to_string());
                args.push("status=running".to_string());
            }
            ContainerState::Paused => {
                args.push("--filter".to_string());
                args.push("status=paused".to_string());
            }
        }
        args.push(format!("--filter=name={}", opts.name_filter()));
        args.push("--format={{.ID}}".to_string());

        let rr = self.docker(args).context("docker")?;
        Ok(rr.stdout_lines().map(|l| l.trim().to_string()).collect())
    }

    fn kill_containers(&self, ids: &[String]) -> Result<()> {
        if self.use_cri {
            return cri::kill_cri_containers(self.runner.as_ref(), ids);
        }
        if !ids.is_empty() {
            info!("Killing containers: {:?}", ids);
        }
        self.docker_ids(&["rm", "-f"], ids, "kill containers docker")
    }

    fn stop_containers(&self, ids: &[String]) -> Result<()> {
        if self.use_cri {
            return cri::stop_cri_containers(self.runner.as_ref(), ids);
        }
        if !ids.is_empty() {
            info!("Stopping containers: {:?}", ids);
        }
        self.docker_ids(&["stop"], ids, "stop containers docker")
    }

    fn pause_containers(&self, ids: &[String]) -> Result<()> {
        if self.use_cri {
            return cri::pause_cri_containers(self.runner.as_ref(), DOCKER_RUNC_ROOT, ids);
        }
        if !ids.is_empty() {
            info!("Pausing containers: {:?}", ids);
        }
        self.docker_ids(&["pause"], ids, "pause containers docker")
    }

    fn unpause_containers(&self, ids: &[String]) -> Result<()> {
        if self.use_cri {
            return cri::unpause_cri_containers(self.runner.as_ref(), DOCKER_RUNC_ROOT, ids);
        }
        if !ids.is_empty() {
            info!("Unpausing containers: {:?}", ids);
        }
        self.docker_ids(&["unpause"], ids, "unpause containers docker")
    }

    fn container_log_cmd(&self, id: &str, lines: usize, follow: bool) -> String {
        if self.use_cri {
            return cri::cri_container_log_cmd(self.runner.as_ref(), id, lines, follow);
        }
        let mut cmd = String::from("docker logs ");
        if lines > 0 {
            cmd.push_str(&format!("--tail {} ", lines));
        }
        if follow {
            cmd.push_str("--follow ");
        }
        cmd.push_str(id);
        cmd
    }

    fn system_log_cmd(&self, lines: usize) -> String {
        format!("sudo journalctl -u {} -n {}", DOCKER_SERVICE, lines)
    }

    fn cgroup_driver(&self) -> Result<String> {
        let rr = self
            .docker(["info", "--format", "{{.CgroupDriver}}"])
            .context("docker info")?;
        Ok(rr.first_line().trim().to_string())
    }

    fn kubelet_options(&self) -> BTreeMap<String, String> {
        let mut opts = BTreeMap::new();
        if self.use_cri {
            let endpoint = self.socket_path();
            opts.insert("container-runtime".to_string(), "remote".to_string());
            opts.insert("container-runtime-endpoint".to_string(), endpoint.clone());
            opts.insert("image-service-endpoint".to_string(), endpoint);
            opts.insert("runtime-request-timeout".to_string(), "15m".to_string());
        } else {
            opts.insert("container-runtime".to_string(), DOCKER_SERVICE.to_string());
        }
        opts
    }

    fn preload(&self, cc: &ClusterConfig) -> Result<()> {
        let cc = if cc.kubernetes_config.image_repository.is_empty()
            && !self.image_repository.is_empty()
        {
            let mut mirrored = cc.clone();
            mirrored.kubernetes_config.image_repository = self.image_repository.clone();
            Cow::Owned(mirrored)
        } else {
            Cow::Borrowed(cc)
        };
        Preloader::new(
            self.runner.clone(),
            self.preload_source.clone(),
            self.image_resolver.clone(),
        )
        .run(self, &cc)
    }

    fn configure_network_plugin(&self, network_plugin: &str) -> Result<()> {
        if !self.use_cri {
            debug!("native docker networking, ignoring network plugin {:?}", network_plugin);
            return Ok(());
        }
        network::configure_network_plugin(
            self.runner.as_ref(),
            self.init.as_ref(),
            network_plugin,
            &self.cni,
        )
    }
}

impl PreloadTarget for Docker {
    fn all_images_present(&self, images: &[String]) -> bool {
        self.preloaded(images)
    }

    fn metadata_store(&self) -> Option<Box<dyn ImageMetadataStore + '_>> {
        Some(Box::new(ReferenceStore::new(self.runner.as_ref())))
    }

    fn storage_root(&self) -> &Utf8Path {
        Utf8Path::new("/var")
    }

    fn restart_runtime(&self) -> Result<()> {
        self.init.restart(DOCKER_SERVICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_image_rows() {
        let stdout = concat!(
            r#"{"Containers":"N/A","ID":"sha256:a1b2","Repository":"nginx","Tag":"1.25","Size":"142MB"}"#,
            "\n",
            r#"{"ID":"sha256:c3d4","Repository":"registry.k8s.io/pause","Tag":"3.9","Size":"744kB"}"#,
            "\n"
        );
        let images = parse_image_rows(stdout).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].id, "a1b2");
        assert_eq!(images[0].repo_tags, vec!["docker.io/library/nginx:1.25".to_string()]);
        assert_eq!(images[0].size, "142000000");
        assert_eq!(images[1].repo_tags, vec!["registry.k8s.io/pause:3.9".to_string()]);
        assert_eq!(images[1].size, "744000");
    }

    #[test]
    fn one_bad_row_fails_the_listing() {
        let stdout = concat!(
            r#"{"ID":"sha256:a1b2","Repository":"nginx","Tag":"1.25","Size":"142MB"}"#,
            "\n",
            "not json\n"
        );
        assert!(matches!(parse_image_rows(stdout), Err(RuntimeError::Parse(_))));
    }

    #[test]
    fn bad_size_fails_the_listing() {
        let stdout = r#"{"ID":"sha256:a1b2","Repository":"nginx","Tag":"1.25","Size":"huge"}"#;
        assert!(matches!(parse_image_rows(stdout), Err(RuntimeError::Parse(_))));
    }

    #[test]
    fn daemon_config_is_valid_json() {
        let value: serde_json::Value = serde_json::from_str(FORCE_SYSTEMD_DAEMON_CONFIG).unwrap();
        assert_eq!(value["exec-opts"][0], "native.cgroupdriver=systemd");
        assert_eq!(value["log-opts"]["max-size"], "100m");
        assert_eq!(value["storage-driver"], "overlay2");
    }
}
