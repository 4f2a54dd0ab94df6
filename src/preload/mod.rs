//! Image preloading from precomputed tarballs.
//!
//! A preload bundle is an lz4-compressed tarball of a runtime's storage
//! directory with every image a given Kubernetes version needs. Unpacking it
//! in place before the first cluster start replaces a dozen image pulls.
//!
//! The step sequence lives in [`Preloader::run`]. Each step is either
//! fatal (`must_succeed`) or best-effort (`log_only`):
//!
//! | step | outcome |
//! |------|---------|
//! | bundle lookup | no bundle ⇒ return `Ok` |
//! | resolve expected images | fatal |
//! | membership check | all present ⇒ return `Ok` |
//! | snapshot image metadata | logged |
//! | decompressor present | fatal, `MissingFeature` |
//! | stage bundle on host | fatal |
//! | extract into storage root | fatal, includes command output |
//! | remove staged bundle | logged |
//! | re-snapshot and reconcile metadata | logged |
//! | restart runtime | fatal |

pub mod refstore;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::assets::Asset;
use crate::config::{ClusterConfig, parse_kubernetes_version};
use crate::cruntime::{log_only, must_succeed};
use crate::error::RuntimeError;
use crate::executor::{CommandRunner, CommandSpec};
use crate::image::trim_docker_io;

pub use refstore::ReferenceStore;

/// Layout version of the published preload tarballs.
pub const PRELOAD_VERSION: &str = "v18";

/// Where the bundle is staged on the target host.
pub const PRELOAD_TARGET_DIR: &str = "/";
pub const PRELOAD_TARGET_NAME: &str = "preloaded.tar.lz4";

/// Host tool needed to unpack the bundle.
pub const DECOMPRESSOR: &str = "lz4";

/// Registry used when no mirror is configured.
pub const DEFAULT_KUBERNETES_REPO: &str = "registry.k8s.io";

/// Registry used by Kubernetes releases before 1.25.
pub const OLD_DEFAULT_KUBERNETES_REPO: &str = "k8s.gcr.io";

/// File name of the bundle for a version/runtime/architecture triple.
pub fn tarball_name(k8s_version: &str, container_runtime: &str, arch: &str) -> String {
    format!(
        "preloaded-images-k8s-{}-{}-{}-overlay2-{}.tar.lz4",
        PRELOAD_VERSION, k8s_version, container_runtime, arch
    )
}

/// Drivers that run directly on the host (or over SSH) keep their own images.
pub fn driver_allows_preload(driver: &str) -> bool {
    !matches!(driver, "none" | "ssh")
}

/// Whether every expected image appears among the present ones.
///
/// Both sides are reduced with [`trim_docker_io`] first, so
/// `docker.io/library/nginx:1.25` and `nginx:1.25` are the same image.
pub fn all_images_present<'a, I>(expected: &[String], present: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let present: HashSet<&str> = present.into_iter().map(trim_docker_io).collect();
    for image in expected {
        let image = trim_docker_io(image);
        if !present.contains(image) {
            info!("{} wasn't preloaded", image);
            return false;
        }
    }
    true
}

/// Locates preload bundles. Downloading them is someone else's job.
pub trait PreloadSource: Send + Sync {
    /// Whether a bundle exists for this combination.
    fn exists(&self, k8s_version: &str, container_runtime: &str, driver: &str) -> bool;

    /// Local path where the bundle for this combination lives.
    fn tarball_path(&self, k8s_version: &str, container_runtime: &str) -> Utf8PathBuf;
}

/// Bundles cached in a local directory.
#[derive(Debug, Clone)]
pub struct LocalPreloadCache {
    cache_dir: Utf8PathBuf,
    arch: String,
}

impl LocalPreloadCache {
    pub fn new(cache_dir: impl Into<Utf8PathBuf>, arch: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            arch: arch.into(),
        }
    }
}

impl PreloadSource for LocalPreloadCache {
    fn exists(&self, k8s_version: &str, container_runtime: &str, driver: &str) -> bool {
        if !driver_allows_preload(driver) {
            debug!("{} driver does not support preload", driver);
            return false;
        }
        let path = self.tarball_path(k8s_version, container_runtime);
        let found = path.is_file();
        debug!("preload tarball {} exists: {}", path, found);
        found
    }

    fn tarball_path(&self, k8s_version: &str, container_runtime: &str) -> Utf8PathBuf {
        self.cache_dir
            .join(tarball_name(k8s_version, container_runtime, &self.arch))
    }
}

/// Computes the images a Kubernetes version expects to find.
pub trait ImageResolver: Send + Sync {
    fn images(&self, mirror: &str, k8s_version: &str) -> Result<Vec<String>>;
}

/// The images kubeadm pulls for a control-plane node.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeadmImages;

/// Pause, etcd and coredns tags kubeadm pins for one Kubernetes minor.
struct AddonTags {
    minor: u64,
    pause: &'static str,
    etcd: &'static str,
    coredns: &'static str,
}

/// Ordered by minor. Versions outside the table use the nearest entry.
const ADDON_TAGS: &[AddonTags] = &[
    AddonTags { minor: 20, pause: "3.2", etcd: "3.4.13-0", coredns: "1.7.0" },
    AddonTags { minor: 21, pause: "3.4.1", etcd: "3.4.13-0", coredns: "v1.8.0" },
    AddonTags { minor: 22, pause: "3.5", etcd: "3.5.0-0", coredns: "v1.8.4" },
    AddonTags { minor: 23, pause: "3.6", etcd: "3.5.6-0", coredns: "v1.8.6" },
    AddonTags { minor: 24, pause: "3.7", etcd: "3.5.6-0", coredns: "v1.8.6" },
    AddonTags { minor: 25, pause: "3.8", etcd: "3.5.9-0", coredns: "v1.9.3" },
    AddonTags { minor: 26, pause: "3.9", etcd: "3.5.9-0", coredns: "v1.9.3" },
    AddonTags { minor: 27, pause: "3.9", etcd: "3.5.9-0", coredns: "v1.10.1" },
    AddonTags { minor: 28, pause: "3.9", etcd: "3.5.9-0", coredns: "v1.10.1" },
    AddonTags { minor: 29, pause: "3.9", etcd: "3.5.12-0", coredns: "v1.11.1" },
    AddonTags { minor: 30, pause: "3.9", etcd: "3.5.12-0", coredns: "v1.11.1" },
    AddonTags { minor: 31, pause: "3.10", etcd: "3.5.15-0", coredns: "v1.11.3" },
];

impl KubeadmImages {
    const COMPONENTS: [&'static str; 4] = [
        "kube-apiserver",
        "kube-controller-manager",
        "kube-scheduler",
        "kube-proxy",
    ];

    fn addon_tags(minor: u64) -> &'static AddonTags {
        ADDON_TAGS
            .iter()
            .rev()
            .find(|tags| tags.minor <= minor)
            .unwrap_or(&ADDON_TAGS[0])
    }
}

impl ImageResolver for KubeadmImages {
    fn images(&self, mirror: &str, k8s_version: &str) -> Result<Vec<String>> {
        let version = parse_kubernetes_version(k8s_version)?;
        let mirrored = !mirror.is_empty();
        let repo = if mirrored {
            mirror.trim_end_matches('/')
        } else if version.minor < 25 && version.major == 1 {
            OLD_DEFAULT_KUBERNETES_REPO
        } else {
            DEFAULT_KUBERNETES_REPO
        };

        let mut images: Vec<String> = Self::COMPONENTS
            .iter()
            .map(|component| format!("{}/{}:v{}", repo, component, version))
            .collect();

        let tags = Self::addon_tags(version.minor);
        // coredns moved under its own org upstream; mirrors keep it flat.
        let coredns = if mirrored || tags.minor < 21 {
            "coredns"
        } else {
            "coredns/coredns"
        };
        images.push(format!("{}/pause:{}", repo, tags.pause));
        images.push(format!("{}/etcd:{}", repo, tags.etcd));
        images.push(format!("{}/{}:{}", repo, coredns, tags.coredns));
        Ok(images)
    }
}

/// A fixed, caller-supplied image list.
#[derive(Debug, Clone, Default)]
pub struct StaticImages(pub Vec<String>);

impl ImageResolver for StaticImages {
    fn images(&self, _mirror: &str, _k8s_version: &str) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Runtime-internal image index that out-of-band extraction can desynchronize.
pub trait ImageMetadataStore {
    /// Snapshots the current index into memory.
    fn save(&mut self) -> Result<()>;

    /// Merges the snapshot back into the on-host index.
    fn update(&mut self) -> Result<()>;
}

/// Runtime-specific hooks the preload sequence needs.
pub trait PreloadTarget {
    fn all_images_present(&self, images: &[String]) -> bool;

    /// The runtime's image index, if it keeps one that needs repairing.
    fn metadata_store(&self) -> Option<Box<dyn ImageMetadataStore + '_>>;

    /// Directory the bundle is extracted into.
    fn storage_root(&self) -> &Utf8Path;

    fn restart_runtime(&self) -> Result<()>;
}

/// Runs the preload sequence against one host.
#[derive(Clone)]
pub struct Preloader {
    runner: Arc<dyn CommandRunner>,
    source: Arc<dyn PreloadSource>,
    resolver: Arc<dyn ImageResolver>,
}

impl Preloader {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        source: Arc<dyn PreloadSource>,
        resolver: Arc<dyn ImageResolver>,
    ) -> Self {
        Self {
            runner,
            source,
            resolver,
        }
    }

    #[tracing::instrument(skip_all, fields(k8s = %cc.kubernetes_config.kubernetes_version))]
    pub fn run(&self, target: &dyn PreloadTarget, cc: &ClusterConfig) -> Result<()> {
        let k8s_version = &cc.kubernetes_config.kubernetes_version;
        let runtime = &cc.kubernetes_config.container_runtime;

        if !self.source.exists(k8s_version, runtime, &cc.driver) {
            debug!("no preload bundle for {} {} {}", k8s_version, runtime, cc.driver);
            return Ok(());
        }

        let images = self
            .resolver
            .images(&cc.kubernetes_config.image_repository, k8s_version)
            .context("getting images")?;
        if target.all_images_present(&images) {
            info!("Images already preloaded, skipping extraction");
            return Ok(());
        }

        let mut store = target.metadata_store();
        if let Some(store) = store.as_mut() {
            log_only("saving reference store", store.save());
        }

        if self.runner.look_path(DECOMPRESSOR).is_err() {
            return Err(RuntimeError::missing_feature(DECOMPRESSOR).into());
        }

        let tarball = self.source.tarball_path(k8s_version, runtime);
        let asset = Asset::file(tarball, PRELOAD_TARGET_DIR, PRELOAD_TARGET_NAME, "0644")
            .context("getting file asset")?;

        let start = Instant::now();
        must_succeed("copying file", self.runner.copy(&asset))?;
        info!("Took {:.6} seconds to copy over tarball", start.elapsed().as_secs_f64());

        self.extract(&asset.target_path(), target.storage_root())?;

        log_only("removing tarball", self.runner.remove(&asset));

        if let Some(store) = store.as_mut() {
            log_only("saving reference store", store.save());
            log_only("updating reference store", store.update());
        }

        must_succeed("restarting runtime", target.restart_runtime())
    }

    fn extract(&self, tarball: &Utf8Path, storage_root: &Utf8Path) -> Result<()> {
        let spec = CommandSpec::sudo(
            "tar",
            [
                "--xattrs",
                "--xattrs-include",
                "security.capability",
                "-I",
                DECOMPRESSOR,
                "-C",
                storage_root.as_str(),
                "-xf",
                tarball.as_str(),
            ],
        );
        if let Err(e) = self.runner.run_cmd(&spec) {
            let output = e
                .downcast_ref::<RuntimeError>()
                .and_then(RuntimeError::output)
                .unwrap_or_default()
                .to_string();
            return Err(e.context(format!("extracting tarball: {}", output)));
        }
        Ok(())
    }
}
