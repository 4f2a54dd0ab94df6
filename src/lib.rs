pub mod assets;
pub mod cli;
pub mod config;
pub mod cruntime;
pub mod error;
pub mod executor;
pub mod image;
pub mod network;
pub mod preload;
pub mod sysinit;
pub mod units;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

pub use crate::error::RuntimeError;

use crate::config::NodeConfig;
use crate::cruntime::{ListContainersOptions, ListImagesOptions, Manager};
use crate::executor::CommandRunner;
use crate::preload::{ImageResolver, KubeadmImages, LocalPreloadCache, StaticImages};
use crate::sysinit::ServiceManager;

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(filter).finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// Builds the runtime adapter described by a node configuration.
pub fn build_runtime(
    node: &NodeConfig,
    runner: Arc<dyn CommandRunner>,
    init: Arc<dyn ServiceManager>,
) -> Result<Box<dyn Manager>> {
    node.validate().context("node configuration validation failed")?;
    let kubernetes = &node.cluster.kubernetes_config;

    let image_resolver: Arc<dyn ImageResolver> = if node.preload.images.is_empty() {
        Arc::new(KubeadmImages)
    } else {
        Arc::new(StaticImages(node.preload.images.clone()))
    };

    let config = cruntime::Config {
        name: kubernetes.container_runtime.clone(),
        socket: node.runtime.socket.clone(),
        runner,
        init,
        image_repository: kubernetes.image_repository.clone(),
        kubernetes_version: node.kubernetes_version()?,
        cni: node.cni.clone(),
        preload_source: Arc::new(LocalPreloadCache::new(
            node.preload.cache_dir.clone(),
            node.preload.arch.clone(),
        )),
        image_resolver,
    };
    Ok(cruntime::new_runtime(config)?)
}

fn load_runtime(
    opts: &cli::CommonArgs,
    runner: Arc<dyn CommandRunner>,
    init: Arc<dyn ServiceManager>,
) -> Result<(NodeConfig, Box<dyn Manager>)> {
    let node = config::load_config(opts.file.as_path())
        .with_context(|| format!("failed to load node configuration from {}", opts.file))?;
    let runtime = build_runtime(&node, runner, init)?;
    Ok((node, runtime))
}

pub fn run_status(
    opts: &cli::CommonArgs,
    runner: Arc<dyn CommandRunner>,
    init: Arc<dyn ServiceManager>,
    out: &mut dyn Write,
) -> Result<()> {
    let (_, runtime) = load_runtime(opts, runner, init)?;

    writeln!(out, "{} {}", runtime.style().emoji(), runtime.name())?;
    match runtime.available() {
        Ok(()) => writeln!(out, "available: yes")?,
        Err(e) => writeln!(out, "available: no ({:#})", e)?,
    }
    let active = runtime.active();
    writeln!(out, "active: {}", if active { "yes" } else { "no" })?;
    writeln!(out, "socket: {}", runtime.socket_path())?;
    if active {
        writeln!(out, "version: {}", runtime.version()?)?;
        writeln!(out, "cgroup driver: {}", runtime.cgroup_driver()?)?;
    }
    for (key, value) in runtime.kubelet_options() {
        writeln!(out, "kubelet --{}={}", key, value)?;
    }
    Ok(())
}

pub fn run_enable(
    opts: &cli::CommonArgs,
    runner: Arc<dyn CommandRunner>,
    init: Arc<dyn ServiceManager>,
) -> Result<()> {
    let (node, runtime) = load_runtime(opts, runner, init)?;
    runtime
        .available()
        .with_context(|| format!("{} is not available", runtime.name()))?;
    runtime
        .enable(node.runtime.disable_others, node.runtime.force_systemd, false)
        .with_context(|| format!("failed to enable {}", runtime.name()))?;
    runtime
        .configure_network_plugin(&node.cluster.kubernetes_config.network_plugin)
        .context("failed to configure network plugin")?;
    info!("{} enabled", runtime.name());
    Ok(())
}

pub fn run_disable(
    opts: &cli::CommonArgs,
    runner: Arc<dyn CommandRunner>,
    init: Arc<dyn ServiceManager>,
) -> Result<()> {
    let (_, runtime) = load_runtime(opts, runner, init)?;
    runtime
        .disable()
        .with_context(|| format!("failed to disable {}", runtime.name()))?;
    info!("{} disabled", runtime.name());
    Ok(())
}

pub fn run_preload(
    opts: &cli::CommonArgs,
    runner: Arc<dyn CommandRunner>,
    init: Arc<dyn ServiceManager>,
) -> Result<()> {
    let (node, runtime) = load_runtime(opts, runner, init)?;
    runtime.preload(&node.cluster).context("preload failed")
}

pub fn run_images(
    opts: &cli::CommonArgs,
    runner: Arc<dyn CommandRunner>,
    init: Arc<dyn ServiceManager>,
    out: &mut dyn Write,
) -> Result<()> {
    let (_, runtime) = load_runtime(opts, runner, init)?;
    for image in runtime.list_images(&ListImagesOptions::default())? {
        let line = serde_json::to_string(&image).context("failed to encode image")?;
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

pub fn run_containers(
    opts: &cli::ContainersArgs,
    runner: Arc<dyn CommandRunner>,
    init: Arc<dyn ServiceManager>,
    out: &mut dyn Write,
) -> Result<()> {
    let (_, runtime) = load_runtime(&opts.common, runner, init)?;
    let filter = ListContainersOptions {
        state: opts.state,
        name: opts.name.clone(),
        namespaces: opts.namespaces.clone(),
    };
    for id in runtime.list_containers(&filter)? {
        writeln!(out, "{}", id)?;
    }
    Ok(())
}
