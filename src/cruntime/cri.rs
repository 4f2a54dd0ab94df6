//! CRI backend: container and image operations issued through `crictl`.
//!
//! Adapters that sit behind a CRI endpoint delegate here. State filtering
//! and pausing go through `runc`, since CRI has no notion of a paused
//! container.

use std::collections::HashSet;
use std::fmt::Write as _;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use super::{ContainerState, ListContainersOptions};
use crate::assets::Asset;
use crate::error::RuntimeError;
use crate::executor::{CommandRunner, CommandSpec};

/// Directory and name of the crictl client configuration.
pub const CRICTL_CONFIG_DIR: &str = "/etc";
pub const CRICTL_CONFIG_NAME: &str = "crictl.yaml";

/// Label the kubelet puts on every container with its pod namespace.
const NAMESPACE_LABEL: &str = "io.kubernetes.pod.namespace";

#[derive(Debug, Deserialize)]
struct RuncContainer {
    id: String,
    status: String,
}

/// Resolves the crictl binary on the host, falling back to a bare name.
pub fn crictl_path(runner: &dyn CommandRunner) -> String {
    runner
        .look_path("crictl")
        .map(|p| p.to_string())
        .unwrap_or_else(|_| "crictl".to_string())
}

fn runc_args<'a>(root: &'a str, verb: &'a str) -> Vec<&'a str> {
    let mut args = vec!["runc"];
    if !root.is_empty() {
        args.extend(["--root", root]);
    }
    args.push(verb);
    args
}

/// Lists container IDs through crictl, optionally filtered by state via runc.
pub fn list_cri_containers(
    runner: &dyn CommandRunner,
    root: &str,
    opts: &ListContainersOptions,
) -> Result<Vec<String>> {
    info!("listing CRI containers in root {}: {:?}", root, opts);

    // -a keeps paused containers in the listing
    let mut base: Vec<String> = ["crictl", "ps", "-a", "--quiet"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if !opts.name.is_empty() {
        base.push(format!("--name={}", opts.name));
    }

    let invocations: Vec<Vec<String>> = if opts.namespaces.is_empty() {
        vec![base]
    } else {
        opts.namespaces
            .iter()
            .map(|ns| {
                let mut args = base.clone();
                args.push("--label".to_string());
                args.push(format!("{}={}", NAMESPACE_LABEL, ns));
                args
            })
            .collect()
    };

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for args in invocations {
        let spec = CommandSpec::new("sudo", args);
        let rr = runner.run_cmd(&spec).with_context(|| spec.to_string())?;
        for id in rr.stdout_lines() {
            let id = id.trim();
            if !id.is_empty() && seen.insert(id.to_string()) {
                ids.push(id.to_string());
            }
        }
    }

    if opts.state == ContainerState::All || ids.is_empty() {
        return Ok(ids);
    }

    let wanted = opts.state.to_string().to_ascii_lowercase();
    let mut list = runc_args(root, "list");
    list.extend(["-f", "json"]);
    let rr = runner
        .run_cmd(&CommandSpec::new("sudo", list))
        .context("runc list")?;
    let raw = rr.stdout.trim();
    let containers: Vec<RuncContainer> = if raw.is_empty() || raw == "null" {
        Vec::new()
    } else {
        serde_json::from_str(raw)
            .map_err(|e| RuntimeError::Parse(format!("runc list output: {}", e)))?
    };
    let matching: HashSet<&str> = containers
        .iter()
        .filter(|c| c.status == wanted)
        .map(|c| c.id.as_str())
        .collect();

    Ok(ids.into_iter().filter(|id| matching.contains(id.as_str())).collect())
}

/// Forcibly removes containers.
pub fn kill_cri_containers(runner: &dyn CommandRunner, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    info!("Killing containers: {:?}", ids);
    let mut args = vec!["crictl".to_string(), "rm".to_string(), "--force".to_string()];
    args.extend(ids.iter().cloned());
    runner
        .run_cmd(&CommandSpec::new("sudo", args))
        .context("crictl")?;
    Ok(())
}

/// Stops containers with a ten second grace period.
pub fn stop_cri_containers(runner: &dyn CommandRunner, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    info!("Stopping containers: {:?}", ids);
    let mut args = vec!["crictl".to_string(), "stop".to_string(), "--timeout=10".to_string()];
    args.extend(ids.iter().cloned());
    runner
        .run_cmd(&CommandSpec::new("sudo", args))
        .context("crictl")?;
    Ok(())
}

fn runc_each(runner: &dyn CommandRunner, root: &str, verb: &str, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let base = runc_args(root, verb).join(" ");
    let mut script = String::new();
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            script.push_str(" && ");
        }
        let _ = write!(script, "sudo {} {}", base, id);
    }
    runner
        .run_cmd(&CommandSpec::bash(script))
        .context("runc")?;
    Ok(())
}

/// Pauses containers through runc in a single invocation.
pub fn pause_cri_containers(runner: &dyn CommandRunner, root: &str, ids: &[String]) -> Result<()> {
    if !ids.is_empty() {
        info!("Pausing containers: {:?}", ids);
    }
    runc_each(runner, root, "pause", ids)
}

/// Resumes paused containers through runc in a single invocation.
pub fn unpause_cri_containers(
    runner: &dyn CommandRunner,
    root: &str,
    ids: &[String],
) -> Result<()> {
    if !ids.is_empty() {
        info!("Unpausing containers: {:?}", ids);
    }
    runc_each(runner, root, "resume", ids)
}

pub fn pull_cri_image(runner: &dyn CommandRunner, name: &str) -> Result<()> {
    runner
        .run_cmd(&CommandSpec::sudo("crictl", ["pull", name]))
        .context("crictl pull")?;
    Ok(())
}

pub fn remove_cri_image(runner: &dyn CommandRunner, name: &str) -> Result<()> {
    runner
        .run_cmd(&CommandSpec::sudo("crictl", ["rmi", name]))
        .context("crictl rmi")?;
    Ok(())
}

/// Builds the shell command that prints a container's logs through crictl.
pub fn cri_container_log_cmd(
    runner: &dyn CommandRunner,
    id: &str,
    lines: usize,
    follow: bool,
) -> String {
    let mut cmd = format!("sudo {} logs ", crictl_path(runner));
    if lines > 0 {
        let _ = write!(cmd, "--tail {} ", lines);
    }
    if follow {
        cmd.push_str("--follow ");
    }
    cmd.push_str(id);
    cmd
}

/// Points crictl at `socket` by writing `/etc/crictl.yaml`.
pub fn populate_cri_config(runner: &dyn CommandRunner, socket: &str) -> Result<()> {
    let content = format!("runtime-endpoint: unix://{}\n", socket);
    let asset = Asset::memory(content, CRICTL_CONFIG_DIR, CRICTL_CONFIG_NAME, "0644");
    runner.copy(&asset)
}
