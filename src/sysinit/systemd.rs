//! systemd service manager.

use std::sync::Arc;

use anyhow::{Context, Result};

use super::ServiceManager;
use crate::executor::{CommandRunner, CommandSpec};

/// Drives `systemctl` on the target host through a [`CommandRunner`].
pub struct Systemd {
    runner: Arc<dyn CommandRunner>,
}

impl Systemd {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn systemctl(&self, args: &[&str]) -> Result<()> {
        let mut full = vec!["systemctl"];
        full.extend_from_slice(args);
        self.runner
            .run_cmd(&CommandSpec::sudo("systemctl", args.iter().copied()))
            .with_context(|| format!("sudo {}", full.join(" ")))?;
        Ok(())
    }

    /// Reloads unit files so freshly written overrides take effect.
    fn daemon_reload(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"])
    }
}

impl ServiceManager for Systemd {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn active(&self, service: &str) -> bool {
        self.runner
            .run_cmd(&CommandSpec::sudo(
                "systemctl",
                ["is-active", "--quiet", "service", service],
            ))
            .is_ok()
    }

    fn enable(&self, service: &str) -> Result<()> {
        self.systemctl(&["enable", service])
    }

    fn disable(&self, service: &str) -> Result<()> {
        self.systemctl(&["disable", service])
    }

    fn start(&self, service: &str) -> Result<()> {
        self.daemon_reload()?;
        self.systemctl(&["start", service])
    }

    fn stop(&self, service: &str) -> Result<()> {
        self.systemctl(&["stop", service])
    }

    fn force_stop(&self, service: &str) -> Result<()> {
        self.systemctl(&["stop", "-f", service])
    }

    fn restart(&self, service: &str) -> Result<()> {
        self.daemon_reload()?;
        self.systemctl(&["restart", service])
    }

    fn mask(&self, service: &str) -> Result<()> {
        self.systemctl(&["mask", service])
    }

    fn unmask(&self, service: &str) -> Result<()> {
        self.systemctl(&["unmask", service])
    }
}
