//! Service lifecycle management for the target host.
//!
//! Runtime adapters never talk to the host's service supervisor directly;
//! they go through [`ServiceManager`], so a different init system (or a
//! test double) can be substituted without touching adapter code.

use anyhow::Result;

pub mod systemd;

pub use systemd::Systemd;

/// Trait for service-manager implementations.
///
/// Every verb is expected to be idempotent: enabling an enabled unit or
/// stopping a stopped one succeeds.
pub trait ServiceManager: Send + Sync {
    /// Returns the name of the init system (e.g. "systemd").
    fn name(&self) -> &'static str;

    /// Returns whether the service is running. Failures to query count as "not active".
    fn active(&self, service: &str) -> bool;

    fn enable(&self, service: &str) -> Result<()>;

    fn disable(&self, service: &str) -> Result<()>;

    fn start(&self, service: &str) -> Result<()>;

    fn stop(&self, service: &str) -> Result<()>;

    /// Stops the service even if other units depend on it.
    fn force_stop(&self, service: &str) -> Result<()>;

    fn restart(&self, service: &str) -> Result<()>;

    /// Masks the unit so nothing can start it.
    fn mask(&self, service: &str) -> Result<()>;

    fn unmask(&self, service: &str) -> Result<()>;
}
