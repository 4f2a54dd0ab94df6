//! Command execution abstraction for kuberuntime.
//!
//! This module provides:
//! - [`CommandSpec`]: Specification for commands to execute
//! - [`RunResult`]: Captured output of a command
//! - [`CommandRunner`]: Trait for executing commands against a target host
//! - [`LocalRunner`]: Production implementation for the local host
//!
//! Remote transports (SSH, VM guest agents) implement [`CommandRunner`]
//! outside this crate; adapters never assume the target is local.

mod local;
mod pipe;

use anyhow::Result;
use camino::Utf8PathBuf;

use crate::assets::Asset;

pub use local::LocalRunner;

/// Formats string arguments into a space-separated, debug-quoted string.
///
/// Used by dry-run output to show exactly which arguments would be passed
/// (e.g., `"-c" "sudo cat /tmp/img.tar | docker load"`).
pub(crate) fn format_command_args(args: &[String]) -> String {
    args.iter()
        .map(|a| format!("{:?}", a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Specification for a command to be executed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// The command to execute (e.g., "docker")
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment variables to set (in addition to inherited environment)
    pub env: Vec<(String, String)>,
    /// Bytes written to the command's stdin, if any
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    /// Creates a new CommandSpec with command and args
    #[must_use]
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            stdin: None,
        }
    }

    /// Creates a `sudo <command> <args...>` specification.
    #[must_use]
    pub fn sudo<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut full = vec![command.into()];
        full.extend(args.into_iter().map(Into::into));
        Self::new("sudo", full)
    }

    /// Creates a `/bin/bash -c <script>` specification.
    #[must_use]
    pub fn bash(script: impl Into<String>) -> Self {
        Self::new("/bin/bash", ["-c".to_string(), script.into()])
    }

    /// Adds an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Adds multiple environment variables.
    #[must_use]
    pub fn with_envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the bytes fed to stdin
    #[must_use]
    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Returns the command and its arguments joined by single spaces.
    pub fn command_line(&self) -> String {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    /// Creates a result with the given stdout and empty stderr.
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Returns stdout followed by stderr.
    pub fn output(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }

    /// Returns the first line of stdout (empty if there is none).
    pub fn first_line(&self) -> &str {
        self.stdout.split('\n').next().unwrap_or_default()
    }

    /// Returns the non-empty lines of stdout.
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.split('\n').filter(|line| !line.is_empty())
    }
}

/// Trait for executing commands against a target host.
///
/// Implementations must be `Send + Sync` so adapters holding an
/// `Arc<dyn CommandRunner>` can be shared across threads. A single
/// implementation is not expected to be safe for concurrent mutating calls
/// against the same host; callers serialize per host.
pub trait CommandRunner: Send + Sync {
    /// Runs a command to completion and returns its captured output.
    ///
    /// A non-zero exit status is an error carrying the captured output
    /// (`RuntimeError::Execution`).
    fn run_cmd(&self, spec: &CommandSpec) -> Result<RunResult>;

    /// Resolves an executable on the target host's PATH.
    fn look_path(&self, name: &str) -> Result<Utf8PathBuf>;

    /// Materializes an asset at its target path with its permissions.
    fn copy(&self, asset: &Asset) -> Result<()>;

    /// Removes a previously copied asset from the target host.
    fn remove(&self, asset: &Asset) -> Result<()>;
}
