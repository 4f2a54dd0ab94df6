//! Local command runner implementation.
//!
//! This module provides [`LocalRunner`], which executes commands on the
//! machine kuberuntime itself runs on, capturing stdout and stderr.

use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::thread::JoinHandle;

use anyhow::Result;
use camino::Utf8PathBuf;
use which::which;

use super::pipe::{StreamType, capture_pipe, panic_message};
use super::{CommandRunner, CommandSpec, RunResult, format_command_args};
use crate::assets::{Asset, AssetSource};
use crate::error::RuntimeError;

/// Kills a child process and joins its reader threads.
///
/// Called from error paths in [`LocalRunner::run_cmd()`] so a failed
/// spawn/write/wait never leaks a process or a thread.
fn cleanup_child_process<I>(child: &mut Child, handles: I)
where
    I: IntoIterator<Item = JoinHandle<Vec<u8>>>,
{
    let pid = child.id();
    if let Err(e) = child.kill() {
        tracing::debug!(pid = pid, "kill returned error (process may have already exited): {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::warn!(pid = pid, "failed to wait for child process after kill: {}", e);
    }
    for handle in handles {
        if let Err(e) = handle.join() {
            tracing::warn!("reader thread panicked during cleanup: {}", panic_message(&*e));
        }
    }
}

fn execution_error(spec: &CommandSpec, status: impl Into<String>) -> anyhow::Error {
    RuntimeError::Execution {
        command: spec.command_line(),
        status: status.into(),
        output: String::new(),
    }
    .into()
}

fn spawn_reader<R>(pipe: Option<R>, stream: StreamType) -> std::io::Result<JoinHandle<Vec<u8>>>
where
    R: std::io::Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-reader", stream))
        .spawn(move || capture_pipe(pipe, stream))
}

/// Command runner for the local host.
///
/// When `dry_run` is true, commands are logged but not executed and
/// `run_cmd()` returns an empty [`RunResult`].
#[derive(Debug, Default, Clone)]
pub struct LocalRunner {
    pub dry_run: bool,
}

impl LocalRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl CommandRunner for LocalRunner {
    fn run_cmd(&self, spec: &CommandSpec) -> Result<RunResult> {
        if self.dry_run {
            tracing::info!("dry run: {} {}", spec.command, format_command_args(&spec.args));
            return Ok(RunResult::default());
        }

        let cmd = which(&spec.command).map_err(|_| RuntimeError::CommandNotFound {
            command: spec.command.clone(),
        })?;
        tracing::debug!("Run: {}", spec);

        let mut command = Command::new(cmd);
        command.args(&spec.args);
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        command.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| execution_error(spec, format!("failed to spawn: {}", e)))?;

        tracing::trace!("spawned command: {}: pid={}", spec.command, child.id());

        let stdout_handle = match spawn_reader(child.stdout.take(), StreamType::Stdout) {
            Ok(handle) => handle,
            Err(e) => {
                cleanup_child_process(&mut child, []);
                return Err(execution_error(
                    spec,
                    format!("failed to spawn stdout reader thread: {}", e),
                ));
            }
        };

        let stderr_handle = match spawn_reader(child.stderr.take(), StreamType::Stderr) {
            Ok(handle) => handle,
            Err(e) => {
                cleanup_child_process(&mut child, [stdout_handle]);
                return Err(execution_error(
                    spec,
                    format!("failed to spawn stderr reader thread: {}", e),
                ));
            }
        };

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take())
            && let Err(e) = stdin.write_all(input)
        {
            cleanup_child_process(&mut child, [stdout_handle, stderr_handle]);
            return Err(execution_error(spec, format!("failed to write stdin: {}", e)));
        }

        let status = match child.wait() {
            Ok(s) => s,
            Err(e) => {
                cleanup_child_process(&mut child, [stdout_handle, stderr_handle]);
                return Err(execution_error(spec, format!("failed to wait for command: {}", e)));
            }
        };

        let mut streams = Vec::with_capacity(2);
        for (name, handle) in [("stdout", stdout_handle), ("stderr", stderr_handle)] {
            match handle.join() {
                Ok(bytes) => streams.push(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => {
                    let msg = panic_message(&*e);
                    tracing::error!(stream = name, panic = msg, "reader thread panicked");
                    return Err(execution_error(
                        spec,
                        format!("{} reader thread panicked: {}", name, msg),
                    ));
                }
            }
        }
        let stderr = streams.pop().unwrap_or_default();
        let stdout = streams.pop().unwrap_or_default();
        let result = RunResult { stdout, stderr };

        tracing::trace!("executed command: {}: success={}", spec.command, status.success());

        if !status.success() {
            return Err(RuntimeError::Execution {
                command: spec.command_line(),
                status: status.to_string(),
                output: result.output(),
            }
            .into());
        }

        Ok(result)
    }

    fn look_path(&self, name: &str) -> Result<Utf8PathBuf> {
        let path = which(name).map_err(|_| RuntimeError::CommandNotFound {
            command: name.to_string(),
        })?;
        Utf8PathBuf::from_path_buf(path).map_err(|p| {
            anyhow::Error::from(RuntimeError::Validation(format!(
                "path is not valid UTF-8: {}",
                p.display()
            )))
        })
    }

    fn copy(&self, asset: &Asset) -> Result<()> {
        let target = asset.target_path();
        self.run_cmd(&CommandSpec::sudo("mkdir", ["-p", asset.target_dir().as_str()]))?;
        match asset.source() {
            AssetSource::Memory(content) => {
                self.run_cmd(
                    &CommandSpec::sudo("tee", [target.as_str()]).with_stdin(content.clone()),
                )?;
            }
            AssetSource::File(source) => {
                self.run_cmd(&CommandSpec::sudo("cp", ["-a", source.as_str(), target.as_str()]))?;
            }
        }
        self.run_cmd(&CommandSpec::sudo("chmod", [asset.permissions(), target.as_str()]))?;
        Ok(())
    }

    fn remove(&self, asset: &Asset) -> Result<()> {
        let target = asset.target_path();
        self.run_cmd(&CommandSpec::sudo("rm", ["-f", target.as_str()]))?;
        Ok(())
    }
}
