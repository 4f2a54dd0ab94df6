//! Domain-specific error types for kuberuntime.
//!
//! This module defines `RuntimeError`, a `thiserror`-based enum that
//! provides typed error variants for the failure modes of the runtime
//! adapter layer. Trait boundaries (`Manager`, `CommandRunner`,
//! `ServiceManager`) use `anyhow::Result` and attach an operation label with
//! `anyhow::Context`; the typed variant stays reachable through
//! `anyhow::Error::downcast_ref::<RuntimeError>()` regardless of how many
//! context layers were added on the way up.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent messages for common IO error kinds
/// (e.g., "I/O error: not found") instead of the OS-level messages
/// (e.g., "No such file or directory (os error 2)").
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for kuberuntime.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// A required executable could not be resolved on the target host.
    #[error("command not found in PATH: {command}")]
    CommandNotFound {
        /// The executable that was looked up.
        command: String,
    },

    /// A command ran but failed (non-zero exit, spawn failure, wait failure, etc.).
    #[error("command execution failed: {command}: {status}")]
    Execution {
        /// The full command line that was executed.
        command: String,
        /// Exit code, signal information, or a description of the internal failure.
        status: String,
        /// Captured stdout followed by stderr, kept for diagnostics.
        output: String,
    },

    /// Structured output from the runtime could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// The host image lacks a feature the operation depends on.
    ///
    /// Typically this means the machine image needs to be rebuilt with the
    /// missing tool included.
    #[error("host is missing required feature: {feature}")]
    MissingFeature {
        /// Name of the missing feature (e.g. `lz4`).
        feature: String,
    },

    /// A validation constraint was violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requested runtime has no adapter in this crate.
    #[error("unsupported container runtime: {0}")]
    UnsupportedRuntime(String),

    /// A service override template could not be rendered.
    #[error("template error: {0}")]
    Template(String),

    /// A configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred (usually a path).
        context: String,
        /// Human-readable description derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl RuntimeError {
    /// Creates an `Io` variant with the `message` field derived from `source`.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Creates a `MissingFeature` variant for the given feature name.
    pub fn missing_feature(feature: impl Into<String>) -> Self {
        Self::MissingFeature {
            feature: feature.into(),
        }
    }

    /// Returns the missing feature name if this is a `MissingFeature` error.
    pub fn missing_feature_name(&self) -> Option<&str> {
        match self {
            Self::MissingFeature { feature } => Some(feature),
            _ => None,
        }
    }

    /// Returns the captured command output if this is an `Execution` error.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Execution { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_command_not_found_display() {
        let err = RuntimeError::CommandNotFound {
            command: "cri-dockerd".to_string(),
        };
        assert_eq!(err.to_string(), "command not found in PATH: cri-dockerd");
    }

    #[test]
    fn test_execution_display() {
        let err = RuntimeError::Execution {
            command: "docker pull nginx".to_string(),
            status: "exit status: 1".to_string(),
            output: "Error response from daemon".to_string(),
        };
        assert_eq!(err.to_string(), "command execution failed: docker pull nginx: exit status: 1");
        assert_eq!(err.output(), Some("Error response from daemon"));
    }

    #[test]
    fn test_missing_feature_display() {
        let err = RuntimeError::missing_feature("lz4");
        assert_eq!(err.to_string(), "host is missing required feature: lz4");
        assert_eq!(err.missing_feature_name(), Some("lz4"));
    }

    #[test]
    fn test_missing_feature_name_on_other_variant() {
        let err = RuntimeError::Parse("bad row".to_string());
        assert!(err.missing_feature_name().is_none());
        assert!(err.output().is_none());
    }

    #[test]
    fn test_io_display() {
        let source = io::Error::new(io::ErrorKind::NotFound, "entity not found");
        let err = RuntimeError::io("/etc/node.yaml", source);
        assert_eq!(err.to_string(), "/etc/node.yaml: I/O error: not found");
    }

    #[test]
    fn test_io_error_kind_message_permission_denied() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(io_error_kind_message(&err), "I/O error: permission denied");
    }

    #[test]
    fn test_io_error_kind_message_other() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        assert!(io_error_kind_message(&err).starts_with("I/O error: "));
    }

    #[test]
    fn test_downcast_survives_context_layers() {
        let result: anyhow::Result<()> = Err(RuntimeError::missing_feature("lz4").into());
        let err = result.context("preload").context("start cluster").unwrap_err();
        let typed = err.downcast_ref::<RuntimeError>();
        assert!(matches!(typed, Some(RuntimeError::MissingFeature { feature }) if feature == "lz4"));
    }
}
