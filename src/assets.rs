//! Payloads that a [`CommandRunner`](crate::executor::CommandRunner) materializes on a host.
//!
//! An asset is either held in memory (rendered config files) or backed by a
//! local file (the preload tarball). Both carry the target directory, file
//! name and octal permission string they should land with.

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::RuntimeError;

/// Where the bytes of an asset come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// Content rendered in-process.
    Memory(Vec<u8>),
    /// A file on the local filesystem.
    File(Utf8PathBuf),
}

/// A file to be placed on the target host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    source: AssetSource,
    target_dir: Utf8PathBuf,
    target_name: String,
    permissions: String,
}

impl Asset {
    /// Creates an in-memory asset destined for `target_dir/target_name`.
    pub fn memory(
        content: impl Into<Vec<u8>>,
        target_dir: impl Into<Utf8PathBuf>,
        target_name: impl Into<String>,
        permissions: impl Into<String>,
    ) -> Self {
        Self {
            source: AssetSource::Memory(content.into()),
            target_dir: target_dir.into(),
            target_name: target_name.into(),
            permissions: permissions.into(),
        }
    }

    /// Creates an in-memory asset from a full target path.
    pub fn memory_target(
        content: impl Into<Vec<u8>>,
        target_path: &Utf8Path,
        permissions: impl Into<String>,
    ) -> Self {
        let dir = target_path.parent().unwrap_or(Utf8Path::new("/"));
        let name = target_path.file_name().unwrap_or_default();
        Self::memory(content, dir, name, permissions)
    }

    /// Creates a file-backed asset.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Io` if the source file cannot be inspected.
    pub fn file(
        source_path: impl Into<Utf8PathBuf>,
        target_dir: impl Into<Utf8PathBuf>,
        target_name: impl Into<String>,
        permissions: impl Into<String>,
    ) -> Result<Self, RuntimeError> {
        let source_path = source_path.into();
        std::fs::metadata(&source_path)
            .map_err(|e| RuntimeError::io(format!("failed to open asset {}", source_path), e))?;
        Ok(Self {
            source: AssetSource::File(source_path),
            target_dir: target_dir.into(),
            target_name: target_name.into(),
            permissions: permissions.into(),
        })
    }

    pub fn source(&self) -> &AssetSource {
        &self.source
    }

    pub fn target_dir(&self) -> &Utf8Path {
        &self.target_dir
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Octal permission string, e.g. `"0644"`.
    pub fn permissions(&self) -> &str {
        &self.permissions
    }

    /// Full destination path on the target host.
    pub fn target_path(&self) -> Utf8PathBuf {
        self.target_dir.join(&self.target_name)
    }

    /// Returns the in-memory content, if this is a memory asset.
    pub fn content(&self) -> Option<&[u8]> {
        match &self.source {
            AssetSource::Memory(bytes) => Some(bytes),
            AssetSource::File(_) => None,
        }
    }

    /// Returns the local source path, if this is a file asset.
    pub fn source_path(&self) -> Option<&Utf8Path> {
        match &self.source {
            AssetSource::File(path) => Some(path),
            AssetSource::Memory(_) => None,
        }
    }
}
