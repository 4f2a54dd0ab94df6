//! Docker's image reference index (`repositories.json`).
//!
//! Extracting a preload bundle overwrites the index with the bundle's copy,
//! which forgets every tag the host already had. The store snapshots the
//! index before and after extraction and writes the union back.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ImageMetadataStore;
use crate::assets::Asset;
use crate::error::RuntimeError;
use crate::executor::{CommandRunner, CommandSpec};

/// Location of the index for the overlay2 storage driver.
pub const REFERENCE_STORE_PATH: &str = "/var/lib/docker/image/overlay2/repositories.json";

/// Repository name to (reference to digest).
pub type References = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Repositories {
    #[serde(rename = "Repositories", default)]
    repositories: References,
}

/// Snapshot-and-merge access to the reference index on a host.
pub struct ReferenceStore<'a> {
    runner: &'a dyn CommandRunner,
    refs: References,
}

impl<'a> ReferenceStore<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            refs: References::new(),
        }
    }

    fn load(&self) -> Result<References> {
        let rr = self
            .runner
            .run_cmd(&CommandSpec::sudo("cat", [REFERENCE_STORE_PATH]))
            .with_context(|| format!("reading {}", REFERENCE_STORE_PATH))?;
        let doc: Repositories = serde_json::from_str(&rr.stdout)
            .map_err(|e| RuntimeError::Parse(format!("{}: {}", REFERENCE_STORE_PATH, e)))?;
        Ok(doc.repositories)
    }
}

fn merge(into: &mut References, from: References) {
    for (repo, tags) in from {
        into.entry(repo).or_default().extend(tags);
    }
}

impl ImageMetadataStore for ReferenceStore<'_> {
    fn save(&mut self) -> Result<()> {
        let current = self.load()?;
        debug!("saved {} repositories from reference store", current.len());
        merge(&mut self.refs, current);
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        let mut current = self.load()?;
        merge(&mut current, self.refs.clone());

        let doc = Repositories {
            repositories: current,
        };
        let data = serde_json::to_vec(&doc)
            .map_err(|e| RuntimeError::Parse(format!("encoding reference store: {}", e)))?;
        let asset = Asset::memory_target(data, Utf8Path::new(REFERENCE_STORE_PATH), "0644");
        self.runner.copy(&asset).context("writing reference store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_both_sides() {
        let mut into = References::new();
        into.entry("nginx".to_string())
            .or_default()
            .insert("nginx:1.25".to_string(), "sha256:aaa".to_string());

        let mut from = References::new();
        from.entry("nginx".to_string())
            .or_default()
            .insert("nginx:latest".to_string(), "sha256:bbb".to_string());
        from.entry("busybox".to_string())
            .or_default()
            .insert("busybox:1.36".to_string(), "sha256:ccc".to_string());

        merge(&mut into, from);
        assert_eq!(into.len(), 2);
        assert_eq!(into["nginx"].len(), 2);
    }

    #[test]
    fn parses_docker_layout() {
        let raw = r#"{"Repositories":{"k8s.gcr.io/pause":{"k8s.gcr.io/pause:3.9":"sha256:e6f1"}}}"#;
        let doc: Repositories = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.repositories["k8s.gcr.io/pause"]["k8s.gcr.io/pause:3.9"], "sha256:e6f1");
    }
}
