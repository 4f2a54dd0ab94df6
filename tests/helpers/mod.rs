#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use camino::Utf8PathBuf;
use semver::Version;

use kuberuntime::assets::Asset;
use kuberuntime::cruntime::{self, Manager};
use kuberuntime::error::RuntimeError;
use kuberuntime::executor::{CommandRunner, CommandSpec, RunResult};
use kuberuntime::network::CniPaths;
use kuberuntime::preload::{ImageResolver, PreloadSource, StaticImages};
use kuberuntime::sysinit::ServiceManager;

enum Scripted {
    Output(String),
    Fail(String),
}

/// Command runner double that records every interaction with the host.
///
/// Outcomes are scripted by command-line prefix; the first matching rule
/// wins and unmatched commands succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    commands: Mutex<Vec<String>>,
    specs: Mutex<Vec<CommandSpec>>,
    copies: Mutex<Vec<Asset>>,
    removals: Mutex<Vec<Asset>>,
    rules: Mutex<Vec<(String, Scripted)>>,
    paths: Mutex<HashSet<String>>,
    fail_copies: Mutex<bool>,
    failing_targets: Mutex<HashSet<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner on whose PATH every named executable resolves.
    pub fn with_paths(names: &[&str]) -> Self {
        let runner = Self::default();
        for name in names {
            runner.add_path(name);
        }
        runner
    }

    pub fn add_path(&self, name: &str) {
        self.paths.lock().unwrap().insert(name.to_string());
    }

    /// Commands starting with `prefix` succeed with `stdout`.
    pub fn respond(&self, prefix: &str, stdout: &str) {
        self.rules
            .lock()
            .unwrap()
            .push((prefix.to_string(), Scripted::Output(stdout.to_string())));
    }

    /// Commands starting with `prefix` exit non-zero with `output`.
    pub fn fail(&self, prefix: &str, output: &str) {
        self.rules
            .lock()
            .unwrap()
            .push((prefix.to_string(), Scripted::Fail(output.to_string())));
    }

    pub fn fail_copies(&self) {
        *self.fail_copies.lock().unwrap() = true;
    }

    /// Copies to `target` fail; other copies still succeed.
    pub fn fail_copy_to(&self, target: &str) {
        self.failing_targets.lock().unwrap().insert(target.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.specs.lock().unwrap().clone()
    }

    /// Commands whose line starts with `prefix`.
    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn copies(&self) -> Vec<Asset> {
        self.copies.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<Asset> {
        self.removals.lock().unwrap().clone()
    }

    /// Total number of commands, copies and removals seen.
    pub fn interaction_count(&self) -> usize {
        self.commands().len() + self.copies().len() + self.removals().len()
    }
}

impl CommandRunner for FakeRunner {
    fn run_cmd(&self, spec: &CommandSpec) -> Result<RunResult> {
        let line = spec.command_line();
        self.commands.lock().unwrap().push(line.clone());
        self.specs.lock().unwrap().push(spec.clone());

        let rules = self.rules.lock().unwrap();
        match rules.iter().find(|(prefix, _)| line.starts_with(prefix.as_str())) {
            Some((_, Scripted::Output(stdout))) => Ok(RunResult::from_stdout(stdout.clone())),
            Some((_, Scripted::Fail(output))) => Err(RuntimeError::Execution {
                command: line,
                status: "exit status: 1".to_string(),
                output: output.clone(),
            }
            .into()),
            None => Ok(RunResult::default()),
        }
    }

    fn look_path(&self, name: &str) -> Result<Utf8PathBuf> {
        if self.paths.lock().unwrap().contains(name) {
            Ok(Utf8PathBuf::from(format!("/usr/bin/{}", name)))
        } else {
            Err(RuntimeError::CommandNotFound {
                command: name.to_string(),
            }
            .into())
        }
    }

    fn copy(&self, asset: &Asset) -> Result<()> {
        let target = asset.target_path();
        if *self.fail_copies.lock().unwrap()
            || self.failing_targets.lock().unwrap().contains(target.as_str())
        {
            anyhow::bail!("scp {}: connection reset", target);
        }
        self.copies.lock().unwrap().push(asset.clone());
        Ok(())
    }

    fn remove(&self, asset: &Asset) -> Result<()> {
        self.removals.lock().unwrap().push(asset.clone());
        Ok(())
    }
}

/// Observable state of one unit in [`FakeInit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitState {
    pub active: bool,
    pub enabled: bool,
    pub masked: bool,
}

/// Service manager double: records verbs and tracks per-unit state.
#[derive(Default)]
pub struct FakeInit {
    calls: Mutex<Vec<String>>,
    units: Mutex<BTreeMap<String, UnitState>>,
    failures: Mutex<HashSet<String>>,
    sticky: Mutex<HashSet<String>>,
}

impl FakeInit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verb calls such as `"restart docker"`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn state(&self, unit: &str) -> UnitState {
        self.units.lock().unwrap().get(unit).cloned().unwrap_or_default()
    }

    pub fn states(&self) -> BTreeMap<String, UnitState> {
        self.units.lock().unwrap().clone()
    }

    pub fn set_active(&self, unit: &str) {
        self.units.lock().unwrap().entry(unit.to_string()).or_default().active = true;
    }

    /// Makes `"<verb> <unit>"` fail.
    pub fn fail(&self, call: &str) {
        self.failures.lock().unwrap().insert(call.to_string());
    }

    /// Keeps `unit` active even after it is stopped.
    pub fn keep_active(&self, unit: &str) {
        self.sticky.lock().unwrap().insert(unit.to_string());
    }

    fn apply(&self, verb: &str, unit: &str, change: impl FnOnce(&mut UnitState)) -> Result<()> {
        let call = format!("{} {}", verb, unit);
        self.calls.lock().unwrap().push(call.clone());
        if self.failures.lock().unwrap().contains(&call) {
            anyhow::bail!("{} failed", call);
        }
        let sticky = self.sticky.lock().unwrap().contains(unit);
        let mut units = self.units.lock().unwrap();
        let state = units.entry(unit.to_string()).or_default();
        change(state);
        if sticky {
            state.active = true;
        }
        Ok(())
    }
}

impl ServiceManager for FakeInit {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn active(&self, service: &str) -> bool {
        self.state(service).active
    }

    fn enable(&self, service: &str) -> Result<()> {
        self.apply("enable", service, |s| s.enabled = true)
    }

    fn disable(&self, service: &str) -> Result<()> {
        self.apply("disable", service, |s| s.enabled = false)
    }

    fn start(&self, service: &str) -> Result<()> {
        self.apply("start", service, |s| s.active = true)
    }

    fn stop(&self, service: &str) -> Result<()> {
        self.apply("stop", service, |s| s.active = false)
    }

    fn force_stop(&self, service: &str) -> Result<()> {
        self.apply("force-stop", service, |s| s.active = false)
    }

    fn restart(&self, service: &str) -> Result<()> {
        self.apply("restart", service, |s| s.active = true)
    }

    fn mask(&self, service: &str) -> Result<()> {
        self.apply("mask", service, |s| s.masked = true)
    }

    fn unmask(&self, service: &str) -> Result<()> {
        self.apply("unmask", service, |s| s.masked = false)
    }
}

/// Preload source double with a fixed answer and an existing local tarball path.
pub struct FakePreloadSource {
    pub exists: bool,
    pub path: Utf8PathBuf,
}

impl PreloadSource for FakePreloadSource {
    fn exists(&self, _k8s_version: &str, _container_runtime: &str, _driver: &str) -> bool {
        self.exists
    }

    fn tarball_path(&self, _k8s_version: &str, _container_runtime: &str) -> Utf8PathBuf {
        self.path.clone()
    }
}

/// Fixture bundling the doubles a Docker adapter is built from.
pub struct Host {
    pub runner: Arc<FakeRunner>,
    pub init: Arc<FakeInit>,
}

impl Host {
    pub fn new() -> Self {
        Self {
            runner: Arc::new(FakeRunner::new()),
            init: Arc::new(FakeInit::new()),
        }
    }

    pub fn with_runner(runner: FakeRunner) -> Self {
        Self {
            runner: Arc::new(runner),
            init: Arc::new(FakeInit::new()),
        }
    }

    pub fn config(&self, kubernetes_version: &str) -> cruntime::Config {
        self.config_with_preload(
            kubernetes_version,
            Arc::new(FakePreloadSource {
                exists: false,
                path: Utf8PathBuf::from("/nonexistent/preload.tar.lz4"),
            }),
            Arc::new(StaticImages(Vec::new())),
        )
    }

    pub fn config_with_preload(
        &self,
        kubernetes_version: &str,
        preload_source: Arc<dyn PreloadSource>,
        image_resolver: Arc<dyn ImageResolver>,
    ) -> cruntime::Config {
        cruntime::Config {
            name: "docker".to_string(),
            socket: String::new(),
            runner: self.runner.clone(),
            init: self.init.clone(),
            image_repository: String::new(),
            kubernetes_version: Version::parse(kubernetes_version).unwrap(),
            cni: CniPaths::default(),
            preload_source,
            image_resolver,
        }
    }

    /// A Docker adapter for `kubernetes_version` on this host.
    pub fn docker(&self, kubernetes_version: &str) -> Box<dyn Manager> {
        cruntime::new_runtime(self.config(kubernetes_version)).unwrap()
    }
}

/// Shorthand for building owned ID lists.
pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Writes `yaml` to `node.yaml` inside `dir` and returns its path.
pub fn write_config(dir: &tempfile::TempDir, yaml: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("node.yaml")).unwrap();
    std::fs::write(&path, yaml).unwrap();
    path
}
