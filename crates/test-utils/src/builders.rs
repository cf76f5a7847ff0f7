#![allow(dead_code)]

use std::collections::BTreeMap;

use siso::config::{ConfigFile, ConfigSection, PoolConfig, RawConfigFile, StepConfig};
use siso::deps::DepsMode;
use siso::types::DepsLogMode;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ManifestBuilder {
    config: RawConfigFile,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        let config = ConfigSection {
            parallelism: 4,
            preproc_limit: 4,
            scan_limit: 4,
            deps_log: DepsLogMode::Memory,
            ..ConfigSection::default()
        };
        Self {
            config: RawConfigFile {
                config,
                pool: BTreeMap::new(),
                input_deps: BTreeMap::new(),
                step: BTreeMap::new(),
            },
        }
    }

    pub fn with_step(mut self, name: &str, step: StepConfig) -> Self {
        self.config.step.insert(name.to_string(), step);
        self
    }

    pub fn with_pool(mut self, name: &str, depth: usize) -> Self {
        self.config.pool.insert(name.to_string(), PoolConfig { depth });
        self
    }

    pub fn with_input_deps(mut self, label: &str, paths: &[&str]) -> Self {
        self.config.input_deps.insert(
            label.to_string(),
            paths.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn with_dir(mut self, dir: &str) -> Self {
        self.config.config.dir = dir.to_string();
        self
    }

    pub fn with_parallelism(mut self, n: usize) -> Self {
        self.config.config.parallelism = n;
        self
    }

    pub fn with_ready_queue_capacity(mut self, n: usize) -> Self {
        self.config.config.ready_queue_capacity = n;
        self
    }

    pub fn with_remote(mut self, enabled: bool) -> Self {
        self.config.config.remote = enabled;
        self
    }

    pub fn with_no_fallback(mut self, val: bool) -> Self {
        self.config.config.no_fallback = val;
        self
    }

    pub fn with_keep_going(mut self, n: usize) -> Self {
        self.config.config.keep_going = n;
        self
    }

    pub fn with_fail_on_stdouterr(mut self, val: bool) -> Self {
        self.config.config.fail_on_stdouterr = val;
        self
    }

    pub fn with_strict_deps(mut self, val: bool) -> Self {
        self.config.config.strict_deps = val;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid manifest from builder")
    }
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StepConfig`.
pub struct StepBuilder {
    step: StepConfig,
}

impl StepBuilder {
    /// A step running `command` (whitespace separated).
    pub fn new(command: &str) -> Self {
        Self {
            step: StepConfig {
                command: command.split_whitespace().map(|s| s.to_string()).collect(),
                ..StepConfig::default()
            },
        }
    }

    pub fn phony() -> Self {
        Self {
            step: StepConfig {
                phony: true,
                ..StepConfig::default()
            },
        }
    }

    pub fn input(mut self, path: &str) -> Self {
        self.step.inputs.push(path.to_string());
        self
    }

    pub fn tool_input(mut self, path: &str) -> Self {
        self.step.tool_inputs.push(path.to_string());
        self
    }

    pub fn output(mut self, path: &str) -> Self {
        self.step.outputs.push(path.to_string());
        self
    }

    pub fn depfile(mut self, path: &str) -> Self {
        self.step.depfile = Some(path.to_string());
        self.step.deps = DepsMode::Gcc;
        self
    }

    pub fn deps(mut self, mode: DepsMode) -> Self {
        self.step.deps = mode;
        self
    }

    pub fn pool(mut self, name: &str) -> Self {
        self.step.pool = Some(name.to_string());
        self
    }

    pub fn remote(mut self, val: bool) -> Self {
        self.step.remote = val;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.step.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.step.description = Some(desc.to_string());
        self
    }

    pub fn build(self) -> StepConfig {
        self.step
    }
}
