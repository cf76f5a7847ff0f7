// src/config/validate.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, SisoError};
use crate::path::clean;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SisoError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_steps(cfg)?;
    validate_global_config(cfg)?;
    validate_pools(cfg)?;
    let producers = validate_outputs(cfg)?;
    validate_dag(cfg, &producers)?;
    Ok(())
}

fn ensure_has_steps(cfg: &RawConfigFile) -> Result<()> {
    if cfg.step.is_empty() {
        return Err(SisoError::ConfigError(
            "manifest must contain at least one [step.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    let c = &cfg.config;
    for (name, value) in [
        ("parallelism", c.parallelism),
        ("ready_queue_capacity", c.ready_queue_capacity),
        ("remote_limit", c.remote_limit),
        ("preproc_limit", c.preproc_limit),
        ("scan_limit", c.scan_limit),
    ] {
        if value == 0 {
            return Err(SisoError::ConfigError(format!(
                "[config].{name} must be >= 1 (got 0)"
            )));
        }
    }
    Ok(())
}

fn validate_pools(cfg: &RawConfigFile) -> Result<()> {
    for (name, pool) in cfg.pool.iter() {
        if pool.depth == 0 {
            return Err(SisoError::ConfigError(format!(
                "[pool.{name}].depth must be >= 1 (got 0)"
            )));
        }
    }
    for (name, step) in cfg.step.iter() {
        if let Some(pool) = &step.pool {
            if !cfg.pool.contains_key(pool) {
                return Err(SisoError::ConfigError(format!(
                    "step '{name}' uses unknown pool '{pool}'"
                )));
            }
        }
    }
    Ok(())
}

/// Returns output path -> producing step name.
fn validate_outputs(cfg: &RawConfigFile) -> Result<HashMap<String, &str>> {
    let mut producers: HashMap<String, &str> = HashMap::new();
    for (name, step) in cfg.step.iter() {
        for out in step.outputs.iter() {
            let out = clean(out);
            if let Some(prev) = producers.insert(out.clone(), name.as_str()) {
                return Err(SisoError::ConfigError(format!(
                    "output '{out}' is produced by both '{prev}' and '{name}'"
                )));
            }
        }
    }
    Ok(producers)
}

fn validate_dag(cfg: &RawConfigFile, producers: &HashMap<String, &str>) -> Result<()> {
    // Edge direction: producer -> consumer.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.step.keys() {
        graph.add_node(name.as_str());
    }

    for (name, step) in cfg.step.iter() {
        for input in step.inputs.iter() {
            let producer = if cfg.step.contains_key(input) {
                Some(input.as_str())
            } else {
                producers.get(&clean(input)).copied()
            };
            if let Some(producer) = producer {
                if producer == name {
                    return Err(SisoError::GraphCycle(format!(
                        "step '{name}' consumes its own output '{input}'"
                    )));
                }
                graph.add_edge(producer, name.as_str(), ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(SisoError::GraphCycle(format!(
            "cycle detected in build graph involving step '{}'",
            cycle.node_id()
        ))),
    }
}
