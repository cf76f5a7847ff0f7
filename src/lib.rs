// src/lib.rs

pub mod build;
pub mod cli;
pub mod config;
pub mod deps;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod hashfs;
pub mod logging;
pub mod path;
pub mod plan;
pub mod step;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::build::{Builder, BuilderOptions};
use crate::cli::CliArgs;
use crate::config::loader::{load_and_validate, resolve_exec_root};
use crate::config::model::ConfigFile;
use crate::exec::ProcessExecutor;
use crate::graph::ManifestGraph;
use crate::hashfs::{DiskHashFs, HashFs};
use crate::path::ExecPaths;
use crate::plan::{schedule, Plan};

/// High-level entry point used by `main.rs`.
///
/// Wires together manifest loading, the graph, the schedule walk, the
/// builder with a local process executor, and Ctrl-C handling.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)?;
    apply_cli_overrides(&mut cfg, &args);

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let exec_root = resolve_exec_root(&config_path, &cfg.config.exec_root);
    info!(exec_root = ?exec_root, dir = %cfg.config.dir, "starting siso");

    let paths = Arc::new(ExecPaths::new(&exec_root, &cfg.config.dir));
    let hashfs: Arc<dyn HashFs> = Arc::new(DiskHashFs::new(&exec_root));
    let graph = ManifestGraph::from_config(&cfg);
    let depslog = deps::depslog::open(cfg.config.deps_log, &exec_root.join(&cfg.config.dir))?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            cancel.cancel();
        });
    }

    let plan = Arc::new(Plan::new(cfg.config.ready_queue_capacity));
    schedule(&plan, &graph, hashfs.as_ref(), &cancel, &args.targets)?;

    let builder = Arc::new(Builder::new(
        BuilderOptions::from(&cfg.config),
        paths,
        Arc::clone(&hashfs),
        &graph,
        Arc::new(ProcessExecutor::new(&exec_root)),
        depslog,
    ));

    let stats = builder.build(plan, cancel).await?;
    println!("siso: {stats}");
    Ok(())
}

fn apply_cli_overrides(cfg: &mut ConfigFile, args: &CliArgs) {
    if let Some(jobs) = args.jobs {
        cfg.config.parallelism = jobs.max(1);
    }
    if let Some(keep_going) = args.keep_going {
        cfg.config.keep_going = keep_going;
    }
    if args.no_fallback {
        cfg.config.no_fallback = true;
    }
}

/// Print the options and steps without running anything.
fn print_dry_run(cfg: &ConfigFile) {
    println!("siso dry-run");
    println!("  config.exec_root = {}", cfg.config.exec_root);
    println!("  config.dir = {}", cfg.config.dir);
    println!("  config.parallelism = {}", cfg.config.parallelism);
    println!("  config.remote = {}", cfg.config.remote);
    println!("  config.deps_log = {:?}", cfg.config.deps_log);
    println!();

    if !cfg.pool.is_empty() {
        println!("pools ({}):", cfg.pool.len());
        for (name, pool) in cfg.pool.iter() {
            println!("  - {name}: depth {}", pool.depth);
        }
    }

    println!("steps ({}):", cfg.step.len());
    for (name, step) in cfg.step.iter() {
        println!("  - {name}");
        if step.is_phony() {
            println!("      phony");
        } else {
            println!("      command: {}", step.command.join(" "));
        }
        if !step.inputs.is_empty() {
            println!("      inputs: {:?}", step.inputs);
        }
        if !step.outputs.is_empty() {
            println!("      outputs: {:?}", step.outputs);
        }
        if let Some(ref depfile) = step.depfile {
            println!("      depfile: {depfile} ({:?})", step.deps);
        }
        if let Some(ref pool) = step.pool {
            println!("      pool: {pool}");
        }
        if step.remote {
            println!("      remote: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
