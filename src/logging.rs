// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The `--log-level` flag sets one level for everything. Without it,
//! `SISO_LOG` is read as a filter directive list, so per-module levels work
//! (`SISO_LOG=info,siso::deps=debug`). Both absent means `info`.
//!
//! Logs go to stderr; stdout carries step output.

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

/// Environment variable consulted when no `--log-level` is given.
pub const LOG_ENV: &str = "SISO_LOG";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing log subscriber: {e}"))?;

    Ok(())
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    if let Some(lvl) = cli_level {
        return Ok(EnvFilter::default().add_directive(LevelFilter::from(lvl).into()));
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse(directives)
            .with_context(|| format!("invalid {LOG_ENV} value {directives:?}")),
        None => Ok(EnvFilter::default().add_directive(LevelFilter::INFO.into())),
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}
