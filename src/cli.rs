// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `siso`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "siso",
    version,
    about = "Run the steps of a build manifest with dependency discovery.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the build manifest (TOML).
    #[arg(long, value_name = "PATH", default_value = "Siso.toml")]
    pub config: String,

    /// Parse and validate the manifest, print the steps, run nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SISO_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Never re-run a remotely failed step locally.
    #[arg(long)]
    pub no_fallback: bool,

    /// Number of concurrent steps (overrides `config.parallelism`).
    #[arg(short = 'j', value_name = "N")]
    pub jobs: Option<usize>,

    /// Keep going until N steps fail; 0 never stops (overrides
    /// `config.keep_going`).
    #[arg(short = 'k', value_name = "N")]
    pub keep_going: Option<usize>,

    /// Targets to build (output paths or step names). Default: every output
    /// no other step consumes.
    #[arg(value_name = "TARGET")]
    pub targets: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
