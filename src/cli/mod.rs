//! Command-line interface definitions for the `cacheflush` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `cacheflush` binary.
#[derive(Debug, Parser)]
#[command(
    name = "cacheflush",
    about = "Flush the Redis caches of a deployment environment",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run one flush pass now.
    #[command(name = "flush", about = "Run one flush pass now")]
    Flush(TargetArgs),
    /// Run the configured number of passes with the configured delay.
    #[command(
        name = "campaign",
        about = "Run repeated flush passes separated by a delay"
    )]
    Campaign(TargetArgs),
    /// Serve the HTTP trigger endpoints.
    #[command(name = "serve", about = "Serve the HTTP trigger endpoints")]
    Serve(ServeCommand),
}

/// Environment and region selection shared by `flush` and `campaign`.
#[derive(Debug, Parser)]
pub(crate) struct TargetArgs {
    /// Environment tag selecting the caches. Overrides
    /// `CACHEFLUSH_ENVIRONMENT`.
    #[arg(long, value_name = "ENVIRONMENT")]
    pub(crate) environment: Option<String>,
    /// Comma-separated region allow-list (for example `fr-par,nl-ams`).
    /// Overrides `CACHEFLUSH_REGIONS`.
    #[arg(long, value_name = "REGIONS")]
    pub(crate) regions: Option<String>,
}

/// Arguments for the `cacheflush serve` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ServeCommand {
    /// Socket address to bind. Overrides `CACHEFLUSH_HTTP_BIND`.
    #[arg(long, value_name = "ADDR")]
    pub(crate) bind: Option<String>,
}
