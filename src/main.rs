//! Binary entry point for the cacheflush CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use cacheflush::http::{self, AppState};
use cacheflush::logging::init_logging;
use cacheflush::{
    CampaignController, CampaignError, CampaignStatus, CampaignSummary, ConfigError, FlushConfig,
    NodeFlushExecutor, RedisClient, ScalewayConfig, ScalewayDirectoryError, ScalewayRedisDirectory,
    TracingTelemetry,
};

mod cli;

use cli::{Cli, ServeCommand, TargetArgs};

/// Exit status when discovery matched no cache instance.
const EXIT_NO_INSTANCES: i32 = 2;

/// Exit status when Ctrl-C cancelled a campaign.
const EXIT_CANCELLED: i32 = 130;

type Controller = CampaignController<ScalewayRedisDirectory, RedisClient, TracingTelemetry>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("directory error: {0}")]
    Directory(#[from] ScalewayDirectoryError),
    #[error("campaign error: {0}")]
    Campaign(#[from] CampaignError),
    #[error("server error: {0}")]
    Io(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let config = FlushConfig::load_without_cli_args()?;
    match cli {
        Cli::Flush(args) => run_flush(&config, args).await,
        Cli::Campaign(args) => run_campaign(&config, args).await,
        Cli::Serve(args) => run_serve(config, args).await,
    }
}

fn build_controller(config: &FlushConfig) -> Result<Controller, CliError> {
    config.validate()?;
    let directory = ScalewayRedisDirectory::new(ScalewayConfig::load_without_cli_args()?)?;
    let client = RedisClient::new().with_connect_timeout(config.connect_timeout());
    let executor = NodeFlushExecutor::new(client, TracingTelemetry, config.flush_policy()?)
        .with_node_concurrency(config.node_concurrency);
    Ok(CampaignController::new(directory, executor)
        .with_instance_concurrency(config.instance_concurrency))
}

async fn run_flush(config: &FlushConfig, args: TargetArgs) -> Result<i32, CliError> {
    let environment = config.environment(args.environment.as_deref())?;
    let regions = config.region_filter(args.regions.as_deref());
    let controller = build_controller(config)?;

    let summary = controller.flush_once(&environment, &regions).await?;
    Ok(report_summary(&summary))
}

async fn run_campaign(config: &FlushConfig, args: TargetArgs) -> Result<i32, CliError> {
    let environment = config.environment(args.environment.as_deref())?;
    let regions = config.region_filter(args.regions.as_deref());
    let controller = build_controller(config)?;
    let request = config.campaign_request(environment, regions);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });
    let outcome = controller.run(request, &cancel).await;
    watcher.abort();

    Ok(report_summary(&outcome?))
}

async fn run_serve(mut config: FlushConfig, args: ServeCommand) -> Result<i32, CliError> {
    if let Some(bind) = args.bind {
        config.http_bind = bind;
    }
    let controller = build_controller(&config)?.into_shared();
    let listener = TcpListener::bind(config.http_bind_addr()?).await?;
    let state = AppState::new(controller, config);

    http::serve(listener, state, async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;
    Ok(0)
}

fn report_summary(summary: &CampaignSummary) -> i32 {
    let message = summary.message();
    match summary.status {
        CampaignStatus::Completed => {
            writeln!(io::stdout(), "{message}").ok();
            0
        }
        CampaignStatus::NoInstances => {
            writeln!(io::stderr(), "{message}").ok();
            EXIT_NO_INSTANCES
        }
        CampaignStatus::Cancelled => {
            writeln!(io::stderr(), "{message}").ok();
            EXIT_CANCELLED
        }
        CampaignStatus::DiscoveryFailed(_) => {
            writeln!(io::stderr(), "{message}").ok();
            1
        }
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use cacheflush::RegionFilter;
    use rstest::rstest;

    fn summary(status: CampaignStatus) -> CampaignSummary {
        CampaignSummary {
            environment: String::from("staging"),
            regions: RegionFilter::any(),
            status,
            passes: Vec::new(),
            phases: Vec::new(),
            totals: cacheflush::CampaignTotals::default(),
        }
    }

    #[rstest]
    #[case(CampaignStatus::Completed, 0)]
    #[case(CampaignStatus::NoInstances, EXIT_NO_INSTANCES)]
    #[case(CampaignStatus::Cancelled, EXIT_CANCELLED)]
    #[case(CampaignStatus::DiscoveryFailed(String::from("timeout")), 1)]
    fn statuses_map_to_exit_codes(#[case] status: CampaignStatus, #[case] expected: i32) {
        assert_eq!(report_summary(&summary(status)), expected);
    }

    #[rstest]
    fn errors_are_written_on_one_line() {
        let mut buffer = Vec::new();
        let err = CliError::Campaign(CampaignError::NoRuns);

        write_error(&mut buffer, &err);

        assert_eq!(
            String::from_utf8_lossy(&buffer),
            "campaign error: campaign must run at least once; set repeats to 1 or more\n"
        );
    }
}
