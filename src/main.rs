// Phabulous
// Main entry point for the phabulous binary

use clap::Parser;
use phabulous::cli::{
    Cli, Command, ConfigAction, DiffusionAction, ManiphestAction, RepositoryAction, SlackAction,
};
use phabulous::config::Config;
use phabulous::handlers::{
    handle_config_show, handle_config_validate, handle_diffusion_querycommits,
    handle_maniphest_query_ids, handle_maniphest_query_phids,
    handle_repository_query_callsign, handle_resolve_commit_channel, handle_slack_test,
    OutputFormat,
};
use phabulous::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize basic telemetry first (before config is loaded)
    init_telemetry();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Re-initialize telemetry with the --log override or config-driven level
    // (only takes effect if RUST_LOG env var is not set)
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    // Handle commands
    match cli.command {
        Command::Diffusion { action } => match action {
            DiffusionAction::QuerycommitsName { name } => {
                tracing::info!("Querying commits named {}", name);
                handle_diffusion_querycommits(name, &config, format).await
            }
        },

        Command::Repository { action } => match action {
            RepositoryAction::QueryCallsign { callsign } => {
                tracing::info!("Querying repository {}", callsign);
                handle_repository_query_callsign(callsign, &config, format).await
            }
        },

        Command::Maniphest { action } => match action {
            ManiphestAction::QueryIds { ids } => {
                tracing::info!("Querying {} task id(s)", ids.len());
                handle_maniphest_query_ids(ids, &config, format).await
            }
            ManiphestAction::QueryPhids { phids } => {
                tracing::info!("Querying {} task PHID(s)", phids.len());
                handle_maniphest_query_phids(phids, &config, format).await
            }
        },

        Command::Slack { action } => match action {
            SlackAction::Test { channel } => {
                tracing::info!("Posting Slack test message");
                handle_slack_test(channel, &config, format).await
            }
            SlackAction::ResolveCommitChannel { name } => {
                tracing::info!("Resolving channel for commit {}", name);
                handle_resolve_commit_channel(name, &config, format).await
            }
        },

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Validate => handle_config_validate(&config, format),
        },
    }
}
