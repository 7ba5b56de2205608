//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands. Each handler
//! wires the components it needs from the loaded configuration, performs
//! one operation, and prints the outcome. Domain outcomes — no matching
//! commits, a missing repository, an unresolved channel — print a notice
//! and exit cleanly; only genuine failures propagate and produce a
//! non-zero exit code.

use anyhow::{Context, Result};
use futures::TryStreamExt;
use serde_json::json;
use std::sync::Arc;

use crate::config::Config;
use crate::conduit::client::ConduitClient;
use crate::conduit::diffusion::{Commit, DiffusionQuery};
use crate::conduit::maniphest::{ManiphestQuery, Task};
use crate::conduit::repository::{RepositoryLookup, RepositoryQuery};
use crate::resolver::{ChannelResolver, Resolution};
use crate::slack::{Messenger, SlackGateway};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn conduit_client(config: &Config) -> Result<Arc<ConduitClient>> {
    let client =
        ConduitClient::new(&config.conduit).context("Failed to set up the Conduit client")?;
    Ok(Arc::new(client))
}

fn print_commit(commit: &Commit) {
    let when = commit
        .committed_at()
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}  {}  {}  {}",
        commit.name(),
        when,
        commit.author.as_deref().unwrap_or("-"),
        commit.summary.as_deref().unwrap_or(""),
    );
}

/// Query Diffusion commits by name
pub async fn handle_diffusion_querycommits(
    name: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let client = conduit_client(config)?;
    let query = DiffusionQuery::new(client);

    let commits: Vec<Commit> = query
        .commits_by_name(&name)
        .try_collect()
        .await
        .context("Failed to query commits")?;

    match format {
        OutputFormat::Text => {
            if commits.is_empty() {
                println!("No commits matched '{}'", name);
            } else {
                for commit in &commits {
                    print_commit(commit);
                }
                println!();
                println!("{} commit(s) matched.", commits.len());
            }
        }
        OutputFormat::Json => {
            let output = json!({ "name": name, "commits": commits });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Query a repository by callsign
pub async fn handle_repository_query_callsign(
    callsign: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let client = conduit_client(config)?;
    let query = RepositoryQuery::new(client);

    let repository = query
        .by_callsign(&callsign)
        .await
        .context("Failed to query repository")?;

    match format {
        OutputFormat::Text => match &repository {
            Some(repo) => {
                println!("Callsign: {}", repo.callsign);
                println!("Name:     {}", repo.name);
                println!("PHID:     {}", repo.phid);
            }
            None => println!("No repository with callsign '{}'", callsign),
        },
        OutputFormat::Json => {
            let output = json!({ "callsign": callsign, "repository": repository });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn print_tasks(tasks: &[&Task]) {
    for task in tasks {
        println!(
            "T{}  {}  {}",
            task.id,
            task.status.as_deref().unwrap_or("-"),
            task.title,
        );
    }
    println!();
    println!("{} task(s) found.", tasks.len());
}

/// Query Maniphest tasks by id
pub async fn handle_maniphest_query_ids(
    ids: Vec<u64>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let client = conduit_client(config)?;
    let query = ManiphestQuery::new(client);

    let tasks = query
        .by_ids(&ids)
        .await
        .context("Failed to query tasks by id")?;

    match format {
        OutputFormat::Text => {
            let mut found: Vec<(&u64, &Task)> = tasks.iter().collect();
            found.sort_by_key(|(id, _)| **id);
            print_tasks(&found.into_iter().map(|(_, t)| t).collect::<Vec<_>>());
        }
        OutputFormat::Json => {
            let output = json!({ "tasks": tasks });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Query Maniphest tasks by PHID
pub async fn handle_maniphest_query_phids(
    phids: Vec<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let client = conduit_client(config)?;
    let query = ManiphestQuery::new(client);

    let tasks = query
        .by_phids(&phids)
        .await
        .context("Failed to query tasks by PHID")?;

    match format {
        OutputFormat::Text => {
            let mut found: Vec<&Task> = tasks.values().collect();
            found.sort_by(|a, b| a.id.cmp(&b.id));
            print_tasks(&found);
        }
        OutputFormat::Json => {
            let output = json!({ "tasks": tasks });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Resolve the Slack channel for a commit name
pub async fn handle_resolve_commit_channel(
    name: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let client = conduit_client(config)?;
    let query = DiffusionQuery::new(Arc::clone(&client));
    let lookup: Arc<dyn RepositoryLookup> = Arc::new(RepositoryQuery::new(client));
    let resolver = ChannelResolver::new(lookup, &config.routing)
        .context("Failed to compile routing rules")?;

    let stream = query.commits_by_name(&name);
    futures::pin_mut!(stream);
    let commit = stream
        .try_next()
        .await
        .context("Failed to query commits")?;

    let Some(commit) = commit else {
        match format {
            OutputFormat::Text => println!("No commits matched '{}'", name),
            OutputFormat::Json => {
                let output = json!({ "name": name, "commit": null, "channel": null });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        return Ok(());
    };

    let resolution = resolver
        .resolve_commit(&commit)
        .await
        .context("Failed to resolve the commit's channel")?;

    match format {
        OutputFormat::Text => match &resolution {
            Resolution::Channel(channel) => {
                println!("{} -> {}", commit.name(), channel);
            }
            Resolution::Unresolved => {
                println!("{} -> unresolved (no rule or default applies)", commit.name());
            }
        },
        OutputFormat::Json => {
            let channel = match &resolution {
                Resolution::Channel(channel) => Some(channel.as_str()),
                Resolution::Unresolved => None,
            };
            let output = json!({ "name": name, "commit": commit, "channel": channel });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Post a test message to Slack
pub async fn handle_slack_test(
    channel: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let gateway = SlackGateway::new(&config.slack).context("Failed to set up Slack")?;
    let channel = channel.unwrap_or_else(|| config.slack.test_channel.clone());

    gateway
        .post_message(&channel, "Hi! This is a test message from Phabulous.")
        .await
        .context("Failed to post the test message")?;

    match format {
        OutputFormat::Text => println!("Test message posted to {}", channel),
        OutputFormat::Json => {
            let output = json!({ "status": "sent", "channel": channel });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Show the loaded configuration with secrets redacted
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    let mut shown = config.clone();
    if shown.conduit.api_token.is_some() {
        shown.conduit.api_token = Some("<redacted>".to_string());
    }
    if shown.slack.token.is_some() {
        shown.slack.token = Some("<redacted>".to_string());
    }

    match format {
        OutputFormat::Text => {
            let rendered =
                toml::to_string_pretty(&shown).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&shown)?),
    }

    Ok(())
}

/// Validate the configuration, including routing rule compilation
pub fn handle_config_validate(config: &Config, format: OutputFormat) -> Result<()> {
    config.validate().context("Configuration is invalid")?;
    crate::resolver::ChannelMapping::new(&config.routing.rules)
        .context("Routing rules are invalid")?;

    match format {
        OutputFormat::Text => {
            println!("Configuration OK");
            println!("  Routing rules:     {}", config.routing.rules.len());
            println!("  Channel overrides: {}", config.routing.channels.len());
        }
        OutputFormat::Json => {
            let output = json!({
                "status": "ok",
                "rules": config.routing.rules.len(),
                "overrides": config.routing.channels.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
