//! CLI interface for Phabulous
//!
//! This module provides the command-line interface using clap's derive API.
//! Subcommands map one-to-one onto the Conduit query operations and the
//! commit-channel resolver; the components themselves know nothing about
//! the CLI layer.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Phabulous
///
/// A Phabricator bot for Slack: query Conduit endpoints from the command
/// line and resolve commits to the Slack channels that should hear about
/// them.
#[derive(Parser, Debug)]
#[command(name = "phabulous")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Perform calls to Diffusion conduit endpoints
    Diffusion {
        #[command(subcommand)]
        action: DiffusionAction,
    },

    /// Perform calls to repository conduit endpoints
    Repository {
        #[command(subcommand)]
        action: RepositoryAction,
    },

    /// Perform calls to Maniphest conduit endpoints
    Maniphest {
        #[command(subcommand)]
        action: ManiphestAction,
    },

    /// Slack workbench commands
    Slack {
        #[command(subcommand)]
        action: SlackAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Diffusion endpoint actions
#[derive(Subcommand, Debug)]
pub enum DiffusionAction {
    /// Query commits by name
    #[command(name = "querycommits-name")]
    QuerycommitsName {
        /// Commit name, e.g. rENG1f2e3d
        name: String,
    },
}

/// Repository endpoint actions
#[derive(Subcommand, Debug)]
pub enum RepositoryAction {
    /// Query repositories by callsign
    #[command(name = "query-callsign")]
    QueryCallsign {
        /// Repository callsign, e.g. ENG
        callsign: String,
    },
}

/// Maniphest endpoint actions
#[derive(Subcommand, Debug)]
pub enum ManiphestAction {
    /// Query tasks by ids (1, 2, 3, etc)
    #[command(name = "query-ids")]
    QueryIds {
        /// Task ids
        #[arg(required = true)]
        ids: Vec<u64>,
    },

    /// Query tasks by their phids
    #[command(name = "query-phids")]
    QueryPhids {
        /// Task PHIDs
        #[arg(required = true)]
        phids: Vec<String>,
    },
}

/// Slack workbench actions
#[derive(Subcommand, Debug)]
pub enum SlackAction {
    /// Test that the slackbot works
    Test {
        /// Channel to post into, overriding slack.test_channel
        #[arg(long)]
        channel: Option<String>,
    },

    /// Resolve the channel a commit's notifications should go to
    #[command(name = "resolve-commit-channel")]
    ResolveCommitChannel {
        /// Commit name, e.g. rENG1f2e3d
        name: String,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration (secrets redacted)
    Show,

    /// Validate configuration file and routing rules
    Validate,
}
