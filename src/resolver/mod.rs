//! Commit-to-channel resolution
//!
//! Maps a commit's repository callsign to the Slack channel that should be
//! notified. Resolution walks an ordered rule list (first match wins),
//! falls back to the repository's default notification channel, and
//! otherwise reports an explicit [`Resolution::Unresolved`] outcome.
//!
//! # Pattern semantics
//!
//! Rule patterns are case-sensitive. `*` matches any run of characters,
//! including the empty run; every other character matches itself. There
//! are no other metacharacters. A trailing `("*", channel)` rule therefore
//! acts as a catch-all default.
//!
//! # Caching
//!
//! Callsign lookups are cached for the process lifetime, including
//! not-found outcomes, and never invalidated; a restart is required to
//! pick up repository renames. Concurrent resolutions of the same unseen
//! callsign coalesce into a single remote lookup.

use crate::conduit::diffusion::Commit;
use crate::conduit::repository::{Repository, RepositoryLookup};
use crate::conduit::ConduitError;
use crate::config::{ChannelRule, RoutingConfig};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

/// Errors raised while compiling the channel mapping
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Invalid channel pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Outcome of a resolution
///
/// `Unresolved` is a valid domain outcome, not a fault: callers must treat
/// it as "do nothing", never log it as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one channel applies
    Channel(String),

    /// No rule matched and no default channel exists
    Unresolved,
}

struct CompiledRule {
    pattern: String,
    matcher: Regex,
    channel: String,
}

/// Ordered, first-match-wins callsign → channel rule list
pub struct ChannelMapping {
    rules: Vec<CompiledRule>,
}

impl ChannelMapping {
    /// Compile a rule list. Rule order is authoritative; invalid patterns
    /// are rejected here rather than surprising a resolution later.
    pub fn new(rules: &[ChannelRule]) -> Result<Self, MappingError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                let matcher = glob_to_regex(&rule.pattern).map_err(|source| {
                    MappingError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    }
                })?;
                Ok(CompiledRule {
                    pattern: rule.pattern.clone(),
                    matcher,
                    channel: rule.channel.clone(),
                })
            })
            .collect::<Result<Vec<_>, MappingError>>()?;
        Ok(Self { rules: compiled })
    }

    /// Channel of the first rule matching the callsign, if any.
    pub fn channel_for(&self, callsign: &str) -> Option<&str> {
        self.rules.iter().find_map(|rule| {
            if rule.matcher.is_match(callsign) {
                debug!(
                    "Callsign {} matched rule '{}' -> {}",
                    callsign, rule.pattern, rule.channel
                );
                Some(rule.channel.as_str())
            } else {
                None
            }
        })
    }
}

/// Translate a glob pattern to an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() + 4);
    expr.push('^');
    for ch in pattern.chars() {
        if ch == '*' {
            expr.push_str(".*");
        } else {
            expr.push_str(&regex::escape(&ch.to_string()));
        }
    }
    expr.push('$');
    Regex::new(&expr)
}

/// Resolves commits to Slack channels
pub struct ChannelResolver {
    lookup: Arc<dyn RepositoryLookup>,
    mapping: ChannelMapping,
    overrides: BTreeMap<String, String>,
    cache: RwLock<HashMap<String, Arc<OnceCell<Option<Repository>>>>>,
}

impl ChannelResolver {
    /// Build a resolver from the routing configuration.
    pub fn new(
        lookup: Arc<dyn RepositoryLookup>,
        routing: &RoutingConfig,
    ) -> Result<Self, MappingError> {
        Ok(Self {
            lookup,
            mapping: ChannelMapping::new(&routing.rules)?,
            overrides: routing.channels.clone(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Resolve the channel for a commit.
    pub async fn resolve_commit(&self, commit: &Commit) -> Result<Resolution, ConduitError> {
        self.resolve(&commit.callsign).await
    }

    /// Resolve the channel for a repository callsign.
    ///
    /// A remote failure other than not-found propagates: silently routing
    /// a notification to the wrong channel is worse than failing loudly.
    pub async fn resolve(&self, callsign: &str) -> Result<Resolution, ConduitError> {
        let repository = self.repository_for(callsign).await?;

        // Rules see the canonical callsign when the repository exists.
        let canonical = repository
            .as_ref()
            .map(|r| r.callsign.as_str())
            .unwrap_or(callsign);

        if let Some(channel) = self.mapping.channel_for(canonical) {
            return Ok(Resolution::Channel(channel.to_string()));
        }

        if let Some(channel) = repository.as_ref().and_then(|r| r.default_channel.clone()) {
            debug!("Callsign {} fell back to repository default {}", canonical, channel);
            return Ok(Resolution::Channel(channel));
        }

        Ok(Resolution::Unresolved)
    }

    /// Fetch a repository snapshot through the cache.
    ///
    /// At most one remote lookup per callsign is in flight at a time;
    /// concurrent callers await the same cell. A failed lookup leaves the
    /// cell unpopulated so a later resolution retries.
    async fn repository_for(
        &self,
        callsign: &str,
    ) -> Result<Option<Repository>, ConduitError> {
        let cell = {
            let mut cache = self.cache.write().expect("resolver cache lock poisoned");
            Arc::clone(
                cache
                    .entry(callsign.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let snapshot = cell
            .get_or_try_init(|| async {
                debug!("Looking up repository for callsign {}", callsign);
                let repository = self.lookup.by_callsign(callsign).await?;
                Ok::<_, ConduitError>(repository.map(|r| self.attach_default_channel(r)))
            })
            .await?;

        Ok(snapshot.clone())
    }

    /// Merge the configured per-repository default channel into a snapshot.
    fn attach_default_channel(&self, mut repository: Repository) -> Repository {
        if repository.default_channel.is_none() {
            repository.default_channel = self.overrides.get(&repository.callsign).cloned();
        }
        repository
    }
}
