//! Repository endpoint queries
//!
//! Wraps `repository.query` for exact callsign lookups. A missing
//! repository is a valid outcome (`None`), distinct from a transport
//! failure.

use super::client::ConduitClient;
use super::ConduitError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::sync::Arc;

/// A repository snapshot as returned by Conduit
///
/// Immutable once fetched; the resolver attaches the configured default
/// notification channel when it builds its cached copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub phid: String,

    /// Short unique human-readable identifier; case-sensitive
    pub callsign: String,

    /// Display name
    pub name: String,

    /// Default notification channel, if one is configured
    #[serde(default)]
    pub default_channel: Option<String>,
}

/// Capability seam for callsign lookups.
///
/// Implemented by [`RepositoryQuery`]; the resolver depends on this trait
/// so its caching and rule logic can be exercised without a live Conduit
/// installation.
#[async_trait]
pub trait RepositoryLookup: Send + Sync {
    /// Look up a repository by exact callsign. `None` means the callsign
    /// does not exist, which is not a failure.
    async fn by_callsign(&self, callsign: &str) -> Result<Option<Repository>, ConduitError>;
}

/// Typed queries against the repository application
pub struct RepositoryQuery {
    client: Arc<ConduitClient>,
}

impl RepositoryQuery {
    pub fn new(client: Arc<ConduitClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RepositoryLookup for RepositoryQuery {
    async fn by_callsign(&self, callsign: &str) -> Result<Option<Repository>, ConduitError> {
        let mut params = Map::new();
        params.insert("callsigns".to_string(), json!([callsign]));

        let repositories: Vec<Repository> =
            self.client.call("repository.query", params).await?;

        // Callsigns are case-sensitive; discard lenient remote matches.
        Ok(repositories.into_iter().find(|r| r.callsign == callsign))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_wire_format_decodes() {
        let raw = json!({
            "phid": "PHID-REPO-aaaa",
            "callsign": "ENG",
            "name": "Engineering Monorepo",
            "vcs": "git",
            "uri": "https://phab.example.com/diffusion/ENG/"
        });

        let repo: Repository = serde_json::from_value(raw).expect("decode repository");
        assert_eq!(repo.callsign, "ENG");
        assert_eq!(repo.name, "Engineering Monorepo");
        assert!(repo.default_channel.is_none());
    }
}
