//! Diffusion endpoint queries
//!
//! Wraps `diffusion.querycommits` as a typed, lazily paginated commit
//! stream. Pages are fetched on demand while the stream is polled; a query
//! with zero matches is an empty stream, not an error.

use super::client::ConduitClient;
use super::ConduitError;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::collections::HashMap;
use std::sync::Arc;

const COMMIT_PAGE_SIZE: u32 = 100;

/// A commit as returned by Diffusion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: u64,
    pub phid: String,

    /// Callsign of the repository the commit belongs to
    pub callsign: String,

    /// Commit identifier (hash or monotonic revision id)
    pub identifier: String,

    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default, rename = "authorName")]
    pub author: Option<String>,

    #[serde(default)]
    pub summary: Option<String>,

    /// Commit time as a Unix epoch
    #[serde(default)]
    pub epoch: Option<i64>,
}

impl Commit {
    /// Commit time as a UTC timestamp, when the epoch is present and valid.
    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.epoch.and_then(|e| Utc.timestamp_opt(e, 0).single())
    }

    /// The canonical commit name, e.g. `rENG1f2e3d`.
    pub fn name(&self) -> String {
        format!("r{}{}", self.callsign, self.identifier)
    }
}

#[derive(Debug, Deserialize)]
struct QueryCommitsPage {
    /// Commits keyed by PHID
    #[serde(default)]
    data: HashMap<String, Commit>,

    #[serde(default)]
    cursor: Option<Cursor>,
}

#[derive(Debug, Deserialize)]
struct Cursor {
    #[serde(default)]
    after: Option<String>,
}

enum PageState {
    Start,
    Next(String),
    Done,
}

/// Typed queries against Diffusion
pub struct DiffusionQuery {
    client: Arc<ConduitClient>,
}

impl DiffusionQuery {
    pub fn new(client: Arc<ConduitClient>) -> Self {
        Self { client }
    }

    /// Query commits matching a name, e.g. `rENG1f2e3d`.
    ///
    /// Returns a lazy, finite, non-restartable stream: each page is fetched
    /// only when polling reaches it, and the stream ends when the remote
    /// cursor is exhausted. Zero matches yield an empty stream.
    pub fn commits_by_name(
        &self,
        name: &str,
    ) -> impl Stream<Item = Result<Commit, ConduitError>> {
        let client = Arc::clone(&self.client);
        let name = name.to_string();

        stream::try_unfold(PageState::Start, move |state| {
            let client = Arc::clone(&client);
            let name = name.clone();
            async move {
                let after = match state {
                    PageState::Start => None,
                    PageState::Next(cursor) => Some(cursor),
                    PageState::Done => return Ok(None),
                };

                let mut params = Map::new();
                params.insert("names".to_string(), json!([name]));
                params.insert("limit".to_string(), json!(COMMIT_PAGE_SIZE));
                if let Some(cursor) = &after {
                    params.insert("after".to_string(), json!(cursor));
                }

                let page: QueryCommitsPage =
                    client.call("diffusion.querycommits", params).await?;

                let mut commits: Vec<Commit> = page.data.into_values().collect();
                commits.sort_by_key(|c| c.id);

                // An empty page terminates even if the remote echoed a cursor.
                let next = match page.cursor.and_then(|c| c.after) {
                    Some(cursor) if !commits.is_empty() => PageState::Next(cursor),
                    _ => PageState::Done,
                };

                Ok(Some((
                    stream::iter(commits.into_iter().map(Ok::<_, ConduitError>)),
                    next,
                )))
            }
        })
        .try_flatten()
    }
}
