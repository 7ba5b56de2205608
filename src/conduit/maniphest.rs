//! Maniphest endpoint queries
//!
//! Wraps `maniphest.query` for batch task lookups by id or PHID. Ids and
//! PHIDs with no matching task are simply absent from the result map,
//! never an error.

use super::client::ConduitClient;
use super::ConduitError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A Maniphest task, returned as-is from Conduit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id; Conduit serializes these as strings
    pub id: String,
    pub phid: String,
    pub title: String,

    #[serde(default, rename = "statusName")]
    pub status: Option<String>,

    #[serde(default, rename = "priority")]
    pub priority: Option<String>,

    #[serde(default)]
    pub uri: Option<String>,
}

/// Typed queries against Maniphest
pub struct ManiphestQuery {
    client: Arc<ConduitClient>,
}

impl ManiphestQuery {
    pub fn new(client: Arc<ConduitClient>) -> Self {
        Self { client }
    }

    /// Query tasks by numeric id. Unknown ids are absent from the result.
    pub async fn by_ids(&self, ids: &[u64]) -> Result<HashMap<u64, Task>, ConduitError> {
        let mut params = Map::new();
        params.insert("ids".to_string(), json!(ids));

        let tasks = self.query(params).await?;
        let mut by_id = HashMap::with_capacity(tasks.len());
        for task in tasks {
            let id = task.id.parse::<u64>().map_err(|_| {
                ConduitError::MalformedResponse(format!(
                    "maniphest.query: non-numeric task id '{}'",
                    task.id
                ))
            })?;
            by_id.insert(id, task);
        }
        Ok(by_id)
    }

    /// Query tasks by PHID. Unknown PHIDs are absent from the result.
    pub async fn by_phids(
        &self,
        phids: &[String],
    ) -> Result<HashMap<String, Task>, ConduitError> {
        let mut params = Map::new();
        params.insert("phids".to_string(), json!(phids));

        let tasks = self.query(params).await?;
        Ok(tasks.into_iter().map(|t| (t.phid.clone(), t)).collect())
    }

    async fn query(&self, params: Map<String, Value>) -> Result<Vec<Task>, ConduitError> {
        // maniphest.query returns a map keyed by PHID, or an empty array
        // when nothing matched.
        let result: Value = self.client.call_raw("maniphest.query", params).await?;
        match result {
            Value::Array(items) if items.is_empty() => Ok(Vec::new()),
            Value::Object(map) => map
                .into_iter()
                .map(|(_, v)| {
                    serde_json::from_value(v).map_err(|e| {
                        ConduitError::MalformedResponse(format!(
                            "maniphest.query: undecodable task: {}",
                            e
                        ))
                    })
                })
                .collect(),
            other => Err(ConduitError::MalformedResponse(format!(
                "maniphest.query: unexpected result shape: {}",
                other
            ))),
        }
    }
}
