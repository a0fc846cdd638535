//! Messaging collaborator boundary.
//!
//! After a run completes, the surrounding service publishes a [`WorkItem`]
//! so that report indexing and scoring can proceed elsewhere. The engine only
//! builds the item; transport is the caller's business.

use crate::error::Result;
use crate::model::Run;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hostname recorded when the environment does not provide one.
const UNKNOWN_HOST: &str = "localhost";

/// Unit of work handed to the message queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// Repository node the metadata object lives on
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    pub suite_id: String,
    pub object_identifier: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    /// Metadata format family, e.g. `eml` or `iso19115`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_family: Option<String>,
    pub request_timestamp: DateTime<Utc>,
    pub elapsed_seconds: u64,
    /// Failure text captured while processing the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    pub hostname: String,
}

impl WorkItem {
    /// Build the item for a run that has just completed, requested at
    /// `requested_at`.
    pub fn from_run(run: &Run, node_id: impl Into<String>, requested_at: DateTime<Utc>) -> Self {
        let elapsed = (Utc::now() - requested_at).num_seconds().max(0);
        Self {
            node_id: node_id.into(),
            service_url: None,
            suite_id: run.suite_id.clone(),
            object_identifier: run.object_identifier.clone(),
            run_id: run.id.clone(),
            collection_id: None,
            collection_name: None,
            format_family: None,
            request_timestamp: requested_at,
            elapsed_seconds: u64::try_from(elapsed).unwrap_or_default(),
            exception: run.error_description.clone(),
            hostname: current_hostname(),
        }
    }

    #[must_use]
    pub fn service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn collection(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.collection_id = Some(id.into());
        self.collection_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn format_family(mut self, family: impl Into<String>) -> Self {
        self.format_family = Some(family.into());
        self
    }

    #[must_use]
    pub fn exception(mut self, text: impl Into<String>) -> Self {
        self.exception = Some(text.into());
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn current_hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|h| !h.trim().is_empty()))
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_from_run_copies_identity() {
        let mut run = Run::new("doi:10.18739/A2", "knb.suite.1");
        run.error_description = Some("document too large".into());
        let item = WorkItem::from_run(&run, "urn:node:KNB", Utc::now() - Duration::seconds(7))
            .service_url("https://knb.ecoinformatics.org/knb/d1/mn")
            .format_family("eml");
        assert_eq!(item.suite_id, "knb.suite.1");
        assert_eq!(item.run_id, run.id);
        assert_eq!(item.elapsed_seconds, 7);
        assert_eq!(item.exception.as_deref(), Some("document too large"));
        assert!(!item.hostname.is_empty());
    }

    #[test]
    fn test_json_field_names() {
        let run = Run::new("obj", "suite");
        let item = WorkItem::from_run(&run, "urn:node:ARCTIC", Utc::now() + Duration::seconds(5))
            .collection("urn:uuid:portal", "Arctic portal");
        assert_eq!(item.elapsed_seconds, 0);
        let json = item.to_json().unwrap();
        assert!(json.contains("\"nodeId\":\"urn:node:ARCTIC\""));
        assert!(json.contains("\"collectionName\":\"Arctic portal\""));
        assert!(!json.contains("serviceUrl"));
        assert_eq!(WorkItem::from_json(&json).unwrap(), item);
    }
}
