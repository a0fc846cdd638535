//! Runs: the per-document outcome of evaluating a suite.

use super::{Level, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing status of a run as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Success,
    Failure,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// The report produced by evaluating one suite against one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub object_identifier: String,
    pub suite_id: String,
    #[serde(default)]
    pub run_status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// Repository system metadata of the assessed object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sysmeta: Option<Sysmeta>,
    /// One entry per check, in check order
    #[serde(default, rename = "result")]
    pub results: Vec<CheckResult>,
}

impl Run {
    /// Start a run with a fresh identifier and the current time.
    pub fn new(object_identifier: impl Into<String>, suite_id: impl Into<String>) -> Self {
        Self {
            id: format!("urn:uuid:{}", Uuid::new_v4()),
            timestamp: Utc::now(),
            object_identifier: object_identifier.into(),
            suite_id: suite_id.into(),
            run_status: RunStatus::Success,
            error_description: None,
            sysmeta: None,
            results: Vec::new(),
        }
    }

    /// Number of results carrying the given status.
    #[must_use]
    pub fn count(&self, status: Status) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Find the result of a check by id.
    #[must_use]
    pub fn result(&self, check_id: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.check_id == check_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }
}

/// System metadata the repository holds for the assessed object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sysmeta {
    /// Member node the object was first uploaded to
    pub origin_member_node: String,
    pub rights_holder: String,
    /// Groups the rights holder belongs to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_uploaded: Option<DateTime<Utc>>,
    /// Object format, e.g. `https://eml.ecoinformatics.org/eml-2.2.0`
    pub format_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_id: Option<String>,
}

impl Sysmeta {
    pub fn new(
        origin_member_node: impl Into<String>,
        rights_holder: impl Into<String>,
        format_id: impl Into<String>,
    ) -> Self {
        Self {
            origin_member_node: origin_member_node.into(),
            rights_holder: rights_holder.into(),
            format_id: format_id.into(),
            ..Self::default()
        }
    }
}

/// Outcome of one check within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    #[serde(rename = "check")]
    pub check_id: String,
    /// Level of the originating check at the time it ran
    #[serde(default)]
    pub level: Level,
    pub status: Status,
    pub timestamp: DateTime<Utc>,
    #[serde(default, rename = "output", skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Output>,
}

impl CheckResult {
    pub fn new(check_id: impl Into<String>, level: Level, status: Status) -> Self {
        Self {
            check_id: check_id.into(),
            level,
            status,
            timestamp: Utc::now(),
            outputs: Vec::new(),
        }
    }

    /// Result with a single text output, used for errors and skips.
    pub fn with_message(
        check_id: impl Into<String>,
        level: Level,
        status: Status,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(check_id, level, status);
        result.outputs.push(Output::text(message));
        result
    }

    /// First output value, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.outputs.first().map(|o| o.value.as_str())
    }
}

/// A piece of text reported by rule code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub value: String,
    /// e.g. a MIME type such as `image/png`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl Output {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            output_type: None,
            identifier: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run() -> Run {
        let mut run = Run::new("doi:10.5063/AA/test.1", "suite.1");
        run.results
            .push(CheckResult::new("check.1", Level::Info, Status::Success));
        run.results.push(CheckResult::with_message(
            "check.2",
            Level::Required,
            Status::Error,
            "object not found: missing",
        ));
        run.results
            .push(CheckResult::new("check.3", Level::Warn, Status::Success));
        run
    }

    #[test]
    fn test_counts_and_lookup() {
        let run = sample_run();
        assert_eq!(run.len(), 3);
        assert_eq!(run.count(Status::Success), 2);
        assert_eq!(run.count(Status::Skip), 0);
        assert_eq!(
            run.result("check.2").and_then(CheckResult::message),
            Some("object not found: missing")
        );
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = Run::new("obj", "suite");
        let b = Run::new("obj", "suite");
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("urn:uuid:"));
    }

    #[test]
    fn test_json_field_names() {
        let run = sample_run();
        let json = serde_json::to_value(&run).expect("serialize");
        assert_eq!(json["objectIdentifier"], "doi:10.5063/AA/test.1");
        assert_eq!(json["runStatus"], "success");
        assert_eq!(json["result"][1]["check"], "check.2");
        assert_eq!(json["result"][1]["status"], "ERROR");
    }

    #[test]
    fn test_run_status_parse() {
        assert_eq!(RunStatus::parse("FAILURE"), Some(RunStatus::Failure));
        assert_eq!(RunStatus::parse("pending"), None);
    }
}
