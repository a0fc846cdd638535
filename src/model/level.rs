//! Closed enumerations: check importance and check outcome.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Business importance of a check, ordered from least to most important.
///
/// The ordering is used by weighted scoring, so variant order matters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Optional,
    #[default]
    Info,
    Warn,
    Required,
    Error,
    Severe,
}

impl Level {
    /// All levels in ascending order of importance.
    pub const ALL: [Self; 6] = [
        Self::Optional,
        Self::Info,
        Self::Warn,
        Self::Required,
        Self::Error,
        Self::Severe,
    ];

    /// Canonical upper-case token used in suite documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Optional => "OPTIONAL",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Required => "REQUIRED",
            Self::Error => "ERROR",
            Self::Severe => "SEVERE",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPTIONAL" => Ok(Self::Optional),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "REQUIRED" => Ok(Self::Required),
            "ERROR" => Ok(Self::Error),
            "SEVERE" => Ok(Self::Severe),
            other => Err(format!(
                "unknown level '{other}' (expected one of OPTIONAL, INFO, WARN, REQUIRED, ERROR, SEVERE)"
            )),
        }
    }
}

/// Outcome class of a single check evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Success,
    Failure,
    Error,
    Skip,
}

impl Status {
    pub const ALL: [Self; 4] = [Self::Success, Self::Failure, Self::Error, Self::Skip];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Error => "ERROR",
            Self::Skip => "SKIP",
        }
    }

    /// Parse a status token as written by rule code (case-insensitive).
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "error" => Some(Self::Error),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s).ok_or_else(|| format!("unknown status '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering_is_monotonic() {
        for pair in Level::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should rank below {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_level_parse_case_insensitive() {
        assert_eq!("required".parse::<Level>(), Ok(Level::Required));
        assert_eq!(" Severe ".parse::<Level>(), Ok(Level::Severe));
        assert!("CRITICAL".parse::<Level>().is_err());
    }

    #[test]
    fn test_status_tokens() {
        assert_eq!(Status::from_token("SUCCESS"), Some(Status::Success));
        assert_eq!(Status::from_token("skip"), Some(Status::Skip));
        assert_eq!(Status::from_token("passed"), None);
        assert_eq!(Status::Failure.to_string(), "FAILURE");
    }

    #[test]
    fn test_status_serde_uppercase() {
        let json = serde_json::to_string(&Status::Error).expect("serialize");
        assert_eq!(json, "\"ERROR\"");
        let level: Level = serde_json::from_str("\"WARN\"").expect("deserialize");
        assert_eq!(level, Level::Warn);
    }
}
