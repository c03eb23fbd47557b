//! Anomaly detection ensemble and alert lifecycle.
//!
//! Raw daily records are turned into a gap-filled series ([`series`]), scanned
//! by independent detectors ([`isolation`], [`seasonal`], [`zscore`]), merged
//! ([`aggregate`]) and finally persisted as deduplicated alerts ([`alert`]).

pub mod aggregate;
pub mod alert;
pub mod engine;
pub mod ensemble;
pub mod isolation;
pub mod seasonal;
pub mod series;
pub mod stats;
pub mod zscore;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("insufficient data: need {needed} distinct days, have {have}")]
    InsufficientData { needed: usize, have: usize },
}

/// A detector could not run: its backing implementation is compiled out,
/// disabled in configuration, or does not apply to the given series.
#[derive(Debug, Clone, Error)]
#[error("{method} detector unavailable: {reason}")]
pub struct DetectorUnavailable {
    pub method: DetectionMethod,
    pub reason: String,
}

impl DetectorUnavailable {
    pub fn new(method: DetectionMethod, reason: impl Into<String>) -> Self {
        Self {
            method,
            reason: reason.into(),
        }
    }
}

/// A stored or user-supplied label did not name a known variant.
#[derive(Debug, Clone, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

/// Ordinal urgency label. Declaration order gives `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(ParseLabelError {
                kind: "severity",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    IsolationForest,
    SeasonalResidual,
    RollingZscore,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::IsolationForest => "isolation_forest",
            DetectionMethod::SeasonalResidual => "seasonal_residual",
            DetectionMethod::RollingZscore => "rolling_zscore",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a persisted alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(AlertStatus::Open),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(ParseLabelError {
                kind: "alert status",
                value: other.to_string(),
            }),
        }
    }
}

/// One day of a gap-filled series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// An unconfirmed anomaly emitted by a single detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyCandidate {
    pub timestamp: NaiveDate,
    pub metric_name: String,
    pub metric_value: f64,
    /// `(min, max)` of the values the detector considered normal.
    pub expected_range: (f64, f64),
    pub severity: Severity,
    pub detection_method: DetectionMethod,
    pub confidence: f64,
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_total_order() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::ALL.iter().max(), Some(&Severity::Critical));
    }

    #[test]
    fn test_enum_string_forms() {
        for sev in Severity::ALL {
            assert_eq!(sev.as_str().parse::<Severity>().unwrap(), sev);
        }
        assert_eq!("resolved".parse::<AlertStatus>().unwrap(), AlertStatus::Resolved);
        assert!("closed".parse::<AlertStatus>().is_err());
        assert_eq!(DetectionMethod::RollingZscore.to_string(), "rolling_zscore");
        assert_eq!(
            serde_json::to_string(&DetectionMethod::SeasonalResidual).unwrap(),
            "\"seasonal_residual\""
        );
    }
}
