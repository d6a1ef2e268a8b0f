//! Stored reports and their generation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub mod custom;
pub mod document;
pub mod generator;

pub use custom::{CustomReportConfig, InlineMetric, MetricRef, Section, StoredMetricRef};
pub use generator::ReportGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Visitor,
    Page,
    Conversion,
    Custom,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Visitor => "visitor",
            ReportType::Page => "page",
            ReportType::Conversion => "conversion",
            ReportType::Custom => "custom",
        }
    }
}

impl FromStr for ReportType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visitor" => Ok(ReportType::Visitor),
            "page" => Ok(ReportType::Page),
            "conversion" => Ok(ReportType::Conversion),
            "custom" => Ok(ReportType::Custom),
            other => Err(CoreError::Validation(format!("unknown report type: {other}"))),
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `draft -> generating -> generated`, and back to `generating` on every
/// regeneration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Draft,
    Generating,
    Generated,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Generating => "generating",
            ReportStatus::Generated => "generated",
        }
    }
}

impl FromStr for ReportStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ReportStatus::Draft),
            "generating" => Ok(ReportStatus::Generating),
            "generated" => Ok(ReportStatus::Generated),
            other => Err(CoreError::Validation(format!("unknown report status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub site_id: String,
    pub owner_id: String,
    pub name: String,
    pub report_type: ReportType,
    pub time_frame_id: String,
    /// Generated document. For custom reports it also carries the `config`.
    pub data: serde_json::Value,
    pub status: ReportStatus,
    pub last_generated: Option<DateTime<Utc>>,
    /// Bumped by every `begin_generation`; guards the commit.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReportRequest {
    pub name: String,
    pub report_type: ReportType,
    pub time_frame_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl CreateReportRequest {
    /// Shape checks that need no store access. Custom reports must carry a
    /// parseable `data.config`.
    pub fn validate(&self) -> CoreResult<Option<CustomReportConfig>> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("name must not be empty".to_string()));
        }
        if name.len() > 100 {
            return Err(CoreError::Validation(
                "name must be 100 characters or fewer".to_string(),
            ));
        }
        if self.time_frame_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "time_frame_id must not be empty".to_string(),
            ));
        }
        match self.report_type {
            ReportType::Custom => CustomReportConfig::from_report_data(&self.data).map(Some),
            _ => Ok(None),
        }
    }
}

/// Proof that a generation began at `version`. Only the holder of the latest
/// ticket may commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationTicket {
    pub report_id: String,
    pub version: i64,
    /// Status to restore if the generation is abandoned.
    pub prior_status: ReportStatus,
}
