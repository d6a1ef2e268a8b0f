//! Custom report configuration, stored under `data.config`.
//!
//! ```json
//! {
//!   "sections": ["summary", "pages", "timeseries"],
//!   "metrics": [{"metric_id": "metric_ab12"}, {"name": "cr", "formula": "conversion_rate"}],
//!   "granularity": "daily"
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::formula::Formula;
use crate::timeframe::Granularity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Visitors,
    Pages,
    Behavior,
    Conversions,
    Events,
    Summary,
    Timeseries,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Visitors => "visitors",
            Section::Pages => "pages",
            Section::Behavior => "behavior",
            Section::Conversions => "conversions",
            Section::Events => "events",
            Section::Summary => "summary",
            Section::Timeseries => "timeseries",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoredMetricRef {
    pub metric_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineMetric {
    pub name: String,
    pub formula: String,
}

/// Either a reference to a stored metric or an inline formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricRef {
    Stored(StoredMetricRef),
    Inline(InlineMetric),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomReportConfig {
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub metrics: Vec<MetricRef>,
    /// Bucket size for the `timeseries` section. Defaults to the time
    /// frame's own granularity.
    #[serde(default)]
    pub granularity: Option<Granularity>,
}

impl CustomReportConfig {
    /// Parse and check `data.config` of a custom report.
    pub fn from_report_data(data: &serde_json::Value) -> CoreResult<Self> {
        let raw = data
            .get("config")
            .ok_or_else(|| CoreError::InvalidReportConfig("missing config".to_string()))?;
        let mut config: Self = serde_json::from_value(raw.clone())
            .map_err(|e| CoreError::InvalidReportConfig(e.to_string()))?;
        config.check()?;
        config.sections.sort();
        config.sections.dedup();
        Ok(config)
    }

    fn check(&self) -> CoreResult<()> {
        if self.sections.is_empty() && self.metrics.is_empty() {
            return Err(CoreError::InvalidReportConfig(
                "config must name at least one section or metric".to_string(),
            ));
        }
        let mut names = std::collections::BTreeSet::new();
        for metric in &self.metrics {
            match metric {
                MetricRef::Stored(stored) if stored.metric_id.trim().is_empty() => {
                    return Err(CoreError::InvalidReportConfig(
                        "metric_id must not be empty".to_string(),
                    ));
                }
                MetricRef::Stored(_) => {}
                MetricRef::Inline(inline) => {
                    if inline.name.trim().is_empty() {
                        return Err(CoreError::InvalidReportConfig(
                            "inline metric name must not be empty".to_string(),
                        ));
                    }
                    if !names.insert(inline.name.as_str()) {
                        return Err(CoreError::InvalidReportConfig(format!(
                            "duplicate metric name: {}",
                            inline.name
                        )));
                    }
                    Formula::parse(&inline.formula)?;
                }
            }
        }
        Ok(())
    }

    pub fn to_value(&self) -> CoreResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
