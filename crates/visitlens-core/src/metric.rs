use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate_page_metrics, analytics_summary, Aggregator};
use crate::error::{CoreError, CoreResult};
use crate::formula::{FieldSet, Formula, MetricConfig};
use crate::timeframe::TimeFrame;

/// A stored, named formula over aggregate fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    pub site_id: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    /// `{"formula": "<expr>"}`.
    pub configuration: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Metric {
    pub fn formula(&self) -> CoreResult<Formula> {
        MetricConfig::from_value(&self.configuration)?.compile()
    }

    pub fn evaluate(&self, fields: &FieldSet) -> CoreResult<f64> {
        self.formula()?.evaluate(fields)
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMetricRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub configuration: serde_json::Value,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl CreateMetricRequest {
    /// Reject bad names and formulas before the metric is stored.
    pub fn validate(&self) -> CoreResult<Formula> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("name must not be empty".to_string()));
        }
        if name.len() > 100 {
            return Err(CoreError::Validation(
                "name must be 100 characters or fewer".to_string(),
            ));
        }
        MetricConfig::from_value(&self.configuration)?.compile()
    }
}

/// Evaluate a raw `{"formula": ...}` configuration.
pub fn evaluate_metric(configuration: &serde_json::Value, fields: &FieldSet) -> CoreResult<f64> {
    MetricConfig::from_value(configuration)?
        .compile()?
        .evaluate(fields)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub metric_id: Option<String>,
    pub name: String,
    pub formula: String,
    pub value: f64,
}

/// Evaluate a stored metric over a time frame, against the site-wide
/// summary or, when `path` is given, that page's metrics.
pub async fn evaluate_for_time_frame(
    aggregator: &Aggregator,
    metric: &Metric,
    time_frame: &TimeFrame,
    path: Option<&str>,
) -> CoreResult<MetricValue> {
    let formula = metric.formula()?;
    let snapshot = aggregator
        .snapshot(&time_frame.site_id, time_frame.range()?)
        .await?;
    let fields = match path {
        Some(path) => aggregate_page_metrics(&snapshot)
            .get(path)
            .map(|page| page.fields())
            .ok_or_else(|| CoreError::not_found("page", path))?,
        None => analytics_summary(
            &snapshot,
            Some(&time_frame.name),
            &aggregator.settings().engagement,
        )
        .fields(),
    };
    Ok(MetricValue {
        metric_id: Some(metric.id.clone()),
        name: metric.name.clone(),
        formula: formula.source().to_string(),
        value: formula.evaluate(&fields)?,
    })
}
