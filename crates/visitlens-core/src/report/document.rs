//! Report document assembly. Pure: the same snapshot always yields the same
//! document.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::custom::{CustomReportConfig, Section};
use super::ReportType;
use crate::aggregate::{
    aggregate_conversions, aggregate_events, aggregate_page_metrics, aggregate_user_behavior,
    aggregate_visitor_demographics, analytics_summary, behavior_summary, page_report,
    page_timeseries,
};
use crate::config::AggregationSettings;
use crate::error::{CoreError, CoreResult};
use crate::formula::Formula;
use crate::metric::MetricValue;
use crate::snapshot::Snapshot;
use crate::timeframe::TimeFrame;

/// A custom-report metric with its formula already compiled.
#[derive(Debug, Clone)]
pub struct ResolvedMetric {
    pub metric_id: Option<String>,
    pub name: String,
    pub formula: Formula,
}

fn time_frame_meta(time_frame: &TimeFrame) -> Value {
    json!({
        "id": time_frame.id,
        "name": time_frame.name,
        "start": time_frame.start,
        "end": time_frame.end,
        "granularity": time_frame.granularity,
    })
}

/// Build the full document for a standard report type.
pub fn build_standard(
    report_type: ReportType,
    time_frame: &TimeFrame,
    snapshot: &Snapshot,
    settings: &AggregationSettings,
) -> CoreResult<Value> {
    let mut doc = match report_type {
        ReportType::Visitor => json!({
            "visitors": aggregate_visitor_demographics(snapshot),
            "behavior": behavior_summary(snapshot, &settings.engagement),
        }),
        ReportType::Page => json!({
            "pages": page_report(snapshot),
            "timeseries": page_timeseries(snapshot, time_frame.granularity, settings.timezone)?,
        }),
        ReportType::Conversion => json!({
            "conversions": aggregate_conversions(snapshot),
        }),
        ReportType::Custom => {
            return Err(CoreError::InvalidReportConfig(
                "custom reports need a config".to_string(),
            ))
        }
    };
    doc["time_frame"] = time_frame_meta(time_frame);
    Ok(doc)
}

/// Build a custom report document. The config is echoed back so the stored
/// document stays self-describing and can be regenerated.
pub fn build_custom(
    config: &CustomReportConfig,
    metrics: &[ResolvedMetric],
    time_frame: &TimeFrame,
    snapshot: &Snapshot,
    settings: &AggregationSettings,
) -> CoreResult<Value> {
    let mut results: BTreeMap<&'static str, Value> = BTreeMap::new();
    for section in &config.sections {
        let value = match section {
            Section::Visitors => serde_json::to_value(aggregate_visitor_demographics(snapshot))?,
            Section::Pages => serde_json::to_value(aggregate_page_metrics(snapshot))?,
            Section::Behavior => {
                serde_json::to_value(aggregate_user_behavior(snapshot, &settings.engagement))?
            }
            Section::Conversions => serde_json::to_value(aggregate_conversions(snapshot))?,
            Section::Events => serde_json::to_value(aggregate_events(snapshot))?,
            Section::Summary => serde_json::to_value(analytics_summary(
                snapshot,
                Some(&time_frame.name),
                &settings.engagement,
            ))?,
            Section::Timeseries => {
                let granularity = config.granularity.unwrap_or(time_frame.granularity);
                serde_json::to_value(page_timeseries(snapshot, granularity, settings.timezone)?)?
            }
        };
        results.insert(section.as_str(), value);
    }

    let mut metric_values: BTreeMap<String, MetricValue> = BTreeMap::new();
    if !metrics.is_empty() {
        let fields =
            analytics_summary(snapshot, Some(&time_frame.name), &settings.engagement).fields();
        for metric in metrics {
            let value = metric.formula.evaluate(&fields)?;
            metric_values.insert(
                metric.name.clone(),
                MetricValue {
                    metric_id: metric.metric_id.clone(),
                    name: metric.name.clone(),
                    formula: metric.formula.source().to_string(),
                    value,
                },
            );
        }
    }

    Ok(json!({
        "config": config.to_value()?,
        "time_frame": time_frame_meta(time_frame),
        "results": results,
        "metrics": metric_values,
    }))
}
