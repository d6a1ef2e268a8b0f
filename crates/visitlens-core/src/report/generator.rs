use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::custom::{CustomReportConfig, MetricRef};
use super::document::{build_custom, build_standard, ResolvedMetric};
use super::{CreateReportRequest, Report, ReportType};
use crate::aggregate::Aggregator;
use crate::config::AggregationSettings;
use crate::error::{CoreError, CoreResult};
use crate::event::TenantScope;
use crate::formula::Formula;
use crate::store::EventStore;
use crate::timeframe::TimeFrame;

/// Creates reports and (re)generates their documents.
///
/// A generation computes the whole document in memory from one snapshot and
/// commits it in a single guarded write, so a stored report is always either
/// its previous document or the complete new one.
#[derive(Clone)]
pub struct ReportGenerator {
    store: Arc<dyn EventStore>,
    aggregator: Aggregator,
}

impl ReportGenerator {
    pub fn new(store: Arc<dyn EventStore>, settings: AggregationSettings) -> Self {
        let aggregator = Aggregator::new(Arc::clone(&store), settings);
        Self { store, aggregator }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    async fn load_time_frame(&self, scope: &TenantScope, id: &str) -> CoreResult<TimeFrame> {
        self.store
            .get_time_frame(scope, id)
            .await?
            .ok_or_else(|| CoreError::not_found("time_frame", id))
    }

    pub async fn create_report(
        &self,
        scope: &TenantScope,
        req: &CreateReportRequest,
    ) -> CoreResult<Report> {
        let custom = req.validate()?;
        self.load_time_frame(scope, &req.time_frame_id).await?;
        if let Some(config) = &custom {
            self.resolve_metrics(&scope.site_id, config).await?;
        }
        let report = self.store.create_report(scope, req).await?;
        info!(
            report_id = %report.id,
            report_type = %report.report_type,
            site_id = %scope.site_id,
            "Report created"
        );
        Ok(report)
    }

    /// Generate the report's document and commit it. A commit that loses a
    /// race with a concurrent generation is retried once from scratch.
    pub async fn generate(&self, scope: &TenantScope, report_id: &str) -> CoreResult<Report> {
        match self.generate_once(scope, report_id).await {
            Err(CoreError::ConcurrencyConflict { .. }) => {
                warn!(report_id, "Report generation lost a race; retrying once");
                self.generate_once(scope, report_id).await
            }
            other => other,
        }
    }

    async fn generate_once(&self, scope: &TenantScope, report_id: &str) -> CoreResult<Report> {
        let report = self
            .store
            .get_report(scope, report_id)
            .await?
            .ok_or_else(|| CoreError::not_found("report", report_id))?;

        let ticket = self.store.begin_generation(scope, report_id).await?;
        let document = match self.build_document(scope, &report).await {
            Ok(document) => document,
            Err(err) => {
                if let Err(abort_err) = self.store.abort_generation(scope, &ticket).await {
                    warn!(report_id, error = %abort_err, "Failed to restore report status");
                }
                return Err(err);
            }
        };

        let committed = self
            .store
            .commit_generation(scope, &ticket, &document, Utc::now())
            .await?;
        info!(
            report_id,
            version = committed.version,
            "Report generated"
        );
        Ok(committed)
    }

    async fn build_document(
        &self,
        scope: &TenantScope,
        report: &Report,
    ) -> CoreResult<serde_json::Value> {
        let time_frame = self.load_time_frame(scope, &report.time_frame_id).await?;
        let custom = match report.report_type {
            ReportType::Custom => {
                let config = CustomReportConfig::from_report_data(&report.data)?;
                let metrics = self.resolve_metrics(&scope.site_id, &config).await?;
                Some((config, metrics))
            }
            _ => None,
        };

        let snapshot = self
            .aggregator
            .snapshot(&scope.site_id, time_frame.range()?)
            .await?;
        let settings = self.aggregator.settings();
        match custom {
            Some((config, metrics)) => {
                build_custom(&config, &metrics, &time_frame, &snapshot, settings)
            }
            None => build_standard(report.report_type, &time_frame, &snapshot, settings),
        }
    }

    /// Compile every metric a custom config refers to. Stored metrics must
    /// exist on the site and be active.
    async fn resolve_metrics(
        &self,
        site_id: &str,
        config: &CustomReportConfig,
    ) -> CoreResult<Vec<ResolvedMetric>> {
        let mut resolved = Vec::with_capacity(config.metrics.len());
        for metric_ref in &config.metrics {
            let metric = match metric_ref {
                MetricRef::Stored(stored) => {
                    let metric = self
                        .store
                        .get_metric(site_id, &stored.metric_id)
                        .await?
                        .ok_or_else(|| {
                            CoreError::InvalidReportConfig(format!(
                                "unknown metric: {}",
                                stored.metric_id
                            ))
                        })?;
                    if !metric.is_active {
                        return Err(CoreError::InvalidReportConfig(format!(
                            "metric is inactive: {}",
                            stored.metric_id
                        )));
                    }
                    ResolvedMetric {
                        metric_id: Some(metric.id.clone()),
                        name: metric.name.clone(),
                        formula: metric.formula()?,
                    }
                }
                MetricRef::Inline(inline) => ResolvedMetric {
                    metric_id: None,
                    name: inline.name.clone(),
                    formula: Formula::parse(&inline.formula)?,
                },
            };
            if resolved
                .iter()
                .any(|r: &ResolvedMetric| r.name == metric.name)
            {
                return Err(CoreError::InvalidReportConfig(format!(
                    "duplicate metric name: {}",
                    metric.name
                )));
            }
            resolved.push(metric);
        }
        Ok(resolved)
    }
}
