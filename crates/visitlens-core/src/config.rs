use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::bounce::BouncePolicy;

/// Weights and normalization caps for the per-visitor engagement score.
///
/// `score = 100 * (page_weight * norm(pages_per_session)
///               + duration_weight * norm(avg_session_duration)
///               + return_weight * return_rate / 100) / sum(weights)`
///
/// where `norm(x) = min(x / cap, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngagementWeights {
    pub page_weight: f64,
    pub duration_weight: f64,
    pub return_weight: f64,
    pub duration_normalization_cap_seconds: f64,
    pub pages_normalization_cap: f64,
}

impl Default for EngagementWeights {
    fn default() -> Self {
        Self {
            page_weight: 0.4,
            duration_weight: 0.4,
            return_weight: 0.2,
            duration_normalization_cap_seconds: 1800.0,
            pages_normalization_cap: 10.0,
        }
    }
}

/// Everything the aggregator needs beyond the raw data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationSettings {
    /// Timezone used for daily / weekly / monthly bucket boundaries.
    pub timezone: Tz,
    pub bounce: BouncePolicy,
    pub engagement: EngagementWeights,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            bounce: BouncePolicy::default(),
            engagement: EngagementWeights::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    pub geoip_path: String,
    pub aggregation: AggregationSettings,
}

fn env_f64(key: &str, default: f64) -> Result<f64, String> {
    match std::env::var(key) {
        Ok(raw) => {
            let value: f64 = raw
                .trim()
                .parse()
                .map_err(|e| format!("invalid {key}: {e}"))?;
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{key} must be a non-negative number"));
            }
            Ok(value)
        }
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let defaults = EngagementWeights::default();
        Ok(Self {
            port: std::env::var("VISITLENS_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("VISITLENS_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            duckdb_memory_limit: std::env::var("VISITLENS_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            geoip_path: std::env::var("VISITLENS_GEOIP_PATH")
                .unwrap_or_else(|_| "./GeoLite2-City.mmdb".to_string()),
            aggregation: AggregationSettings {
                timezone: {
                    let raw =
                        std::env::var("VISITLENS_TIMEZONE").unwrap_or_else(|_| "UTC".to_string());
                    raw.trim()
                        .parse::<Tz>()
                        .map_err(|_| format!("invalid VISITLENS_TIMEZONE: {raw}"))?
                },
                bounce: BouncePolicy::new(
                    std::env::var("VISITLENS_BOUNCE_THRESHOLD_SECONDS")
                        .unwrap_or_else(|_| "0".to_string())
                        .parse()
                        .map_err(|e| format!("invalid VISITLENS_BOUNCE_THRESHOLD_SECONDS: {e}"))?,
                ),
                engagement: EngagementWeights {
                    page_weight: env_f64("VISITLENS_ENGAGEMENT_PAGE_WEIGHT", defaults.page_weight)?,
                    duration_weight: env_f64(
                        "VISITLENS_ENGAGEMENT_DURATION_WEIGHT",
                        defaults.duration_weight,
                    )?,
                    return_weight: env_f64(
                        "VISITLENS_ENGAGEMENT_RETURN_WEIGHT",
                        defaults.return_weight,
                    )?,
                    duration_normalization_cap_seconds: env_f64(
                        "VISITLENS_ENGAGEMENT_DURATION_CAP_SECONDS",
                        defaults.duration_normalization_cap_seconds,
                    )?,
                    pages_normalization_cap: env_f64(
                        "VISITLENS_ENGAGEMENT_PAGES_CAP",
                        defaults.pages_normalization_cap,
                    )?,
                },
            },
        })
    }
}
