use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::percentage;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionTypeStats {
    pub count: i64,
    pub total_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub by_type: BTreeMap<String, ConversionTypeStats>,
    pub total_conversions: i64,
    pub total_value: f64,
    /// Distinct visitors active anywhere in the range.
    pub distinct_visitors: i64,
    /// `total_conversions / distinct_visitors * 100`.
    pub conversion_rate: f64,
}

pub fn aggregate_conversions(snapshot: &Snapshot) -> ConversionSummary {
    let mut by_type: BTreeMap<String, ConversionTypeStats> = BTreeMap::new();
    let mut total_value = 0.0;
    for conversion in &snapshot.conversions {
        let stats = by_type.entry(conversion.conversion_type.clone()).or_default();
        stats.count += 1;
        stats.total_value += conversion.value;
        total_value += conversion.value;
    }
    let total_conversions = snapshot.conversions.len() as i64;
    let active: BTreeSet<&str> = snapshot.active_visitor_ids();
    let distinct_visitors = active.len() as i64;

    ConversionSummary {
        by_type,
        total_conversions,
        total_value,
        distinct_visitors,
        conversion_rate: percentage(total_conversions as f64, distinct_visitors as f64),
    }
}
