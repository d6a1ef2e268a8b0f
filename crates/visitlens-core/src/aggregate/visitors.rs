use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::event::Visitor;
use crate::snapshot::Snapshot;
use crate::visitor::extract_referrer_domain;

const UNKNOWN: &str = "Unknown";
const DIRECT: &str = "(direct)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionCount {
    pub value: String,
    pub visitors: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorDemographics {
    pub total: i64,
    /// First visit inside the range.
    pub new: i64,
    /// First visit before the range start, with activity inside it.
    pub returning: i64,
    pub authenticated: i64,
    pub by_location: Vec<DimensionCount>,
    pub by_device: Vec<DimensionCount>,
    pub by_browser: Vec<DimensionCount>,
    pub by_os: Vec<DimensionCount>,
    pub by_referrer: Vec<DimensionCount>,
}

fn breakdown<'a, F>(visitors: &[&'a Visitor], key: F) -> Vec<DimensionCount>
where
    F: Fn(&'a Visitor) -> String,
{
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for visitor in visitors {
        *counts.entry(key(visitor)).or_default() += 1;
    }
    let mut rows: Vec<DimensionCount> = counts
        .into_iter()
        .map(|(value, visitors)| DimensionCount { value, visitors })
        .collect();
    rows.sort_by(|a, b| b.visitors.cmp(&a.visitors).then_with(|| a.value.cmp(&b.value)));
    rows
}

fn or_unknown(value: &Option<String>) -> String {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn location(visitor: &Visitor) -> String {
    match (visitor.country.as_deref(), visitor.city.as_deref()) {
        (Some(country), Some(city)) if !city.is_empty() => format!("{country}/{city}"),
        (Some(country), _) if !country.is_empty() => country.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

/// New / returning / authenticated counts and breakdowns over the visitors
/// first seen in the range or active in it.
pub fn aggregate_visitor_demographics(snapshot: &Snapshot) -> VisitorDemographics {
    let range = snapshot.range;
    let active: BTreeSet<&str> = snapshot.active_visitor_ids();
    let visitors: Vec<&Visitor> = snapshot
        .visitors
        .iter()
        .filter(|v| range.contains(v.first_visit) || active.contains(v.id.as_str()))
        .collect();

    let new = visitors
        .iter()
        .filter(|v| range.contains(v.first_visit))
        .count() as i64;
    let returning = visitors
        .iter()
        .filter(|v| v.first_visit < range.start && active.contains(v.id.as_str()))
        .count() as i64;
    let authenticated = visitors.iter().filter(|v| v.is_authenticated).count() as i64;

    VisitorDemographics {
        total: visitors.len() as i64,
        new,
        returning,
        authenticated,
        by_location: breakdown(&visitors, location),
        by_device: breakdown(&visitors, |v| or_unknown(&v.device_type)),
        by_browser: breakdown(&visitors, |v| or_unknown(&v.browser)),
        by_os: breakdown(&visitors, |v| or_unknown(&v.os)),
        by_referrer: breakdown(&visitors, |v| {
            v.referrer
                .as_deref()
                .and_then(extract_referrer_domain)
                .unwrap_or_else(|| DIRECT.to_string())
        }),
    }
}
