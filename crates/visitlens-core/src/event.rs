use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Restricted value union for free-form metadata on events and conversions.
///
/// Deserialization tries variants in order, so `null` lands in `Null` and
/// integers and floats both land in `Number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// Explicit caller identity. Every report, time frame and metric call is
/// scoped to one site and one owning user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    pub site_id: String,
    pub user_id: String,
}

impl TenantScope {
    pub fn new(site_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visitor {
    pub id: String,
    pub site_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub referrer: Option<String>,
    /// Authenticated user id supplied by the auth collaborator.
    pub user_id: Option<String>,
    pub is_authenticated: bool,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub first_visit: DateTime<Utc>,
    pub last_visit: DateTime<Utc>,
}

/// Enriched visitor observation handed to the store's identity upsert.
#[derive(Debug, Clone, Default)]
pub struct NewVisit {
    pub site_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub referrer: Option<String>,
    pub authenticated_user_id: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub site_id: String,
    pub visitor_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Number of page views recorded against this session, across its whole
    /// lifetime (not only the part inside a queried range).
    pub page_view_count: i64,
}

impl Session {
    pub fn duration_seconds(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageView {
    pub id: String,
    pub site_id: String,
    pub session_id: String,
    pub visitor_id: String,
    pub url: String,
    pub path: String,
    pub title: Option<String>,
    /// Seconds on page, if the client reported it.
    pub duration: Option<i64>,
    pub is_bounce: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackPageView {
    pub visitor_id: String,
    pub session_id: String,
    pub url: String,
    pub path: String,
    pub title: Option<String>,
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Click,
    Scroll,
    FormSubmit,
    Download,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Scroll => "scroll",
            Self::FormSubmit => "form_submit",
            Self::Download => "download",
            Self::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "click" => Some(Self::Click),
            "scroll" => Some(Self::Scroll),
            "form_submit" => Some(Self::FormSubmit),
            "download" => Some(Self::Download),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub site_id: String,
    pub session_id: String,
    pub visitor_id: String,
    pub event_type: EventType,
    pub element_id: Option<String>,
    pub element_class: Option<String>,
    pub element_text: Option<String>,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackEvent {
    pub visitor_id: String,
    pub session_id: String,
    pub event_type: EventType,
    pub element_id: Option<String>,
    pub element_class: Option<String>,
    pub element_text: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    pub id: String,
    pub site_id: String,
    pub visitor_id: String,
    pub conversion_type: String,
    pub value: f64,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackConversion {
    pub visitor_id: String,
    pub conversion_type: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_accepts_nested_values() {
        let raw = r#"{"plan":"pro","seats":3,"trial":false,"note":null,"tags":["a"],"extra":{"k":1.5}}"#;
        let meta: Metadata = serde_json::from_str(raw).expect("metadata");
        assert_eq!(meta["plan"], MetadataValue::String("pro".into()));
        assert_eq!(meta["seats"], MetadataValue::Number(3.0));
        assert_eq!(meta["trial"], MetadataValue::Bool(false));
        assert_eq!(meta["note"], MetadataValue::Null);
        assert!(matches!(meta["extra"], MetadataValue::Map(_)));
    }

    #[test]
    fn event_type_rejects_unknown_names() {
        let err = serde_json::from_str::<EventType>(r#""hover""#);
        assert!(err.is_err());
        assert_eq!(EventType::parse("form_submit"), Some(EventType::FormSubmit));
    }

    #[test]
    fn open_session_has_no_duration() {
        let session = Session {
            id: "s".into(),
            site_id: "site".into(),
            visitor_id: "v".into(),
            start_time: Utc::now(),
            end_time: None,
            is_active: true,
            page_view_count: 0,
        };
        assert_eq!(session.duration_seconds(), None);
    }
}
