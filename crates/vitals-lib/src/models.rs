//! Core data models for the vitals agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Measurement name every point is written under
pub const MEASUREMENT: &str = "server_metrics";

/// Tag key carrying the server name
pub const SERVER_TAG: &str = "server";

/// Title a vitals endpoint must report
pub const EXPECTED_TITLE: &str = "vitals-glimpse";

/// Oldest document version the agent understands
pub const MIN_VERSION: f64 = 0.2;

/// A monitored server, as listed in the servers file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTarget {
    pub name: String,
    pub url: String,
}

impl ServerTarget {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Status document served by a vitals-glimpse endpoint
///
/// The `*_status` fields of the payload are not modelled and are ignored
/// during decoding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VitalsDocument {
    pub title: String,
    pub version: f64,
    pub mem_percent: i64,
    pub disk_percent: i64,
    pub cpu_percent: i64,
}

/// The three percentage fields stored per poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VitalsFields {
    pub mem_percent: i64,
    pub disk_percent: i64,
    pub cpu_percent: i64,
}

/// A single timestamped point bound for the `server_metrics` measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Value of the `server` tag
    pub server: String,
    pub fields: VitalsFields,
    pub timestamp: DateTime<Utc>,
}

impl MetricPoint {
    /// Build a point from an already validated document
    pub fn from_document(
        server: impl Into<String>,
        document: &VitalsDocument,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            server: server.into(),
            fields: VitalsFields {
                mem_percent: document.mem_percent,
                disk_percent: document.disk_percent,
                cpu_percent: document.cpu_percent,
            },
            timestamp,
        }
    }

    /// Measurement name this point belongs to
    pub fn measurement(&self) -> &'static str {
        MEASUREMENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_ignores_status_fields() {
        let body = r#"{"title":"vitals-glimpse","version":0.2,
            "mem_status":"mem_okay","mem_percent":46,
            "disk_status":"disk_okay","disk_percent":79,
            "cpu_status":"cpu_okay","cpu_percent":0}"#;

        let doc: VitalsDocument = serde_json::from_str(body).unwrap();
        assert_eq!(doc.title, "vitals-glimpse");
        assert_eq!(doc.version, 0.2);
        assert_eq!(doc.mem_percent, 46);
        assert_eq!(doc.disk_percent, 79);
        assert_eq!(doc.cpu_percent, 0);
    }

    #[test]
    fn test_document_missing_field_is_rejected() {
        let body = r#"{"title":"vitals-glimpse","version":0.2,"mem_percent":46,"disk_percent":79}"#;
        assert!(serde_json::from_str::<VitalsDocument>(body).is_err());
    }

    #[test]
    fn test_document_fractional_percent_is_rejected() {
        let body = r#"{"title":"vitals-glimpse","version":0.2,
            "mem_percent":46.5,"disk_percent":79,"cpu_percent":0}"#;
        assert!(serde_json::from_str::<VitalsDocument>(body).is_err());
    }

    #[test]
    fn test_point_from_document() {
        let doc = VitalsDocument {
            title: EXPECTED_TITLE.to_string(),
            version: 0.3,
            mem_percent: 140,
            disk_percent: -1,
            cpu_percent: 12,
        };
        let now = Utc::now();

        let point = MetricPoint::from_document("web-1", &doc, now);
        assert_eq!(point.server, "web-1");
        assert_eq!(point.measurement(), "server_metrics");
        assert_eq!(point.timestamp, now);
        // out of range values pass through untouched
        assert_eq!(point.fields.mem_percent, 140);
        assert_eq!(point.fields.disk_percent, -1);
        assert_eq!(point.fields.cpu_percent, 12);
    }
}
