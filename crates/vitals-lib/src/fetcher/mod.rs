//! Fetching vitals documents from remote servers
//!
//! A fetch is a single HTTP GET with no retries. The response body is decoded
//! as a [`VitalsDocument`] and checked for a compatible version and the
//! expected title before it becomes a [`MetricPoint`]. Every failure is
//! reported as a [`FetchError`] and is never fatal to the agent.

mod http;


pub use http::{FetcherConfig, HttpFetcher};

use crate::error::FetchError;
use crate::models::{MetricPoint, ServerTarget, VitalsDocument, EXPECTED_TITLE, MIN_VERSION};
use chrono::Utc;

pub use async_trait::async_trait;

/// Trait for fetching one target's metrics
#[async_trait]
pub trait VitalsFetcher: Send + Sync {
    /// Poll a target once and turn its document into a point
    async fn fetch(&self, target: &ServerTarget) -> Result<MetricPoint, FetchError>;
}

/// Decode and validate a response body, producing a point stamped now
pub fn point_from_body(target: &ServerTarget, body: &[u8]) -> Result<MetricPoint, FetchError> {
    let document: VitalsDocument = serde_json::from_slice(body)?;
    validate(&document)?;
    Ok(MetricPoint::from_document(&target.name, &document, Utc::now()))
}

/// Check version first, then title
pub fn validate(document: &VitalsDocument) -> Result<(), FetchError> {
    if document.version.is_nan() || document.version < MIN_VERSION {
        return Err(FetchError::IncompatibleVersion(document.version));
    }
    if document.title != EXPECTED_TITLE {
        return Err(FetchError::UnexpectedTitle(document.title.clone()));
    }
    Ok(())
}
