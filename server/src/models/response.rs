//! Tool response envelope
//!
//! Structured shape returned over the tool-call boundary. The `report` field
//! is the deterministic text rendering; `analysis` carries the structured
//! findings the report was built from. Both shapes stay stable across
//! versions.

use super::finding::{Finding, HealthScore, Recommendation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured analysis block of a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<Recommendation>,
    pub health: HealthScore,
}

/// Response for one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    /// `success` or the status string of the top-level failure finding.
    pub status: String,
    pub expert: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Pre-formatted report, wrapped with the render-verbatim directive.
    pub report: String,
    /// Raw collected dataset; present only when `include_details=true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub analysis: Analysis,
}

impl ToolResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}
