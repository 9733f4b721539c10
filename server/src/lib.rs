//! StarRocks Doctor: domain-expert diagnostic engine for StarRocks clusters.
//!
//! Given a live connection to the cluster frontend (query plane) and backend
//! nodes (storage/compute plane), the engine discovers symptoms in the
//! compaction, ingestion, memory, query-performance, and operations
//! subsystems and produces structured remediation reports.
//!
//! # Architecture
//!
//! ```text
//! tool name + args
//!        │
//!        ▼
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ ToolRegistry │───▶│   Pipeline   │───▶│    Expert    │
//! └──────────────┘    │ collect      │    │ plan/analyze │
//!                     │ diagnose     │    └──────┬───────┘
//!                     │ recommend    │           │
//!                     │ score + plan │    ┌──────▼───────┐
//!                     └──────┬───────┘    │ RuleLibrary  │
//!                            │            └──────────────┘
//!                     ┌──────▼───────┐
//!                     │ ReportWriter │
//!                     └──────────────┘
//! ```
//!
//! The tool-call transport (JSON-RPC framing, stdio plumbing) is not part of
//! this crate; the registry is the boundary it binds to.

pub mod config;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use models::{Finding, HealthScore, Recommendation, Severity, ToolResponse};
pub use services::pipeline::Pipeline;
pub use services::registry::ToolRegistry;
pub use utils::{DoctorError, DoctorResult};
