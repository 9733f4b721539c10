//! Load profile analyzer
//!
//! Parses the textual execution profile of an ingestion task into a typed
//! timing tree and derives bottleneck findings from it.
//!
//! # Architecture
//!
//! ```text
//! profile text
//!      │
//!      ▼
//! ┌────────────┐   ┌─────────────┐   ┌─────────────┐
//! │ TreeParser │──▶│ Bottleneck  │──▶│ Reconcile   │
//! │ (indent)   │   │ (per-Index) │   │ (time acct) │
//! └────────────┘   └─────────────┘   └─────────────┘
//!      │
//!      ▼
//! ProfileNode tree (+ValueParser-normalized attributes)
//! ```

pub mod bottleneck;
pub mod models;
pub mod reconcile;
pub mod tree_parser;
pub mod value_parser;

#[cfg(test)]
mod tests;

pub use models::{AttrValue, Attribute, ProfileNode, ProfileTree};
pub use tree_parser::TreeParser;
pub use value_parser::ValueParser;

use crate::models::Finding;
use crate::services::rules::RuleLibrary;
use crate::utils::DoctorResult;

/// Full analysis of one profile text.
#[derive(Debug)]
pub struct ProfileAnalysis {
    pub tree: ProfileTree,
    pub findings: Vec<Finding>,
}

/// Parse a profile and run both analysis routines.
pub fn analyze(profile_text: &str, rules: &RuleLibrary) -> DoctorResult<ProfileAnalysis> {
    let tree = TreeParser::parse(profile_text)?;
    let mut findings = bottleneck::find_bottlenecks(&tree, &rules.profile);
    findings.extend(reconcile::check_time_accounting(&tree, &rules.profile));
    Ok(ProfileAnalysis { tree, findings })
}
