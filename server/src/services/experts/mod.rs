//! Expert framework
//!
//! Every domain expert exposes the same surface: metadata, a tool list with
//! JSON-Schema-shaped inputs, and per-tool implementations in plan mode
//! (`plan` + `analyze`, executed centrally by the pipeline) or direct mode
//! (`execute` with a live probe, for tools whose query shape depends on
//! intermediate results).
//!
//! Analyzers are a fixed ordered list of labeled rule passes over the
//! collected dataset, followed by one correlation pass that may only add
//! compound findings. Passes never raise for data absence; missing data
//! yields a `<pass>_insufficient_data` insight.

pub mod compaction;
pub mod ingestion;
pub mod memory;
pub mod operations;
pub mod query_perf;

use crate::models::{
    CollectedDataset, Finding, Priority, QueryDescriptor, Recommendation, Severity,
};
use crate::services::architecture::Architecture;
use crate::services::probe::Probe;
use crate::services::rules::RuleLibrary;
use crate::utils::{DoctorError, DoctorResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// Metadata and tool specs
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ExpertMetadata {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub supported_architectures: Vec<Architecture>,
}

impl ExpertMetadata {
    pub fn supports(&self, arch: Architecture) -> bool {
        self.supported_architectures.contains(&arch)
    }
}

/// Execution mode of one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// `plan()` + `analyze()`; queries run centrally in the pipeline.
    Plan,
    /// `execute()` with a live probe; for interleaved query shapes.
    Direct,
}

/// Tool descriptor published through the registry.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON-Schema-shaped: `{"type": "object", "properties": {...},
    /// "required": [...]}`.
    pub input_schema: Value,
    pub mode: ToolMode,
}

// ============================================================================
// Rule passes
// ============================================================================

/// Context handed to each rule pass.
pub struct PassContext<'a> {
    pub args: &'a Value,
    pub data: &'a CollectedDataset,
    pub rules: &'a RuleLibrary,
    pub architecture: Architecture,
    /// Wall clock for age computations; injected so passes stay pure and
    /// testable.
    pub now: chrono::NaiveDateTime,
}

impl<'a> PassContext<'a> {
    pub fn new(
        args: &'a Value,
        data: &'a CollectedDataset,
        rules: &'a RuleLibrary,
        architecture: Architecture,
    ) -> Self {
        Self { args, data, rules, architecture, now: chrono::Utc::now().naive_utc() }
    }

    #[cfg(test)]
    pub fn at(
        args: &'a Value,
        data: &'a CollectedDataset,
        rules: &'a RuleLibrary,
        architecture: Architecture,
        now: chrono::NaiveDateTime,
    ) -> Self {
        Self { args, data, rules, architecture, now }
    }
}

/// One labeled analyzer pass. Passes are independent: they may not read each
/// other's output, only the dataset and the rule library.
pub trait RulePass: Send + Sync {
    fn label(&self) -> &'static str;
    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding>;
}

/// Standard insight emitted when a pass cannot see the data it needs.
pub fn insufficient_data(pass: &str, detail: impl Into<String>) -> Finding {
    Finding::new(
        Severity::Insight,
        Priority::Low,
        format!("{}_insufficient_data", pass),
        detail.into(),
    )
    .impact("Pass skipped; re-run once the data source is reachable.")
}

/// Run an ordered pass list and a correlation pass over the dataset.
///
/// The correlation closure reads the finished finding set and returns
/// additional compound findings only; it never mutates earlier ones.
pub fn run_passes(
    passes: &[Box<dyn RulePass>],
    ctx: &PassContext,
    correlate: impl Fn(&[Finding], &PassContext) -> Vec<Finding>,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for pass in passes {
        let mut produced = pass.evaluate(ctx);
        tracing::debug!(pass = pass.label(), count = produced.len(), "rule pass complete");
        findings.append(&mut produced);
    }
    let compound = correlate(&findings, ctx);
    findings.extend(compound);
    findings
}

// ============================================================================
// Expert contract
// ============================================================================

#[async_trait]
pub trait Expert: Send + Sync {
    fn metadata(&self) -> ExpertMetadata;

    fn tools(&self) -> Vec<ToolSpec>;

    /// Plan-mode: produce the collection plan for a tool.
    fn plan(&self, tool: &str, args: &Value) -> DoctorResult<Vec<QueryDescriptor>> {
        let _ = args;
        Err(DoctorError::UnsupportedMode { tool: tool.to_string(), mode: "plan" })
    }

    /// Plan-mode: analyze the collected dataset. Pure over the dataset.
    fn analyze(
        &self,
        tool: &str,
        args: &Value,
        data: &CollectedDataset,
        architecture: Architecture,
    ) -> DoctorResult<Vec<Finding>> {
        let _ = (args, data, architecture);
        Err(DoctorError::UnsupportedMode { tool: tool.to_string(), mode: "plan" })
    }

    /// Direct-mode: run interleaved queries against a live probe.
    async fn execute(
        &self,
        tool: &str,
        args: &Value,
        probe: &dyn Probe,
        architecture: Architecture,
    ) -> DoctorResult<Vec<Finding>> {
        let _ = (args, probe, architecture);
        Err(DoctorError::UnsupportedMode { tool: tool.to_string(), mode: "direct" })
    }

    /// Recommendation factory keyed by finding type. Unknown types produce
    /// no recommendation.
    fn recommend(&self, findings: &[Finding]) -> Vec<Recommendation> {
        let _ = findings;
        Vec::new()
    }

    /// Domain-specific score penalty; pure over the finding set, bounded by
    /// the pipeline at 50.
    fn domain_penalty(&self, findings: &[Finding]) -> u32 {
        let _ = findings;
        0
    }
}

/// The full expert roster in registration order.
pub fn all_experts() -> Vec<std::sync::Arc<dyn Expert>> {
    vec![
        std::sync::Arc::new(compaction::CompactionExpert::new()),
        std::sync::Arc::new(ingestion::IngestionExpert::new()),
        std::sync::Arc::new(memory::MemoryExpert::new()),
        std::sync::Arc::new(query_perf::QueryPerfExpert::new()),
        std::sync::Arc::new(operations::OperationsExpert::new()),
    ]
}

// ============================================================================
// Shared argument helpers
// ============================================================================

/// Read an optional string argument.
pub fn arg_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

/// Read an optional boolean argument (default false).
pub fn arg_bool(args: &Value, name: &str) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// Read an optional non-negative integer argument with a default.
pub fn arg_limit(args: &Value, name: &str, default: i64) -> DoctorResult<i64> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => {
            let n = v
                .as_i64()
                .ok_or_else(|| DoctorError::invalid_arguments(format!("{} must be an integer", name)))?;
            if n < 0 {
                return Err(DoctorError::invalid_arguments(format!(
                    "{} must be non-negative, got {}",
                    name, n
                )));
            }
            Ok(n)
        },
    }
}
