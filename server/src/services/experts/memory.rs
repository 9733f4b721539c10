//! Memory expert
//!
//! Probes every backend's `/mem_tracker` endpoint and classifies process
//! memory pressure and per-tracker dominance. Runs in direct mode: the HTTP
//! targets only become known after the node listing, so the query shape
//! depends on intermediate results. The gathered data still flows through
//! the standard labeled rule passes over a collected dataset.

use super::{
    Expert, ExpertMetadata, PassContext, RulePass, ToolMode, ToolSpec, insufficient_data,
    run_passes,
};
use crate::models::{
    CollectedDataset, CollectedItem, Finding, Priority, Recommendation, RecommendedAction,
    Severity,
};
use crate::services::architecture::Architecture;
use crate::services::probe::Probe;
use crate::services::rules::{Band, library};
use crate::utils::{DoctorResult, format_bytes};
use serde_json::{Value, json};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct MemoryExpert {
    passes: Vec<Box<dyn RulePass>>,
}

impl MemoryExpert {
    pub fn new() -> Self {
        Self {
            passes: vec![Box::new(ProcessUsagePass), Box::new(TrackerBreakdownPass)],
        }
    }
}

impl Default for MemoryExpert {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Expert for MemoryExpert {
    fn metadata(&self) -> ExpertMetadata {
        ExpertMetadata {
            name: "memory",
            version: VERSION,
            description: "Backend memory pressure and tracker breakdown",
            supported_architectures: vec![Architecture::SharedNothing, Architecture::SharedData],
        }
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "analyze_memory",
            description: "Probe each backend's memory trackers and classify pressure",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "include_details": {
                        "type": "boolean",
                        "description": "Attach the raw collected dataset to the response"
                    }
                },
                "required": []
            }),
            mode: ToolMode::Direct,
        }]
    }

    async fn execute(
        &self,
        _tool: &str,
        args: &Value,
        probe: &dyn Probe,
        architecture: Architecture,
    ) -> DoctorResult<Vec<Finding>> {
        // Interleaved collection: node listing first, then one HTTP probe
        // per live backend. Failures become error tokens like in plan mode.
        let mut data = CollectedDataset::new();

        let backends = match probe.run_admin_show("SHOW BACKENDS").await {
            Ok(rows) => {
                data.insert("backends", CollectedItem::Rows(rows.clone()));
                rows
            },
            Err(e) => {
                data.insert("backends", CollectedItem::Error(e));
                Vec::new()
            },
        };

        for row in &backends {
            if row
                .str("Alive")
                .map(|v| !v.eq_ignore_ascii_case("true"))
                .unwrap_or(true)
            {
                continue;
            }
            let Some(host) = row.str("Host").or_else(|| row.str("IP")) else { continue };
            let Some(port) = row.i64("HttpPort").and_then(|p| u16::try_from(p).ok()) else {
                continue;
            };
            let id = format!(
                "mem_tracker:{}",
                row.str("BackendId")
                    .map(str::to_string)
                    .or_else(|| row.i64("BackendId").map(|v| v.to_string()))
                    .unwrap_or_else(|| host.to_string())
            );

            let item = match probe.http_get(host, port, "/mem_tracker").await {
                Ok(body) => match body.json() {
                    Ok(value) => CollectedItem::Json(value),
                    Err(e) => CollectedItem::Error(e),
                },
                Err(e) => CollectedItem::Error(e),
            };
            data.insert(id, item);
        }

        let ctx = PassContext::new(args, &data, library(), architecture);
        Ok(run_passes(&self.passes, &ctx, |_, _| Vec::new()))
    }

    fn recommend(&self, findings: &[Finding]) -> Vec<Recommendation> {
        findings.iter().filter_map(recommendation_for).collect()
    }
}

// ============================================================================
// Tracker JSON helpers
// ============================================================================

/// One tracker entry from the `/mem_tracker` JSON document.
struct Tracker {
    label: String,
    limit: Option<u64>,
    size: u64,
}

fn parse_trackers(doc: &Value) -> Vec<Tracker> {
    let entries = doc
        .as_array()
        .cloned()
        .or_else(|| doc.get("trackers").and_then(Value::as_array).cloned())
        .unwrap_or_default();

    entries
        .iter()
        .filter_map(|entry| {
            let label = entry.get("label").and_then(Value::as_str)?.to_string();
            let size = entry
                .get("size")
                .or_else(|| entry.get("cur_consumption"))
                .and_then(Value::as_u64)?;
            let limit = entry
                .get("limit")
                .and_then(Value::as_i64)
                .and_then(|v| u64::try_from(v).ok())
                .filter(|v| *v > 0);
            Some(Tracker { label, limit, size })
        })
        .collect()
}

/// Iterate (backend id, tracker document) pairs present in the dataset.
fn tracker_docs<'a>(data: &'a CollectedDataset) -> Vec<(&'a str, &'a Value)> {
    data.keys()
        .filter_map(|id| {
            let be_id = id.strip_prefix("mem_tracker:")?;
            data.json(id).map(|doc| (be_id, doc))
        })
        .collect()
}

// ============================================================================
// Pass: process_usage
// ============================================================================

struct ProcessUsagePass;

impl RulePass for ProcessUsagePass {
    fn label(&self) -> &'static str {
        "process_usage"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let docs = tracker_docs(ctx.data);
        if docs.is_empty() {
            return vec![insufficient_data(
                self.label(),
                "no backend returned a mem_tracker document",
            )];
        }
        let rules = &ctx.rules.memory;

        let mut findings = Vec::new();
        for (be_id, doc) in docs {
            let trackers = parse_trackers(doc);
            let Some(process) = trackers.iter().find(|t| t.label == "process") else {
                findings.push(insufficient_data(
                    self.label(),
                    format!("backend {} reports no process tracker", be_id),
                ));
                continue;
            };
            let Some(limit) = process.limit else { continue };
            let pct = process.size as f64 / limit as f64 * 100.0;

            let (kind, severity, priority) = match rules.classify_usage(pct) {
                Band::Critical => {
                    ("memory_pressure_critical", Severity::Critical, Priority::Immediate)
                },
                Band::Warning => ("memory_pressure_high", Severity::Warning, Priority::High),
                _ => continue,
            };

            findings.push(
                Finding::new(
                    severity,
                    priority,
                    kind,
                    format!(
                        "Backend {} uses {:.1}% of its memory limit ({} of {})",
                        be_id,
                        pct,
                        format_bytes(process.size),
                        format_bytes(limit)
                    ),
                )
                .evidence("backend_id", be_id)
                .evidence("used_pct", pct)
                .evidence("used_bytes", process.size)
                .evidence("limit_bytes", limit)
                .impact(
                    "Past the limit the BE cancels queries and rejects loads; OOM kills follow.",
                ),
            );
        }
        findings
    }
}

// ============================================================================
// Pass: tracker_breakdown
// ============================================================================

struct TrackerBreakdownPass;

impl RulePass for TrackerBreakdownPass {
    fn label(&self) -> &'static str {
        "tracker_breakdown"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let rules = &ctx.rules.memory;
        let mut findings = Vec::new();

        for (be_id, doc) in tracker_docs(ctx.data) {
            let trackers = parse_trackers(doc);
            let Some(process) = trackers.iter().find(|t| t.label == "process") else {
                continue;
            };
            if process.size == 0 {
                continue;
            }

            for tracker in trackers.iter().filter(|t| t.label != "process") {
                let share = tracker.size as f64 / process.size as f64;
                if share <= rules.tracker_share_warning {
                    continue;
                }
                findings.push(
                    Finding::new(
                        Severity::Warning,
                        Priority::Medium,
                        "memory_tracker_dominant",
                        format!(
                            "Tracker '{}' holds {:.0}% of process memory on backend {} ({})",
                            tracker.label,
                            share * 100.0,
                            be_id,
                            format_bytes(tracker.size)
                        ),
                    )
                    .evidence("backend_id", be_id)
                    .evidence("tracker", tracker.label.as_str())
                    .evidence("share", share)
                    .evidence("size_bytes", tracker.size)
                    .impact(tracker_impact(&tracker.label))
                    .action(tracker_action(&tracker.label)),
                );
            }
        }
        findings
    }
}

fn tracker_impact(label: &str) -> &'static str {
    match label {
        "update" => {
            "Primary-key index memory grows with unmerged updates; it squeezes query memory."
        },
        "compaction" => "Compaction working set is crowding out query execution.",
        "query_pool" => "Query execution dominates the node; large queries may start to spill.",
        "load" => "Ingestion buffers dominate; concurrent loads will start to fail.",
        _ => "One subsystem dominates process memory; the others operate under pressure.",
    }
}

fn tracker_action(label: &str) -> RecommendedAction {
    match label {
        "update" => RecommendedAction::new(
            "Trigger primary-key index compaction or lower update_memory_limit_percent",
        ),
        "compaction" => RecommendedAction::new(
            "Lower concurrent compaction tasks or compact_threads on this backend",
        ),
        "query_pool" => RecommendedAction::with_statement(
            "Cap per-query memory",
            "SET GLOBAL query_mem_limit = 17179869184",
        ),
        "load" => RecommendedAction::new("Reduce concurrent load jobs or their batch size"),
        _ => RecommendedAction::new("Inspect the tracker's children on the BE web console"),
    }
}

// ============================================================================
// Recommendation factory
// ============================================================================

fn recommendation_for(finding: &Finding) -> Option<Recommendation> {
    match finding.kind.as_str() {
        "memory_pressure_critical" => Some(Recommendation {
            id: "relieve_memory_pressure".into(),
            category: "memory".into(),
            priority: Priority::Immediate,
            title: "Relieve backend memory pressure".into(),
            description:
                "Shed load from the saturated backend before the OS OOM killer does it."
                    .into(),
            finding_kinds: vec![finding.kind.clone()],
            phases: vec![],
            risk: "Cancelling queries and pausing loads is disruptive but reversible.".into(),
            verification: "Re-run analyze_memory and confirm used_pct dropped below 85%".into(),
        }),
        "memory_tracker_dominant" => Some(Recommendation {
            id: "rebalance_memory_trackers".into(),
            category: "memory".into(),
            priority: Priority::Medium,
            title: "Rebalance the dominant memory consumer".into(),
            description:
                "Apply the tracker-specific mitigation from the finding, then watch the share."
                    .into(),
            finding_kinds: vec![finding.kind.clone()],
            phases: vec![],
            risk: "Tracker limits trade one subsystem's throughput for another's headroom.".into(),
            verification: "Re-run analyze_memory and compare tracker shares".into(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Row;
    use crate::services::rules::RuleLibrary;

    fn dataset_with_trackers(doc: Value) -> CollectedDataset {
        let mut data = CollectedDataset::new();
        data.insert(
            "backends",
            CollectedItem::Rows(vec![Row::new()
                .with("BackendId", "10001")
                .with("Host", "10.0.0.1")
                .with("HttpPort", 8040i64)
                .with("Alive", "true")]),
        );
        data.insert("mem_tracker:10001", CollectedItem::Json(doc));
        data
    }

    fn run(data: &CollectedDataset) -> Vec<Finding> {
        let expert = MemoryExpert::new();
        let rules = RuleLibrary::default();
        let args = json!({});
        let ctx = PassContext::new(&args, data, &rules, Architecture::SharedData);
        run_passes(&expert.passes, &ctx, |_, _| Vec::new())
    }

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn critical_usage_is_flagged_per_backend() {
        let doc = json!([
            { "label": "process", "limit": 100 * GIB, "size": 96 * GIB },
            { "label": "query_pool", "limit": -1, "size": 10 * GIB },
        ]);
        let findings = run(&dataset_with_trackers(doc));
        let finding = findings
            .iter()
            .find(|f| f.kind == "memory_pressure_critical")
            .expect("critical pressure");
        assert_eq!(finding.priority, Priority::Immediate);
        assert_eq!(finding.evidence["backend_id"], json!("10001"));
    }

    #[test]
    fn moderate_usage_is_warning_band() {
        let doc = json!([
            { "label": "process", "limit": 100 * GIB, "size": 88 * GIB },
        ]);
        let findings = run(&dataset_with_trackers(doc));
        assert!(findings.iter().any(|f| f.kind == "memory_pressure_high"));
        assert!(!findings.iter().any(|f| f.kind == "memory_pressure_critical"));
    }

    #[test]
    fn dominant_update_tracker_is_reported() {
        let doc = json!([
            { "label": "process", "limit": 100 * GIB, "size": 50 * GIB },
            { "label": "update", "limit": -1, "size": 30 * GIB },
            { "label": "query_pool", "limit": -1, "size": 5 * GIB },
        ]);
        let findings = run(&dataset_with_trackers(doc));
        let finding = findings
            .iter()
            .find(|f| f.kind == "memory_tracker_dominant")
            .expect("dominant tracker");
        assert_eq!(finding.evidence["tracker"], json!("update"));
        assert!(finding.evidence["share"].as_f64().unwrap() > 0.5);
    }

    #[test]
    fn healthy_node_produces_nothing() {
        let doc = json!([
            { "label": "process", "limit": 100 * GIB, "size": 30 * GIB },
            { "label": "query_pool", "limit": -1, "size": 10 * GIB },
        ]);
        let findings = run(&dataset_with_trackers(doc));
        assert!(findings.is_empty());
    }

    #[test]
    fn missing_documents_yield_insight() {
        let mut data = CollectedDataset::new();
        data.insert(
            "backends",
            CollectedItem::Error(crate::utils::ProbeError::Unavailable("refused".into())),
        );
        let findings = run(&data);
        assert!(
            findings
                .iter()
                .any(|f| f.kind == "process_usage_insufficient_data")
        );
    }
}
