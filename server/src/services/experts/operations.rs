//! Operations expert
//!
//! Cluster-plane health: node availability, disk headroom, tablet
//! distribution, and version consistency across backends.

use super::{
    Expert, ExpertMetadata, PassContext, RulePass, ToolMode, ToolSpec, insufficient_data,
    run_passes,
};
use crate::models::{
    CollectedDataset, Finding, Priority, QueryDescriptor, Recommendation, RecommendedAction, Row,
    Severity,
};
use crate::services::architecture::Architecture;
use crate::services::rules::{Band, library};
use crate::utils::DoctorResult;
use serde_json::{Value, json};
use std::collections::BTreeSet;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct OperationsExpert {
    passes: Vec<Box<dyn RulePass>>,
}

impl OperationsExpert {
    pub fn new() -> Self {
        Self {
            passes: vec![
                Box::new(NodeAvailabilityPass),
                Box::new(DiskPressurePass),
                Box::new(TabletSkewPass),
                Box::new(VersionConsistencyPass),
            ],
        }
    }
}

impl Default for OperationsExpert {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Expert for OperationsExpert {
    fn metadata(&self) -> ExpertMetadata {
        ExpertMetadata {
            name: "operations",
            version: VERSION,
            description: "Node availability, disk headroom, tablet balance, version drift",
            supported_architectures: vec![Architecture::SharedNothing, Architecture::SharedData],
        }
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "analyze_operations",
            description: "Check node liveness, disk usage, tablet distribution, and versions",
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
            mode: ToolMode::Plan,
        }]
    }

    fn plan(&self, _tool: &str, _args: &Value) -> DoctorResult<Vec<QueryDescriptor>> {
        Ok(vec![
            QueryDescriptor::admin("backends", "SHOW BACKENDS").required(),
            QueryDescriptor::admin("compute_nodes", "SHOW COMPUTE NODES"),
            QueryDescriptor::admin("frontends", "SHOW FRONTENDS"),
        ])
    }

    fn analyze(
        &self,
        _tool: &str,
        args: &Value,
        data: &CollectedDataset,
        architecture: Architecture,
    ) -> DoctorResult<Vec<Finding>> {
        let ctx = PassContext::new(args, data, library(), architecture);
        Ok(run_passes(&self.passes, &ctx, correlate))
    }

    fn recommend(&self, findings: &[Finding]) -> Vec<Recommendation> {
        findings.iter().filter_map(recommendation_for).collect()
    }
}

/// Worker rows: backends plus compute nodes, whichever catalogs exist.
fn worker_rows<'a>(data: &'a CollectedDataset) -> Vec<&'a Row> {
    let mut rows: Vec<&Row> = Vec::new();
    if let Some(backends) = data.rows("backends") {
        rows.extend(backends);
    }
    if let Some(nodes) = data.rows("compute_nodes") {
        rows.extend(nodes);
    }
    rows
}

fn node_name(row: &Row) -> String {
    row.str("Host")
        .or_else(|| row.str("IP"))
        .map(str::to_string)
        .or_else(|| row.i64("BackendId").map(|v| v.to_string()))
        .unwrap_or_else(|| "?".to_string())
}

fn is_alive(row: &Row) -> bool {
    row.str("Alive")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Percentages arrive as "85.32 %" strings.
fn parse_pct(row: &Row, column: &str) -> Option<f64> {
    let raw = row.get(column)?;
    if let Some(v) = raw.as_f64() {
        return Some(v);
    }
    raw.as_str()?.trim().trim_end_matches('%').trim().parse().ok()
}

// ============================================================================
// Pass: node_availability
// ============================================================================

struct NodeAvailabilityPass;

impl RulePass for NodeAvailabilityPass {
    fn label(&self) -> &'static str {
        "node_availability"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let workers = worker_rows(ctx.data);
        if workers.is_empty() {
            return vec![insufficient_data(self.label(), "no backend or compute-node listing")];
        }

        let mut findings = Vec::new();
        for row in &workers {
            if is_alive(row) {
                continue;
            }
            let name = node_name(row);
            findings.push(
                Finding::new(
                    Severity::Critical,
                    Priority::Immediate,
                    "backend_down",
                    format!("Node {} is not alive", name),
                )
                .evidence("node", name)
                .evidence("last_start_time", row.str("LastStartTime").unwrap_or(""))
                .evidence("err_msg", row.str("ErrMsg").unwrap_or(""))
                .impact("Replicas on this node are unavailable; write quorum may be at risk.")
                .action(RecommendedAction::with_statement(
                    "Check the node's heartbeat from the FE side",
                    "SHOW PROC '/backends'",
                )),
            );
        }

        for row in ctx.data.rows("frontends").unwrap_or(&[]) {
            if is_alive(row) {
                continue;
            }
            let name = node_name(row);
            findings.push(
                Finding::new(
                    Severity::Critical,
                    Priority::Immediate,
                    "frontend_down",
                    format!("Frontend {} is not alive", name),
                )
                .evidence("node", name)
                .evidence("role", row.str("Role").unwrap_or(""))
                .impact("Metadata quorum shrinks; losing one more follower stops writes."),
            );
        }

        findings
    }
}

// ============================================================================
// Pass: disk_pressure
// ============================================================================

struct DiskPressurePass;

impl RulePass for DiskPressurePass {
    fn label(&self) -> &'static str {
        "disk_pressure"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let workers = worker_rows(ctx.data);
        if workers.is_empty() {
            return Vec::new();
        }
        let rules = &ctx.rules.operations;

        let mut findings = Vec::new();
        for row in workers.iter().filter(|row| is_alive(row)) {
            let Some(used_pct) = parse_pct(row, "MaxDiskUsedPct") else { continue };
            let (kind, severity, priority) = match rules.classify_disk(used_pct) {
                Band::Critical => ("disk_full_imminent", Severity::Critical, Priority::Immediate),
                Band::Warning => ("disk_pressure", Severity::Warning, Priority::High),
                _ => continue,
            };
            let name = node_name(row);
            findings.push(
                Finding::new(
                    severity,
                    priority,
                    kind,
                    format!("Node {} has a volume at {:.1}% capacity", name, used_pct),
                )
                .evidence("node", name)
                .evidence("max_disk_used_pct", used_pct)
                .evidence("data_used_capacity", row.str("DataUsedCapacity").unwrap_or(""))
                .impact("A full volume stops tablet writes on this node and stalls balancing.")
                .action(RecommendedAction::new(
                    "Free space (drop obsolete tables/partitions) or add capacity",
                )),
            );
        }
        findings
    }
}

// ============================================================================
// Pass: tablet_skew
// ============================================================================

struct TabletSkewPass;

impl RulePass for TabletSkewPass {
    fn label(&self) -> &'static str {
        "tablet_skew"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let Some(backends) = ctx.data.rows("backends") else {
            return Vec::new();
        };
        let rules = &ctx.rules.operations;

        let counts: Vec<(String, i64)> = backends
            .iter()
            .filter(|row| is_alive(row))
            .filter_map(|row| Some((node_name(row), row.i64("TabletNum")?)))
            .collect();
        if counts.len() < 2 {
            return Vec::new();
        }

        let total: i64 = counts.iter().map(|(_, n)| n).sum();
        let avg = total as f64 / counts.len() as f64;
        if avg <= 0.0 {
            return Vec::new();
        }
        let (max_node, max_count) = counts
            .iter()
            .max_by_key(|(_, n)| *n)
            .expect("non-empty")
            .clone();
        let ratio = max_count as f64 / avg;

        if ratio <= rules.tablet_skew_ratio {
            return Vec::new();
        }

        vec![
            Finding::new(
                Severity::Warning,
                Priority::Medium,
                "tablet_distribution_skew",
                format!(
                    "Node {} holds {} tablets, {:.1}x the per-node average of {:.0}",
                    max_node, max_count, ratio, avg
                ),
            )
            .evidence("node", max_node)
            .evidence("tablet_count", max_count)
            .evidence("average", avg)
            .evidence("skew_ratio", ratio)
            .impact("The heavy node becomes the hot spot for both queries and compaction.")
            .action(RecommendedAction::with_statement(
                "Check the balancer state",
                "SHOW PROC '/cluster_balance'",
            )),
        ]
    }
}

// ============================================================================
// Pass: version_consistency
// ============================================================================

struct VersionConsistencyPass;

impl RulePass for VersionConsistencyPass {
    fn label(&self) -> &'static str {
        "version_consistency"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let workers = worker_rows(ctx.data);
        let versions: BTreeSet<String> = workers
            .iter()
            .filter(|row| is_alive(row))
            .filter_map(|row| row.str("Version").map(str::to_string))
            .collect();

        if versions.len() <= 1 {
            return Vec::new();
        }

        vec![
            Finding::new(
                Severity::Warning,
                Priority::Medium,
                "version_mismatch",
                format!(
                    "{} distinct backend versions are live: {}",
                    versions.len(),
                    versions.iter().cloned().collect::<Vec<_>>().join(", ")
                ),
            )
            .evidence("versions", json!(versions.iter().collect::<Vec<_>>()))
            .impact("Mixed versions after a partial upgrade cause subtle plan and codec issues.")
            .action(RecommendedAction::new("Finish the rolling upgrade on the lagging nodes")),
        ]
    }
}

// ============================================================================
// Correlation
// ============================================================================

/// A dead node while the survivors are near disk capacity compounds: the
/// rebalance has nowhere to put the displaced replicas.
fn correlate(findings: &[Finding], _ctx: &PassContext) -> Vec<Finding> {
    let node_down = findings.iter().any(|f| f.kind == "backend_down");
    let disk_tight = findings
        .iter()
        .any(|f| f.kind == "disk_pressure" || f.kind == "disk_full_imminent");
    if !(node_down && disk_tight) {
        return Vec::new();
    }
    vec![
        Finding::new(
            Severity::Critical,
            Priority::Immediate,
            "rebalance_capacity_risk",
            "A node is down while surviving nodes are near disk capacity; replica recovery \
             may not fit",
        )
        .evidence("source_findings", json!(["backend_down", "disk_pressure"]))
        .impact("Recovery can fill the remaining disks and take the whole cluster read-only."),
    ]
}

// ============================================================================
// Recommendation factory
// ============================================================================

fn recommendation_for(finding: &Finding) -> Option<Recommendation> {
    match finding.kind.as_str() {
        "backend_down" => {
            let node = finding.evidence.get("node")?.as_str()?.to_string();
            Some(Recommendation {
                id: "recover_backend".into(),
                category: "operations".into(),
                priority: Priority::Immediate,
                title: format!("Recover node {}", node),
                description:
                    "Restart the BE process or the host; investigate the crash before returning \
                     it to service."
                        .into(),
                finding_kinds: vec![finding.kind.clone()],
                phases: vec![],
                risk: "Restarting without reading the crash log invites a repeat.".into(),
                verification: "SHOW BACKENDS".into(),
            })
        },
        "disk_full_imminent" => Some(Recommendation {
            id: "free_disk_space".into(),
            category: "operations".into(),
            priority: Priority::Immediate,
            title: "Free disk space now".into(),
            description:
                "Drop obsolete partitions, expire old snapshots, or extend the volume before \
                 writes stop."
                    .into(),
            finding_kinds: vec![finding.kind.clone()],
            phases: vec![],
            risk: "Dropped data is gone; double-check retention requirements.".into(),
            verification: "SHOW BACKENDS".into(),
        }),
        "rebalance_capacity_risk" => Some(Recommendation {
            id: "stage_recovery_capacity".into(),
            category: "operations".into(),
            priority: Priority::Immediate,
            title: "Stage capacity before recovery".into(),
            description:
                "Free or add disk on the surviving nodes before the dead node's replicas \
                 re-replicate."
                    .into(),
            finding_kinds: vec![finding.kind.clone()],
            phases: vec![],
            risk: "Delaying recovery extends the under-replicated window.".into(),
            verification: "SHOW PROC '/cluster_balance'".into(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CollectedItem;
    use crate::services::rules::RuleLibrary;

    fn backend_row(host: &str, alive: bool, disk_pct: &str, tablets: i64, version: &str) -> Row {
        Row::new()
            .with("BackendId", host.replace('.', ""))
            .with("Host", host)
            .with("Alive", if alive { "true" } else { "false" })
            .with("MaxDiskUsedPct", disk_pct)
            .with("TabletNum", tablets)
            .with("Version", version)
    }

    fn dataset(backends: Vec<Row>) -> CollectedDataset {
        let mut data = CollectedDataset::new();
        data.insert("backends", CollectedItem::Rows(backends));
        data.insert("compute_nodes", CollectedItem::Rows(vec![]));
        data.insert("frontends", CollectedItem::Rows(vec![]));
        data
    }

    fn run(data: &CollectedDataset) -> Vec<Finding> {
        let expert = OperationsExpert::new();
        let rules = RuleLibrary::default();
        let args = json!({});
        let ctx = PassContext::new(&args, data, &rules, Architecture::SharedNothing);
        run_passes(&expert.passes, &ctx, correlate)
    }

    #[test]
    fn dead_backend_is_critical() {
        let data = dataset(vec![
            backend_row("10.0.0.1", true, "40.00 %", 100, "3.3.2"),
            backend_row("10.0.0.2", false, "40.00 %", 100, "3.3.2"),
        ]);
        let findings = run(&data);
        let finding = findings.iter().find(|f| f.kind == "backend_down").unwrap();
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.evidence["node"], json!("10.0.0.2"));
    }

    #[test]
    fn disk_bands_apply_to_live_nodes_only() {
        let data = dataset(vec![
            backend_row("10.0.0.1", true, "88.00 %", 100, "3.3.2"),
            backend_row("10.0.0.2", true, "97.50 %", 100, "3.3.2"),
            backend_row("10.0.0.3", false, "99.00 %", 100, "3.3.2"),
        ]);
        let findings = run(&data);
        assert!(findings.iter().any(|f| f.kind == "disk_pressure"));
        let critical = findings
            .iter()
            .find(|f| f.kind == "disk_full_imminent")
            .unwrap();
        assert_eq!(critical.evidence["node"], json!("10.0.0.2"));
        // the dead node contributes an availability finding, not a disk one
        assert_eq!(
            findings
                .iter()
                .filter(|f| f.kind.starts_with("disk_"))
                .count(),
            2
        );
    }

    #[test]
    fn tablet_skew_above_double_average() {
        let data = dataset(vec![
            backend_row("10.0.0.1", true, "40.00 %", 9000, "3.3.2"),
            backend_row("10.0.0.2", true, "40.00 %", 1000, "3.3.2"),
            backend_row("10.0.0.3", true, "40.00 %", 1000, "3.3.2"),
        ]);
        let findings = run(&data);
        let finding = findings
            .iter()
            .find(|f| f.kind == "tablet_distribution_skew")
            .unwrap();
        assert!(finding.evidence["skew_ratio"].as_f64().unwrap() > 2.0);
    }

    #[test]
    fn version_drift_is_reported_once() {
        let data = dataset(vec![
            backend_row("10.0.0.1", true, "40.00 %", 100, "3.3.2"),
            backend_row("10.0.0.2", true, "40.00 %", 100, "3.2.11"),
        ]);
        let findings = run(&data);
        let finding = findings.iter().find(|f| f.kind == "version_mismatch").unwrap();
        let versions = finding.evidence["versions"].as_array().unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[test]
    fn down_node_plus_tight_disks_compound() {
        let data = dataset(vec![
            backend_row("10.0.0.1", true, "90.00 %", 100, "3.3.2"),
            backend_row("10.0.0.2", false, "40.00 %", 100, "3.3.2"),
        ]);
        let findings = run(&data);
        let compound = findings
            .iter()
            .find(|f| f.kind == "rebalance_capacity_risk")
            .unwrap();
        assert_eq!(compound.severity, Severity::Critical);
    }

    #[test]
    fn healthy_cluster_is_quiet() {
        let data = dataset(vec![
            backend_row("10.0.0.1", true, "40.00 %", 1000, "3.3.2"),
            backend_row("10.0.0.2", true, "41.00 %", 1100, "3.3.2"),
        ]);
        assert!(run(&data).is_empty());
    }
}
