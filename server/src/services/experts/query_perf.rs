//! Query-performance expert
//!
//! Looks at the live query set and the FE queueing configuration: long
//! runners, oversized scans, and concurrency without admission control.

use super::{
    Expert, ExpertMetadata, PassContext, RulePass, ToolMode, ToolSpec, insufficient_data,
    run_passes,
};
use crate::models::{
    CollectedDataset, Finding, Priority, QueryDescriptor, Recommendation, RecommendedAction,
    Severity,
};
use crate::services::architecture::Architecture;
use crate::services::rules::library;
use crate::utils::{DoctorResult, format_bytes};
use serde_json::{Value, json};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct QueryPerfExpert {
    passes: Vec<Box<dyn RulePass>>,
}

impl QueryPerfExpert {
    pub fn new() -> Self {
        Self {
            passes: vec![
                Box::new(SlowQueryPass),
                Box::new(ScanPressurePass),
                Box::new(QueueConfigPass),
            ],
        }
    }
}

impl Default for QueryPerfExpert {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Expert for QueryPerfExpert {
    fn metadata(&self) -> ExpertMetadata {
        ExpertMetadata {
            name: "query-performance",
            version: VERSION,
            description: "Live query pressure: long runners, oversized scans, admission control",
            supported_architectures: vec![Architecture::SharedNothing, Architecture::SharedData],
        }
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "analyze_query_performance",
            description: "Analyze currently running queries and the FE query-queue settings",
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
            QueryDescriptor::admin("current_queries", "SHOW PROC '/current_queries'").required(),
            QueryDescriptor::admin(
                "queue_config",
                "SHOW FRONTEND CONFIG LIKE 'enable_query_queue%'",
            ),
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

/// `/current_queries` reports ExecTime in seconds (older versions) or as a
/// unit-suffixed string; accept both.
fn exec_time_secs(row: &crate::models::Row) -> Option<f64> {
    if let Some(secs) = row.f64("ExecTime") {
        return Some(secs);
    }
    row.str("ExecTime")
        .and_then(crate::services::load_profile::ValueParser::parse_time_to_ms)
        .map(|ms| ms / 1000.0)
}

// ============================================================================
// Pass: slow_query
// ============================================================================

struct SlowQueryPass;

impl RulePass for SlowQueryPass {
    fn label(&self) -> &'static str {
        "slow_query"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let Some(rows) = ctx.data.rows("current_queries") else {
            return vec![insufficient_data(self.label(), "SHOW PROC '/current_queries' unavailable")];
        };
        let rules = &ctx.rules.query_perf;

        let mut findings = Vec::new();
        for row in rows {
            let Some(secs) = exec_time_secs(row) else { continue };
            if secs < rules.slow_query_warning_secs {
                continue;
            }
            let (kind, severity, priority) = if secs >= rules.slow_query_critical_secs {
                ("stuck_query", Severity::Critical, Priority::High)
            } else {
                ("slow_query", Severity::Warning, Priority::Medium)
            };
            let query_id = row.str("QueryId").unwrap_or("?");
            findings.push(
                Finding::new(
                    severity,
                    priority,
                    kind,
                    format!("Query {} has been executing for {:.0}s", query_id, secs),
                )
                .evidence("query_id", query_id)
                .evidence("exec_secs", secs)
                .evidence("user", row.str("User").unwrap_or(""))
                .evidence("database", row.str("Database").unwrap_or(""))
                .impact("Long runners hold memory and scan slots that queued queries wait on.")
                .action(RecommendedAction::with_statement(
                    "Kill it if it is a runaway",
                    format!("KILL QUERY '{}'", query_id),
                )),
            );
        }
        findings
    }
}

// ============================================================================
// Pass: scan_pressure
// ============================================================================

struct ScanPressurePass;

impl RulePass for ScanPressurePass {
    fn label(&self) -> &'static str {
        "scan_pressure"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let Some(rows) = ctx.data.rows("current_queries") else {
            // slow_query already reported the missing source
            return Vec::new();
        };
        let rules = &ctx.rules.query_perf;

        let mut findings = Vec::new();
        for row in rows {
            let Some(scan_rows) = row.i64("ScanRows") else { continue };
            if scan_rows <= rules.scan_rows_large {
                continue;
            }
            let scan_bytes = row.i64("ScanBytes").unwrap_or(0).max(0) as u64;
            findings.push(
                Finding::new(
                    Severity::Warning,
                    Priority::Medium,
                    "large_scan_query",
                    format!(
                        "Query {} has scanned {} rows ({}) so far",
                        row.str("QueryId").unwrap_or("?"),
                        scan_rows,
                        format_bytes(scan_bytes)
                    ),
                )
                .evidence("query_id", row.str("QueryId").unwrap_or(""))
                .evidence("scan_rows", scan_rows)
                .evidence("scan_bytes", scan_bytes)
                .impact("Full scans of this size evict cache and saturate IO for everyone else.")
                .action(RecommendedAction::new(
                    "Check partition pruning and add a filter on the partition column",
                )),
            );
        }
        findings
    }
}

// ============================================================================
// Pass: queue_config
// ============================================================================

struct QueueConfigPass;

impl RulePass for QueueConfigPass {
    fn label(&self) -> &'static str {
        "queue_config"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let Some(config_rows) = ctx.data.rows("queue_config") else {
            return vec![insufficient_data(self.label(), "query queue configuration unavailable")];
        };
        let Some(query_rows) = ctx.data.rows("current_queries") else {
            return Vec::new();
        };
        let rules = &ctx.rules.query_perf;

        let queue_enabled = config_rows
            .iter()
            .find(|row| {
                row.str("Key")
                    .map(|k| k.eq_ignore_ascii_case("enable_query_queue_select"))
                    .unwrap_or(false)
            })
            .and_then(|row| row.str("Value"))
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if !queue_enabled && query_rows.len() > rules.queue_pending_warning {
            return vec![
                Finding::new(
                    Severity::Issue,
                    Priority::Medium,
                    "query_queue_disabled",
                    format!(
                        "{} queries run concurrently with admission control disabled",
                        query_rows.len()
                    ),
                )
                .evidence("concurrent_queries", query_rows.len() as i64)
                .evidence("enable_query_queue_select", queue_enabled)
                .impact("Bursts land on the cluster unthrottled; one spike degrades everything.")
                .action(RecommendedAction::with_statement(
                    "Enable select-query queuing",
                    "ADMIN SET FRONTEND CONFIG (\"enable_query_queue_select\" = \"true\")",
                )),
            ];
        }
        Vec::new()
    }
}

// ============================================================================
// Correlation
// ============================================================================

/// Several slow queries at once is a pileup, not a set of independent
/// incidents.
fn correlate(findings: &[Finding], _ctx: &PassContext) -> Vec<Finding> {
    let slow_count = findings
        .iter()
        .filter(|f| f.kind == "slow_query" || f.kind == "stuck_query")
        .count();
    if slow_count < 3 {
        return Vec::new();
    }
    vec![
        Finding::new(
            Severity::Critical,
            Priority::High,
            "query_pileup",
            format!("{} queries are simultaneously past the slow threshold", slow_count),
        )
        .evidence("slow_query_count", slow_count as i64)
        .evidence("source_findings", json!(["slow_query", "stuck_query"]))
        .impact("A shared bottleneck (IO, memory, one hot table) is likely behind all of them."),
    ]
}

// ============================================================================
// Recommendation factory
// ============================================================================

fn recommendation_for(finding: &Finding) -> Option<Recommendation> {
    match finding.kind.as_str() {
        "stuck_query" => {
            let query_id = finding.evidence.get("query_id")?.as_str()?.to_string();
            Some(Recommendation {
                id: "kill_stuck_query".into(),
                category: "query-performance".into(),
                priority: Priority::High,
                title: format!("Review and kill query {}", query_id),
                description:
                    "Verify the query is not a legitimate batch job, then terminate it."
                        .into(),
                finding_kinds: vec![finding.kind.clone()],
                phases: vec![],
                risk: "Killing a legitimate batch job loses its progress.".into(),
                verification: "SHOW PROC '/current_queries'".into(),
            })
        },
        "query_pileup" => Some(Recommendation {
            id: "investigate_shared_bottleneck".into(),
            category: "query-performance".into(),
            priority: Priority::High,
            title: "Find the shared bottleneck behind the pileup".into(),
            description:
                "Run analyze_memory and analyze_operations; pileups usually trace to one \
                 saturated resource."
                    .into(),
            finding_kinds: vec![finding.kind.clone()],
            phases: vec![],
            risk: "None; investigation is read-only.".into(),
            verification: "SHOW PROC '/current_queries'".into(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CollectedItem, Row};
    use crate::services::rules::RuleLibrary;

    fn query_row(query_id: &str, exec_secs: f64, scan_rows: i64) -> Row {
        Row::new()
            .with("QueryId", query_id)
            .with("User", "analyst")
            .with("Database", "sales")
            .with("ExecTime", exec_secs)
            .with("ScanRows", scan_rows)
            .with("ScanBytes", scan_rows * 100)
    }

    fn dataset(queries: Vec<Row>, queue_enabled: Option<bool>) -> CollectedDataset {
        let mut data = CollectedDataset::new();
        data.insert("current_queries", CollectedItem::Rows(queries));
        let config = queue_enabled
            .map(|enabled| {
                vec![Row::new()
                    .with("Key", "enable_query_queue_select")
                    .with("Value", if enabled { "true" } else { "false" })]
            })
            .unwrap_or_default();
        data.insert("queue_config", CollectedItem::Rows(config));
        data
    }

    fn run(data: &CollectedDataset) -> Vec<Finding> {
        let expert = QueryPerfExpert::new();
        let rules = RuleLibrary::default();
        let args = json!({});
        let ctx = PassContext::new(&args, data, &rules, Architecture::SharedNothing);
        run_passes(&expert.passes, &ctx, correlate)
    }

    #[test]
    fn slow_and_stuck_bands() {
        let data = dataset(
            vec![
                query_row("q-fast", 5.0, 1000),
                query_row("q-slow", 120.0, 1000),
                query_row("q-stuck", 900.0, 1000),
            ],
            Some(true),
        );
        let findings = run(&data);
        assert!(findings.iter().any(|f| f.kind == "slow_query"));
        let stuck = findings.iter().find(|f| f.kind == "stuck_query").unwrap();
        assert_eq!(stuck.severity, Severity::Critical);
        assert_eq!(stuck.evidence["query_id"], json!("q-stuck"));
    }

    #[test]
    fn exec_time_accepts_suffixed_strings() {
        let row = Row::new().with("ExecTime", "2m30s");
        assert_eq!(exec_time_secs(&row), Some(150.0));
    }

    #[test]
    fn large_scan_is_flagged() {
        let data = dataset(vec![query_row("q-scan", 10.0, 2_000_000_000)], Some(true));
        let findings = run(&data);
        let finding = findings.iter().find(|f| f.kind == "large_scan_query").unwrap();
        assert_eq!(finding.evidence["scan_rows"], json!(2_000_000_000i64));
    }

    #[test]
    fn disabled_queue_with_high_concurrency() {
        let queries: Vec<Row> = (0..15)
            .map(|i| query_row(&format!("q{}", i), 1.0, 100))
            .collect();
        let data = dataset(queries, Some(false));
        let findings = run(&data);
        assert!(findings.iter().any(|f| f.kind == "query_queue_disabled"));
    }

    #[test]
    fn pileup_compound_after_three_slow() {
        let queries: Vec<Row> = (0..4)
            .map(|i| query_row(&format!("q{}", i), 200.0, 100))
            .collect();
        let data = dataset(queries, Some(true));
        let findings = run(&data);
        let pileup = findings.iter().find(|f| f.kind == "query_pileup").unwrap();
        assert_eq!(pileup.evidence["slow_query_count"], json!(4));
    }

    #[test]
    fn quiet_cluster_is_quiet() {
        let data = dataset(vec![query_row("q1", 3.0, 100)], Some(true));
        assert!(run(&data).is_empty());
    }
}
