//! Ingestion expert
//!
//! Diagnoses load-pipeline health: queue depth, long-running and failed
//! jobs, commit frequency, and routine-load liveness. Two direct-mode tools
//! cover interleaved shapes: per-job failure diagnosis (rule ladder plus
//! optional LLM refinement) and load-profile bottleneck analysis.

use super::{
    Expert, ExpertMetadata, PassContext, RulePass, ToolMode, ToolSpec, arg_bool, arg_limit,
    arg_str, insufficient_data, run_passes,
};
use crate::config::LlmConfig;
use crate::models::{
    CollectedDataset, Finding, Phase, Priority, QueryDescriptor, Recommendation,
    RecommendedAction, Row, Severity, Step,
};
use crate::services::architecture::Architecture;
use crate::services::failure_classifier::classify_failure;
use crate::services::llm::{FailedJob, LlmClassifier, LlmClient, detect_provider};
use crate::services::load_profile;
use crate::services::probe::{Probe, validate_limit};
use crate::services::rules::library;
use crate::utils::{DoctorError, DoctorResult, format_rate_mbps};
use chrono::NaiveDateTime;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_JOB_LIMIT: i64 = 200;

pub struct IngestionExpert {
    passes: Vec<Box<dyn RulePass>>,
    classifier: LlmClassifier,
}

impl IngestionExpert {
    pub fn new() -> Self {
        Self::with_llm_config(&LlmConfig::default())
    }

    pub fn with_llm_config(config: &LlmConfig) -> Self {
        let client = if config.enabled {
            detect_provider().map(|provider| {
                LlmClient::new(
                    provider,
                    config.temperature,
                    config.max_tokens,
                    Duration::from_secs(config.timeout_secs),
                )
            })
        } else {
            None
        };

        Self {
            passes: vec![
                Box::new(QueueBacklogPass),
                Box::new(LongRunningLoadPass),
                Box::new(FailureRatePass),
                Box::new(FrequencyExtremePass),
                Box::new(RoutineLoadHealthPass),
            ],
            classifier: LlmClassifier::new(client),
        }
    }
}

impl Default for IngestionExpert {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Expert for IngestionExpert {
    fn metadata(&self) -> ExpertMetadata {
        ExpertMetadata {
            name: "ingestion",
            version: VERSION,
            description: "Load pipeline health: queues, failures, routine loads, sink profiles",
            supported_architectures: vec![Architecture::SharedNothing, Architecture::SharedData],
        }
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "analyze_ingestion",
                description: "Analyze recent load jobs and routine loads for backlog, \
                              failures, and extreme commit frequency",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "database": {
                            "type": "string",
                            "description": "Restrict analysis to one database"
                        },
                        "job_limit": {
                            "type": "integer",
                            "description": "How many recent jobs to inspect (default 200)"
                        },
                        "include_details": {
                            "type": "boolean",
                            "description": "Attach the raw collected dataset to the response"
                        }
                    },
                    "required": []
                }),
                mode: ToolMode::Plan,
            },
            ToolSpec {
                name: "diagnose_load_failure",
                description: "Classify one failed load job by label, with rule-based \
                              matchers and optional LLM refinement",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "label": {
                            "type": "string",
                            "description": "Label of the failed load job"
                        },
                        "use_llm": {
                            "type": "boolean",
                            "description": "Refine the rule-based category with the LLM adapter"
                        }
                    },
                    "required": ["label"]
                }),
                mode: ToolMode::Direct,
            },
            ToolSpec {
                name: "analyze_load_profile",
                description: "Parse a load execution profile and infer sink bottlenecks",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "profile_text": {
                            "type": "string",
                            "description": "Profile text, as emitted by the cluster"
                        },
                        "profile_file": {
                            "type": "string",
                            "description": "Path to a local file holding the profile text"
                        }
                    },
                    "required": []
                }),
                mode: ToolMode::Direct,
            },
        ]
    }

    fn plan(&self, tool: &str, args: &Value) -> DoctorResult<Vec<QueryDescriptor>> {
        if tool != "analyze_ingestion" {
            return Err(DoctorError::UnsupportedMode { tool: tool.to_string(), mode: "plan" });
        }
        let limit = validate_limit(arg_limit(args, "job_limit", DEFAULT_JOB_LIMIT)?)
            .map_err(DoctorError::Probe)?;

        let columns = "JOB_ID, LABEL, DB_NAME, TABLE_NAME, STATE, PROGRESS, TYPE, PRIORITY, \
                       SCAN_ROWS, SCAN_BYTES, FILTERED_ROWS, UNSELECTED_ROWS, SINK_ROWS, \
                       CREATE_TIME, LOAD_START_TIME, LOAD_COMMIT_TIME, LOAD_FINISH_TIME, \
                       ERROR_MSG";
        let (live, history) = match arg_str(args, "database") {
            Some(db) => (
                QueryDescriptor::sql(
                    "loads_live",
                    format!(
                        "SELECT {} FROM information_schema.loads WHERE DB_NAME = ? \
                         ORDER BY CREATE_TIME DESC LIMIT {}",
                        columns, limit
                    ),
                )
                .param(db)
                .required(),
                QueryDescriptor::sql(
                    "loads_history",
                    format!(
                        "SELECT {} FROM information_schema.loads_history WHERE DB_NAME = ? \
                         ORDER BY CREATE_TIME DESC LIMIT {}",
                        columns, limit
                    ),
                )
                .param(db),
            ),
            None => (
                QueryDescriptor::sql(
                    "loads_live",
                    format!(
                        "SELECT {} FROM information_schema.loads \
                         ORDER BY CREATE_TIME DESC LIMIT {}",
                        columns, limit
                    ),
                )
                .required(),
                QueryDescriptor::sql(
                    "loads_history",
                    format!(
                        "SELECT {} FROM information_schema.loads_history \
                         ORDER BY CREATE_TIME DESC LIMIT {}",
                        columns, limit
                    ),
                ),
            ),
        };

        let routine = match arg_str(args, "database") {
            Some(db) => {
                QueryDescriptor::admin("routine_loads", format!("SHOW ROUTINE LOAD FROM `{}`", db))
            },
            None => QueryDescriptor::admin("routine_loads", "SHOW PROC '/routine_loads'"),
        };

        Ok(vec![live, history, routine])
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

    async fn execute(
        &self,
        tool: &str,
        args: &Value,
        probe: &dyn Probe,
        _architecture: Architecture,
    ) -> DoctorResult<Vec<Finding>> {
        match tool {
            "diagnose_load_failure" => self.diagnose_load_failure(args, probe).await,
            "analyze_load_profile" => self.analyze_profile_tool(args).await,
            _ => Err(DoctorError::UnsupportedMode { tool: tool.to_string(), mode: "direct" }),
        }
    }

    fn recommend(&self, findings: &[Finding]) -> Vec<Recommendation> {
        findings.iter().filter_map(recommendation_for).collect()
    }
}

impl IngestionExpert {
    /// Direct mode: look the job up (live table first, history fallback),
    /// then classify its error text.
    async fn diagnose_load_failure(
        &self,
        args: &Value,
        probe: &dyn Probe,
    ) -> DoctorResult<Vec<Finding>> {
        let label = arg_str(args, "label")
            .ok_or_else(|| DoctorError::invalid_arguments("'label' is required"))?;
        let use_llm = arg_bool(args, "use_llm");

        let columns =
            "JOB_ID, LABEL, DB_NAME, TABLE_NAME, STATE, TYPE, ERROR_MSG, TRACKING_SQL";
        let live_sql = format!(
            "SELECT {} FROM information_schema.loads WHERE LABEL = ? ORDER BY JOB_ID DESC LIMIT 1",
            columns
        );
        let history_sql = format!(
            "SELECT {} FROM information_schema.loads_history WHERE LABEL = ? \
             ORDER BY JOB_ID DESC LIMIT 1",
            columns
        );

        let mut rows = probe
            .run_query(&live_sql, &[label.into()])
            .await
            .map_err(DoctorError::Probe)?;
        if rows.is_empty() {
            rows = match probe.run_query(&history_sql, &[label.into()]).await {
                Ok(rows) => rows,
                // Older clusters have no history table; that is not an error
                // for the lookup itself.
                Err(crate::utils::ProbeError::Absent(_)) => Vec::new(),
                Err(e) => return Err(DoctorError::Probe(e)),
            };
        }

        let Some(row) = rows.first() else {
            return Ok(vec![
                Finding::new(
                    Severity::Issue,
                    Priority::Low,
                    "load_job_not_found",
                    format!("No load job with label '{}' in live or historical tables", label),
                )
                .evidence("label", label)
                .impact("Nothing to diagnose; check the label or the retention window."),
            ]);
        };

        let error_msg = row.str("ERROR_MSG").unwrap_or("");
        let state = row.str("STATE").unwrap_or("UNKNOWN");
        if error_msg.is_empty() && state != "CANCELLED" {
            return Ok(vec![
                Finding::new(
                    Severity::Insight,
                    Priority::Low,
                    "load_job_not_failed",
                    format!("Job '{}' is in state {} with no error message", label, state),
                )
                .evidence("label", label)
                .evidence("state", state)
                .impact("Only failed jobs carry a classifiable error."),
            ]);
        }

        let job = FailedJob {
            label,
            job_type: row.str("TYPE").unwrap_or("UNKNOWN"),
            db_name: row.str("DB_NAME").unwrap_or(""),
            table_name: row.str("TABLE_NAME").unwrap_or(""),
            state,
            error_msg,
            tracking_sql: row.str("TRACKING_SQL"),
        };

        let diagnosis = if use_llm && self.classifier.enabled() {
            self.classifier.classify(&job).await
        } else {
            // Deterministic path: ladder only.
            let category = classify_failure(error_msg);
            crate::services::llm::FailureDiagnosis {
                category,
                method: crate::services::llm::ClassificationMethod::Rule,
                rule_category: category,
                root_cause: None,
                details: Vec::new(),
                related_issues: Vec::new(),
                recommendations: Vec::new(),
            }
        };

        let mut finding = Finding::new(
            Severity::Warning,
            Priority::High,
            format!("load_failure_{}", diagnosis.category.as_str()),
            format!(
                "Load '{}' failed with a {} error: {}",
                label,
                diagnosis.category.as_str(),
                truncate(error_msg, 200)
            ),
        )
        .evidence("label", label)
        .evidence("state", state)
        .evidence("category", diagnosis.category.as_str())
        .evidence("classification_method", json!(diagnosis.method))
        .evidence("rule_category", diagnosis.rule_category.as_str())
        .evidence("error_msg", truncate(error_msg, 500))
        .impact("The job did not commit; downstream tables are missing this batch.");

        if let Some(root_cause) = &diagnosis.root_cause {
            finding = finding.evidence("root_cause", root_cause.as_str());
        }
        if !diagnosis.details.is_empty() {
            finding = finding.evidence("details", json!(diagnosis.details));
        }
        for recommendation in &diagnosis.recommendations {
            finding = finding.action(RecommendedAction::new(recommendation));
        }
        if let Some(tracking) = row.str("TRACKING_SQL") {
            finding = finding.action(RecommendedAction::with_statement(
                "Fetch rejected-row details",
                tracking,
            ));
        }

        Ok(vec![finding])
    }

    /// Direct mode without cluster access: profile text inline or from a
    /// local file.
    async fn analyze_profile_tool(&self, args: &Value) -> DoctorResult<Vec<Finding>> {
        let text = if let Some(inline) = arg_str(args, "profile_text") {
            inline.to_string()
        } else if let Some(path) = arg_str(args, "profile_file") {
            tokio::fs::read_to_string(path).await.map_err(|e| {
                DoctorError::invalid_arguments(format!("cannot read profile file {}: {}", path, e))
            })?
        } else {
            return Err(DoctorError::invalid_arguments(
                "one of 'profile_text' or 'profile_file' is required",
            ));
        };

        let analysis = load_profile::analyze(&text, library())?;
        if analysis.tree.roots.is_empty() {
            return Ok(vec![
                Finding::new(
                    Severity::Issue,
                    Priority::Low,
                    "profile_empty",
                    "The profile text contains no recognizable nodes",
                )
                .impact("Nothing to analyze; confirm the text is a sink execution profile."),
            ]);
        }
        Ok(analysis.findings)
    }
}

// ============================================================================
// Live/history merge
// ============================================================================

/// Merge live and historical load rows: historical wins for rows older than
/// the dedup window, live wins inside it; (label, job_id) identifies a job.
fn merged_loads<'a>(ctx: &PassContext<'a>) -> Option<Vec<&'a Row>> {
    let live = ctx.data.rows("loads_live")?;
    let history = ctx.data.rows("loads_history").unwrap_or(&[]);
    let window_secs = ctx.rules.ingestion.history_dedup_window_secs as i64;

    let key = |row: &Row| {
        (
            row.str("LABEL").unwrap_or("").to_string(),
            row.i64("JOB_ID").unwrap_or(-1),
        )
    };

    let mut order: Vec<(String, i64)> = Vec::new();
    let mut by_key: HashMap<(String, i64), &Row> = HashMap::new();

    for row in history {
        let k = key(row);
        if by_key.insert(k.clone(), row).is_none() {
            order.push(k);
        }
    }
    for row in live {
        let k = key(row);
        let age_secs = row
            .timestamp("CREATE_TIME")
            .map(|ts| (ctx.now - ts).num_seconds())
            .unwrap_or(i64::MAX);
        let inside_window = age_secs <= window_secs;
        if inside_window || !by_key.contains_key(&k) {
            if by_key.insert(k.clone(), row).is_none() {
                order.push(k);
            }
        }
    }

    Some(order.into_iter().filter_map(|k| by_key.remove(&k)).collect())
}

fn is_running(row: &Row) -> bool {
    row.is_null("LOAD_FINISH_TIME")
}

// ============================================================================
// Pass: queue_backlog
// ============================================================================

struct QueueBacklogPass;

impl RulePass for QueueBacklogPass {
    fn label(&self) -> &'static str {
        "queue_backlog"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let Some(jobs) = merged_loads(ctx) else {
            return vec![insufficient_data(self.label(), "information_schema.loads unavailable")];
        };
        let rules = &ctx.rules.ingestion;

        let running: Vec<&Row> = jobs.iter().copied().filter(|row| is_running(row)).collect();
        let pending: Vec<&Row> = running
            .iter()
            .copied()
            .filter(|row| row.str("STATE") == Some("PENDING"))
            .collect();

        let sample: Vec<Value> = pending
            .iter()
            .take(10)
            .map(|row| {
                json!({
                    "job_id": row.i64("JOB_ID"),
                    "label": row.str("LABEL"),
                    "create_time": row.str("CREATE_TIME"),
                })
            })
            .collect();

        if pending.len() > rules.pending_critical {
            vec![
                Finding::new(
                    Severity::Critical,
                    Priority::High,
                    "load_queue_backlog",
                    format!(
                        "{} load job(s) are PENDING ({} running total); the scheduler is saturated",
                        pending.len(),
                        running.len()
                    ),
                )
                .evidence("pending_count", pending.len() as i64)
                .evidence("running_count", running.len() as i64)
                .evidence("sample_jobs", json!(sample))
                .impact("New data sits unloaded; end-to-end freshness degrades cluster-wide."),
            ]
        } else if pending.len() > rules.pending_warning {
            vec![
                Finding::new(
                    Severity::Warning,
                    Priority::Medium,
                    "load_queue_buildup",
                    format!("{} load job(s) are waiting in PENDING state", pending.len()),
                )
                .evidence("pending_count", pending.len() as i64)
                .evidence("running_count", running.len() as i64)
                .evidence("sample_jobs", json!(sample))
                .impact("Queue depth is rising; watch for saturation."),
            ]
        } else {
            Vec::new()
        }
    }
}

// ============================================================================
// Pass: long_running_load
// ============================================================================

struct LongRunningLoadPass;

impl RulePass for LongRunningLoadPass {
    fn label(&self) -> &'static str {
        "long_running_load"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let Some(jobs) = merged_loads(ctx) else {
            // queue_backlog already reported the missing source
            return Vec::new();
        };
        let limit_ms = ctx.rules.ingestion.long_running_hours * 3_600_000.0;

        let mut findings = Vec::new();
        for row in jobs.iter().filter(|row| is_running(row)) {
            let Some(start) = row
                .timestamp("LOAD_START_TIME")
                .or_else(|| row.timestamp("CREATE_TIME"))
            else {
                continue;
            };
            let age_ms = (ctx.now - start).num_milliseconds() as f64;
            if age_ms > limit_ms {
                let mut finding = Finding::new(
                    Severity::Warning,
                    Priority::Medium,
                    "long_running_load",
                    format!(
                        "Load '{}' has been running {:.1}h",
                        row.str("LABEL").unwrap_or("?"),
                        age_ms / 3_600_000.0
                    ),
                )
                .evidence("job_id", row.i64("JOB_ID").unwrap_or(-1))
                .evidence("label", row.str("LABEL").unwrap_or(""))
                .evidence("age_hours", age_ms / 3_600_000.0)
                .evidence("progress", row.str("PROGRESS").unwrap_or(""))
                .impact("The transaction stays open, pinning versions and load slots.");
                // A visibly slow scan rate separates "big job" from "stuck job".
                if let Some(scan_bytes) = row.i64("SCAN_BYTES").filter(|b| *b > 0) {
                    let rate = scan_bytes as f64 / (age_ms / 1000.0);
                    finding = finding.evidence("scan_rate", format_rate_mbps(rate));
                }
                findings.push(finding);
            }
        }
        findings
    }
}

// ============================================================================
// Pass: failure_rate
// ============================================================================

struct FailureRatePass;

impl RulePass for FailureRatePass {
    fn label(&self) -> &'static str {
        "failure_rate"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let Some(jobs) = merged_loads(ctx) else {
            return Vec::new();
        };
        let rules = &ctx.rules.ingestion;

        let finished: Vec<&Row> = jobs.iter().copied().filter(|row| !is_running(row)).collect();
        if finished.len() < rules.min_jobs_for_rate {
            return vec![insufficient_data(
                self.label(),
                format!(
                    "only {} finished job(s) in the window; {} needed for a stable rate",
                    finished.len(),
                    rules.min_jobs_for_rate
                ),
            )];
        }

        let failed: Vec<&Row> = finished
            .iter()
            .copied()
            .filter(|row| row.str("STATE") == Some("CANCELLED"))
            .collect();
        let rate_pct = failed.len() as f64 / finished.len() as f64 * 100.0;

        if rate_pct < rules.failure_rate_warning_pct {
            return Vec::new();
        }

        // Categorize the failures so the finding names the dominant cause.
        let mut categories: HashMap<&'static str, usize> = HashMap::new();
        for row in &failed {
            let category = classify_failure(row.str("ERROR_MSG").unwrap_or(""));
            *categories.entry(category.as_str()).or_insert(0) += 1;
        }
        let mut category_counts: Vec<(&str, usize)> = categories.into_iter().collect();
        category_counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        let sample: Vec<Value> = failed
            .iter()
            .take(5)
            .map(|row| {
                json!({
                    "label": row.str("LABEL"),
                    "error": truncate(row.str("ERROR_MSG").unwrap_or(""), 160),
                })
            })
            .collect();

        let severity = if rate_pct >= rules.failure_rate_critical_pct {
            Severity::Critical
        } else {
            Severity::Warning
        };

        vec![
            Finding::new(
                severity,
                Priority::High,
                "high_load_failure_rate",
                format!(
                    "{:.0}% of recent load jobs failed ({} of {}); dominant cause: {}",
                    rate_pct,
                    failed.len(),
                    finished.len(),
                    category_counts
                        .first()
                        .map(|(c, _)| *c)
                        .unwrap_or("unknown")
                ),
            )
            .evidence("failure_rate_pct", rate_pct)
            .evidence("failed_count", failed.len() as i64)
            .evidence("finished_count", finished.len() as i64)
            .evidence("categories", json!(category_counts
                .iter()
                .map(|(c, n)| json!({ "category": c, "count": n }))
                .collect::<Vec<_>>()))
            .evidence("sample_failures", json!(sample))
            .impact("Data is being dropped or retried; producers upstream may be backing up."),
        ]
    }
}

// ============================================================================
// Pass: frequency_extreme
// ============================================================================

struct FrequencyExtremePass;

impl RulePass for FrequencyExtremePass {
    fn label(&self) -> &'static str {
        "frequency_extreme"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let Some(jobs) = merged_loads(ctx) else {
            return Vec::new();
        };
        let rules = &ctx.rules.ingestion;

        let mut times: Vec<NaiveDateTime> = jobs
            .iter()
            .filter_map(|row| row.timestamp("CREATE_TIME"))
            .collect();
        if times.len() < 2 {
            return Vec::new();
        }
        times.sort();
        let span_secs = (*times.last().expect("non-empty") - times[0]).num_seconds();
        if span_secs <= 0 {
            return Vec::new();
        }
        let per_min = times.len() as f64 / (span_secs as f64 / 60.0);

        if per_min > rules.frequency_per_min_warning {
            vec![
                Finding::new(
                    Severity::Warning,
                    Priority::Medium,
                    "load_frequency_extreme",
                    format!(
                        "{:.0} load jobs/minute over the sampled window ({} jobs in {}s)",
                        per_min,
                        times.len(),
                        span_secs
                    ),
                )
                .evidence("jobs_per_minute", per_min)
                .evidence("sampled_jobs", times.len() as i64)
                .evidence("window_secs", span_secs)
                .impact(
                    "Each tiny commit creates a version; compaction and metadata load grow \
                     superlinearly with commit frequency.",
                )
                .action(RecommendedAction::new(
                    "Batch writes upstream or raise the sink's flush interval",
                )),
            ]
        } else {
            Vec::new()
        }
    }
}

// ============================================================================
// Pass: routine_load_health
// ============================================================================

struct RoutineLoadHealthPass;

impl RulePass for RoutineLoadHealthPass {
    fn label(&self) -> &'static str {
        "routine_load_health"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let Some(rows) = ctx.data.rows("routine_loads") else {
            return vec![insufficient_data(self.label(), "routine load listing unavailable")];
        };

        let mut findings = Vec::new();
        for row in rows {
            let name = row.str("Name").or_else(|| row.str("NAME")).unwrap_or("?");
            let state = row.str("State").or_else(|| row.str("STATE")).unwrap_or("");
            // Pause/cancel reasons are free text; they travel as opaque
            // evidence, never through the failure classifier.
            let reason = row
                .str("ReasonOfStateChanged")
                .or_else(|| row.str("REASON"))
                .unwrap_or("");

            match state {
                "PAUSED" => findings.push(
                    Finding::new(
                        Severity::Warning,
                        Priority::High,
                        "routine_load_paused",
                        format!("Routine load '{}' is paused", name),
                    )
                    .evidence("job_name", name)
                    .evidence("reason", reason)
                    .impact("Stream consumption stopped; source lag is growing.")
                    .action(RecommendedAction::with_statement(
                        "Resume the job once the cause is fixed",
                        format!("RESUME ROUTINE LOAD FOR {}", name),
                    )),
                ),
                "CANCELLED" => findings.push(
                    Finding::new(
                        Severity::Warning,
                        Priority::Medium,
                        "routine_load_cancelled",
                        format!("Routine load '{}' was cancelled", name),
                    )
                    .evidence("job_name", name)
                    .evidence("reason", reason)
                    .impact("The job must be recreated; consumption is not resuming on its own."),
                ),
                "RUNNING" => {
                    let current_tasks = row
                        .i64("CurrentTaskNum")
                        .or_else(|| row.i64("CURRENT_TASK_NUM"))
                        .unwrap_or(-1);
                    if current_tasks == 0 {
                        findings.push(
                            Finding::new(
                                Severity::Critical,
                                Priority::High,
                                "routine_load_stalled",
                                format!(
                                    "Routine load '{}' is RUNNING but has zero active tasks",
                                    name
                                ),
                            )
                            .evidence("job_name", name)
                            .evidence("current_task_num", 0)
                            .impact(
                                "The job looks healthy but consumes nothing; lag grows silently.",
                            ),
                        );
                    }
                },
                _ => {},
            }
        }
        findings
    }
}

// ============================================================================
// Correlation
// ============================================================================

/// Backlog plus a high failure rate in the same window is one compound
/// condition: retries are feeding the queue they are stuck in.
fn correlate(findings: &[Finding], _ctx: &PassContext) -> Vec<Finding> {
    let backlog = findings
        .iter()
        .any(|f| f.kind == "load_queue_backlog" || f.kind == "load_queue_buildup");
    let failures = findings.iter().any(|f| f.kind == "high_load_failure_rate");

    if backlog && failures {
        vec![
            Finding::new(
                Severity::Critical,
                Priority::High,
                "ingestion_pipeline_degraded",
                "Queue backlog and a high failure rate are active together: failed jobs are \
                 likely re-entering the queue",
            )
            .evidence(
                "source_findings",
                json!(["load_queue_backlog", "high_load_failure_rate"]),
            )
            .impact("Throughput collapses as retries compete with fresh loads for slots."),
        ]
    } else {
        Vec::new()
    }
}

// ============================================================================
// Recommendation factory
// ============================================================================

fn recommendation_for(finding: &Finding) -> Option<Recommendation> {
    match finding.kind.as_str() {
        "routine_load_paused" => {
            let name = finding.evidence.get("job_name")?.as_str()?.to_string();
            Some(Recommendation {
                id: "routine_load_recovery".into(),
                category: "ingestion".into(),
                priority: Priority::High,
                title: format!("Recover routine load '{}'", name),
                description:
                    "Inspect the pause reason, fix the upstream condition, then resume the job."
                        .into(),
                finding_kinds: vec![finding.kind.clone()],
                phases: vec![
                    Phase::new(
                        "preparation",
                        vec![Step::inspect(
                            format!("SHOW ROUTINE LOAD FOR {}", name),
                            "Read the pause reason and the consumption lag",
                        )],
                    ),
                    Phase::new(
                        "execution",
                        vec![Step::mutate(
                            format!("RESUME ROUTINE LOAD FOR {}", name),
                            "Restart stream consumption",
                            format!("PAUSE ROUTINE LOAD FOR {}", name),
                        )],
                    ),
                    Phase::new(
                        "verification",
                        vec![Step::observe(
                            format!("SHOW ROUTINE LOAD FOR {}", name),
                            "Confirm the state returns to RUNNING and lag shrinks",
                        )],
                    ),
                ],
                risk: "Resuming against a broken source will pause the job again.".into(),
                verification: format!("SHOW ROUTINE LOAD FOR {}", name),
            })
        },
        "load_queue_backlog" => Some(Recommendation {
            id: "drain_load_queue".into(),
            category: "ingestion".into(),
            priority: Priority::High,
            title: "Drain the load queue".into(),
            description:
                "Throttle producers, then raise load parallelism until the PENDING set drains."
                    .into(),
            finding_kinds: vec![finding.kind.clone()],
            phases: vec![],
            risk: "Raising parallelism shifts pressure to memory and compaction.".into(),
            verification:
                "SELECT COUNT(*) FROM information_schema.loads WHERE STATE = 'PENDING'".into(),
        }),
        "high_load_failure_rate" => Some(Recommendation {
            id: "triage_load_failures".into(),
            category: "ingestion".into(),
            priority: Priority::High,
            title: "Triage the dominant failure category".into(),
            description:
                "Run diagnose_load_failure on the sampled labels; fix the dominant category first."
                    .into(),
            finding_kinds: vec![finding.kind.clone()],
            phases: vec![],
            risk: "None; diagnosis is read-only.".into(),
            verification:
                "SELECT STATE, COUNT(*) FROM information_schema.loads GROUP BY STATE".into(),
        }),
        "load_frequency_extreme" => Some(Recommendation {
            id: "batch_small_loads".into(),
            category: "ingestion".into(),
            priority: Priority::Medium,
            title: "Batch small loads upstream".into(),
            description: "Reduce commit frequency by batching rows before they reach the sink."
                .into(),
            finding_kinds: vec![finding.kind.clone()],
            phases: vec![],
            risk: "Larger batches raise end-to-end latency slightly.".into(),
            verification: "Re-run analyze_ingestion and compare jobs_per_minute".into(),
        }),
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &s[..cut])
    }
}

#[cfg(test)]
mod tests;
