//! Compaction expert
//!
//! Diagnoses lake (shared-data) compaction health: per-partition compaction
//! scores, scheduler capacity against demand, BE worker-thread sizing, task
//! execution health, and the FE parameter surface.

use super::{
    Expert, ExpertMetadata, PassContext, RulePass, ToolMode, ToolSpec, arg_limit, arg_str,
    insufficient_data, run_passes,
};
use crate::models::{
    CollectedDataset, Finding, Phase, Priority, QueryDescriptor, Recommendation,
    RecommendedAction, Row, Severity, Step,
};
use crate::services::architecture::Architecture;
use crate::services::probe::validate_limit;
use crate::services::rules::{Band, library};
use crate::utils::DoctorResult;
use serde_json::{Value, json};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_TOP_N: i64 = 50;

pub struct CompactionExpert {
    passes: Vec<Box<dyn RulePass>>,
}

impl CompactionExpert {
    pub fn new() -> Self {
        Self {
            passes: vec![
                Box::new(ScoreBandPass),
                Box::new(CapacitySaturationPass),
                Box::new(ThreadSizingPass),
                Box::new(TaskExecutionPass),
                Box::new(ParameterAuditPass),
            ],
        }
    }
}

impl Default for CompactionExpert {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Expert for CompactionExpert {
    fn metadata(&self) -> ExpertMetadata {
        ExpertMetadata {
            name: "compaction",
            version: VERSION,
            description: "Lake compaction health: scores, capacity, threads, task execution",
            supported_architectures: vec![Architecture::SharedData],
        }
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "analyze_compaction",
            description: "Analyze compaction health across partitions, scheduler capacity, \
                          and BE worker configuration",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "database": {
                        "type": "string",
                        "description": "Restrict analysis to one database"
                    },
                    "table": {
                        "type": "string",
                        "description": "Restrict analysis to one table (requires database)"
                    },
                    "top_n": {
                        "type": "integer",
                        "description": "How many highest-score partitions to inspect (default 50)"
                    },
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

    fn plan(&self, _tool: &str, args: &Value) -> DoctorResult<Vec<QueryDescriptor>> {
        let top_n = validate_limit(arg_limit(args, "top_n", DEFAULT_TOP_N)?)
            .map_err(crate::utils::DoctorError::Probe)?;

        let mut partitions_sql = String::from(
            "SELECT DB_NAME, TABLE_NAME, PARTITION_NAME, MAX_CS, AVG_CS, P50_CS, \
             ROW_COUNT, DATA_SIZE, BUCKETS \
             FROM information_schema.partitions_meta",
        );
        let mut partitions = match (arg_str(args, "database"), arg_str(args, "table")) {
            (Some(db), Some(table)) => {
                partitions_sql.push_str(" WHERE DB_NAME = ? AND TABLE_NAME = ?");
                QueryDescriptor::sql("partitions", String::new())
                    .param(db)
                    .param(table)
            },
            (Some(db), None) => {
                partitions_sql.push_str(" WHERE DB_NAME = ?");
                QueryDescriptor::sql("partitions", String::new()).param(db)
            },
            _ => QueryDescriptor::sql("partitions", String::new()),
        };
        // LIMIT cannot be bound in this dialect; interpolate after validation.
        partitions_sql.push_str(&format!(" ORDER BY MAX_CS DESC LIMIT {}", top_n));
        partitions.statement = partitions_sql;
        partitions.required = true;

        Ok(vec![
            partitions,
            QueryDescriptor::admin(
                "fe_config",
                "SHOW FRONTEND CONFIG LIKE 'lake_compaction%'",
            ),
            QueryDescriptor::sql(
                "running_tasks",
                "SELECT BE_ID, TXN_ID, TABLET_ID, START_TIME, FINISH_TIME, PROGRESS, \
                 STATUS, RUNS \
                 FROM information_schema.be_cloud_native_compactions",
            ),
            QueryDescriptor::admin("compute_nodes", "SHOW COMPUTE NODES"),
            QueryDescriptor::sql(
                "be_threads",
                "SELECT BE_ID, NAME, VALUE \
                 FROM information_schema.be_configs WHERE NAME = 'compact_threads'",
            ),
            // Fallback task source for versions without the BE-side catalog.
            QueryDescriptor::admin("proc_compactions", "SHOW PROC '/compactions'"),
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

    /// Extra penalty when the backlog is already in the emergency band;
    /// bounded by the pipeline at 50.
    fn domain_penalty(&self, findings: &[Finding]) -> u32 {
        let emergency = findings
            .iter()
            .filter(|f| f.kind == "emergency_compaction_score")
            .count() as u32;
        emergency * 10
    }
}

// ============================================================================
// Pass: score_band
// ============================================================================

struct ScoreBandPass;

impl RulePass for ScoreBandPass {
    fn label(&self) -> &'static str {
        "score_band"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let Some(rows) = ctx.data.rows("partitions") else {
            return vec![insufficient_data(
                self.label(),
                describe_missing(ctx.data, "partitions", "information_schema.partitions_meta"),
            )];
        };
        if rows.is_empty() {
            return Vec::new();
        }

        let rules = &ctx.rules.compaction;
        let mut per_band: [usize; 3] = [0, 0, 0]; // warning, critical, emergency
        let mut offenders: Vec<(f64, String)> = Vec::new();

        for row in rows {
            let Some(max_cs) = row.f64("MAX_CS") else { continue };
            let band = rules.classify_score(max_cs);
            match band {
                Band::Warning => per_band[0] += 1,
                Band::Critical => per_band[1] += 1,
                Band::Emergency => per_band[2] += 1,
                _ => continue,
            }
            offenders.push((max_cs, partition_path(row)));
        }

        if offenders.is_empty() {
            return Vec::new();
        }
        offenders.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let top: Vec<Value> = offenders
            .iter()
            .take(10)
            .map(|(score, path)| json!({ "partition": path, "max_cs": score }))
            .collect();
        let top_partitions = partition_objects(rows, rules.score_warning, 10);

        // Report at the highest band present.
        let (kind, severity, priority, band_label, count) = if per_band[2] > 0 {
            (
                "emergency_compaction_score",
                Severity::Critical,
                Priority::Immediate,
                "emergency",
                per_band[2],
            )
        } else if per_band[1] > 0 {
            (
                "critical_compaction_score",
                Severity::Critical,
                Priority::High,
                "critical",
                per_band[1],
            )
        } else {
            (
                "high_compaction_score",
                Severity::Warning,
                Priority::Medium,
                "warning",
                per_band[0],
            )
        };

        vec![
            Finding::new(
                severity,
                priority,
                kind,
                format!(
                    "{} partition(s) in the {} compaction-score band (worst: {} at {:.0})",
                    count, band_label, offenders[0].1, offenders[0].0
                ),
            )
            .evidence("band", band_label)
            .evidence("warning_count", per_band[0] as i64)
            .evidence("critical_count", per_band[1] as i64)
            .evidence("emergency_count", per_band[2] as i64)
            .evidence("top_offenders", json!(top))
            .evidence("top_partitions", json!(top_partitions))
            .impact(
                "Unmerged rowsets amplify reads and block version GC; \
                 queries on these partitions degrade until compaction catches up.",
            ),
        ]
    }
}

/// Structured top partitions (db/table/partition split out) for the
/// recommendation factory.
fn partition_objects(rows: &[Row], min_score: f64, limit: usize) -> Vec<Value> {
    let mut hot: Vec<(f64, Value)> = rows
        .iter()
        .filter_map(|row| {
            let max_cs = row.f64("MAX_CS")?;
            if max_cs < min_score {
                return None;
            }
            Some((
                max_cs,
                json!({
                    "db": row.str("DB_NAME").unwrap_or(""),
                    "table": row.str("TABLE_NAME").unwrap_or(""),
                    "partition": row.str("PARTITION_NAME").unwrap_or(""),
                    "max_cs": max_cs,
                    "buckets": row.i64("BUCKETS").unwrap_or(0),
                }),
            ))
        })
        .collect();
    hot.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    hot.into_iter().take(limit).map(|(_, v)| v).collect()
}

fn partition_path(row: &Row) -> String {
    format!(
        "{}.{}.{}",
        row.str("DB_NAME").unwrap_or("?"),
        row.str("TABLE_NAME").unwrap_or("?"),
        row.str("PARTITION_NAME").unwrap_or("?")
    )
}

// ============================================================================
// Pass: capacity_saturation
// ============================================================================

struct CapacitySaturationPass;

impl RulePass for CapacitySaturationPass {
    fn label(&self) -> &'static str {
        "capacity_saturation"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let rules = &ctx.rules.compaction;

        let Some(configured) = fe_config_i64(ctx.data, "lake_compaction_max_tasks") else {
            return vec![insufficient_data(
                self.label(),
                describe_missing(ctx.data, "fe_config", "lake_compaction_max_tasks"),
            )];
        };
        let Some(node_count) = alive_node_count(ctx.data) else {
            return vec![insufficient_data(
                self.label(),
                describe_missing(ctx.data, "compute_nodes", "SHOW COMPUTE NODES"),
            )];
        };

        let capacity = rules.effective_max_tasks(configured, node_count);

        // Demand: tablets already queued on workers plus tablets of hot
        // partitions not scheduled yet.
        let running = ctx
            .data
            .rows("running_tasks")
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.is_null("FINISH_TIME"))
                    .count() as i64
            })
            .or_else(|| {
                // Fallback: FE-side view when the BE catalog is missing.
                ctx.data.rows("proc_compactions").map(|rows| {
                    rows.iter()
                        .filter(|row| row.is_null("FinishTime"))
                        .count() as i64
                })
            })
            .unwrap_or(0);
        let unscheduled = ctx
            .data
            .rows("partitions")
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        row.f64("MAX_CS")
                            .map(|cs| cs >= rules.score_warning)
                            .unwrap_or(false)
                    })
                    .map(|row| row.i64("BUCKETS").unwrap_or(0))
                    .sum::<i64>()
            })
            .unwrap_or(0);
        let demand = unscheduled + running;

        if capacity == 0 {
            return vec![
                Finding::new(
                    Severity::Critical,
                    Priority::High,
                    "compaction_disabled",
                    format!(
                        "lake_compaction_max_tasks = {} disables compaction while {} tablet(s) need it",
                        configured, demand
                    ),
                )
                .evidence("configured_max_tasks", configured)
                .evidence("demand_tablets", demand)
                .impact("Scores only grow from here; reads degrade and storage bloats.")
                .action(RecommendedAction::with_statement(
                    "Re-enable adaptive compaction scheduling",
                    "ADMIN SET FRONTEND CONFIG (\"lake_compaction_max_tasks\" = \"-1\")",
                )),
            ];
        }

        if demand > 0 && (demand as f64) > rules.capacity_warning_ratio * capacity as f64 {
            let critical = (demand as f64) > rules.capacity_critical_ratio * capacity as f64;
            let recommended = (rules.capacity_headroom * demand as f64).ceil() as i64;
            let (severity, priority) = if critical {
                (Severity::Critical, Priority::High)
            } else {
                (Severity::Warning, Priority::High)
            };
            return vec![
                Finding::new(
                    severity,
                    priority,
                    "compaction_capacity_insufficient",
                    format!(
                        "Compaction demand ({} tablets) exceeds {:.0}% of scheduler capacity ({})",
                        demand,
                        rules.capacity_warning_ratio * 100.0,
                        capacity
                    ),
                )
                .evidence("demand_tablets", demand)
                .evidence("effective_capacity", capacity)
                .evidence("configured_max_tasks", configured)
                .evidence("node_count", node_count)
                .evidence("recommended_max_tasks", recommended)
                .impact("The scheduler cannot drain the backlog; scores keep climbing under load.")
                .action(RecommendedAction::with_statement(
                    format!("Raise lake_compaction_max_tasks to {}", recommended),
                    format!(
                        "ADMIN SET FRONTEND CONFIG (\"lake_compaction_max_tasks\" = \"{}\")",
                        recommended
                    ),
                )),
            ];
        }

        Vec::new()
    }
}

// ============================================================================
// Pass: thread_sizing
// ============================================================================

struct ThreadSizingPass;

impl RulePass for ThreadSizingPass {
    fn label(&self) -> &'static str {
        "thread_config"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let rules = &ctx.rules.compaction;

        let Some(thread_rows) = ctx.data.rows("be_threads") else {
            return vec![insufficient_data(
                self.label(),
                describe_missing(ctx.data, "be_threads", "be_configs.compact_threads"),
            )];
        };
        // Cores come from the node listing; when the column is absent we skip
        // rather than assume a default core count.
        let Some(node_rows) = ctx.data.rows("compute_nodes") else {
            return vec![insufficient_data(
                self.label(),
                describe_missing(ctx.data, "compute_nodes", "SHOW COMPUTE NODES"),
            )];
        };

        let cores: Vec<i64> = node_rows
            .iter()
            .filter_map(|row| row.i64("CpuCores"))
            .collect();
        if cores.is_empty() {
            return vec![insufficient_data(
                self.label(),
                "CpuCores is not reported by SHOW COMPUTE NODES on this version; \
                 thread sizing skipped",
            )];
        }
        let min_cores = *cores.iter().min().expect("non-empty");
        let (rec_min, rec_max) = rules.recommended_threads(min_cores);

        let mut findings = Vec::new();
        for row in thread_rows {
            let Some(threads) = row.i64("VALUE") else { continue };
            let be_id = row.i64("BE_ID").unwrap_or(-1);
            let Some((reason, band)) = rules.threads_violation(threads, min_cores) else {
                continue;
            };
            if band >= Band::Warning {
                findings.push(
                    Finding::new(
                        Severity::Warning,
                        Priority::High,
                        "compaction_threads_undersized",
                        format!("BE {}: {}", be_id, reason),
                    )
                    .evidence("be_id", be_id)
                    .evidence("configured_threads", threads)
                    .evidence("recommended_min", rec_min)
                    .evidence("recommended_max", rec_max)
                    .impact("Worker-side throughput caps the scheduler; backlog drains slowly.")
                    .action(RecommendedAction::with_statement(
                        format!("Raise compact_threads to {}", rec_min),
                        format!(
                            "UPDATE information_schema.be_configs SET VALUE = \"{}\" \
                             WHERE NAME = \"compact_threads\" AND BE_ID = {}",
                            rec_min, be_id
                        ),
                    )),
                );
            } else {
                findings.push(
                    Finding::new(
                        Severity::Issue,
                        Priority::Low,
                        "compaction_threads_oversized",
                        format!("BE {}: {}", be_id, reason),
                    )
                    .evidence("be_id", be_id)
                    .evidence("configured_threads", threads)
                    .evidence("recommended_max", rec_max)
                    .impact("Compaction competes with queries for CPU during peak load."),
                );
            }
        }
        findings
    }
}

// ============================================================================
// Pass: task_execution
// ============================================================================

struct TaskExecutionPass;

impl RulePass for TaskExecutionPass {
    fn label(&self) -> &'static str {
        "task_execution"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let rules = &ctx.rules.compaction;
        let Some(rows) = ctx.data.rows("running_tasks") else {
            return vec![insufficient_data(
                self.label(),
                describe_missing(ctx.data, "running_tasks", "be_cloud_native_compactions"),
            )];
        };

        let mut findings = Vec::new();

        // Per-node queue depth.
        let mut per_node: std::collections::HashMap<i64, i64> = std::collections::HashMap::new();
        for row in rows.iter().filter(|r| r.is_null("FINISH_TIME")) {
            *per_node.entry(row.i64("BE_ID").unwrap_or(-1)).or_insert(0) += 1;
        }
        let mut overloaded: Vec<(i64, i64)> = per_node
            .into_iter()
            .filter(|(_, count)| *count > rules.max_healthy_tasks_per_node)
            .collect();
        overloaded.sort();
        for (be_id, count) in overloaded {
            findings.push(
                Finding::new(
                    Severity::Warning,
                    Priority::Medium,
                    "compaction_node_overloaded",
                    format!(
                        "BE {} executes {} concurrent compaction tasks (healthy bound: {})",
                        be_id, count, rules.max_healthy_tasks_per_node
                    ),
                )
                .evidence("be_id", be_id)
                .evidence("running_tasks", count)
                .evidence("healthy_bound", rules.max_healthy_tasks_per_node)
                .impact("Task thrash lowers per-task throughput and starves ingestion I/O."),
            );
        }

        // Slow tasks.
        let slow_ms = rules.slow_task_hours * 3_600_000.0;
        for row in rows.iter().filter(|r| r.is_null("FINISH_TIME")) {
            let Some(start) = row.timestamp("START_TIME") else { continue };
            let age_ms = (ctx.now - start).num_milliseconds() as f64;
            if age_ms > slow_ms {
                findings.push(
                    Finding::new(
                        Severity::Warning,
                        Priority::Medium,
                        "slow_compaction_task",
                        format!(
                            "Compaction of tablet {} has been running {:.1}h (txn {})",
                            row.i64("TABLET_ID").unwrap_or(-1),
                            age_ms / 3_600_000.0,
                            row.i64("TXN_ID").unwrap_or(-1)
                        ),
                    )
                    .evidence("tablet_id", row.i64("TABLET_ID").unwrap_or(-1))
                    .evidence("txn_id", row.i64("TXN_ID").unwrap_or(-1))
                    .evidence("age_hours", age_ms / 3_600_000.0)
                    .evidence("progress", row.i64("PROGRESS").unwrap_or(0))
                    .impact("A stuck task pins its transaction and blocks version GC on the tablet."),
                );
            }
        }

        // Retry storms.
        for row in rows {
            let Some(runs) = row.i64("RUNS") else { continue };
            if runs > rules.max_task_retries {
                findings.push(
                    Finding::new(
                        Severity::Warning,
                        Priority::Medium,
                        "compaction_task_retries",
                        format!(
                            "Compaction of tablet {} restarted {} times (bound: {})",
                            row.i64("TABLET_ID").unwrap_or(-1),
                            runs,
                            rules.max_task_retries
                        ),
                    )
                    .evidence("tablet_id", row.i64("TABLET_ID").unwrap_or(-1))
                    .evidence("runs", runs)
                    .impact("Retries burn worker slots without making progress; inspect BE logs."),
                );
            }
        }

        findings
    }
}

// ============================================================================
// Pass: parameter_audit
// ============================================================================

struct ParameterAuditPass;

impl RulePass for ParameterAuditPass {
    fn label(&self) -> &'static str {
        "parameter_audit"
    }

    fn evaluate(&self, ctx: &PassContext) -> Vec<Finding> {
        let rules = &ctx.rules.compaction;
        let Some(configured) = fe_config_i64(ctx.data, "lake_compaction_max_tasks") else {
            // capacity_saturation already reported the missing config
            return Vec::new();
        };

        if configured > rules.fe_disabled_value && configured < rules.min_recommended_max_tasks {
            return vec![
                Finding::new(
                    Severity::Issue,
                    Priority::Low,
                    "compaction_max_tasks_low",
                    format!(
                        "lake_compaction_max_tasks = {} is a fixed value below the recommended floor of {}",
                        configured, rules.min_recommended_max_tasks
                    ),
                )
                .evidence("configured_max_tasks", configured)
                .evidence("recommended_floor", rules.min_recommended_max_tasks)
                .impact("Fixed low ceilings stop scaling with the cluster; adaptive (-1) tracks node count.")
                .action(RecommendedAction::with_statement(
                    "Switch to adaptive scheduling",
                    "ADMIN SET FRONTEND CONFIG (\"lake_compaction_max_tasks\" = \"-1\")",
                )),
            ];
        }
        Vec::new()
    }
}

// ============================================================================
// Correlation
// ============================================================================

/// Score backlog plus a throughput limiter in the same run points at one
/// compound condition: the cluster cannot drain what it accumulates.
fn correlate(findings: &[Finding], _ctx: &PassContext) -> Vec<Finding> {
    let has_severe_scores = findings.iter().any(|f| {
        f.kind == "emergency_compaction_score" || f.kind == "critical_compaction_score"
    });
    let limiters: Vec<&str> = findings
        .iter()
        .filter(|f| {
            f.kind == "compaction_capacity_insufficient"
                || f.kind == "compaction_threads_undersized"
                || f.kind == "compaction_disabled"
        })
        .map(|f| f.kind.as_str())
        .collect();

    if !has_severe_scores || limiters.is_empty() {
        return Vec::new();
    }

    let score_kind = findings
        .iter()
        .find(|f| f.kind.ends_with("_compaction_score"))
        .map(|f| f.kind.clone())
        .unwrap_or_default();

    vec![
        Finding::new(
            Severity::Critical,
            Priority::Immediate,
            "compaction_backlog_compound",
            "Severe compaction scores coincide with a throughput limiter: the backlog will not drain on its own",
        )
        .evidence("score_finding", score_kind)
        .evidence("limiter_findings", json!(limiters))
        .impact("Score growth outpaces compaction; intervention on capacity is required before scores recover."),
    ]
}

// ============================================================================
// Recommendation factory
// ============================================================================

fn recommendation_for(finding: &Finding) -> Option<Recommendation> {
    match finding.kind.as_str() {
        "emergency_compaction_score" => Some(emergency_cs_handling(finding)),
        "critical_compaction_score" => Some(Recommendation {
            id: "aggressive_cs_handling".into(),
            category: "compaction".into(),
            priority: Priority::High,
            title: "Prioritize compaction of critical-band partitions".into(),
            description: "Manually compact the worst partitions and watch the score trend."
                .into(),
            finding_kinds: vec![finding.kind.clone()],
            phases: manual_compact_phases(finding),
            risk: "Manual compaction adds IO load; schedule off-peak if possible.".into(),
            verification: "SELECT MAX(MAX_CS) FROM information_schema.partitions_meta".into(),
        }),
        "compaction_disabled" => Some(Recommendation {
            id: "enable_compaction".into(),
            category: "compaction".into(),
            priority: Priority::High,
            title: "Re-enable lake compaction".into(),
            description: "Compaction is disabled cluster-wide; restore adaptive scheduling."
                .into(),
            finding_kinds: vec![finding.kind.clone()],
            phases: vec![Phase::new("execution", vec![Step::mutate(
                "ADMIN SET FRONTEND CONFIG (\"lake_compaction_max_tasks\" = \"-1\")",
                "Restore adaptive compaction task scheduling",
                "ADMIN SET FRONTEND CONFIG (\"lake_compaction_max_tasks\" = \"0\")",
            )])],
            risk: "Resumed compaction will briefly raise cluster IO.".into(),
            verification: "SHOW FRONTEND CONFIG LIKE 'lake_compaction_max_tasks'".into(),
        }),
        "compaction_capacity_insufficient" => {
            let recommended = finding
                .evidence
                .get("recommended_max_tasks")
                .and_then(Value::as_i64)?;
            Some(Recommendation {
                id: "raise_compaction_capacity".into(),
                category: "compaction".into(),
                priority: Priority::High,
                title: format!("Raise compaction capacity to {}", recommended),
                description: "Scheduler capacity trails demand; raise the task ceiling with headroom."
                    .into(),
                finding_kinds: vec![finding.kind.clone()],
                phases: vec![Phase::new("execution", vec![Step::mutate(
                    format!(
                        "ADMIN SET FRONTEND CONFIG (\"lake_compaction_max_tasks\" = \"{}\")",
                        recommended
                    ),
                    "Lift the scheduler ceiling above current demand",
                    "Re-apply the previous lake_compaction_max_tasks value",
                )])],
                risk: "Higher concurrency raises IO; watch BE load after the change.".into(),
                verification: "SHOW PROC '/compactions'".into(),
            })
        },
        "compaction_threads_undersized" => Some(Recommendation {
            id: "tune_compact_threads".into(),
            category: "compaction".into(),
            priority: Priority::Medium,
            title: "Resize BE compaction worker threads".into(),
            description: "Worker threads are below the per-core band; resize and observe."
                .into(),
            finding_kinds: vec![finding.kind.clone()],
            phases: vec![],
            risk: "More threads take CPU from queries.".into(),
            verification:
                "SELECT BE_ID, VALUE FROM information_schema.be_configs WHERE NAME = 'compact_threads'"
                    .into(),
        }),
        _ => None,
    }
}

fn emergency_cs_handling(finding: &Finding) -> Recommendation {
    Recommendation {
        id: "emergency_cs_handling".into(),
        category: "compaction".into(),
        priority: Priority::Immediate,
        title: "Compact emergency-band partitions now".into(),
        description:
            "Partitions in the emergency band must be compacted manually before normal \
             scheduling can keep up again."
                .into(),
        finding_kinds: vec![finding.kind.clone()],
        phases: {
            let mut preparation = vec![Step::inspect(
                "SELECT DB_NAME, TABLE_NAME, PARTITION_NAME, MAX_CS FROM \
                 information_schema.partitions_meta ORDER BY MAX_CS DESC LIMIT 10",
                "Confirm the current worst partitions before acting",
            )];
            if let Some((db, table)) = worst_table(finding) {
                preparation.push(Step::inspect(
                    format!("SHOW CREATE TABLE {}.{}", db, table),
                    "Check bucketing and partitioning before forcing compaction",
                ));
            }
            let mut phases = vec![Phase::new("preparation", preparation).duration("5m")];
            phases.push(
                Phase::new("execution", manual_compact_steps(finding)).duration("30m"),
            );
            phases.push(Phase::new(
                "verification",
                vec![Step::observe(
                    "SHOW PROC '/compactions'",
                    "Watch the triggered compactions run to completion",
                )],
            ));
            phases
        },
        risk: "Manual compaction of hot partitions adds write amplification while running."
            .into(),
        verification: "SELECT MAX(MAX_CS) FROM information_schema.partitions_meta".into(),
    }
}

fn manual_compact_phases(finding: &Finding) -> Vec<Phase> {
    vec![Phase::new("execution", manual_compact_steps(finding)).duration("30m")]
}

/// The (db, table) of the worst offender, from the finding's evidence.
fn worst_table(finding: &Finding) -> Option<(String, String)> {
    let first = finding
        .evidence
        .get("top_partitions")?
        .as_array()?
        .first()?;
    Some((
        first.get("db")?.as_str()?.to_string(),
        first.get("table")?.as_str()?.to_string(),
    ))
}

/// One ALTER TABLE ... COMPACT per offending partition from the finding's
/// evidence.
fn manual_compact_steps(finding: &Finding) -> Vec<Step> {
    let Some(partitions) = finding
        .evidence
        .get("top_partitions")
        .and_then(Value::as_array)
    else {
        return vec![Step::inspect(
            "SELECT * FROM information_schema.partitions_meta ORDER BY MAX_CS DESC LIMIT 10",
            "Identify the partitions to compact",
        )];
    };

    partitions
        .iter()
        .take(5)
        .filter_map(|p| {
            let db = p.get("db")?.as_str()?;
            let table = p.get("table")?.as_str()?;
            let partition = p.get("partition")?.as_str()?;
            Some(Step::mutate(
                format!("ALTER TABLE {}.{} COMPACT {}", db, table, partition),
                format!("Force-compact partition {} (score {})", partition, p
                    .get("max_cs")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)),
                "Cancel via ADMIN CANCEL COMPACTION if cluster load spikes",
            ))
        })
        .collect()
}

// ============================================================================
// Shared dataset helpers
// ============================================================================

/// Read an FE config value from the `fe_config` descriptor rows.
fn fe_config_i64(data: &CollectedDataset, key: &str) -> Option<i64> {
    let rows = data.rows("fe_config")?;
    rows.iter()
        .find(|row| {
            row.str("Key")
                .or_else(|| row.str("Name"))
                .map(|k| k.eq_ignore_ascii_case(key))
                .unwrap_or(false)
        })
        .and_then(|row| row.i64("Value").or_else(|| row.i64("VALUE")))
}

fn alive_node_count(data: &CollectedDataset) -> Option<i64> {
    let rows = data.rows("compute_nodes")?;
    let alive = rows
        .iter()
        .filter(|row| {
            row.str("Alive")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        })
        .count() as i64;
    Some(alive)
}

fn describe_missing(data: &CollectedDataset, id: &str, source: &str) -> String {
    match data.error(id) {
        Some(e) => format!("{} unavailable: {}", source, e.message()),
        None => format!("{} returned no data", source),
    }
}

#[cfg(test)]
mod tests;
