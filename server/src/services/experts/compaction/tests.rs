//! Compaction analyzer tests against constructed datasets

use super::*;
use crate::models::{CollectedItem, StepKind};
use crate::services::rules::RuleLibrary;
use crate::utils::ProbeError;
use chrono::NaiveDate;

fn partition_row(db: &str, table: &str, partition: &str, max_cs: f64, buckets: i64) -> Row {
    Row::new()
        .with("DB_NAME", db)
        .with("TABLE_NAME", table)
        .with("PARTITION_NAME", partition)
        .with("MAX_CS", max_cs)
        .with("AVG_CS", max_cs / 2.0)
        .with("P50_CS", max_cs / 3.0)
        .with("ROW_COUNT", 1_000_000i64)
        .with("BUCKETS", buckets)
}

fn fe_config_row(key: &str, value: i64) -> Row {
    Row::new().with("Key", key).with("Value", value.to_string())
}

fn compute_node_row(alive: bool, cores: i64) -> Row {
    Row::new()
        .with("Alive", if alive { "true" } else { "false" })
        .with("CpuCores", cores)
}

fn running_task_row(be_id: i64, tablet_id: i64, finished: bool) -> Row {
    let mut row = Row::new()
        .with("BE_ID", be_id)
        .with("TXN_ID", tablet_id * 10)
        .with("TABLET_ID", tablet_id)
        .with("START_TIME", "2026-08-01 10:00:00")
        .with("PROGRESS", 50i64)
        .with("STATUS", "RUNNING")
        .with("RUNS", 1i64);
    if finished {
        row.set("FINISH_TIME", crate::models::ScalarValue::Text("2026-08-01 10:05:00".into()));
    } else {
        row.set("FINISH_TIME", crate::models::ScalarValue::Null);
    }
    row
}

fn base_dataset() -> CollectedDataset {
    let mut data = CollectedDataset::new();
    data.insert("partitions", CollectedItem::Rows(vec![]));
    data.insert(
        "fe_config",
        CollectedItem::Rows(vec![fe_config_row("lake_compaction_max_tasks", -1)]),
    );
    data.insert("running_tasks", CollectedItem::Rows(vec![]));
    data.insert(
        "compute_nodes",
        CollectedItem::Rows(vec![compute_node_row(true, 16)]),
    );
    data.insert(
        "be_threads",
        CollectedItem::Rows(vec![Row::new()
            .with("BE_ID", 10001i64)
            .with("NAME", "compact_threads")
            .with("VALUE", "4")]),
    );
    data
}

fn analyze(data: &CollectedDataset) -> Vec<Finding> {
    analyze_at(data, default_now())
}

fn analyze_at(data: &CollectedDataset, now: chrono::NaiveDateTime) -> Vec<Finding> {
    let expert = CompactionExpert::new();
    let rules = RuleLibrary::default();
    let args = json!({});
    let ctx = PassContext::at(&args, data, &rules, Architecture::SharedData, now);
    run_passes(&expert.passes, &ctx, correlate)
}

fn default_now() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 8, 1)
        .unwrap()
        .and_hms_opt(11, 0, 0)
        .unwrap()
}

fn find<'a>(findings: &'a [Finding], kind: &str) -> Option<&'a Finding> {
    findings.iter().find(|f| f.kind == kind)
}

#[test]
fn emergency_score_produces_immediate_finding_and_compact_plan() {
    let mut data = base_dataset();
    data.insert(
        "partitions",
        CollectedItem::Rows(vec![partition_row("db", "t", "p", 1500.0, 4)]),
    );

    let findings = analyze(&data);
    let finding = find(&findings, "emergency_compaction_score").expect("emergency finding");
    assert_eq!(finding.severity, Severity::Critical);
    assert_eq!(finding.priority, Priority::Immediate);
    assert_eq!(finding.evidence["emergency_count"], json!(1));

    let expert = CompactionExpert::new();
    let recs = expert.recommend(&findings);
    let rec = recs
        .iter()
        .find(|r| r.id == "emergency_cs_handling")
        .expect("emergency recommendation");
    assert_eq!(rec.priority, Priority::Immediate);

    let execution = rec
        .phases
        .iter()
        .find(|p| p.name == "execution")
        .expect("execution phase");
    let mutate = execution
        .steps
        .iter()
        .find(|s| s.kind == StepKind::Mutate)
        .expect("mutating step");
    assert_eq!(mutate.body, "ALTER TABLE db.t COMPACT p");
}

#[test]
fn disabled_compaction_with_backlog_is_critical() {
    let mut data = base_dataset();
    data.insert(
        "partitions",
        CollectedItem::Rows(vec![partition_row("db", "t", "p1", 600.0, 8)]),
    );
    data.insert(
        "fe_config",
        CollectedItem::Rows(vec![fe_config_row("lake_compaction_max_tasks", 0)]),
    );

    let findings = analyze(&data);
    let finding = find(&findings, "compaction_disabled").expect("disabled finding");
    assert_eq!(finding.severity, Severity::Critical);
    assert_eq!(finding.priority, Priority::High);

    let expert = CompactionExpert::new();
    let recs = expert.recommend(&findings);
    let rec = recs.iter().find(|r| r.id == "enable_compaction").unwrap();
    let body = &rec.phases[0].steps[0].body;
    assert!(body.contains("lake_compaction_max_tasks"));
    assert!(body.contains("-1"));
}

#[test]
fn adaptive_capacity_insufficient_is_critical_past_150_pct() {
    // C = 16 * 4 nodes = 64; demand = 90 unscheduled + 10 running = 100 > 96.
    let mut data = base_dataset();
    data.insert(
        "partitions",
        CollectedItem::Rows(vec![
            partition_row("db", "t", "p1", 300.0, 45),
            partition_row("db", "t", "p2", 200.0, 45),
        ]),
    );
    data.insert(
        "compute_nodes",
        CollectedItem::Rows(vec![
            compute_node_row(true, 16),
            compute_node_row(true, 16),
            compute_node_row(true, 16),
            compute_node_row(true, 16),
        ]),
    );
    let tasks: Vec<Row> = (0..10)
        .map(|i| running_task_row(10001 + (i % 4), 9000 + i, false))
        .collect();
    data.insert("running_tasks", CollectedItem::Rows(tasks));

    let findings = analyze(&data);
    let finding =
        find(&findings, "compaction_capacity_insufficient").expect("capacity finding");
    assert_eq!(finding.severity, Severity::Critical);
    assert_eq!(finding.evidence["effective_capacity"], json!(64));
    assert_eq!(finding.evidence["demand_tablets"], json!(100));
    assert_eq!(finding.evidence["recommended_max_tasks"], json!(150));
}

#[test]
fn capacity_below_critical_ratio_is_warning() {
    // C = 64, demand = 60 -> above 0.8*64=51.2 but below 96.
    let mut data = base_dataset();
    data.insert(
        "partitions",
        CollectedItem::Rows(vec![partition_row("db", "t", "p1", 300.0, 60)]),
    );
    data.insert(
        "compute_nodes",
        CollectedItem::Rows(vec![
            compute_node_row(true, 16),
            compute_node_row(true, 16),
            compute_node_row(true, 16),
            compute_node_row(true, 16),
        ]),
    );

    let findings = analyze(&data);
    let finding = find(&findings, "compaction_capacity_insufficient").unwrap();
    assert_eq!(finding.severity, Severity::Warning);
    assert_eq!(finding.priority, Priority::High);
}

#[test]
fn undersized_threads_flagged_against_core_band() {
    // 16 cores -> recommended 4..8; 2 threads is undersized.
    let mut data = base_dataset();
    data.insert(
        "be_threads",
        CollectedItem::Rows(vec![Row::new()
            .with("BE_ID", 10001i64)
            .with("NAME", "compact_threads")
            .with("VALUE", "2")]),
    );

    let findings = analyze(&data);
    let finding = find(&findings, "compaction_threads_undersized").expect("undersized finding");
    assert_eq!(finding.evidence["configured_threads"], json!(2));
    assert_eq!(finding.evidence["recommended_min"], json!(4));
}

#[test]
fn missing_core_counts_yield_insight_not_default() {
    // CpuCores column absent: the pass must skip, never assume a default.
    let mut data = base_dataset();
    data.insert(
        "compute_nodes",
        CollectedItem::Rows(vec![Row::new().with("Alive", "true")]),
    );

    let findings = analyze(&data);
    let insight = find(&findings, "thread_config_insufficient_data")
        .expect("insufficient data insight");
    assert_eq!(insight.severity, Severity::Insight);
    assert!(find(&findings, "compaction_threads_undersized").is_none());
}

#[test]
fn absent_catalog_yields_insufficient_data_insight() {
    let mut data = base_dataset();
    data.insert(
        "running_tasks",
        CollectedItem::Error(ProbeError::Absent(
            "Unknown table 'be_cloud_native_compactions'".into(),
        )),
    );

    let findings = analyze(&data);
    let insight = find(&findings, "task_execution_insufficient_data").unwrap();
    assert_eq!(insight.severity, Severity::Insight);
    assert!(insight.message.contains("unavailable"));
}

#[test]
fn slow_and_retried_tasks_are_flagged() {
    let mut data = base_dataset();
    // started 3h before `default_now`
    let mut slow = running_task_row(10001, 7001, false);
    slow.set("START_TIME", crate::models::ScalarValue::Text("2026-08-01 08:00:00".into()));
    let mut retried = running_task_row(10002, 7002, false);
    retried.set("RUNS", crate::models::ScalarValue::Integer(9));
    data.insert("running_tasks", CollectedItem::Rows(vec![slow, retried]));

    let findings = analyze(&data);
    assert!(find(&findings, "slow_compaction_task").is_some());
    let retries = find(&findings, "compaction_task_retries").unwrap();
    assert_eq!(retries.evidence["runs"], json!(9));
}

#[test]
fn node_queue_depth_over_bound_is_flagged() {
    let mut data = base_dataset();
    let tasks: Vec<Row> = (0..9).map(|i| running_task_row(10001, 8000 + i, false)).collect();
    data.insert("running_tasks", CollectedItem::Rows(tasks));

    let findings = analyze(&data);
    let finding = find(&findings, "compaction_node_overloaded").unwrap();
    assert_eq!(finding.evidence["running_tasks"], json!(9));
}

#[test]
fn severe_scores_plus_limiter_produce_compound_finding() {
    let mut data = base_dataset();
    data.insert(
        "partitions",
        CollectedItem::Rows(vec![partition_row("db", "t", "p", 1500.0, 4)]),
    );
    data.insert(
        "be_threads",
        CollectedItem::Rows(vec![Row::new()
            .with("BE_ID", 10001i64)
            .with("NAME", "compact_threads")
            .with("VALUE", "2")]),
    );

    let findings = analyze(&data);
    let compound = find(&findings, "compaction_backlog_compound").expect("compound finding");
    assert_eq!(compound.severity, Severity::Critical);
    let limiters = compound.evidence["limiter_findings"].as_array().unwrap();
    assert!(limiters.iter().any(|l| l == "compaction_threads_undersized"));

    // correlation adds, never mutates: the source finding is still present
    // with its original severity
    let source = find(&findings, "emergency_compaction_score").unwrap();
    assert_eq!(source.severity, Severity::Critical);
}

#[test]
fn healthy_partitions_produce_no_score_finding() {
    let mut data = base_dataset();
    data.insert(
        "partitions",
        CollectedItem::Rows(vec![
            partition_row("db", "t", "p1", 5.0, 4),
            partition_row("db", "t", "p2", 30.0, 4),
        ]),
    );

    let findings = analyze(&data);
    assert!(findings.iter().all(|f| !f.kind.ends_with("_compaction_score")));
}

#[test]
fn fixed_low_max_tasks_is_audited() {
    let mut data = base_dataset();
    data.insert(
        "fe_config",
        CollectedItem::Rows(vec![fe_config_row("lake_compaction_max_tasks", 16)]),
    );

    let findings = analyze(&data);
    let finding = find(&findings, "compaction_max_tasks_low").unwrap();
    assert_eq!(finding.severity, Severity::Issue);
}

#[test]
fn plan_interpolates_validated_limit_only() {
    let expert = CompactionExpert::new();
    let plan = expert
        .plan("analyze_compaction", &json!({"top_n": 25, "database": "sales"}))
        .unwrap();
    let partitions = &plan[0];
    assert!(partitions.statement.contains("LIMIT 25"));
    assert!(partitions.statement.contains("DB_NAME = ?"));
    assert_eq!(partitions.params.len(), 1);
    assert!(partitions.required);

    // negative limits are rejected before execution
    assert!(expert
        .plan("analyze_compaction", &json!({"top_n": -5}))
        .is_err());
}

#[test]
fn domain_penalty_scales_with_emergency_findings() {
    let expert = CompactionExpert::new();
    let findings = vec![
        Finding::new(Severity::Critical, Priority::Immediate, "emergency_compaction_score", "m"),
    ];
    assert_eq!(expert.domain_penalty(&findings), 10);
    assert_eq!(expert.domain_penalty(&[]), 0);
}
