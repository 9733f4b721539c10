//! Ingestion analyzer tests against constructed datasets

use super::*;
use crate::models::{CollectedItem, ScalarValue};
use crate::services::rules::RuleLibrary;
use chrono::NaiveDate;

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 8, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn load_row(job_id: i64, label: &str, state: &str, create_time: &str) -> Row {
    let mut row = Row::new()
        .with("JOB_ID", job_id)
        .with("LABEL", label)
        .with("DB_NAME", "sales")
        .with("TABLE_NAME", "orders")
        .with("STATE", state)
        .with("PROGRESS", "ETL:100%; LOAD:50%")
        .with("TYPE", "BROKER")
        .with("CREATE_TIME", create_time)
        .with("LOAD_START_TIME", create_time)
        .with("ERROR_MSG", "");
    if state == "FINISHED" || state == "CANCELLED" {
        row.set("LOAD_FINISH_TIME", ScalarValue::Text(create_time.into()));
    } else {
        row.set("LOAD_FINISH_TIME", ScalarValue::Null);
    }
    row
}

fn routine_row(name: &str, state: &str, reason: &str, current_tasks: i64) -> Row {
    Row::new()
        .with("Name", name)
        .with("State", state)
        .with("ReasonOfStateChanged", reason)
        .with("CurrentTaskNum", current_tasks)
}

fn dataset(live: Vec<Row>, history: Vec<Row>, routine: Vec<Row>) -> CollectedDataset {
    let mut data = CollectedDataset::new();
    data.insert("loads_live", CollectedItem::Rows(live));
    data.insert("loads_history", CollectedItem::Rows(history));
    data.insert("routine_loads", CollectedItem::Rows(routine));
    data
}

fn analyze(data: &CollectedDataset) -> Vec<Finding> {
    let expert = IngestionExpert::new();
    let rules = RuleLibrary::default();
    let args = json!({});
    let ctx = PassContext::at(&args, data, &rules, Architecture::SharedData, now());
    run_passes(&expert.passes, &ctx, correlate)
}

fn find<'a>(findings: &'a [Finding], kind: &str) -> Option<&'a Finding> {
    findings.iter().find(|f| f.kind == kind)
}

#[test]
fn pending_backlog_over_ten_is_critical() {
    let live: Vec<Row> = (0..12)
        .map(|i| load_row(i, &format!("l{}", i), "PENDING", "2026-08-01 11:59:30"))
        .collect();
    let findings = analyze(&dataset(live, vec![], vec![]));
    let finding = find(&findings, "load_queue_backlog").expect("backlog finding");
    assert_eq!(finding.severity, Severity::Critical);
    assert_eq!(finding.evidence["pending_count"], json!(12));
}

#[test]
fn pending_six_to_ten_is_buildup_warning() {
    let live: Vec<Row> = (0..7)
        .map(|i| load_row(i, &format!("l{}", i), "PENDING", "2026-08-01 11:59:30"))
        .collect();
    let findings = analyze(&dataset(live, vec![], vec![]));
    assert!(find(&findings, "load_queue_backlog").is_none());
    let finding = find(&findings, "load_queue_buildup").expect("buildup finding");
    assert_eq!(finding.severity, Severity::Warning);
}

#[test]
fn long_running_job_carries_job_id_evidence() {
    // started 09:00, now 12:00 -> 3h > 2h bound
    let live = vec![load_row(42, "slow-load", "LOADING", "2026-08-01 09:00:00")];
    let findings = analyze(&dataset(live, vec![], vec![]));
    let finding = find(&findings, "long_running_load").expect("long running finding");
    assert_eq!(finding.evidence["job_id"], json!(42));
    assert!(finding.evidence["age_hours"].as_f64().unwrap() > 2.9);
}

#[test]
fn failure_rate_names_dominant_category() {
    let mut live = Vec::new();
    for i in 0..6 {
        let mut row = load_row(i, &format!("f{}", i), "CANCELLED", "2026-08-01 11:00:00");
        row.set(
            "ERROR_MSG",
            ScalarValue::Text("[E1008] Reached timeout while loading".into()),
        );
        live.push(row);
    }
    for i in 6..10 {
        live.push(load_row(i, &format!("ok{}", i), "FINISHED", "2026-08-01 11:00:00"));
    }

    let findings = analyze(&dataset(live, vec![], vec![]));
    let finding = find(&findings, "high_load_failure_rate").expect("failure rate finding");
    // 6/10 = 60% >= 30% critical bound
    assert_eq!(finding.severity, Severity::Critical);
    assert!(finding.message.contains("timeout"));
    let categories = finding.evidence["categories"].as_array().unwrap();
    assert_eq!(categories[0]["category"], "timeout");
}

#[test]
fn few_finished_jobs_yield_insufficient_data() {
    let live = vec![load_row(1, "only", "FINISHED", "2026-08-01 11:00:00")];
    let findings = analyze(&dataset(live, vec![], vec![]));
    let insight = find(&findings, "failure_rate_insufficient_data").unwrap();
    assert_eq!(insight.severity, Severity::Insight);
}

#[test]
fn live_row_wins_inside_dedup_window_history_outside() {
    // Same (label, job_id) in both tables. The live copy is 30s old (inside
    // the 120s window) so it wins; its state differs to make the winner
    // observable.
    let live_recent = load_row(1, "dup", "LOADING", "2026-08-01 11:59:30");
    let mut history_recent = load_row(1, "dup", "CANCELLED", "2026-08-01 11:59:30");
    history_recent.set("ERROR_MSG", ScalarValue::Text("stale copy".into()));

    // An old job present in both: the historical copy must win. Give the
    // live copy a bogus state to detect mistaken preference.
    let mut live_old = load_row(2, "old", "PENDING", "2026-08-01 10:00:00");
    live_old.set("LOAD_FINISH_TIME", ScalarValue::Null);
    let history_old = load_row(2, "old", "FINISHED", "2026-08-01 10:00:00");

    let data = dataset(
        vec![live_recent, live_old],
        vec![history_recent, history_old],
        vec![],
    );
    let rules = RuleLibrary::default();
    let args = json!({});
    let ctx = PassContext::at(&args, &data, &rules, Architecture::SharedData, now());
    let jobs = merged_loads(&ctx).unwrap();

    assert_eq!(jobs.len(), 2);
    let dup = jobs
        .iter()
        .find(|row| row.str("LABEL") == Some("dup"))
        .unwrap();
    assert_eq!(dup.str("STATE"), Some("LOADING"), "live copy wins inside window");
    let old = jobs
        .iter()
        .find(|row| row.str("LABEL") == Some("old"))
        .unwrap();
    assert_eq!(old.str("STATE"), Some("FINISHED"), "history wins outside window");
}

#[test]
fn extreme_commit_frequency_is_flagged() {
    // 120 jobs within 60 seconds -> 120/min > 60/min bound.
    let live: Vec<Row> = (0..120)
        .map(|i| {
            load_row(
                i,
                &format!("s{}", i),
                "FINISHED",
                &format!("2026-08-01 11:59:{:02}", i % 60),
            )
        })
        .collect();
    let findings = analyze(&dataset(live, vec![], vec![]));
    let finding = find(&findings, "load_frequency_extreme").expect("frequency finding");
    assert!(finding.evidence["jobs_per_minute"].as_f64().unwrap() > 60.0);
}

#[test]
fn paused_routine_load_gets_resume_recommendation() {
    let routine = vec![routine_row("orders_kafka", "PAUSED", "kafka broker down", 0)];
    let findings = analyze(&dataset(vec![], vec![], routine));
    let finding = find(&findings, "routine_load_paused").expect("paused finding");
    assert_eq!(finding.severity, Severity::Warning);
    // the reason travels verbatim as opaque evidence
    assert_eq!(finding.evidence["reason"], json!("kafka broker down"));

    let expert = IngestionExpert::new();
    let recs = expert.recommend(&findings);
    let rec = recs
        .iter()
        .find(|r| r.id == "routine_load_recovery")
        .expect("recovery recommendation");
    let resume = rec
        .phases
        .iter()
        .flat_map(|p| &p.steps)
        .find(|s| s.body.starts_with("RESUME ROUTINE LOAD"))
        .expect("resume step");
    assert_eq!(resume.body, "RESUME ROUTINE LOAD FOR orders_kafka");
}

#[test]
fn running_with_zero_tasks_is_critical() {
    let routine = vec![routine_row("stalled_job", "RUNNING", "", 0)];
    let findings = analyze(&dataset(vec![], vec![], routine));
    let finding = find(&findings, "routine_load_stalled").expect("stalled finding");
    assert_eq!(finding.severity, Severity::Critical);
}

#[test]
fn healthy_running_routine_load_is_quiet() {
    let routine = vec![routine_row("healthy", "RUNNING", "", 3)];
    let findings = analyze(&dataset(vec![], vec![], routine));
    assert!(find(&findings, "routine_load_stalled").is_none());
    assert!(find(&findings, "routine_load_paused").is_none());
}

#[test]
fn backlog_plus_failures_produce_compound_finding() {
    let mut live: Vec<Row> = (0..12)
        .map(|i| load_row(i, &format!("p{}", i), "PENDING", "2026-08-01 11:59:30"))
        .collect();
    for i in 100..106 {
        let mut row = load_row(i, &format!("f{}", i), "CANCELLED", "2026-08-01 11:00:00");
        row.set("ERROR_MSG", ScalarValue::Text("connection refused".into()));
        live.push(row);
    }

    let findings = analyze(&dataset(live, vec![], vec![]));
    assert!(find(&findings, "load_queue_backlog").is_some());
    assert!(find(&findings, "high_load_failure_rate").is_some());
    let compound = find(&findings, "ingestion_pipeline_degraded").expect("compound finding");
    assert_eq!(compound.severity, Severity::Critical);
}

#[test]
fn empty_row_set_yields_no_findings() {
    let findings = analyze(&dataset(vec![], vec![], vec![]));
    // all passes run; none should produce anything beyond rate-sample insight
    assert!(find(&findings, "load_queue_backlog").is_none());
    assert!(find(&findings, "long_running_load").is_none());
    assert!(find(&findings, "failure_rate_insufficient_data").is_some());
}

#[test]
fn plan_filters_by_database_and_validates_limit() {
    let expert = IngestionExpert::new();
    let plan = expert
        .plan("analyze_ingestion", &json!({"database": "sales", "job_limit": 50}))
        .unwrap();
    assert_eq!(plan.len(), 3);
    assert!(plan[0].statement.contains("LIMIT 50"));
    assert!(plan[0].statement.contains("DB_NAME = ?"));
    assert_eq!(plan[0].params.len(), 1);
    assert!(plan[2].statement.contains("SHOW ROUTINE LOAD FROM `sales`"));

    assert!(expert
        .plan("analyze_ingestion", &json!({"job_limit": -1}))
        .is_err());
}

#[test]
fn truncate_respects_char_boundaries() {
    let s = "ошибка при загрузке данных";
    let cut = truncate(s, 7);
    assert!(cut.chars().count() <= 8);
}
