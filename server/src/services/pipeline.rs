//! Diagnostic Pipeline
//!
//! One pipeline serves every expert: architecture gate, plan validation,
//! bounded-parallel collection, analysis, recommendation, scoring, and
//! action-plan expansion. Experts supply only rule passes and recommendation
//! factories; no stage is duplicated per domain.
//!
//! Errors never cross stage boundaries as exceptions: collection failures
//! become error tokens inside the dataset, and pipeline-fatal conditions
//! become a single top-level finding.

use crate::config::PipelineConfig;
use crate::models::{
    CollectedDataset, CollectedItem, Finding, HealthScore, Phase, Priority, QueryDescriptor,
    QueryKind, Recommendation, Row, Severity, Step, StepKind,
};
use crate::services::architecture;
use crate::services::experts::{Expert, ToolMode, ToolSpec, arg_bool};
use crate::services::probe::Probe;
use crate::utils::{DoctorError, DoctorResult, ProbeError};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Result of one pipeline run, before formatting.
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    pub expert: String,
    pub version: String,
    pub tool: String,
    /// `success`, or the kind of the top-level failure finding.
    pub status: String,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<Recommendation>,
    pub health: HealthScore,
    /// Raw dataset, present only with `include_details=true`.
    pub dataset: Option<Value>,
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Execute one tool invocation end to end.
    pub async fn run(
        &self,
        expert: &dyn Expert,
        spec: &ToolSpec,
        args: &Value,
        probe: Arc<dyn Probe>,
    ) -> DoctorResult<DiagnosticReport> {
        let started = Instant::now();
        let deadline = self.config.call_timeout();

        match tokio::time::timeout(deadline, self.run_inner(expert, spec, args, probe)).await {
            Ok(result) => result,
            Err(_) => {
                // Deadline expiry discards partial data; in-flight probe
                // operations are cancelled by dropping their tasks.
                let elapsed = started.elapsed();
                tracing::warn!(
                    tool = spec.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "tool call deadline exceeded"
                );
                let finding = Finding::new(
                    Severity::Critical,
                    Priority::Immediate,
                    "deadline_exceeded",
                    format!(
                        "Tool call exceeded its {}s deadline after {:.1}s",
                        deadline.as_secs(),
                        elapsed.as_secs_f64()
                    ),
                )
                .evidence("elapsed_secs", elapsed.as_secs_f64())
                .evidence("deadline_secs", deadline.as_secs() as i64)
                .impact("Diagnosis incomplete; no partial results are reported.");
                Ok(self.failure_report(expert, spec, finding))
            },
        }
    }

    async fn run_inner(
        &self,
        expert: &dyn Expert,
        spec: &ToolSpec,
        args: &Value,
        probe: Arc<dyn Probe>,
    ) -> DoctorResult<DiagnosticReport> {
        // (a) Architecture gate.
        let arch = match architecture::detect(probe.as_ref()).await {
            Ok(arch) => arch,
            Err(e) => {
                let finding = Finding::new(
                    Severity::Critical,
                    Priority::Immediate,
                    "cluster_unreachable",
                    format!("Cannot reach the cluster frontend: {}", e.message()),
                )
                .evidence("error_kind", e.kind())
                .impact("No diagnosis is possible without frontend access.");
                return Ok(self.failure_report(expert, spec, finding));
            },
        };

        let metadata = expert.metadata();
        if !metadata.supports(arch) {
            let supported: Vec<&str> = metadata
                .supported_architectures
                .iter()
                .map(|a| a.as_str())
                .collect();
            let finding = Finding::new(
                Severity::Critical,
                Priority::Immediate,
                "architecture_unsupported",
                format!(
                    "The {} expert supports {} clusters, but this cluster runs in {} mode",
                    metadata.name,
                    supported.join("/"),
                    arch.as_str()
                ),
            )
            .evidence("detected_architecture", arch.as_str())
            .evidence("supported_architectures", json!(supported))
            .impact("Run this tool against a supported cluster architecture.");
            return Ok(self.failure_report(expert, spec, finding));
        }

        // (b)-(d) Obtain findings, mode-dependent.
        let (mut findings, dataset) = match spec.mode {
            ToolMode::Plan => {
                let plan = expert.plan(spec.name, args)?;
                validate_plan(&plan)?;

                let dataset = self.collect(&plan, Arc::clone(&probe)).await;

                // Required-descriptor failure stops the run with one finding.
                if let Some(finding) = required_failure(&plan, &dataset) {
                    return Ok(self.failure_report(expert, spec, finding));
                }

                let findings = expert.analyze(spec.name, args, &dataset, arch)?;
                (findings, Some(dataset))
            },
            ToolMode::Direct => {
                let findings = expert
                    .execute(spec.name, args, probe.as_ref(), arch)
                    .await?;
                (findings, None)
            },
        };

        // There is no empty success: a clean run still reports one insight.
        if findings.is_empty() {
            findings.push(
                Finding::new(
                    Severity::Insight,
                    Priority::Low,
                    "no_issues_detected",
                    "All rule passes completed without findings",
                )
                .impact("No action needed."),
            );
        }

        // Ordering: severity first; stable sort keeps pass order and
        // discovery order within equal severity.
        findings.sort_by(|a, b| b.severity.cmp(&a.severity));

        // (e) Recommendations, priority-sorted, stable within equal priority.
        let mut recommendations = expert.recommend(&findings);
        recommendations.sort_by(|a, b| b.priority.cmp(&a.priority));

        // (f) Score.
        let penalty = expert.domain_penalty(&findings).min(50);
        let health = HealthScore::from_findings(&findings, penalty);

        // (g) Action plans for immediate/high recommendations.
        expand_action_plans(&mut recommendations);

        // (h) Assemble.
        let dataset_json = if arg_bool(args, "include_details") {
            dataset.as_ref().map(dataset_to_json)
        } else {
            None
        };

        Ok(DiagnosticReport {
            expert: metadata.name.to_string(),
            version: metadata.version.to_string(),
            tool: spec.name.to_string(),
            status: "success".to_string(),
            findings,
            recommendations,
            health,
            dataset: dataset_json,
        })
    }

    /// (c) Collect: execute descriptors with bounded parallelism; output key
    /// order is plan order regardless of completion order.
    async fn collect(&self, plan: &[QueryDescriptor], probe: Arc<dyn Probe>) -> CollectedDataset {
        let semaphore = Arc::new(Semaphore::new(self.config.collect_parallelism));
        let timeout = self.config.query_timeout();
        let mut join_set: JoinSet<(usize, CollectedItem)> = JoinSet::new();

        for (index, descriptor) in plan.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let probe = Arc::clone(&probe);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let item = match tokio::time::timeout(
                    timeout,
                    execute_descriptor(&descriptor, probe.as_ref()),
                )
                .await
                {
                    Ok(Ok(item)) => item,
                    Ok(Err(e)) => CollectedItem::Error(e),
                    Err(_) => CollectedItem::Error(ProbeError::Unavailable(format!(
                        "descriptor '{}' timed out after {}s",
                        descriptor.id,
                        timeout.as_secs()
                    ))),
                };
                (index, item)
            });
        }

        let mut slots: Vec<Option<CollectedItem>> = (0..plan.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, item)) => slots[index] = Some(item),
                Err(e) => tracing::error!("collect task panicked: {}", e),
            }
        }

        let mut dataset = CollectedDataset::new();
        for (descriptor, slot) in plan.iter().zip(slots) {
            let item = slot.unwrap_or_else(|| {
                CollectedItem::Error(ProbeError::Other("collection task lost".to_string()))
            });
            dataset.insert(descriptor.id.clone(), item);
        }
        dataset
    }

    fn failure_report(
        &self,
        expert: &dyn Expert,
        spec: &ToolSpec,
        finding: Finding,
    ) -> DiagnosticReport {
        let metadata = expert.metadata();
        let status = finding.kind.clone();
        let findings = vec![finding];
        let health = HealthScore::from_findings(&findings, 0);
        DiagnosticReport {
            expert: metadata.name.to_string(),
            version: metadata.version.to_string(),
            tool: spec.name.to_string(),
            status,
            findings,
            recommendations: Vec::new(),
            health,
            dataset: None,
        }
    }
}

// ============================================================================
// Stage helpers
// ============================================================================

/// Validate a plan before execution: unique ids, non-empty statements,
/// parameter counts matching bind placeholders.
pub fn validate_plan(plan: &[QueryDescriptor]) -> DoctorResult<()> {
    let mut seen = HashSet::new();
    for descriptor in plan {
        if !seen.insert(descriptor.id.as_str()) {
            return Err(DoctorError::invalid_plan(format!(
                "duplicate descriptor id '{}'",
                descriptor.id
            )));
        }
        if descriptor.statement.trim().is_empty() {
            return Err(DoctorError::invalid_plan(format!(
                "descriptor '{}' has an empty statement",
                descriptor.id
            )));
        }
        if descriptor.kind == QueryKind::Sql {
            let placeholders = descriptor.statement.matches('?').count();
            if placeholders != descriptor.params.len() {
                return Err(DoctorError::invalid_plan(format!(
                    "descriptor '{}' has {} placeholders but {} parameters",
                    descriptor.id,
                    placeholders,
                    descriptor.params.len()
                )));
            }
        }
    }
    Ok(())
}

async fn execute_descriptor(
    descriptor: &QueryDescriptor,
    probe: &dyn Probe,
) -> Result<CollectedItem, ProbeError> {
    match descriptor.kind {
        QueryKind::Sql => probe
            .run_query(&descriptor.statement, &descriptor.params)
            .await
            .map(CollectedItem::Rows),
        QueryKind::Admin => probe
            .run_admin_show(&descriptor.statement)
            .await
            .map(CollectedItem::Rows),
        QueryKind::Http => {
            let (host, port, path) = parse_http_target(&descriptor.statement)?;
            let body = probe.http_get(&host, port, &path).await?;
            body.json().map(CollectedItem::Json)
        },
    }
}

/// Parse an HTTP descriptor statement of shape `host:port/path`.
fn parse_http_target(statement: &str) -> Result<(String, u16, String), ProbeError> {
    let statement = statement.trim_start_matches("http://");
    let slash = statement
        .find('/')
        .ok_or_else(|| ProbeError::Other(format!("HTTP target missing path: {}", statement)))?;
    let (authority, path) = statement.split_at(slash);
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| ProbeError::Other(format!("HTTP target missing port: {}", statement)))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ProbeError::Other(format!("invalid HTTP port in: {}", statement)))?;
    Ok((host.to_string(), port, path.to_string()))
}

/// A required descriptor that failed with anything but a transient unknown
/// error stops the run with one top-level finding. An absent relation on a
/// required descriptor reads like a privilege problem to the operator and
/// is reported the same way.
fn required_failure(plan: &[QueryDescriptor], dataset: &CollectedDataset) -> Option<Finding> {
    for descriptor in plan.iter().filter(|d| d.required) {
        if let Some(error) = dataset.error(&descriptor.id)
            && (error.fatal_when_required() || matches!(error, ProbeError::Absent(_)))
        {
            let kind = match error {
                ProbeError::PermissionDenied(_) | ProbeError::Absent(_) => {
                    "required_probe_denied"
                },
                _ => "required_probe_failed",
            };
            return Some(
                Finding::new(
                    Severity::Critical,
                    Priority::Immediate,
                    kind,
                    format!(
                        "Required probe '{}' failed: {}",
                        descriptor.id,
                        error.message()
                    ),
                )
                .evidence("descriptor_id", descriptor.id.as_str())
                .evidence("error_kind", error.kind())
                .evidence("statement", descriptor.statement.as_str())
                .impact("Diagnosis cannot proceed without this data source."),
            );
        }
    }
    None
}

/// (g) For immediate/high recommendations, fill in the default four-phase
/// plan when the factory supplied none, and guarantee every mutating step
/// carries a rollback note and is followed by verification.
fn expand_action_plans(recommendations: &mut [Recommendation]) {
    for rec in recommendations
        .iter_mut()
        .filter(|r| matches!(r.priority, Priority::Immediate | Priority::High))
    {
        if rec.phases.is_empty() {
            rec.phases = vec![
                Phase::new(
                    "preparation",
                    vec![Step::inspect(
                        format!("Review: {}", rec.description),
                        "Confirm the triggering condition still holds",
                    )],
                )
                .duration("5m"),
                Phase::new(
                    "execution",
                    vec![Step::observe(
                        rec.title.clone(),
                        "Apply the remediation described above",
                    )],
                )
                .duration("15m"),
                Phase::new(
                    "verification",
                    vec![Step::inspect(
                        rec.verification.clone(),
                        "Confirm the remediation took effect",
                    )],
                ),
                Phase::new(
                    "cleanup",
                    vec![Step::observe(
                        "Re-run the diagnostic tool",
                        "Ensure the finding no longer reproduces",
                    )],
                ),
            ];
        }

        for phase in &mut rec.phases {
            let mut patched = Vec::with_capacity(phase.steps.len());
            let drained: Vec<Step> = phase.steps.drain(..).collect();
            let mut pending = drained.into_iter().peekable();
            while let Some(mut step) = pending.next() {
                let is_mutate = step.kind == StepKind::Mutate;
                if is_mutate && step.rollback.is_none() {
                    step.rollback =
                        Some("Restore the previous value recorded during preparation".to_string());
                }
                let body = step.body.clone();
                patched.push(step);
                // Pair every mutation with a verification step unless the
                // factory already placed one right after it.
                let next_verifies = pending
                    .peek()
                    .map(|s| s.kind != StepKind::Mutate)
                    .unwrap_or(false);
                if is_mutate && !next_verifies {
                    patched.push(Step::inspect(
                        format!("Verify the effect of: {}", body),
                        "Mutating steps are always verified before proceeding",
                    ));
                }
            }
            phase.steps = patched;
        }
    }
}

/// Serialize the raw dataset for `include_details=true` responses.
fn dataset_to_json(dataset: &CollectedDataset) -> Value {
    let mut map = serde_json::Map::new();
    for id in dataset.keys() {
        let value = match dataset.get(id) {
            Some(CollectedItem::Rows(rows)) => json!({ "rows": rows_to_json(rows) }),
            Some(CollectedItem::Json(v)) => json!({ "json": v }),
            Some(CollectedItem::Error(e)) => {
                json!({ "error": { "kind": e.kind(), "message": e.message() } })
            },
            None => Value::Null,
        };
        map.insert(id.to_string(), value);
    }
    Value::Object(map)
}

fn rows_to_json(rows: &[Row]) -> Value {
    json!(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScalarValue;

    #[test]
    fn plan_with_duplicate_ids_is_rejected() {
        let plan = vec![
            QueryDescriptor::sql("a", "SELECT 1"),
            QueryDescriptor::sql("a", "SELECT 2"),
        ];
        assert!(matches!(validate_plan(&plan), Err(DoctorError::InvalidPlan(_))));
    }

    #[test]
    fn plan_with_param_mismatch_is_rejected() {
        let plan = vec![
            QueryDescriptor::sql("a", "SELECT * FROM t WHERE x = ? AND y = ?")
                .param(ScalarValue::Integer(1)),
        ];
        assert!(validate_plan(&plan).is_err());

        let plan = vec![
            QueryDescriptor::sql("a", "SELECT * FROM t WHERE x = ?").param(ScalarValue::Integer(1)),
        ];
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn empty_statement_is_rejected() {
        let plan = vec![QueryDescriptor::admin("a", "   ")];
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn http_target_parsing() {
        let (host, port, path) = parse_http_target("10.0.0.1:8040/mem_tracker").unwrap();
        assert_eq!(host, "10.0.0.1");
        assert_eq!(port, 8040);
        assert_eq!(path, "/mem_tracker");
        assert!(parse_http_target("no-port/path").is_err());
    }

    #[test]
    fn default_action_plan_is_expanded() {
        let mut recs = vec![Recommendation {
            id: "r1".into(),
            category: "compaction".into(),
            priority: Priority::High,
            title: "Do something".into(),
            description: "desc".into(),
            finding_kinds: vec![],
            phases: vec![],
            risk: "low".into(),
            verification: "SELECT 1".into(),
        }];
        expand_action_plans(&mut recs);
        let names: Vec<&str> = recs[0].phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["preparation", "execution", "verification", "cleanup"]);
    }

    #[test]
    fn mutating_steps_gain_rollback_and_verification() {
        let mut recs = vec![Recommendation {
            id: "r1".into(),
            category: "compaction".into(),
            priority: Priority::Immediate,
            title: "t".into(),
            description: "d".into(),
            finding_kinds: vec![],
            phases: vec![Phase::new(
                "execution",
                vec![Step {
                    kind: StepKind::Mutate,
                    body: "ALTER TABLE db.t COMPACT p".into(),
                    purpose: "trigger compaction".into(),
                    rollback: None,
                }],
            )],
            risk: "low".into(),
            verification: "check".into(),
        }];
        expand_action_plans(&mut recs);
        let steps = &recs[0].phases[0].steps;
        assert_eq!(steps.len(), 2);
        assert!(steps[0].rollback.is_some());
        assert_eq!(steps[1].kind, StepKind::Inspect);
    }

    #[test]
    fn low_priority_recommendations_are_not_expanded() {
        let mut recs = vec![Recommendation {
            id: "r1".into(),
            category: "ops".into(),
            priority: Priority::Low,
            title: "t".into(),
            description: "d".into(),
            finding_kinds: vec![],
            phases: vec![],
            risk: "low".into(),
            verification: "v".into(),
        }];
        expand_action_plans(&mut recs);
        assert!(recs[0].phases.is_empty());
    }
}
