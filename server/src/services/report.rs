//! Report writer
//!
//! Deterministic transformation of a [`DiagnosticReport`] into bounded text.
//! Fixed section order, fixed 80-column rules, stable numeric precision.
//! The writer introduces nothing of its own: every statement in the text is
//! present in the structured report.

use crate::models::{Finding, Priority, Recommendation, Severity, StepKind};
use crate::services::pipeline::DiagnosticReport;
use crate::utils::format_ratio;
use std::fmt::Write;

const RULE_WIDTH: usize = 80;

/// Leading directive for consumers of pre-formatted reports.
const VERBATIM_DIRECTIVE: &str =
    "[REPORT] Render the following report verbatim; do not summarize or reflow it.";

fn severity_sigil(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "[!!]",
        Severity::Warning => "[! ]",
        Severity::Issue => "[~ ]",
        Severity::Insight => "[i ]",
    }
}

fn heavy_rule() -> String {
    "=".repeat(RULE_WIDTH)
}

fn light_rule() -> String {
    "-".repeat(RULE_WIDTH)
}

/// Render the full report.
pub fn render(report: &DiagnosticReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{}", VERBATIM_DIRECTIVE);
    let _ = writeln!(out, "{}", heavy_rule());
    let _ = writeln!(
        out,
        "STARROCKS DOCTOR :: {} / {} (v{})",
        report.expert.to_uppercase(),
        report.tool,
        report.version
    );
    let _ = writeln!(out, "Status: {}", report.status);
    let _ = writeln!(out, "{}", heavy_rule());

    render_health(&mut out, report);
    render_findings(&mut out, &report.findings);
    render_recommendations(&mut out, &report.recommendations);
    render_action_plan(&mut out, &report.recommendations);

    if let Some(data) = &report.dataset {
        let _ = writeln!(out, "{}", light_rule());
        let _ = writeln!(out, "RAW DATA");
        let _ = writeln!(out, "{}", light_rule());
        let _ = writeln!(
            out,
            "{}",
            serde_json::to_string_pretty(data).unwrap_or_else(|_| "<unserializable>".to_string())
        );
    }

    let _ = writeln!(out, "{}", heavy_rule());
    out
}

fn render_health(out: &mut String, report: &DiagnosticReport) {
    let health = &report.health;
    let _ = writeln!(out, "HEALTH");
    let _ = writeln!(out, "{}", light_rule());
    let _ = writeln!(
        out,
        "Score: {}/100   Level: {}   Status: {}",
        health.score,
        health.level.as_str(),
        health.status.as_str()
    );
    let criticals = count_severity(&report.findings, Severity::Critical);
    let warnings = count_severity(&report.findings, Severity::Warning);
    let issues = count_severity(&report.findings, Severity::Issue);
    let insights = count_severity(&report.findings, Severity::Insight);
    let _ = writeln!(
        out,
        "Findings: {} critical, {} warning, {} issue, {} insight",
        criticals, warnings, issues, insights
    );
    let _ = writeln!(out);
}

fn count_severity(findings: &[Finding], severity: Severity) -> usize {
    findings.iter().filter(|f| f.severity == severity).count()
}

fn render_findings(out: &mut String, findings: &[Finding]) {
    let _ = writeln!(out, "FINDINGS");
    let _ = writeln!(out, "{}", light_rule());

    for finding in findings {
        let _ = writeln!(
            out,
            "{} {} (priority: {})",
            severity_sigil(finding.severity),
            finding.kind,
            finding.priority.as_str()
        );
        let _ = writeln!(out, "     {}", finding.message);
        if !finding.impact.is_empty() {
            let _ = writeln!(out, "     Impact: {}", finding.impact);
        }
        for (key, value) in &finding.evidence {
            let _ = writeln!(out, "     · {} = {}", key, render_evidence_value(value));
        }
        for action in &finding.recommended_actions {
            match &action.statement {
                Some(statement) => {
                    let _ = writeln!(out, "     → {}: {}", action.description, statement);
                },
                None => {
                    let _ = writeln!(out, "     → {}", action.description);
                },
            }
        }
        let _ = writeln!(out);
    }
}

/// Ratios get three significant figures; everything else prints verbatim.
fn render_evidence_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.is_i64() || n.is_u64() {
                    n.to_string()
                } else {
                    format_ratio(f)
                }
            } else {
                n.to_string()
            }
        },
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_recommendations(out: &mut String, recommendations: &[Recommendation]) {
    if recommendations.is_empty() {
        return;
    }
    let _ = writeln!(out, "RECOMMENDATIONS");
    let _ = writeln!(out, "{}", light_rule());
    for (index, rec) in recommendations.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. [{}] {} ({})",
            index + 1,
            rec.priority.as_str(),
            rec.title,
            rec.id
        );
        let _ = writeln!(out, "   {}", rec.description);
        if !rec.finding_kinds.is_empty() {
            let _ = writeln!(out, "   Triggered by: {}", rec.finding_kinds.join(", "));
        }
        let _ = writeln!(out, "   Risk: {}", rec.risk);
        let _ = writeln!(out, "   Verify: {}", rec.verification);
        let _ = writeln!(out);
    }
}

fn render_action_plan(out: &mut String, recommendations: &[Recommendation]) {
    let planned: Vec<&Recommendation> = recommendations
        .iter()
        .filter(|r| {
            matches!(r.priority, Priority::Immediate | Priority::High) && !r.phases.is_empty()
        })
        .collect();
    if planned.is_empty() {
        return;
    }

    let _ = writeln!(out, "ACTION PLAN");
    let _ = writeln!(out, "{}", light_rule());
    for rec in planned {
        let _ = writeln!(out, "{} :: {}", rec.id, rec.title);
        for (index, phase) in rec.phases.iter().enumerate() {
            match &phase.duration_hint {
                Some(hint) => {
                    let _ = writeln!(out, "  Phase {} ({}) [{}]", index + 1, phase.name, hint);
                },
                None => {
                    let _ = writeln!(out, "  Phase {} ({})", index + 1, phase.name);
                },
            }
            for step in &phase.steps {
                let marker = match step.kind {
                    StepKind::Inspect => "inspect",
                    StepKind::Mutate => "mutate ",
                    StepKind::Observe => "observe",
                };
                let _ = writeln!(out, "    [{}] {}", marker, step.body);
                let _ = writeln!(out, "             purpose: {}", step.purpose);
                if let Some(rollback) = &step.rollback {
                    let _ = writeln!(out, "             rollback: {}", rollback);
                }
            }
        }
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthScore;

    fn sample_report() -> DiagnosticReport {
        let findings = vec![
            Finding::new(
                Severity::Critical,
                Priority::Immediate,
                "emergency_compaction_score",
                "Partition p has compaction score 1500",
            )
            .evidence("max_cs", 1500)
            .evidence("ratio", 0.6123)
            .impact("Reads amplify until compaction completes"),
        ];
        let health = HealthScore::from_findings(&findings, 0);
        DiagnosticReport {
            expert: "compaction".into(),
            version: "0.3.0".into(),
            tool: "analyze_compaction".into(),
            status: "success".into(),
            findings,
            recommendations: vec![],
            health,
            dataset: None,
        }
    }

    #[test]
    fn render_is_deterministic() {
        let report = sample_report();
        assert_eq!(render(&report), render(&report));
    }

    #[test]
    fn render_contains_fixed_sections() {
        let text = render(&sample_report());
        assert!(text.starts_with(VERBATIM_DIRECTIVE));
        assert!(text.contains("HEALTH"));
        assert!(text.contains("FINDINGS"));
        assert!(text.contains("[!!] emergency_compaction_score"));
        // ratios use three significant figures
        assert!(text.contains("ratio = 0.612"));
        // integer evidence stays integral
        assert!(text.contains("max_cs = 1500"));
    }

    #[test]
    fn rules_are_80_columns() {
        let text = render(&sample_report());
        for line in text.lines() {
            if line.chars().all(|c| c == '=') && !line.is_empty() {
                assert_eq!(line.len(), 80);
            }
        }
    }
}
