//! Diagnostic output model
//!
//! These types are the unit of communication between analyzers, the
//! pipeline, the report writer, and tool callers. They are designed to be
//! serializable for tool responses and stable across versions: `Finding.kind`
//! is a machine-readable slug consumers may match on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// Severity and Priority
// ============================================================================

/// Finding severity. Ordered: `Critical > Warning > Issue > Insight`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Insight,
    Issue,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Issue => "issue",
            Self::Insight => "insight",
        }
    }

    /// Base health-score penalty for one finding of this severity.
    pub fn penalty(&self) -> u32 {
        match self {
            Self::Critical => 25,
            Self::Warning => 10,
            Self::Issue => 5,
            Self::Insight => 0,
        }
    }
}

/// Recommendation priority. Ordered: `Immediate > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Immediate,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

// ============================================================================
// Finding
// ============================================================================

/// A single executable step attached to a finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub description: String,
    /// Statement the operator can run verbatim; the engine never executes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
}

impl RecommendedAction {
    pub fn new(description: impl Into<String>) -> Self {
        Self { description: description.into(), statement: None }
    }

    pub fn with_statement(description: impl Into<String>, statement: impl Into<String>) -> Self {
        Self { description: description.into(), statement: Some(statement.into()) }
    }
}

/// The unit of diagnostic output.
///
/// `kind` is the stable machine-readable slug (e.g.
/// `emergency_compaction_score`); `evidence` carries the specific values the
/// finding rests on. Downstream components never change `severity`; the
/// correlation pass only adds new findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub priority: Priority,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    /// BTreeMap keeps evidence key order deterministic in serialized output.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evidence: BTreeMap<String, Value>,
    pub impact: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommended_actions: Vec<RecommendedAction>,
}

impl Finding {
    pub fn new(
        severity: Severity,
        priority: Priority,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            priority,
            kind: kind.into(),
            message: message.into(),
            evidence: BTreeMap::new(),
            impact: String::new(),
            recommended_actions: Vec::new(),
        }
    }

    pub fn impact(mut self, impact: impl Into<String>) -> Self {
        self.impact = impact.into();
        self
    }

    pub fn evidence(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.evidence.insert(key.into(), value.into());
        self
    }

    pub fn action(mut self, action: RecommendedAction) -> Self {
        self.recommended_actions.push(action);
        self
    }
}

// ============================================================================
// Recommendation
// ============================================================================

/// Step kind inside an action-plan phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Read-only inspection (SELECT / SHOW).
    Inspect,
    /// State-changing statement. Always paired with a verification step and
    /// a rollback note in the expanded plan.
    Mutate,
    /// Watch a metric or job state for some time.
    Observe,
}

/// One step of a remediation phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,
    pub body: String,
    pub purpose: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<String>,
}

impl Step {
    pub fn inspect(body: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self { kind: StepKind::Inspect, body: body.into(), purpose: purpose.into(), rollback: None }
    }

    pub fn observe(body: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self { kind: StepKind::Observe, body: body.into(), purpose: purpose.into(), rollback: None }
    }

    pub fn mutate(
        body: impl Into<String>,
        purpose: impl Into<String>,
        rollback: impl Into<String>,
    ) -> Self {
        Self {
            kind: StepKind::Mutate,
            body: body.into(),
            purpose: purpose.into(),
            rollback: Some(rollback.into()),
        }
    }
}

/// A named phase of an action plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_hint: Option<String>,
    pub steps: Vec<Step>,
}

impl Phase {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self { name: name.into(), duration_hint: None, steps }
    }

    pub fn duration(mut self, hint: impl Into<String>) -> Self {
        self.duration_hint = Some(hint.into());
        self
    }
}

/// A remediation recommendation generated from one or more findings.
///
/// `finding_kinds` references the triggering findings by their `type` slug;
/// the finding set determines which recommendations exist, never the
/// reverse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub category: String,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finding_kinds: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<Phase>,
    pub risk: String,
    pub verification: String,
}

// ============================================================================
// Health Score
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Health score derived deterministically from a finding set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthScore {
    pub score: u32,
    pub level: HealthLevel,
    pub status: HealthStatus,
}

impl HealthScore {
    /// Compute the score from a finding set plus a bounded domain penalty.
    ///
    /// The result is a pure function of the finding multiset: ordering of
    /// the input slice never changes the outcome.
    pub fn from_findings(findings: &[Finding], domain_penalty: u32) -> Self {
        let base: u32 = findings.iter().map(|f| f.severity.penalty()).sum();
        let penalty = base + domain_penalty.min(50);
        let score = 100u32.saturating_sub(penalty);

        let level = if score >= 80 {
            HealthLevel::Excellent
        } else if score >= 60 {
            HealthLevel::Good
        } else if score >= 40 {
            HealthLevel::Fair
        } else {
            HealthLevel::Poor
        };

        let status = if findings.iter().any(|f| f.severity == Severity::Critical) {
            HealthStatus::Critical
        } else if findings.iter().any(|f| f.severity == Severity::Warning) {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        Self { score, level, status }
    }
}
