//! LLM-backed load-failure classification
//!
//! The scenario templates a single prompt from the failed job's fields and
//! expects a JSON object whose `category` is drawn from the same closed set
//! the deterministic classifier uses. Anything off-contract falls back to
//! the rule result; the method that produced the final category is always
//! recorded on the diagnosis.

use super::client::{ChatOutcome, LlmClient};
use crate::services::failure_classifier::{FailureCategory, classify_failure};
use serde::{Deserialize, Serialize};

pub const CLASSIFY_SYSTEM_PROMPT: &str = r#"You are a StarRocks ingestion expert. You receive the fields of one failed load job and must classify the failure.

Respond with a single JSON object of this exact shape:
{
  "category": "<one of: timeout, resource, network, file, permission_denied, transaction, configuration, data_quality, cancelled, other>",
  "root_cause": "<one sentence naming the most likely root cause>",
  "details": ["<supporting observation>", ...],
  "related_issues": ["<other subsystems likely involved>", ...],
  "recommendations": ["<executable statement or concrete operator action>", ...]
}

Rules:
- "category" MUST be one of the listed values, nothing else.
- Base every detail on the provided fields; do not invent metrics.
- Recommendations must be directly executable (SQL, SET commands, or a
  concrete operational step), never generic advice.
"#;

/// Which classifier produced the final category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Rule,
    Llm,
}

/// Result of classifying one failed load job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDiagnosis {
    pub category: FailureCategory,
    pub method: ClassificationMethod,
    /// The rule ladder's answer, kept even when the LLM answered: the LLM
    /// never silently overrides it.
    pub rule_category: FailureCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

impl FailureDiagnosis {
    fn rule_only(category: FailureCategory) -> Self {
        Self {
            category,
            method: ClassificationMethod::Rule,
            rule_category: category,
            root_cause: None,
            details: Vec::new(),
            related_issues: Vec::new(),
            recommendations: Vec::new(),
        }
    }
}

/// Raw shape of a conforming LLM response.
#[derive(Debug, Deserialize)]
struct LlmClassification {
    category: String,
    #[serde(default)]
    root_cause: String,
    #[serde(default)]
    details: Vec<String>,
    #[serde(default)]
    related_issues: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

/// Fields of the failed job the prompt is templated from.
pub struct FailedJob<'a> {
    pub label: &'a str,
    pub job_type: &'a str,
    pub db_name: &'a str,
    pub table_name: &'a str,
    pub state: &'a str,
    pub error_msg: &'a str,
    pub tracking_sql: Option<&'a str>,
}

pub fn build_prompt(job: &FailedJob) -> String {
    let mut prompt = format!(
        "Failed load job:\n- label: {}\n- type: {}\n- database: {}\n- table: {}\n- state: {}\n- error message: {}\n",
        job.label, job.job_type, job.db_name, job.table_name, job.state, job.error_msg
    );
    if let Some(tracking) = job.tracking_sql {
        prompt.push_str(&format!("- tracking sql: {}\n", tracking));
    }
    prompt
}

pub struct LlmClassifier {
    client: Option<LlmClient>,
}

impl LlmClassifier {
    pub fn new(client: Option<LlmClient>) -> Self {
        Self { client }
    }

    pub fn enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Classify a failed job. The deterministic ladder always runs; the LLM
    /// refines it only when available and on-contract.
    pub async fn classify(&self, job: &FailedJob<'_>) -> FailureDiagnosis {
        let rule_category = classify_failure(job.error_msg);

        let Some(client) = &self.client else {
            return FailureDiagnosis::rule_only(rule_category);
        };

        let prompt = build_prompt(job);
        match client.complete_json(CLASSIFY_SYSTEM_PROMPT, &prompt).await {
            ChatOutcome::Json(value) => {
                match validate_response(&value, rule_category) {
                    Some(diagnosis) => diagnosis,
                    None => {
                        tracing::warn!("LLM classification off-contract, using rule result");
                        FailureDiagnosis::rule_only(rule_category)
                    },
                }
            },
            ChatOutcome::Unavailable(reason) => {
                tracing::debug!("LLM unavailable ({}), using rule result", reason);
                FailureDiagnosis::rule_only(rule_category)
            },
        }
    }
}

/// Validate the LLM output against the closed contract. Returns `None` on
/// any schema violation, including an out-of-set category.
pub fn validate_response(
    value: &serde_json::Value,
    rule_category: FailureCategory,
) -> Option<FailureDiagnosis> {
    let parsed: LlmClassification = serde_json::from_value(value.clone()).ok()?;
    let category = FailureCategory::parse(&parsed.category)?;

    Some(FailureDiagnosis {
        category,
        method: ClassificationMethod::Llm,
        rule_category,
        root_cause: (!parsed.root_cause.is_empty()).then_some(parsed.root_cause),
        details: parsed.details,
        related_issues: parsed.related_issues,
        recommendations: parsed.recommendations,
    })
}
