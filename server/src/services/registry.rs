//! Tool Registry
//!
//! In-memory map from tool name to (expert, spec). Registration validates
//! each input schema; a duplicate name is a fatal startup error. After
//! construction the registry is read-only and needs no locking.

use crate::config::Config;
use crate::models::ToolResponse;
use crate::services::experts::{Expert, ToolSpec, all_experts};
use crate::services::pipeline::Pipeline;
use crate::services::probe::Probe;
use crate::services::report;
use crate::utils::{DoctorError, DoctorResult};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

struct RegisteredTool {
    expert: Arc<dyn Expert>,
    spec: ToolSpec,
}

pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    /// Expert registration order, for stable discovery listings.
    expert_order: Vec<&'static str>,
    pipeline: Pipeline,
}

impl ToolRegistry {
    /// Build the registry from the full expert roster.
    pub fn build(config: &Config) -> DoctorResult<Self> {
        Self::with_experts(config, all_experts())
    }

    pub fn with_experts(
        config: &Config,
        experts: Vec<Arc<dyn Expert>>,
    ) -> DoctorResult<Self> {
        let mut tools = HashMap::new();
        let mut expert_order = Vec::new();

        for expert in experts {
            let metadata = expert.metadata();
            expert_order.push(metadata.name);
            for spec in expert.tools() {
                validate_schema(&spec)?;
                if tools.contains_key(spec.name) {
                    return Err(DoctorError::DuplicateTool(spec.name.to_string()));
                }
                tracing::debug!(tool = spec.name, expert = metadata.name, "registered tool");
                tools.insert(spec.name.to_string(), RegisteredTool {
                    expert: Arc::clone(&expert),
                    spec,
                });
            }
        }

        Ok(Self { tools, expert_order, pipeline: Pipeline::new(config.pipeline.clone()) })
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    /// All tools grouped by expert, in registration order.
    pub fn list_by_expert(&self) -> Vec<(&'static str, Vec<&ToolSpec>)> {
        self.expert_order
            .iter()
            .map(|expert_name| {
                let mut specs: Vec<&ToolSpec> = self
                    .tools
                    .values()
                    .filter(|t| t.expert.metadata().name == *expert_name)
                    .map(|t| &t.spec)
                    .collect();
                specs.sort_by_key(|s| s.name);
                (*expert_name, specs)
            })
            .collect()
    }

    /// Dispatch one invocation: validate args against the schema, run the
    /// pipeline, format the response.
    pub async fn dispatch(
        &self,
        name: &str,
        args: &Value,
        probe: Arc<dyn Probe>,
    ) -> DoctorResult<ToolResponse> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| DoctorError::tool_not_found(name))?;

        validate_args(&tool.spec, args)?;

        let report = self
            .pipeline
            .run(tool.expert.as_ref(), &tool.spec, args, probe)
            .await?;

        let text = report::render(&report);

        Ok(ToolResponse {
            status: report.status.clone(),
            expert: report.expert.clone(),
            version: report.version.clone(),
            timestamp: Utc::now(),
            report: text,
            data: report.dataset.clone(),
            analysis: crate::models::Analysis {
                findings: report.findings,
                recommendations: report.recommendations,
                health: report.health,
            },
        })
    }
}

/// Schema sanity: object type, properties present, required ⊆ properties.
fn validate_schema(spec: &ToolSpec) -> DoctorResult<()> {
    let schema = &spec.input_schema;
    let invalid = |reason: &str| DoctorError::InvalidSchema {
        tool: spec.name.to_string(),
        reason: reason.to_string(),
    };

    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("schema type must be 'object'"));
    }
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("schema must declare 'properties'"))?;

    if let Some(required) = schema.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| invalid("'required' must be an array"))?;
        for entry in required {
            let name = entry
                .as_str()
                .ok_or_else(|| invalid("'required' entries must be strings"))?;
            if !properties.contains_key(name) {
                return Err(invalid(&format!(
                    "required field '{}' is not a declared property",
                    name
                )));
            }
        }
    }
    Ok(())
}

/// Minimal argument validation: required fields present, args is an object.
fn validate_args(spec: &ToolSpec, args: &Value) -> DoctorResult<()> {
    if !args.is_object() && !args.is_null() {
        return Err(DoctorError::invalid_arguments("arguments must be a JSON object"));
    }
    if let Some(required) = spec.input_schema.get("required").and_then(Value::as_array) {
        for entry in required {
            if let Some(name) = entry.as_str()
                && args.get(name).map(Value::is_null).unwrap_or(true)
            {
                return Err(DoctorError::invalid_arguments(format!(
                    "missing required argument '{}'",
                    name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_with_schema(schema: Value) -> ToolSpec {
        ToolSpec {
            name: "test_tool",
            description: "test",
            input_schema: schema,
            mode: crate::services::experts::ToolMode::Plan,
        }
    }

    #[test]
    fn registry_builds_with_full_roster() {
        let registry = ToolRegistry::build(&Config::default()).unwrap();
        assert!(!registry.is_empty());
        // every expert contributes at least one tool
        for (_, specs) in registry.list_by_expert() {
            assert!(!specs.is_empty());
        }
    }

    #[test]
    fn schema_requires_object_type() {
        let spec = spec_with_schema(json!({"type": "string"}));
        assert!(validate_schema(&spec).is_err());
    }

    #[test]
    fn schema_requires_known_required_fields() {
        let spec = spec_with_schema(json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "required": ["b"]
        }));
        assert!(validate_schema(&spec).is_err());
    }

    #[test]
    fn args_missing_required_field_rejected() {
        let spec = spec_with_schema(json!({
            "type": "object",
            "properties": {"label": {"type": "string"}},
            "required": ["label"]
        }));
        assert!(validate_args(&spec, &json!({})).is_err());
        assert!(validate_args(&spec, &json!({"label": "x"})).is_ok());
    }
}
