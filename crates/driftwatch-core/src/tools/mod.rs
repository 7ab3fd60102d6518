pub mod github;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ToolFailureKind;

/// A named external capability invocable with schema-checked arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    async fn execute(&self, args: serde_json::Value) -> Result<String>;
}

/// Tool description handed to the reasoning engine.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// What a capability invocation produced. Every failure path resolves to a
/// `Failure` value; invocation never raises past the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Output(String),
    Failure {
        kind: ToolFailureKind,
        detail: String,
    },
}

impl ToolOutcome {
    /// Render the outcome as context text for the reasoning engine. A failed
    /// lookup becomes information, not an abort.
    pub fn into_context_text(self, tool: &str) -> String {
        match self {
            ToolOutcome::Output(text) => text,
            ToolOutcome::Failure { kind, detail } => {
                format!("lookup {tool} failed ({kind}): {detail}")
            }
        }
    }
}

/// Registry of available capabilities.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Specs for every registered capability, for the engine's tool menu.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Validate `args` against the capability's declared schema and invoke it.
    pub async fn invoke(&self, name: &str, args: serde_json::Value) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            return ToolOutcome::Failure {
                kind: ToolFailureKind::UnknownCapability,
                detail: format!("no capability named '{name}'"),
            };
        };

        let problems = check_arguments(&args, &tool.parameters_schema());
        if !problems.is_empty() {
            return ToolOutcome::Failure {
                kind: ToolFailureKind::InvalidArguments,
                detail: problems.join("; "),
            };
        }

        match tool.execute(args).await {
            Ok(text) => ToolOutcome::Output(text),
            Err(e) => ToolOutcome::Failure {
                kind: ToolFailureKind::Execution,
                detail: e.to_string(),
            },
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate arguments against a JSON schema. Returns a list of problem
/// strings, empty if the arguments are acceptable. Unknown fields are
/// rejected, required fields enforced, declared types checked.
fn check_arguments(args: &serde_json::Value, schema: &serde_json::Value) -> Vec<String> {
    let mut problems = Vec::new();
    check_value(args, schema, "", &mut problems);
    problems
}

fn check_value(
    value: &serde_json::Value,
    schema: &serde_json::Value,
    path: &str,
    problems: &mut Vec<String>,
) {
    let shown = if path.is_empty() { "arguments" } else { path };

    if let Some(expected) = schema.get("type").and_then(|t| t.as_str()) {
        let matches = match expected {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            problems.push(format!("{shown}: expected type '{expected}'"));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            problems.push(format!("{shown}: value not in allowed set"));
        }
    }

    if let Some(fields) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for name in required.iter().filter_map(|r| r.as_str()) {
                if !fields.contains_key(name) {
                    problems.push(format!("{}: required field missing", join(path, name)));
                }
            }
        }

        let properties = schema.get("properties").and_then(|p| p.as_object());
        if let Some(properties) = properties {
            for name in fields.keys() {
                if !properties.contains_key(name) {
                    problems.push(format!("{}: unknown field", join(path, name)));
                }
            }
            for (name, field_schema) in properties {
                if let Some(field) = fields.get(name) {
                    check_value(field, field_schema, &join(path, name), problems);
                }
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in items.iter().enumerate() {
                check_value(item, item_schema, &format!("{shown}[{i}]"), problems);
            }
        }
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text argument back."
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "repeat": { "type": "integer" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: serde_json::Value) -> Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails."
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<String> {
            anyhow::bail!("backend exploded")
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(BrokenTool));
        registry
    }

    #[tokio::test]
    async fn valid_invocation_returns_output() {
        let outcome = registry().invoke("echo", json!({"text": "hi"})).await;
        assert_eq!(outcome, ToolOutcome::Output("hi".into()));
    }

    #[tokio::test]
    async fn unknown_capability_is_a_failure_value() {
        let outcome = registry().invoke("nope", json!({})).await;
        match outcome {
            ToolOutcome::Failure { kind, detail } => {
                assert_eq!(kind, ToolFailureKind::UnknownCapability);
                assert!(detail.contains("nope"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_required_field_rejected() {
        let outcome = registry().invoke("echo", json!({})).await;
        match outcome {
            ToolOutcome::Failure { kind, detail } => {
                assert_eq!(kind, ToolFailureKind::InvalidArguments);
                assert!(detail.contains("text"));
                assert!(detail.contains("required"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_field_rejected() {
        let outcome = registry()
            .invoke("echo", json!({"text": "hi", "volume": 11}))
            .await;
        match outcome {
            ToolOutcome::Failure { kind, detail } => {
                assert_eq!(kind, ToolFailureKind::InvalidArguments);
                assert!(detail.contains("volume"));
                assert!(detail.contains("unknown field"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_type_rejected() {
        let outcome = registry().invoke("echo", json!({"text": 42})).await;
        match outcome {
            ToolOutcome::Failure { kind, detail } => {
                assert_eq!(kind, ToolFailureKind::InvalidArguments);
                assert!(detail.contains("expected type 'string'"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execute_error_becomes_execution_failure() {
        let outcome = registry().invoke("broken", json!({})).await;
        match outcome {
            ToolOutcome::Failure { kind, detail } => {
                assert_eq!(kind, ToolFailureKind::Execution);
                assert!(detail.contains("backend exploded"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn specs_are_sorted_and_complete() {
        let specs = registry().specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["broken", "echo"]);
        assert!(specs[1].parameters["required"][0] == json!("text"));
    }

    #[test]
    fn failure_renders_as_context_text() {
        let outcome = ToolOutcome::Failure {
            kind: ToolFailureKind::Execution,
            detail: "repo not found".into(),
        };
        let text = outcome.into_context_text("list_repo_files");
        assert!(text.contains("lookup list_repo_files failed"));
        assert!(text.contains("repo not found"));
    }
}
