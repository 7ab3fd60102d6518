use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, CompletionRequest, Message, ToolDefinition};
use rig::message::{
    AssistantContent, Text, ToolCall, ToolFunction, ToolResult, ToolResultContent, UserContent,
};
use rig::OneOrMany;
use tracing::debug;

use crate::memory::{Exchange, HistoryEntry, Summarizer};
use crate::tools::ToolSpec;

/// Pool of named model tiers ("default", "summary").
///
/// Unknown tier names fall back to "default"; construction requires that a
/// "default" tier exists.
#[allow(deprecated)]
#[derive(Clone)]
pub struct ModelPool {
    /// (model_handle, model_name_for_logging)
    models: HashMap<String, (CompletionModelHandle<'static>, String)>,
}

#[allow(deprecated)]
impl ModelPool {
    /// Create a new ModelPool. Panics if no "default" tier is present.
    pub fn new(models: HashMap<String, (CompletionModelHandle<'static>, String)>) -> Self {
        assert!(
            models.contains_key("default"),
            "ModelPool must contain a \"default\" tier"
        );
        Self { models }
    }

    /// Get a specific tier. Falls back to "default" if the tier is not found.
    pub fn get(&self, tier: &str) -> (&CompletionModelHandle<'static>, &str) {
        let (handle, name) = self
            .models
            .get(tier)
            .or_else(|| self.models.get("default"))
            .expect("default tier must exist");
        (handle, name)
    }

    /// List all available tier names.
    pub fn tiers(&self) -> Vec<&str> {
        self.models.keys().map(|k| k.as_str()).collect()
    }
}

/// One tool invocation requested by the engine.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub call_id: Option<String>,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A completed invocation folded back into the cycle's working context.
#[derive(Debug, Clone)]
pub struct ToolExchange {
    pub call: ToolCallRequest,
    pub output: String,
}

/// What the engine decided to do next.
#[derive(Debug, Clone)]
pub enum EngineStep {
    ToolCalls(Vec<ToolCallRequest>),
    Reply(String),
}

/// Inputs for one engine step.
pub struct StepRequest<'a> {
    pub history: &'a [HistoryEntry],
    pub input: &'a str,
    pub trace: &'a [ToolExchange],
    pub tools: &'a [ToolSpec],
    /// When set, no tools are offered and the engine must produce a reply
    /// from the context gathered so far.
    pub finalize: bool,
}

/// Opaque decision-making capability driving the cycle: given the rendered
/// history, the task, and the invocations so far, pick the next tool calls
/// or produce the final reply.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn next_step(&self, request: StepRequest<'_>) -> Result<EngineStep>;
}

const PREAMBLE: &str = r#"You are driftwatch, responsible for evaluating whether the documentation in a GitHub repository and branch is up to date with respect to the changes in a provided list of files.
You can only use the provided tools. Follow this workflow:

1. Call `list_repo_files` to get the list of all files in the repository for the branch.
2. For each changed file, call `get_file_content` to read its content, and identify which documentation files (such as README.md, or .md/.rst/.txt files in the same directory or in docs/) are most likely to be relevant to the change.
3. For each relevant documentation file, call `get_file_content` to read its content and check whether the documentation is up to date with respect to the changes (such as APIs, usage, dependencies, or configuration).
4. Prepare a brief report for the sender: list any documentation that is outdated or missing regarding the recent changes, with recommendations on what should be updated. If everything is already up to date, simply state that.

If a lookup fails, note the failure in your report and continue with what you have. Always produce a report, even if your result is empty or inconclusive."#;

const FINALIZE_NOTE: &str =
    "The lookup budget for this request is spent. Respond now with your report based on the \
     context gathered so far.";

/// Production engine backed by rig's CompletionModel.
///
/// Stateless per step: the cycle hands it the full context every time, so
/// one engine instance can serve every cycle of a long-lived worker.
#[allow(deprecated)]
pub struct RigEngine {
    models: ModelPool,
    temperature: f64,
    max_tokens: u64,
}

#[allow(deprecated)]
impl RigEngine {
    pub fn new(models: ModelPool, temperature: f64, max_tokens: u64) -> Self {
        Self {
            models,
            temperature,
            max_tokens,
        }
    }
}

fn user_text(text: String) -> Message {
    Message::User {
        content: OneOrMany::one(UserContent::Text(Text { text })),
    }
}

fn assistant_text(text: String) -> Message {
    Message::Assistant {
        id: None,
        content: OneOrMany::one(AssistantContent::Text(Text { text })),
    }
}

#[allow(deprecated)]
#[async_trait]
impl ReasoningEngine for RigEngine {
    async fn next_step(&self, request: StepRequest<'_>) -> Result<EngineStep> {
        let (model, model_name) = self.models.get("default");

        let mut messages: Vec<Message> = Vec::new();
        for entry in request.history {
            match entry {
                HistoryEntry::Summary(text) => {
                    messages.push(user_text(format!("[Earlier Summary]\n{text}")));
                }
                HistoryEntry::Input(text) => messages.push(user_text(text.clone())),
                HistoryEntry::Output(text) => messages.push(assistant_text(text.clone())),
            }
        }
        messages.push(user_text(request.input.to_string()));

        // Replay this cycle's tool trace as call/result pairs.
        for exchange in request.trace {
            messages.push(Message::Assistant {
                id: None,
                content: OneOrMany::one(AssistantContent::ToolCall(ToolCall {
                    id: exchange.call.id.clone(),
                    call_id: exchange.call.call_id.clone(),
                    function: ToolFunction {
                        name: exchange.call.name.clone(),
                        arguments: exchange.call.arguments.clone(),
                    },
                    signature: None,
                    additional_params: None,
                })),
            });
            messages.push(Message::User {
                content: OneOrMany::one(UserContent::ToolResult(ToolResult {
                    id: exchange.call.id.clone(),
                    call_id: exchange.call.call_id.clone(),
                    content: OneOrMany::one(ToolResultContent::Text(Text {
                        text: exchange.output.clone(),
                    })),
                })),
            });
        }

        let tool_defs: Vec<ToolDefinition> = if request.finalize {
            messages.push(user_text(FINALIZE_NOTE.to_string()));
            Vec::new()
        } else {
            request
                .tools
                .iter()
                .map(|spec| ToolDefinition {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    parameters: spec.parameters.clone(),
                })
                .collect()
        };

        debug!(
            model = %model_name,
            messages = messages.len(),
            tools = tool_defs.len(),
            finalize = request.finalize,
            "Engine step"
        );

        let fallback = user_text(request.input.to_string());
        let completion = CompletionRequest {
            preamble: Some(PREAMBLE.to_string()),
            chat_history: OneOrMany::many(messages).unwrap_or_else(|_| OneOrMany::one(fallback)),
            documents: Vec::new(),
            tools: tool_defs,
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            tool_choice: None,
            additional_params: None,
        };

        let response = model
            .completion(completion)
            .await
            .map_err(|e| anyhow::anyhow!("completion error: {e}"))?;

        let mut text = String::new();
        let mut calls: Vec<ToolCallRequest> = Vec::new();
        for content in response.choice.iter() {
            match content {
                AssistantContent::Text(t) => text.push_str(&t.text),
                AssistantContent::ToolCall(tc) => calls.push(ToolCallRequest {
                    id: tc.id.clone(),
                    call_id: tc.call_id.clone(),
                    name: tc.function.name.clone(),
                    arguments: tc.function.arguments.clone(),
                }),
                _ => {}
            }
        }

        if !calls.is_empty() {
            Ok(EngineStep::ToolCalls(calls))
        } else if text.is_empty() {
            Ok(EngineStep::Reply(
                "I've completed processing but have no findings to report.".to_string(),
            ))
        } else {
            Ok(EngineStep::Reply(text))
        }
    }
}

#[allow(deprecated)]
#[async_trait]
impl Summarizer for RigEngine {
    async fn fold(&self, prior: Option<&str>, evicted: &[Exchange]) -> Result<String> {
        let (model, model_name) = self.models.get("summary");

        let mut transcript = String::new();
        for exchange in evicted {
            transcript.push_str(&format!(
                "REQUEST: {}\nREPLY: {}\n",
                exchange.input, exchange.output
            ));
        }

        let prompt = format!(
            "Maintain a running summary of a documentation-checking conversation. \
             Update the current summary with the new exchanges, keeping repository \
             names, branches, checked files, and verdicts. Respond with the updated \
             summary only, no preamble.\n\n\
             ## Current Summary\n{}\n\n## New Exchanges\n{}",
            prior.unwrap_or("(none)"),
            transcript
        );

        debug!(model = %model_name, evicted = evicted.len(), "Folding evicted exchanges");

        let completion = CompletionRequest {
            preamble: None,
            chat_history: OneOrMany::one(user_text(prompt)),
            documents: Vec::new(),
            tools: Vec::new(),
            temperature: Some(0.3),
            max_tokens: Some(1024),
            tool_choice: None,
            additional_params: None,
        };

        let response = model
            .completion(completion)
            .await
            .map_err(|e| anyhow::anyhow!("summary completion error: {e}"))?;

        let summary: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect();

        if summary.trim().is_empty() {
            anyhow::bail!("summarizer returned empty output");
        }
        Ok(summary.trim().to_string())
    }
}
