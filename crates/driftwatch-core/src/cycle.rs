use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::bus::{Mention, MentionStream};
use crate::engine::{EngineStep, ReasoningEngine, StepRequest, ToolExchange};
use crate::error::SessionFault;
use crate::memory::{ConversationMemory, HistoryEntry};
use crate::tools::ToolRegistry;

/// Reserved reply content meaning "an internal fault occurred; no further
/// detail available this turn".
pub const ERROR_SENTINEL: &str = "error";

const LIMIT_REPLY: &str =
    "I reached my lookup budget before finishing this check. Please narrow the list of changed \
     files and ask again.";

/// Parameters a mention must carry before an investigation can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskParams {
    /// Full repository name, "owner/repo".
    pub repo: String,
    pub branch: String,
    pub changed_files: Vec<String>,
}

/// Extracts task parameters from free-text mention content.
pub struct MentionParser {
    repo_re: Regex,
    branch_re: Regex,
    files_re: Regex,
}

impl MentionParser {
    pub fn new() -> Self {
        Self {
            repo_re: Regex::new(
                r"(?i)\brepo(?:sitory)?(?:[\s_-]*name)?\s*[:=]?\s*`?([A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+)",
            )
            .unwrap(),
            branch_re: Regex::new(
                r"(?i)\bbranch(?:[\s_-]*name)?\s*[:=]?\s*`?([A-Za-z0-9_./-]+)",
            )
            .unwrap(),
            files_re: Regex::new(r"(?is)\b(?:changed|modified|updated)?[\s_-]*files?\s*[:=]\s*(.+)")
                .unwrap(),
        }
    }

    /// Extract all required parameters, or report which ones are missing.
    pub fn extract(&self, content: &str) -> Result<TaskParams, Vec<&'static str>> {
        let repo = self
            .repo_re
            .captures(content)
            .map(|c| c[1].to_string());
        let branch = self
            .branch_re
            .captures(content)
            .map(|c| c[1].to_string());
        let changed_files = self
            .files_re
            .captures(content)
            .map(|c| split_file_list(&c[1]))
            .filter(|files| !files.is_empty());

        let mut missing = Vec::new();
        if repo.is_none() {
            missing.push("the repository name (owner/repo)");
        }
        if branch.is_none() {
            missing.push("the branch name");
        }
        if changed_files.is_none() {
            missing.push("the list of changed files");
        }
        if !missing.is_empty() {
            return Err(missing);
        }

        Ok(TaskParams {
            repo: repo.unwrap(),
            branch: branch.unwrap(),
            changed_files: changed_files.unwrap(),
        })
    }
}

impl Default for MentionParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a free-form file list on commas, whitespace, and bullets. Keeps
/// tokens that look like paths (contain '.' or '/').
fn split_file_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| token.trim_matches('`'))
        .filter(|token| !token.is_empty() && (token.contains('.') || token.contains('/')))
        .map(str::to_string)
        .collect()
}

fn clarification_text(missing: &[&str]) -> String {
    format!(
        "I can't check documentation consistency yet; please provide {}.",
        missing.join(", ")
    )
}

fn task_prompt(mention: &Mention, task: &TaskParams) -> String {
    let files = task
        .changed_files
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Check whether the documentation in `{}` (branch `{}`) is up to date with respect to \
         these changed files:\n{}\n\nOriginal request:\n{}",
        task.repo, task.branch, files, mention.content
    )
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No mention arrived within the timeout; re-enter the wait.
    Idle,
    /// A mention was consumed and exactly one reply was sent for it.
    Replied,
}

/// Drives one mention through the cycle states: await the mention, extract
/// parameters, gather context through tools, compose a reply, send it,
/// record the exchange.
///
/// Every internal fault degrades to a reply (clarification request or the
/// error sentinel); only transport and memory failures escape, because only
/// the driver can answer those.
pub struct ReasoningCycle {
    engine: Arc<dyn ReasoningEngine>,
    tools: Arc<ToolRegistry>,
    parser: MentionParser,
    mention_timeout: Duration,
    tool_invocation_limit: usize,
}

impl ReasoningCycle {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        tools: Arc<ToolRegistry>,
        mention_timeout: Duration,
        tool_invocation_limit: usize,
    ) -> Self {
        Self {
            engine,
            tools,
            parser: MentionParser::new(),
            mention_timeout,
            tool_invocation_limit,
        }
    }

    pub async fn run(
        &self,
        session: &mut dyn MentionStream,
        memory: &mut ConversationMemory,
    ) -> Result<CycleOutcome, SessionFault> {
        // AWAITING_MENTION
        let mention = match session.next_mention(self.mention_timeout).await? {
            Some(mention) => mention,
            None => return Ok(CycleOutcome::Idle),
        };
        info!(
            thread = %mention.thread_id,
            sender = %mention.sender_id,
            "Mention received"
        );

        let reply_text = match self.investigate(&mention, memory).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Cycle fault, replying with the error sentinel: {e:#}");
                ERROR_SENTINEL.to_string()
            }
        };

        session
            .reply(&mention.thread_id, &mention.sender_id, &reply_text)
            .await?;
        debug!(thread = %mention.thread_id, "Reply sent");

        // SENT: record the exchange. A summarization failure here surfaces
        // to the driver rather than silently dropping history.
        memory
            .record(mention.content, reply_text)
            .await
            .map_err(SessionFault::Memory)?;

        Ok(CycleOutcome::Replied)
    }

    /// EXTRACTING_PARAMETERS through COMPOSING_REPLY. Returns the reply text.
    async fn investigate(
        &self,
        mention: &Mention,
        memory: &ConversationMemory,
    ) -> Result<String> {
        let task = match self.parser.extract(&mention.content) {
            Ok(task) => task,
            Err(missing) => {
                info!(?missing, "Mention is missing required parameters");
                return Ok(clarification_text(&missing));
            }
        };
        debug!(repo = %task.repo, branch = %task.branch, files = task.changed_files.len(), "Task extracted");

        // GATHERING_CONTEXT
        let history = memory.render();
        let input = task_prompt(mention, &task);
        let specs = self.tools.specs();
        let mut trace: Vec<ToolExchange> = Vec::new();
        let mut invocations = 0usize;

        loop {
            let step = self
                .engine
                .next_step(StepRequest {
                    history: &history,
                    input: &input,
                    trace: &trace,
                    tools: &specs,
                    finalize: false,
                })
                .await?;

            let calls = match step {
                EngineStep::Reply(text) => return Ok(text),
                EngineStep::ToolCalls(calls) => calls,
            };
            if calls.is_empty() {
                anyhow::bail!("engine returned an empty tool-call set");
            }

            for call in calls {
                if invocations >= self.tool_invocation_limit {
                    warn!(
                        limit = self.tool_invocation_limit,
                        "Tool invocation limit reached, forcing a reply"
                    );
                    return self.compose_final(&history, &input, &trace).await;
                }
                invocations += 1;

                debug!(tool = %call.name, "Invoking capability [{invocations}/{}]", self.tool_invocation_limit);
                let outcome = self.tools.invoke(&call.name, call.arguments.clone()).await;
                let output = outcome.into_context_text(&call.name);
                trace.push(ToolExchange { call, output });
            }
        }
    }

    /// Forced COMPOSING_REPLY once the invocation budget is spent: one more
    /// engine step with no tools on offer.
    async fn compose_final(
        &self,
        history: &[HistoryEntry],
        input: &str,
        trace: &[ToolExchange],
    ) -> Result<String> {
        let step = self
            .engine
            .next_step(StepRequest {
                history,
                input,
                trace,
                tools: &[],
                finalize: true,
            })
            .await?;
        match step {
            EngineStep::Reply(text) => Ok(text),
            EngineStep::ToolCalls(_) => Ok(LIMIT_REPLY.to_string()),
        }
    }
}
