use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// One completed turn: what the worker was asked and what it answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub input: String,
    pub output: String,
}

/// History as handed to the reasoning engine: at most one summary entry
/// first, then the verbatim window flattened oldest-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEntry {
    Summary(String),
    Input(String),
    Output(String),
}

/// Folds evicted exchanges, together with the previous summary, into a new
/// rolling summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn fold(&self, prior: Option<&str>, evicted: &[Exchange]) -> Result<String>;
}

/// Conversation history bounded to a fixed window.
///
/// The most recent `capacity` exchanges are kept verbatim; anything older is
/// compressed into a single rolling summary *before* it leaves the window,
/// so the cost of each fold tracks turnover rather than total history
/// length. Intended for a worker that never terminates.
pub struct ConversationMemory {
    window: VecDeque<Exchange>,
    summary: Option<String>,
    capacity: usize,
    summarizer: Arc<dyn Summarizer>,
}

impl ConversationMemory {
    /// Panics if `capacity` is zero; a zero-width window could never hold
    /// the exchange currently being recorded.
    pub fn new(capacity: usize, summarizer: Arc<dyn Summarizer>) -> Self {
        assert!(capacity > 0, "window capacity must be at least 1");
        Self {
            window: VecDeque::with_capacity(capacity + 1),
            summary: None,
            capacity,
            summarizer,
        }
    }

    /// Append one exchange, folding overflow into the rolling summary.
    ///
    /// Summarize-then-evict: an exchange leaves the window only after the
    /// summarizer has accepted it. On failure the overflow exchange stays in
    /// the window and the error is returned; the next successful call drains
    /// the backlog.
    pub async fn record(
        &mut self,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Result<()> {
        self.window.push_back(Exchange {
            input: input.into(),
            output: output.into(),
        });

        while self.window.len() > self.capacity {
            let oldest = match self.window.front() {
                Some(exchange) => exchange.clone(),
                None => break,
            };
            let folded = self
                .summarizer
                .fold(self.summary.as_deref(), std::slice::from_ref(&oldest))
                .await?;
            self.summary = Some(folded);
            self.window.pop_front();
        }

        Ok(())
    }

    /// Render the history for the reasoning engine. Pure; repeated calls
    /// without an intervening `record` return identical output.
    pub fn render(&self) -> Vec<HistoryEntry> {
        let mut history = Vec::with_capacity(self.window.len() * 2 + 1);
        if let Some(summary) = &self.summary {
            history.push(HistoryEntry::Summary(summary.clone()));
        }
        for exchange in &self.window {
            history.push(HistoryEntry::Input(exchange.input.clone()));
            history.push(HistoryEntry::Output(exchange.output.clone()));
        }
        history
    }

    /// Drop the window and the summary, returning to the initial state.
    pub fn clear(&mut self) {
        self.window.clear();
        self.summary = None;
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }
}
