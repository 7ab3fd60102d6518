use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::bus::BusConnector;
use crate::cycle::{CycleOutcome, ReasoningCycle};
use crate::engine::ReasoningEngine;
use crate::memory::{ConversationMemory, Summarizer};
use crate::tools::ToolRegistry;

/// Settings driving the resilient connection loop.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub max_attempts: usize,
    pub retry_delay: Duration,
    /// Keep conversation memory when a bus session is re-established.
    pub persist_memory: bool,
    pub mention_timeout: Duration,
    pub tool_invocation_limit: usize,
    pub window_size: usize,
}

/// Top-level driver: owns the bus connection and the conversation memory,
/// runs reasoning cycles until something the cycle cannot absorb happens,
/// then tears the session down and reconnects with a bounded budget.
///
/// This is the only place a failure is allowed to end the process.
pub struct Runner {
    settings: RunnerSettings,
    connector: Arc<dyn BusConnector>,
    cycle: ReasoningCycle,
    memory: ConversationMemory,
}

impl Runner {
    pub fn new(
        settings: RunnerSettings,
        connector: Arc<dyn BusConnector>,
        engine: Arc<dyn ReasoningEngine>,
        tools: Arc<ToolRegistry>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let cycle = ReasoningCycle::new(
            engine,
            tools,
            settings.mention_timeout,
            settings.tool_invocation_limit,
        );
        let memory = ConversationMemory::new(settings.window_size, summarizer);
        Self {
            settings,
            connector,
            cycle,
            memory,
        }
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Drive the worker until `exit` returns true or the attempt budget is
    /// exhausted. `exit` is checked between cycles; the binary passes a
    /// condition that never fires, tests pass a bounded one.
    pub async fn run(&mut self, exit: &mut dyn FnMut() -> bool) -> Result<()> {
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if exit() {
                return Ok(());
            }

            if !self.settings.persist_memory {
                self.memory.clear();
            }

            let mut session = match self.connector.connect().await {
                Ok(session) => session,
                Err(e) => {
                    warn!(attempt, max_attempts, "Bus connection failed: {e}");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.settings.retry_delay).await;
                        continue;
                    }
                    anyhow::bail!("giving up after {max_attempts} connection attempts: {e}");
                }
            };
            info!(attempt, "Bus session established");

            let fault = loop {
                if exit() {
                    session.close().await;
                    return Ok(());
                }
                match self.cycle.run(session.as_mut(), &mut self.memory).await {
                    Ok(CycleOutcome::Replied) => debug!("Cycle complete"),
                    Ok(CycleOutcome::Idle) => debug!("No mention within timeout"),
                    Err(fault) => break fault,
                }
            };

            session.close().await;
            warn!(attempt, max_attempts, "Bus session failed: {fault}");
            if attempt < max_attempts {
                tokio::time::sleep(self.settings.retry_delay).await;
            } else {
                anyhow::bail!("giving up after {max_attempts} attempts: {fault}");
            }
        }

        anyhow::bail!("bus retry budget exhausted")
    }
}
