use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub bus: BusConfig,
    pub runner: RunnerConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub providers: ProvidersConfig,
}

/// Connection settings for the shared mention bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusConfig {
    /// Base URL of the bus. The worker opens `{endpoint}/sse` for mentions
    /// and posts replies to `{endpoint}/messages`.
    pub endpoint: String,
    /// Identity advertised to other workers on the bus.
    pub agent_id: String,
    /// Free-text capability description shown to other workers for discovery.
    pub agent_description: String,
    /// How long one wait for a mention may block before re-entering the loop.
    pub mention_timeout_secs: u64,
    /// Idle read timeout on the streaming connection.
    pub read_timeout_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5555/bus".into(),
            agent_id: "driftwatch".into(),
            agent_description: "Evaluates whether the documentation (README, API docs, \
                 configuration guides) in a GitHub repository and branch is up to date with \
                 respect to a provided set of changed files. Provide the repository name \
                 (owner/repo), the branch name, and the list of changed files."
                .into(),
            mention_timeout_secs: 60,
            read_timeout_secs: 300,
        }
    }
}

/// Reconnect policy for the top-level driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerConfig {
    pub max_attempts: usize,
    pub retry_delay_secs: u64,
    /// Keep conversation memory when a bus session is re-established.
    pub persist_memory_across_reconnects: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_secs: 5,
            persist_memory_across_reconnects: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// How many exchanges are kept verbatim before folding into the summary.
    pub window_size: usize,
    /// Upper bound on tool invocations within one reasoning cycle.
    pub tool_invocation_limit: usize,
    pub max_tokens: u64,
    pub temperature: f64,
    /// Named model tiers. Must contain at least a "default" entry; a
    /// "summary" tier is used for memory folding when present.
    pub models: HashMap<String, ModelRef>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            window_size: 4,
            tool_invocation_limit: 100,
            max_tokens: 8192,
            temperature: 0.3,
            models: HashMap::new(),
        }
    }
}

/// Reference to a provider + model combination for a named tier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub github: GithubToolsConfig,
}

/// Out-of-process helper commands for the GitHub lookup capabilities.
/// Each value is a command line; extra arguments are passed as flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GithubToolsConfig {
    pub list_command: String,
    pub content_command: String,
    pub timeout_secs: u64,
}

impl Default for GithubToolsConfig {
    fn default() -> Self {
        Self {
            list_command: "driftwatch-list-files".into(),
            content_command: "driftwatch-file-content".into(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub anthropic: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
    pub ollama: Option<ProviderConfig>,
    pub openrouter: Option<ProviderConfig>,
    pub groq: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg: Config = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(cfg.agent.window_size, 4);
        assert_eq!(cfg.agent.tool_invocation_limit, 100);
        assert_eq!(cfg.runner.max_attempts, 5);
        assert_eq!(cfg.runner.retry_delay_secs, 5);
        assert!(!cfg.runner.persist_memory_across_reconnects);
        assert_eq!(cfg.bus.mention_timeout_secs, 60);
        assert_eq!(cfg.bus.agent_id, "driftwatch");
    }

    #[test]
    fn camel_case_fields_parsed() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "bus": {
                "endpoint": "http://bus.example:9000/v1",
                "agentId": "doc-checker-2",
                "mentionTimeoutSecs": 30
            },
            "runner": {
                "maxAttempts": 8,
                "persistMemoryAcrossReconnects": true
            },
            "agent": {
                "windowSize": 2,
                "models": {
                    "default": { "provider": "openai", "model": "gpt-4.1" }
                }
            }
        }))
        .unwrap();
        assert_eq!(cfg.bus.endpoint, "http://bus.example:9000/v1");
        assert_eq!(cfg.bus.agent_id, "doc-checker-2");
        assert_eq!(cfg.bus.mention_timeout_secs, 30);
        assert_eq!(cfg.runner.max_attempts, 8);
        assert!(cfg.runner.persist_memory_across_reconnects);
        assert_eq!(cfg.agent.window_size, 2);
        assert_eq!(cfg.agent.models["default"].provider, "openai");
    }

    #[test]
    fn github_tool_commands_default() {
        let cfg: Config = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(cfg.tools.github.list_command, "driftwatch-list-files");
        assert_eq!(cfg.tools.github.content_command, "driftwatch-file-content");
        assert_eq!(cfg.tools.github.timeout_secs, 60);
    }

    #[test]
    fn provider_sections_optional() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "providers": {
                "openai": { "apiKey": "sk-test" }
            }
        }))
        .unwrap();
        assert_eq!(
            cfg.providers.openai.as_ref().unwrap().api_key.as_deref(),
            Some("sk-test")
        );
        assert!(cfg.providers.anthropic.is_none());
    }

    #[test]
    fn config_round_trips() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("agentId"));
        assert!(json.contains("mentionTimeoutSecs"));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bus.agent_id, cfg.bus.agent_id);
        assert_eq!(back.agent.window_size, cfg.agent.window_size);
    }
}
