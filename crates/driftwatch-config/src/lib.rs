pub mod loader;
pub mod schema;

pub use loader::{find_config_path, load_config, save_config};
pub use schema::{
    AgentConfig, BusConfig, Config, GithubToolsConfig, ModelRef, ProviderConfig, ProvidersConfig,
    RunnerConfig, ToolsConfig,
};
