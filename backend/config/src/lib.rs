pub mod io;
pub mod schema;

pub use io::{config_dir, config_file_path, load_config, load_default, write_config};
pub use schema::{
    AgentConfig, FamulusConfig, GatewayConfig, LoggingConfig, ModelConfig, PluginsConfig,
    UsageConfig,
};
