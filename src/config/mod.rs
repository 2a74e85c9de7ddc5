//! Configuration for pgcred-proxy

mod loader;
mod types;

pub use loader::{load_config, load_config_from_str};
pub use types::{Config, CredentialsConfig, LoggingConfig, ServerConfig, TargetConfig};
