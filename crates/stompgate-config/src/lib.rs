//! Process configuration for the gateway.
//!
//! Configuration is a tree of serde structs with working defaults, overridden
//! from `STOMPGATE_*` environment variables and validated before the server
//! starts. The broker URL is the only secret-bearing value; its credential
//! part is masked whenever the configuration is displayed or logged.

pub mod config;
pub mod error;

pub use config::{
    BrokerConfig, GatewayConfig, HeartbeatConfig, LoggingConfig, MonitoringConfig,
    ReconnectConfig, ServerConfig,
};
pub use error::{ConfigError, ConfigResult};
