use thiserror::Error;

use crate::{heyu::HeyuError, settings::ConfigError, x10::CommandError};

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid command or house code: {0}")]
    InvalidCommand(#[from] CommandError),
    #[error("connecting to MQTT broker: {0}")]
    Connect(#[from] rumqttc::ConnectionError),
    #[error("MQTT client: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("heyu: {0}")]
    Heyu(#[from] HeyuError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("heyu monitor stopped: {0}")]
    MonitorExited(String),
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
