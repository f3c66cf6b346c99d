use std::{collections::HashMap, fmt, path::{Path, PathBuf}, time::Duration};

use config::{Config, Environment, File, FileFormat};
use rumqttc::MqttOptions;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::x10::HouseCode;

pub const DEFAULT_CMD_TOPIC: &str = "x10/cmd";
pub const DEFAULT_STAT_TOPIC: &str = "x10/stat";
pub const DEFAULT_DISCOVERY_TOPIC: &str = "homeassistant";
pub const DEFAULT_HEYU_BIN: &str = "heyu";
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
pub const DEFAULT_HEYU_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("must define MQTT host in configuration (MQTT_HOST)")]
    MissingHost,
    #[error("must define MQTT port in configuration (MQTT_PORT)")]
    MissingPort,
    #[error("loading configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Everything the bridge reads at startup. Keys match the lower-cased
/// environment variable names (`MQTT_HOST` -> `mqtt_host`).
#[derive(Debug, Deserialize)]
struct RawSettings {
    mqtt_host: Option<String>,
    mqtt_port: Option<u16>,
    mqtt_user: String,
    mqtt_password: String,
    mqtt_keep_alive_secs: u64,
    cmd_topic: String,
    stat_topic: String,
    use_cm17: bool,
    discovery_housecodes: String,
    discovery_topic: String,
    device: Option<PathBuf>,
    puid: Option<u32>,
    pgid: Option<u32>,
    heyu_bin: PathBuf,
    heyu_config: Option<PathBuf>,
    heyu_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// only required to run the bridge, see [`Settings::broker`]
    pub mqtt_host: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_user: String,
    pub mqtt_password: String,
    pub mqtt_keep_alive: Duration,
    pub cmd_topic: String,
    pub stat_topic: String,
    pub use_cm17: bool,
    pub discovery_housecodes: Vec<HouseCode>,
    pub discovery_topic: String,
    /// serial port heyu talks to, only checked for existence
    pub device: Option<PathBuf>,
    /// uid/gid given to spawned heyu processes
    pub puid: Option<u32>,
    pub pgid: Option<u32>,
    pub heyu_bin: PathBuf,
    pub heyu_config: Option<PathBuf>,
    /// longest a single heyu command may run
    pub heyu_timeout: Duration,
}

impl Settings {
    /// Defaults, then the optional RON file, then the process environment
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::build(file, Environment::default())
    }

    /// Same as [`Settings::load`] but with an explicit environment
    pub fn load_from(
        file: Option<&Path>,
        env: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        Self::build(file, Environment::default().source(Some(env)))
    }

    fn build(file: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("mqtt_user", "")?
            .set_default("mqtt_password", "")?
            .set_default("mqtt_keep_alive_secs", DEFAULT_KEEP_ALIVE_SECS)?
            .set_default("cmd_topic", DEFAULT_CMD_TOPIC)?
            .set_default("stat_topic", DEFAULT_STAT_TOPIC)?
            .set_default("use_cm17", false)?
            .set_default("discovery_housecodes", "")?
            .set_default("discovery_topic", DEFAULT_DISCOVERY_TOPIC)?
            .set_default("heyu_bin", DEFAULT_HEYU_BIN)?
            .set_default("heyu_timeout_secs", DEFAULT_HEYU_TIMEOUT_SECS)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Ron));
        }

        let raw: RawSettings = builder
            .add_source(env.ignore_empty(true))
            .build()?
            .try_deserialize()?;

        raw.try_into()
    }

    /// Host and port of the broker, both must be set
    pub fn broker(&self) -> Result<(&str, u16), ConfigError> {
        let host = self.mqtt_host.as_deref().ok_or(ConfigError::MissingHost)?;
        let port = self.mqtt_port.ok_or(ConfigError::MissingPort)?;
        Ok((host, port))
    }

    pub fn mqtt_options(&self) -> Result<MqttOptions, ConfigError> {
        let (host, port) = self.broker()?;
        let client_id = format!("x10mqtt_{}", Uuid::now_v7());
        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(self.mqtt_keep_alive);
        if self.has_credentials() {
            opts.set_credentials(&self.mqtt_user, &self.mqtt_password);
        }
        Ok(opts)
    }

    pub fn has_credentials(&self) -> bool {
        !self.mqtt_user.is_empty() && !self.mqtt_password.is_empty()
    }

    pub fn redacted(&self) -> Redacted<'_> {
        Redacted(self)
    }
}

impl TryFrom<RawSettings> for Settings {
    type Error = ConfigError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        Ok(Self {
            mqtt_host: raw.mqtt_host.filter(|h| !h.trim().is_empty()),
            mqtt_port: raw.mqtt_port,
            mqtt_user: raw.mqtt_user,
            mqtt_password: raw.mqtt_password,
            mqtt_keep_alive: Duration::from_secs(raw.mqtt_keep_alive_secs.max(1)),
            cmd_topic: trim_topic(raw.cmd_topic),
            stat_topic: trim_topic(raw.stat_topic),
            use_cm17: raw.use_cm17,
            discovery_housecodes: HouseCode::parse_list(&raw.discovery_housecodes),
            discovery_topic: trim_topic(raw.discovery_topic),
            device: raw.device.filter(|p| !p.as_os_str().is_empty()),
            puid: raw.puid,
            pgid: raw.pgid,
            heyu_bin: raw.heyu_bin,
            heyu_config: raw.heyu_config.filter(|p| !p.as_os_str().is_empty()),
            heyu_timeout: Duration::from_secs(raw.heyu_timeout_secs.max(1)),
        })
    }
}

fn trim_topic(topic: String) -> String {
    topic.trim().trim_end_matches('/').to_string()
}

/// Settings formatted for logs, with the password masked
pub struct Redacted<'a>(&'a Settings);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        let houses: String = s.discovery_housecodes.iter().map(|h| h.letter()).collect();
        let password = if s.mqtt_password.is_empty() { "" } else { "********" };

        writeln!(f, "mqtt_host = {}", s.mqtt_host.as_deref().unwrap_or_default())?;
        writeln!(f, "mqtt_port = {}", s.mqtt_port.map(|v| v.to_string()).unwrap_or_default())?;
        writeln!(f, "mqtt_user = {}", s.mqtt_user)?;
        writeln!(f, "mqtt_password = {password}")?;
        writeln!(f, "mqtt_keep_alive_secs = {}", s.mqtt_keep_alive.as_secs())?;
        writeln!(f, "cmd_topic = {}", s.cmd_topic)?;
        writeln!(f, "stat_topic = {}", s.stat_topic)?;
        writeln!(f, "use_cm17 = {}", s.use_cm17)?;
        writeln!(f, "discovery_housecodes = {houses}")?;
        writeln!(f, "discovery_topic = {}", s.discovery_topic)?;
        writeln!(f, "device = {}", display_opt(s.device.as_deref()))?;
        writeln!(f, "puid = {}", s.puid.map(|v| v.to_string()).unwrap_or_default())?;
        writeln!(f, "pgid = {}", s.pgid.map(|v| v.to_string()).unwrap_or_default())?;
        writeln!(f, "heyu_bin = {}", s.heyu_bin.display())?;
        writeln!(f, "heyu_timeout_secs = {}", s.heyu_timeout.as_secs())?;
        write!(f, "heyu_config = {}", display_opt(s.heyu_config.as_deref()))
    }
}

fn display_opt(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}
