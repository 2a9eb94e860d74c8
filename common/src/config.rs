use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    pub publish: PublishConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// MJPEG endpoint, e.g. `http://192.168.1.109:4747/video`.
    pub url: String,
    /// Target publish rate in Hz.
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Upper bound on a single chunk read; keeps shutdown latency bounded.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_frame_id")]
    pub frame_id: String,
    #[serde(default = "default_compression")]
    pub compression: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl StreamConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the relay cannot run with. Called by [`Config::load`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_stream_url(&self.stream.url)?;

        if !self.stream.fps.is_finite() || self.stream.fps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "stream.fps must be a positive number, got {}",
                self.stream.fps
            )));
        }
        if self.stream.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "stream.read_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.stream.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "stream.connect_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.publish.brokers.trim().is_empty() {
            return Err(ConfigError::Invalid("publish.brokers is empty".into()));
        }
        if self.publish.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("publish.topic is empty".into()));
        }
        // frame_id is length-prefixed with a single byte on the wire
        if self.publish.frame_id.len() > u8::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "publish.frame_id is {} bytes, at most {} allowed",
                self.publish.frame_id.len(),
                u8::MAX
            )));
        }
        Ok(())
    }
}

fn validate_stream_url(raw: &str) -> Result<(), ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: "empty".into(),
        });
    }
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConfigError::InvalidUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme '{other}', expected http or https"),
            })
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".into(),
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid stream url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_fps() -> f64 {
    30.0
}
fn default_read_timeout_ms() -> u64 {
    5000
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_topic() -> String {
    "camera.image_raw".into()
}
fn default_frame_id() -> String {
    "camera".into()
}
fn default_compression() -> String {
    "none".into()
}
fn default_log_level() -> String {
    "info".into()
}
