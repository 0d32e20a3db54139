use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the bridge service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Receiver (inbound HTTP) configuration
    #[serde(default)]
    pub receiver: ReceiverConfig,
    /// Inbound store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Directory-backed selector configuration
    #[serde(default)]
    pub selector: SelectorConfig,
    /// Outbound forwarder configuration
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    /// Save-to-peer output configuration
    #[serde(default)]
    pub output: OutputConfig,
    /// Upload relay configuration
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Prometheus exporter port (0 disables the exporter)
    #[serde(default)]
    pub metrics_port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Receiver listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    /// Listen address
    #[serde(default = "default_bind_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_receiver_port")]
    pub port: u16,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Inbound store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of retained images (0 = unbounded)
    #[serde(default = "default_max_images")]
    pub max_images: usize,
}

/// Directory-backed selector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorConfig {
    /// Directory polled for the newest image
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Edge length of the blank placeholder
    #[serde(default = "default_placeholder_size")]
    pub placeholder_size: u32,
}

/// Outbound forwarder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ForwarderConfig {
    /// Base URL of the editing host's receiver
    #[serde(default = "default_destination_url")]
    pub destination_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_forward_timeout_secs")]
    pub timeout_secs: u64,
    /// Label used for forwarded images
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,
}

/// Save-to-peer output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving saved PNGs
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Filename prefix for saved PNGs
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,
}

/// Upload relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Run the relay alongside the receiver
    #[serde(default)]
    pub enabled: bool,
    /// Listen address
    #[serde(default = "default_bind_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Pipeline host base URL used when a request names none
    #[serde(default = "default_pipeline_url")]
    pub pipeline_url: String,
    /// Upload timeout in seconds
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// Connectivity probe timeout in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "bridge-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_receiver_port() -> u16 {
    8190
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_true() -> bool {
    true
}

fn default_max_images() -> usize {
    64
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("input")
}

fn default_placeholder_size() -> u32 {
    crate::tensor::PLACEHOLDER_SIZE
}

fn default_destination_url() -> String {
    "http://localhost:8191".to_string()
}

fn default_forward_timeout_secs() -> u64 {
    10
}

fn default_label_prefix() -> String {
    "ComfyUI Output".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_filename_prefix() -> String {
    "PhotoshopBridge".to_string()
}

fn default_relay_port() -> u16 {
    8765
}

fn default_pipeline_url() -> String {
    "http://localhost:8188".to_string()
}

fn default_upload_timeout_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/bridge").required(false))
            .add_source(config::File::with_name("/etc/bridge/bridge").required(false))
            // Override with environment variables
            // BRIDGE__RECEIVER__PORT -> receiver.port
            .add_source(
                config::Environment::with_prefix("BRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.receiver.host.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "receiver.host".to_string(),
            ));
        }

        if let Some(origin) = self
            .receiver
            .cors_origins
            .iter()
            .find(|o| axum::http::HeaderValue::from_str(o).is_err())
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "receiver.cors_origins".to_string(),
                message: format!("{:?} is not a valid origin header value", origin),
            });
        }

        if self.selector.placeholder_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "selector.placeholder_size".to_string(),
                message: "Placeholder size must be greater than 0".to_string(),
            });
        }

        if !is_http_url(&self.forwarder.destination_url) {
            return Err(ConfigValidationError::InvalidValue {
                field: "forwarder.destination_url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        if self.forwarder.timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "forwarder.timeout_secs".to_string(),
                message: "Timeout must be greater than 0".to_string(),
            });
        }

        if self.output.filename_prefix.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "output.filename_prefix".to_string(),
            ));
        }

        if self.relay.enabled && !is_http_url(&self.relay.pipeline_url) {
            return Err(ConfigValidationError::InvalidValue {
                field: "relay.pipeline_url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        Ok(())
    }

    /// Get forwarder request timeout as Duration
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forwarder.timeout_secs)
    }
}

impl RelayConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            logging: LoggingConfig::default(),
            receiver: ReceiverConfig::default(),
            store: StoreConfig::default(),
            selector: SelectorConfig::default(),
            forwarder: ForwarderConfig::default(),
            output: OutputConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            metrics_port: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_receiver_port(),
            max_body_bytes: default_max_body_bytes(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_images: default_max_images(),
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            placeholder_size: default_placeholder_size(),
        }
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            destination_url: default_destination_url(),
            timeout_secs: default_forward_timeout_secs(),
            label_prefix: default_label_prefix(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            filename_prefix: default_filename_prefix(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_bind_host(),
            port: default_relay_port(),
            pipeline_url: default_pipeline_url(),
            upload_timeout_secs: default_upload_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.receiver.port, 8190);
        assert_eq!(config.receiver.host, "0.0.0.0");
        assert_eq!(config.store.max_images, 64);
        assert_eq!(config.selector.placeholder_size, 64);
        assert_eq!(config.forward_timeout(), Duration::from_secs(10));
        assert_eq!(config.relay.port, 8765);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "receiver": { "port": 9000 },
            "forwarder": { "destination_url": "http://peer:8191" }
        }))
        .unwrap();

        assert_eq!(config.receiver.port, 9000);
        assert_eq!(config.receiver.max_body_bytes, 64 * 1024 * 1024);
        assert_eq!(config.forwarder.destination_url, "http://peer:8191");
        assert_eq!(config.forwarder.label_prefix, "ComfyUI Output");
    }

    #[test]
    fn test_invalid_destination_url() {
        let mut config = Config::default();
        config.forwarder.destination_url = "peer:8191".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_malformed_cors_origin_rejected() {
        let mut config = Config::default();
        config.receiver.cors_origins = vec![
            "http://localhost:3000".to_string(),
            "http://bad\norigin".to_string(),
        ];
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { field, .. }) if field == "receiver.cors_origins"
        ));

        config.receiver.cors_origins.pop();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_placeholder_size() {
        let mut config = Config::default();
        config.selector.placeholder_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_relay_url_checked_only_when_enabled() {
        let mut config = Config::default();
        config.relay.pipeline_url = "nope".to_string();
        assert!(config.validate().is_ok());

        config.relay.enabled = true;
        assert!(config.validate().is_err());
    }
}
