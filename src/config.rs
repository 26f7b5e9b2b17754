use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the Snapsight gateway
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Analysis endpoint configuration
    pub analysis: AnalysisConfig,
    /// Upload validation configuration
    pub upload: UploadConfig,
    /// Identity provider configuration
    pub auth: AuthConfig,
    /// API configuration
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// S3 bucket name for uploaded images
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Analysis endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Base URL of the recognition endpoint; the object key is appended
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum fetch attempts before the flow errors out
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry delay in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Maximum retry delay in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Delay multiplier between attempts
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
}

/// Upload validation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes (5MB default)
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,
    /// Accepted content types
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
    /// Object key prefix for uploads
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Identity provider configuration (hosted-UI style)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Provider authority URL
    pub authority: String,
    /// OAuth client id
    pub client_id: String,
    /// Redirect URI the provider sends the authorization code back to
    pub redirect_uri: String,
    /// Post-logout redirect URI
    pub logout_uri: String,
    /// Requested scope
    #[serde(default = "default_scope")]
    pub scope: String,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "snapsight".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    5000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_max_size_bytes() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_allowed_content_types() -> Vec<String> {
    vec![
        "image/jpeg".to_string(),
        "image/png".to_string(),
        "image/webp".to_string(),
        "image/gif".to_string(),
        "image/bmp".to_string(),
    ]
}

fn default_key_prefix() -> String {
    "uploads".to_string()
}

fn default_scope() -> String {
    "openid".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "snapsight")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/snapsight").required(false))
            .add_source(config::File::with_name("/etc/snapsight/snapsight").required(false))
            // Override with environment variables
            // SNAPSIGHT__STORAGE__BUCKET -> storage.bucket
            .add_source(
                config::Environment::with_prefix("SNAPSIGHT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get the analysis request timeout as Duration
    pub fn analysis_request_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis.request_timeout_secs)
    }

    /// Get the base retry delay as Duration
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.analysis.retry_base_delay_ms)
    }

    /// Get the maximum retry delay as Duration
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.analysis.retry_max_delay_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size_bytes(),
            allowed_content_types: default_allowed_content_types(),
            key_prefix: default_key_prefix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_max_size_bytes(), 5 * 1024 * 1024);
        assert_eq!(default_max_attempts(), 3);
        assert_eq!(default_retry_multiplier(), 2.0);
        assert_eq!(default_key_prefix(), "uploads");
    }

    #[test]
    fn test_default_content_types_cover_common_images() {
        let types = default_allowed_content_types();
        assert!(types.contains(&"image/jpeg".to_string()));
        assert!(types.contains(&"image/png".to_string()));
    }
}
