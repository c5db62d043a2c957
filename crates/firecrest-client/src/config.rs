//! Client configuration.
//!
//! Supports loading configuration from:
//! 1. A YAML file (`$XDG_CONFIG_HOME/firecrest/config.yaml` by default)
//! 2. Environment variables (`FIRECREST_*`, `AUTH_TOKEN_URL`)
//!
//! Configuration precedence (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use firecrest_sched::{RetryPolicy, SchedulerConfig, ServiceCategory};
use serde::{Deserialize, Serialize};

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the FirecREST deployment
    #[serde(default)]
    pub firecrest_url: String,

    /// OAuth2 client credentials
    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-request timeout in seconds; no timeout when unset
    #[serde(default)]
    pub timeout_seconds: Option<f64>,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: f64,

    /// Retries after HTTP 429; unbounded when unset
    #[serde(default)]
    pub num_retries_rate_limit: Option<u32>,

    /// Merge concurrent polls of listing endpoints
    #[serde(default)]
    pub merge_get_requests: bool,

    /// Seconds to wait between task polls
    #[serde(default = "default_polling_sleep_times")]
    pub polling_sleep_times: Vec<f64>,

    /// Minimum seconds between two calls to the same microservice
    #[serde(default = "default_time_between_calls")]
    pub time_between_calls: BTreeMap<ServiceCategory, f64>,

    /// Verify TLS certificates
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Log filter: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Do not emit the client's own log events
    #[serde(default)]
    pub disable_client_logging: bool,
}

/// OAuth2 client-credentials settings.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Client name registered with the authorization server
    #[serde(default)]
    pub client_id: Option<String>,

    /// Secret of the client
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Token endpoint of the authorization server
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl AuthConfig {
    /// `(client_id, client_secret, token_uri)` when all three are set.
    pub fn credentials(&self) -> Option<(&str, &str, &str)> {
        Some((
            self.client_id.as_deref()?,
            self.client_secret.as_deref()?,
            self.token_uri.as_deref()?,
        ))
    }

    fn is_partial(&self) -> bool {
        let set = [&self.client_id, &self.client_secret, &self.token_uri]
            .iter()
            .filter(|v| v.is_some())
            .count();
        set != 0 && set != 3
    }
}

// Default value functions
fn default_connect_timeout() -> f64 {
    10.0
}

fn default_polling_sleep_times() -> Vec<f64> {
    vec![0.0; firecrest_sched::DEFAULT_POLLING_ATTEMPTS]
}

fn default_time_between_calls() -> BTreeMap<ServiceCategory, f64> {
    ServiceCategory::ALL
        .into_iter()
        .map(|c| (c, c.default_interval().as_secs_f64()))
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            firecrest_url: String::new(),
            auth: AuthConfig::default(),
            timeout_seconds: None,
            connect_timeout_seconds: default_connect_timeout(),
            num_retries_rate_limit: None,
            merge_get_requests: false,
            polling_sleep_times: default_polling_sleep_times(),
            time_between_calls: default_time_between_calls(),
            verify_tls: true,
            log_level: default_log_level(),
            disable_client_logging: false,
        }
    }
}

impl ClientConfig {
    /// Configuration for `url` with every other setting at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            firecrest_url: url.into(),
            ..Self::default()
        }
    }

    /// Default configuration file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("firecrest").join("config.yaml"))
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(format!("{}: {e}", path.as_ref().display())))?;

        serde_yaml_ng::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load configuration with the following precedence:
    /// 1. Environment variables
    /// 2. The given file, or the default file when it exists
    /// 3. Defaults
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };

        let config = config.merge_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Merge environment variables into this configuration.
    ///
    /// Only variables that are set override the current values.
    pub fn merge_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = std::env::var("FIRECREST_URL") {
            self.firecrest_url = v;
        }
        if let Ok(v) = std::env::var("FIRECREST_CLIENT_ID") {
            self.auth.client_id = Some(v);
        }
        if let Ok(v) = std::env::var("FIRECREST_CLIENT_SECRET") {
            self.auth.client_secret = Some(v);
        }
        if let Ok(v) = std::env::var("AUTH_TOKEN_URL") {
            self.auth.token_uri = Some(v);
        }
        if let Ok(v) = std::env::var("FIRECREST_TIMEOUT") {
            self.timeout_seconds = Some(parse_env("FIRECREST_TIMEOUT", &v)?);
        }
        if let Ok(v) = std::env::var("FIRECREST_RATE_LIMIT_RETRIES") {
            self.num_retries_rate_limit = Some(parse_env("FIRECREST_RATE_LIMIT_RETRIES", &v)?);
        }
        if let Ok(v) = std::env::var("FIRECREST_MERGE_GET_REQUESTS") {
            self.merge_get_requests = parse_flag("FIRECREST_MERGE_GET_REQUESTS", &v)?;
        }
        if let Ok(v) = std::env::var("FIRECREST_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(self)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.firecrest_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "firecrest_url is required (set it in the config file or FIRECREST_URL)"
                    .to_string(),
            ));
        }
        if !(self.firecrest_url.starts_with("http://") || self.firecrest_url.starts_with("https://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid firecrest_url: {}",
                self.firecrest_url
            )));
        }

        if self.auth.is_partial() {
            return Err(ConfigError::ValidationError(
                "auth needs client_id, client_secret and token_uri together".to_string(),
            ));
        }

        if let Some(timeout) = self.timeout_seconds {
            check_seconds("timeout_seconds", timeout, false)?;
        }
        check_seconds("connect_timeout_seconds", self.connect_timeout_seconds, false)?;
        for wait in &self.polling_sleep_times {
            check_seconds("polling_sleep_times", *wait, true)?;
        }
        for (category, interval) in &self.time_between_calls {
            check_seconds(&format!("time_between_calls.{category}"), *interval, true)?;
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {other}"
                )));
            }
        }

        Ok(())
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(to_duration)
    }

    pub fn connect_timeout(&self) -> Duration {
        to_duration(self.connect_timeout_seconds)
    }

    /// Scheduler settings derived from this configuration.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let mut config = SchedulerConfig::default()
            .with_merge_get_requests(self.merge_get_requests)
            .with_retry(RetryPolicy {
                max_retries: self.num_retries_rate_limit,
            })
            .with_polling_sleep_times(
                self.polling_sleep_times
                    .iter()
                    .map(|s| to_duration(*s))
                    .collect(),
            );
        for (category, seconds) in &self.time_between_calls {
            config = config.with_interval(*category, to_duration(*seconds));
        }
        config
    }
}

fn check_seconds(field: &str, seconds: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let in_range = if allow_zero { seconds >= 0.0 } else { seconds > 0.0 };
    if !in_range {
        let bound = if allow_zero { "non-negative" } else { "positive" };
        return Err(ConfigError::ValidationError(format!(
            "{field} must be {bound}, got {seconds}"
        )));
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        ConfigError::ValidationError(format!("{field} is out of range: {seconds}"))
    })?;
    Ok(())
}

/// Seconds to a duration; out-of-range values saturate, negatives become zero.
fn to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ParseError(format!("{name}: invalid value {value:?}")))
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::ParseError(format!(
            "{name}: invalid value {value:?}"
        ))),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout_seconds, 10.0);
        assert_eq!(config.polling_sleep_times.len(), 250);
        assert_eq!(config.time_between_calls[&ServiceCategory::Compute], 1.0);
        assert_eq!(config.time_between_calls[&ServiceCategory::Tasks], 0.1);
        assert_eq!(config.log_level, "warn");
        assert!(config.verify_tls);
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn test_validate_requires_url() {
        assert!(ClientConfig::default().validate().is_err());
        assert!(ClientConfig::new("ftp://firecrest").validate().is_err());
        assert!(ClientConfig::new("https://firecrest.example.org").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_partial_auth() {
        let mut config = ClientConfig::new("https://firecrest.example.org");
        config.auth.client_id = Some("client".into());
        assert!(config.validate().is_err());

        config.auth.client_secret = Some("secret".into());
        config.auth.token_uri = Some("https://auth.example.org/token".into());
        assert!(config.validate().is_ok());
        assert_eq!(
            config.auth.credentials(),
            Some(("client", "secret", "https://auth.example.org/token"))
        );
    }

    #[test]
    fn test_validate_invalid_values() {
        let mut config = ClientConfig::new("https://firecrest.example.org");
        config.log_level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("https://firecrest.example.org");
        config.polling_sleep_times = vec![1.0, -1.0];
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("https://firecrest.example.org");
        config.timeout_seconds = Some(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unrepresentable_durations() {
        let mut config = ClientConfig::new("https://firecrest.example.org");
        config.polling_sleep_times = vec![1e300];
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
        assert_eq!(config.scheduler_config().polling_sleep_times, vec![Duration::MAX]);

        let mut config = ClientConfig::new("https://firecrest.example.org");
        config.time_between_calls.insert(ServiceCategory::Status, 1e300);
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = ClientConfig::new("https://firecrest.example.org");
        config.timeout_seconds = Some(f64::INFINITY);
        assert!(config.validate().is_err());
        config.timeout_seconds = Some(1e300);
        assert!(config.validate().is_err());
        assert_eq!(config.request_timeout(), Some(Duration::MAX));

        let mut config = ClientConfig::new("https://firecrest.example.org");
        config.connect_timeout_seconds = f64::NAN;
        assert!(config.validate().is_err());
        assert_eq!(config.connect_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_from_file_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
firecrest_url: https://firecrest.example.org
merge_get_requests: true
num_retries_rate_limit: 3
polling_sleep_times: [1, 2.5]
time_between_calls:
  compute: 2
auth:
  client_id: my-client
  client_secret: s3cret
  token_uri: https://auth.example.org/token
"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert!(config.merge_get_requests);
        assert_eq!(config.num_retries_rate_limit, Some(3));
        assert_eq!(config.time_between_calls.len(), 1);
        assert!(!format!("{config:?}").contains("s3cret"));

        let sched = config.scheduler_config();
        assert!(sched.merge_get_requests);
        assert_eq!(sched.retry.max_retries, Some(3));
        assert_eq!(
            sched.polling_sleep_times,
            vec![Duration::from_secs(1), Duration::from_millis(2500)]
        );
        assert_eq!(
            sched.time_between_calls[&ServiceCategory::Compute],
            Duration::from_secs(2)
        );
        assert_eq!(
            sched.time_between_calls[&ServiceCategory::Storage],
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_from_file_errors() {
        let err = ClientConfig::from_file("/nonexistent/firecrest.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "time_between_calls: {{ teleport: 1 }}").unwrap();
        let err = ClientConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("X", "TRUE").unwrap());
        assert!(parse_flag("X", "1").unwrap());
        assert!(!parse_flag("X", "no").unwrap());
        assert!(parse_flag("X", "maybe").is_err());
    }
}
