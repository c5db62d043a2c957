//! Shared helpers for CLI commands.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use firecrest_client::{ClientConfig, Firecrest};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::debug;

/// Load the configuration, letting `url` override the configured URL.
pub fn load_config(path: Option<&Path>, url: Option<&str>) -> Result<ClientConfig> {
    let config = match path {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => match ClientConfig::default_path().filter(|p| p.is_file()) {
            Some(path) => ClientConfig::from_file(&path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => ClientConfig::default(),
        },
    };

    let mut config = config.merge_env()?;
    if let Some(url) = url {
        config.firecrest_url = url.to_string();
    }
    config.validate()?;
    Ok(config)
}

/// Create the client used by every command.
pub fn create_client(config: &ClientConfig) -> Result<Firecrest> {
    debug!(
        "Connecting to {} (merge_get_requests: {})",
        config.firecrest_url, config.merge_get_requests
    );
    Firecrest::new(config).context("Failed to create FirecREST client")
}

/// Spinner shown while a task is polled.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Render a JSON scalar without quotes.
pub fn plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain() {
        assert_eq!(plain(&json!("RUNNING")), "RUNNING");
        assert_eq!(plain(&json!(42)), "42");
        assert_eq!(plain(&json!(null)), "-");
    }

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(
            Some(Path::new("/nonexistent/firecrest.yaml")),
            Some("https://firecrest.example.org"),
        );
        assert!(config.is_err());
    }
}
