//! Configuration module for vulnstack
//!
//! Tool settings (not declaration inputs) come from, in increasing
//! precedence:
//! - Default values
//! - The first configuration file found at: the explicit `--config` path,
//!   `$VULNSTACK_CONFIG`, `~/.config/vulnstack/vulnstack.toml`,
//!   `./vulnstack.toml`
//! - Environment variables
//! - Command-line arguments (applied by the CLI)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::retry::RetryPolicy;

/// Environment variable naming a configuration file.
pub const ENV_CONFIG: &str = "VULNSTACK_CONFIG";
/// Environment variable overriding the state file path.
pub const ENV_STATE: &str = "VULNSTACK_STATE";
/// Environment variable overriding execution parallelism.
pub const ENV_PARALLELISM: &str = "VULNSTACK_PARALLELISM";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where applied state is kept
    pub state: StateConfig,

    /// Apply concurrency and timeouts
    pub execution: ExecutionConfig,

    /// Retry of retryable provider failures
    pub retry: RetryPolicy,

    /// GCP REST provider settings
    pub gcp: GcpConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Colors and output settings
    pub output: OutputConfig,

    /// File the configuration was loaded from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// State settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Path of the JSON state file
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vulnstack.tfstate.json"),
        }
    }
}

/// Execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum provider operations in flight within one wave
    pub parallelism: usize,

    /// Upper bound on a single resource operation, retries included
    pub operation_timeout_secs: u64,

    /// Interval between long-running operation polls
    pub poll_interval_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            operation_timeout_secs: 1800,
            poll_interval_ms: 5000,
        }
    }
}

/// GCP REST endpoints and credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    pub compute_endpoint: String,
    pub service_networking_endpoint: String,
    pub alloydb_endpoint: String,
    pub iam_endpoint: String,
    pub resource_manager_endpoint: String,
    pub bigquery_endpoint: String,

    /// Environment variable holding an OAuth2 access token
    pub access_token_env: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            compute_endpoint: "https://compute.googleapis.com/compute/v1".to_string(),
            service_networking_endpoint: "https://servicenetworking.googleapis.com/v1".to_string(),
            alloydb_endpoint: "https://alloydb.googleapis.com/v1".to_string(),
            iam_endpoint: "https://iam.googleapis.com/v1".to_string(),
            resource_manager_endpoint: "https://cloudresourcemanager.googleapis.com/v1".to_string(),
            bigquery_endpoint: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
            access_token_env: "GOOGLE_OAUTH_ACCESS_TOKEN".to_string(),
        }
    }
}

impl GcpConfig {
    /// Point every API at one base URL (used against local test servers).
    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            compute_endpoint: format!("{}/compute/v1", base),
            service_networking_endpoint: format!("{}/servicenetworking/v1", base),
            alloydb_endpoint: format!("{}/alloydb/v1", base),
            iam_endpoint: format!("{}/iam/v1", base),
            resource_manager_endpoint: format!("{}/cloudresourcemanager/v1", base),
            bigquery_endpoint: format!("{}/bigquery/v2", base),
            ..Self::default()
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log line format
    pub format: LogFormat,
}

/// Output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Enable colored output
    pub color: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { color: true }
    }
}

impl Config {
    /// Load configuration from the first file found, then the environment.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = match Self::get_config_paths(config_path)
            .into_iter()
            .find(|p| p.exists())
        {
            Some(path) => Self::from_file(&path)?,
            None => {
                if let Some(explicit) = config_path {
                    anyhow::bail!("Config file not found: {}", explicit.display());
                }
                Config::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the list of configuration file paths to check, in priority order
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        // Explicit path takes priority
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        let mut paths = Vec::new();

        if let Ok(env_config) = std::env::var(ENV_CONFIG) {
            paths.push(PathBuf::from(env_config));
        }

        // User config
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("vulnstack").join("vulnstack.toml"));
        }

        // Project config (current directory)
        paths.push(PathBuf::from("vulnstack.toml"));

        paths
    }

    /// Load from a specific file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        // Determine format based on extension
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let mut config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        config.source = Some(path.to_path_buf());
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.execution.parallelism == 0 {
            anyhow::bail!("execution.parallelism must be at least 1");
        }
        if self.execution.operation_timeout_secs == 0 {
            anyhow::bail!("execution.operation_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // VULNSTACK_STATE
        if let Ok(path) = std::env::var(ENV_STATE) {
            self.state.path = PathBuf::from(path);
        }

        // VULNSTACK_PARALLELISM
        if let Ok(parallelism) = std::env::var(ENV_PARALLELISM) {
            if let Ok(n) = parallelism.parse::<usize>() {
                if n > 0 {
                    self.execution.parallelism = n;
                }
            }
        }

        // NO_COLOR
        if std::env::var("NO_COLOR").is_ok() {
            self.output.color = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.execution.parallelism, 4);
        assert_eq!(config.state.path, PathBuf::from("vulnstack.tfstate.json"));
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.output.color);
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[execution]\nparallelism = 8\n\n[retry]\nmax_retries = 1\n\n[logging]\nformat = \"json\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.execution.parallelism, 8);
        assert_eq!(config.execution.poll_interval_ms, 5000);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.source.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "state:\n  path: /tmp/vs.json\noutput:\n  color: false").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.state.path, PathBuf::from("/tmp/vs.json"));
        assert!(!config.output.color);
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[execution]\nparallelism = 0").unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_unknown_section_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[provisioner]\nkind = 1").unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    #[serial]
    fn test_missing_explicit_path_is_error() {
        let path = PathBuf::from("/nonexistent/vulnstack.toml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var(ENV_PARALLELISM, "12");
        std::env::set_var(ENV_STATE, "/var/lib/vulnstack/state.json");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.execution.parallelism, 12);
        assert_eq!(config.state.path, PathBuf::from("/var/lib/vulnstack/state.json"));
        std::env::remove_var(ENV_PARALLELISM);
        std::env::remove_var(ENV_STATE);
    }

    #[test]
    fn test_base_url_endpoints() {
        let gcp = GcpConfig::with_base_url("http://127.0.0.1:9000/");
        assert_eq!(gcp.compute_endpoint, "http://127.0.0.1:9000/compute/v1");
        assert_eq!(gcp.access_token_env, "GOOGLE_OAUTH_ACCESS_TOKEN");
    }
}
