//! Input variables of the declaration.
//!
//! Three inputs shape the topology: the project identifier, the region and
//! the database password. They are collected from a variables file, the
//! environment and the command line (in increasing precedence) and resolved
//! into a validated [`Variables`] value. The password is accepted from the
//! file, the environment or an interactive prompt, never from a flag.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::secrets::SensitiveString;

/// Region used when none is supplied.
pub const DEFAULT_REGION: &str = "europe-west2";

/// Environment variable carrying the project id.
pub const ENV_PROJECT_ID: &str = "VULNSTACK_PROJECT_ID";
/// Environment variable carrying the region.
pub const ENV_REGION: &str = "VULNSTACK_REGION";
/// Environment variable carrying the database password.
pub const ENV_DB_PASSWORD: &str = "VULNSTACK_DB_PASSWORD";

static PROJECT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*[a-z0-9]$").expect("valid regex"));
static REGION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]+-[a-z]+[0-9]+$").expect("valid regex"));

/// Validated declaration inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Variables {
    pub project_id: String,
    pub region: String,
    pub db_password: SensitiveString,
}

impl Variables {
    /// Build and validate a set of variables.
    pub fn new(
        project_id: impl Into<String>,
        region: impl Into<String>,
        db_password: impl Into<SensitiveString>,
    ) -> Result<Self> {
        let vars = Self {
            project_id: project_id.into(),
            region: region.into(),
            db_password: db_password.into(),
        };
        vars.validate()?;
        Ok(vars)
    }

    fn validate(&self) -> Result<()> {
        if !PROJECT_ID_RE.is_match(&self.project_id) {
            return Err(Error::invalid_variable(
                "project_id",
                format!(
                    "'{}' must start with a lowercase letter and contain only lowercase letters, digits and hyphens",
                    self.project_id
                ),
            ));
        }
        if !REGION_RE.is_match(&self.region) {
            return Err(Error::invalid_variable(
                "region",
                format!("'{}' is not a region name such as europe-west2", self.region),
            ));
        }
        if self.db_password.is_empty() {
            return Err(Error::invalid_variable("db_password", "must not be empty"));
        }
        Ok(())
    }

    /// Default zone inside the region.
    pub fn zone(&self) -> String {
        format!("{}-a", self.region)
    }
}

/// Partially supplied variables from one source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableInputs {
    pub project_id: Option<String>,
    pub region: Option<String>,
    pub db_password: Option<SensitiveString>,
}

impl VariableInputs {
    /// Load a variables file (TOML, YAML or JSON by extension).
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let inputs = match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        debug!(path = %path.display(), "loaded variables file");
        Ok(inputs)
    }

    /// Read variables from the process environment.
    pub fn from_env() -> Self {
        Self {
            project_id: std::env::var(ENV_PROJECT_ID).ok(),
            region: std::env::var(ENV_REGION).ok(),
            db_password: std::env::var(ENV_DB_PASSWORD).ok().map(SensitiveString::new),
        }
    }

    /// Overlay `other` on top of `self`; values present in `other` win.
    pub fn merge(self, other: VariableInputs) -> Self {
        Self {
            project_id: other.project_id.or(self.project_id),
            region: other.region.or(self.region),
            db_password: other.db_password.or(self.db_password),
        }
    }

    /// Whether the password still has to be obtained.
    pub fn needs_password(&self) -> bool {
        self.db_password.as_ref().map_or(true, SensitiveString::is_empty)
    }

    /// Resolve into validated variables, applying the region default.
    pub fn resolve(self) -> Result<Variables> {
        let project_id = self
            .project_id
            .ok_or_else(|| Error::MissingVariable("project_id".to_string()))?;
        let db_password = self
            .db_password
            .ok_or_else(|| Error::MissingVariable("db_password".to_string()))?;
        let region = self.region.unwrap_or_else(|| DEFAULT_REGION.to_string());
        Variables::new(project_id, region, db_password)
    }
}
