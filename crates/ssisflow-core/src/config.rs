//! Configuration schema (ssisflow.toml)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use crate::diagnostic::{DiagnosticCode, Severity};

/// Severity threshold overrides for specific diagnostic codes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityThreshold {
    /// Map of diagnostic code to severity override
    pub overrides: HashMap<String, Severity>,
}

impl SeverityThreshold {
    /// Get severity for a diagnostic code, or default
    pub fn get_severity(&self, code: DiagnosticCode, default: Severity) -> Severity {
        self.overrides
            .get(code.as_str())
            .copied()
            .unwrap_or(default)
    }

    /// Set severity override for a code
    pub fn set_override(&mut self, code: DiagnosticCode, severity: Severity) {
        self.overrides.insert(code.as_str().to_string(), severity);
    }
}

fn default_true() -> bool {
    true
}

/// Parser configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Package password; read from config but never written back
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Report pipeline wiring problems as errors instead of warnings
    #[serde(default)]
    pub strict_wiring: bool,

    /// Keep executables with unmapped types as `Unsupported` records
    #[serde(default = "default_true")]
    pub retain_unsupported_executables: bool,

    /// Property names redacted in addition to the built-in set
    #[serde(default)]
    pub extra_sensitive_keys: Vec<String>,

    /// Parse project packages on a thread pool
    #[serde(default = "default_true")]
    pub parallel_packages: bool,

    /// Package names (glob patterns) a project parse should skip
    #[serde(default)]
    pub exclude_packages: Vec<String>,

    /// Severity thresholds
    #[serde(default)]
    pub severity: SeverityThreshold,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            password: None,
            strict_wiring: false,
            retain_unsupported_executables: true,
            extra_sensitive_keys: Vec::new(),
            parallel_packages: true,
            exclude_packages: Vec::new(),
            severity: SeverityThreshold::default(),
        }
    }
}

impl ParserConfig {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Set the package password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Check if a package is excluded from project parsing
    pub fn is_package_excluded(&self, package: &str) -> bool {
        self.exclude_packages.iter().any(|pattern| {
            if pattern.contains('*') {
                glob_match(pattern, package)
            } else {
                pattern.eq_ignore_ascii_case(package)
            }
        })
    }

    /// Whether a property name is sensitive under this config's extra keys
    pub fn is_extra_sensitive(&self, key: &str) -> bool {
        self.extra_sensitive_keys
            .iter()
            .any(|k| k.eq_ignore_ascii_case(key))
    }
}

/// Simple glob matching (single `*` wildcard)
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }

    if let Some(star_pos) = pattern.find('*') {
        let prefix = &pattern[..star_pos];
        let suffix = &pattern[star_pos + 1..];

        text.len() >= prefix.len() + suffix.len()
            && text.starts_with(prefix)
            && text.ends_with(suffix)
    } else {
        pattern == text
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ParserConfig::default();
        assert!(!config.strict_wiring);
        assert!(config.retain_unsupported_executables);
        assert!(config.parallel_packages);
        assert!(config.password.is_none());
    }

    #[test]
    fn severity_override() {
        let mut threshold = SeverityThreshold::default();
        threshold.set_override(DiagnosticCode::IsolatedExecutable, Severity::Warn);

        assert_eq!(
            threshold.get_severity(DiagnosticCode::IsolatedExecutable, Severity::Info),
            Severity::Warn
        );
        assert_eq!(
            threshold.get_severity(DiagnosticCode::PrecedenceCycle, Severity::Warn),
            Severity::Warn
        );
    }

    #[test]
    fn from_toml_with_overrides() {
        let config = ParserConfig::from_toml(
            r#"
password = "s3cret"
strict_wiring = true
extra_sensitive_keys = ["ApiKey"]
exclude_packages = ["Archive_*"]

[severity.overrides]
DATAFLOW_FAN_IN = "error"
"#,
        )
        .unwrap();

        assert_eq!(config.password.as_deref(), Some("s3cret"));
        assert!(config.strict_wiring);
        assert!(config.retain_unsupported_executables);
        assert!(config.is_extra_sensitive("apikey"));
        assert!(config.is_package_excluded("Archive_2019"));
        assert!(!config.is_package_excluded("LoadOrders"));
        assert_eq!(
            config.severity.get_severity(DiagnosticCode::DataflowFanIn, Severity::Warn),
            Severity::Error
        );
    }

    #[test]
    fn password_is_never_written() {
        let config = ParserConfig::default().with_password("s3cret");
        let toml = toml::to_string(&config).unwrap();
        assert!(!toml.contains("s3cret"));

        let parsed = ParserConfig::from_toml(&toml).unwrap();
        assert!(parsed.password.is_none());
        assert_eq!(parsed.strict_wiring, config.strict_wiring);
    }

    #[test]
    fn save_and_reload() {
        let dir = std::env::temp_dir().join(format!("ssisflow-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ssisflow.toml");

        let mut config = ParserConfig::default();
        config.exclude_packages = vec!["Legacy*".to_string()];
        config.save_to_file(&path).unwrap();

        let loaded = ParserConfig::from_file(&path).unwrap();
        assert_eq!(loaded.exclude_packages, config.exclude_packages);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("Stage_*", "Stage_Orders"));
        assert!(!glob_match("Stage_*", "Load_Orders"));
        assert!(!glob_match("ab*ba", "aba"));
    }
}
