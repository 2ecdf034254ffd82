//! Evaluator limits and defaults, loadable from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Limits applied to every evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluatorConfig {
    /// Node evaluations allowed before the snippet is stopped.
    pub max_operations: u64,
    /// Iterations allowed for any single `while` loop.
    pub max_while_iterations: u64,
    /// Nested function calls allowed before `RecursionError`.
    pub max_call_depth: usize,
    /// Characters of printed output kept; the rest is truncated.
    pub max_output_len: usize,
    /// Extra module names authorised for every evaluation.
    pub authorized_imports: Vec<String>,
    /// Wall-clock limit used by hosts that run evaluations under a deadline.
    pub timeout_ms: Option<u64>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_operations: 10_000_000,
            max_while_iterations: 1_000_000,
            max_call_depth: 200,
            max_output_len: 50_000,
            authorized_imports: Vec::new(),
            timeout_ms: None,
        }
    }
}

impl EvaluatorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_operations", self.max_operations == 0),
            ("max_while_iterations", self.max_while_iterations == 0),
            ("max_call_depth", self.max_call_depth == 0),
            ("max_output_len", self.max_output_len == 0),
        ];
        if let Some((field, _)) = positive.into_iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Invalid {
                field,
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "timeout_ms",
                reason: "must be greater than zero when set".to_string(),
            });
        }
        if let Some(bad) = self.authorized_imports.iter().find(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "authorized_imports",
                reason: format!("empty module name {bad:?}"),
            });
        }
        Ok(())
    }

    pub fn with_max_operations(mut self, max: u64) -> Self {
        self.max_operations = max;
        self
    }

    pub fn with_max_while_iterations(mut self, max: u64) -> Self {
        self.max_while_iterations = max;
        self
    }

    pub fn with_max_call_depth(mut self, max: usize) -> Self {
        self.max_call_depth = max;
        self
    }

    pub fn with_max_output_len(mut self, max: usize) -> Self {
        self.max_output_len = max;
        self
    }

    pub fn with_authorized_import(mut self, module: impl Into<String>) -> Self {
        self.authorized_imports.push(module.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EvaluatorConfig::default();
        assert_eq!(config.max_operations, 10_000_000);
        assert_eq!(config.max_while_iterations, 1_000_000);
        assert_eq!(config.max_call_depth, 200);
        assert_eq!(config.max_output_len, 50_000);
        assert!(config.authorized_imports.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EvaluatorConfig::from_toml_str(
            r#"
            max_operations = 5000
            authorized_imports = ["requests", "numpy.*"]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_operations, 5000);
        assert_eq!(config.max_call_depth, 200);
        assert_eq!(config.authorized_imports, vec!["requests", "numpy.*"]);
    }

    #[test]
    fn test_rejects_unknown_and_zero_fields() {
        assert!(matches!(
            EvaluatorConfig::from_toml_str("max_loops = 3"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EvaluatorConfig::from_toml_str("max_call_depth = 0"),
            Err(ConfigError::Invalid {
                field: "max_call_depth",
                ..
            })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EvaluatorConfig::load(Path::new("/nonexistent/codeact.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
