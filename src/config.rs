//! Engine configuration
//!
//! Loaded from `restsql.toml` (camelCase keys, all optional).

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "restsql.toml";

pub const DEFAULT_LIMIT: u64 = 10;
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Engine defaults applied to incoming query descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Page size when the descriptor gives none
    pub default_limit: u64,
    /// Upper bound on requested page sizes; 0 is unbounded
    pub max_limit: u64,
    pub default_content_type: String,
    pub default_accept: String,
    pub default_namespace: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: 0,
            default_content_type: DEFAULT_CONTENT_TYPE.into(),
            default_accept: DEFAULT_CONTENT_TYPE.into(),
            default_namespace: None,
        }
    }
}

impl EngineConfig {
    /// Load from `restsql.toml` in the working directory
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Load from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.into())
            } else {
                ConfigError::Io(path.into(), e)
            }
        })?;

        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(path.into(), e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_content_type.trim().is_empty() {
            return Err(ConfigError::Invalid("defaultContentType must not be empty".into()));
        }
        if self.default_accept.trim().is_empty() {
            return Err(ConfigError::Invalid("defaultAccept must not be empty".into()));
        }
        if self.max_limit != 0 && self.max_limit < self.default_limit {
            return Err(ConfigError::Invalid(format!(
                "maxLimit ({}) is below defaultLimit ({})",
                self.max_limit, self.default_limit
            )));
        }
        Ok(())
    }

    /// Requested limit, defaulted and clamped.
    pub fn resolve_limit(&self, requested: Option<u64>) -> u64 {
        let limit = requested.unwrap_or(self.default_limit);
        match self.max_limit {
            0 => limit,
            max if limit == 0 || limit > max => max,
            _ => limit,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::from_toml("").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.resolve_limit(None), 10);
        assert_eq!(cfg.resolve_limit(Some(0)), 0);
        assert_eq!(cfg.resolve_limit(Some(500)), 500);
    }

    #[test]
    fn camel_case_keys() {
        let cfg = EngineConfig::from_toml(
            r#"
            defaultLimit = 25
            maxLimit = 100
            defaultContentType = "application/cbor"
            defaultNamespace = "tenant"
        "#,
        )
        .unwrap();
        assert_eq!(cfg.default_limit, 25);
        assert_eq!(cfg.default_content_type, "application/cbor");
        assert_eq!(cfg.default_accept, "application/json");
        assert_eq!(cfg.default_namespace.as_deref(), Some("tenant"));
        assert_eq!(cfg.resolve_limit(Some(1000)), 100);
        assert_eq!(cfg.resolve_limit(Some(0)), 100);
        assert_eq!(cfg.resolve_limit(None), 25);
    }

    #[test]
    fn rejects_inconsistent_limits() {
        let err = EngineConfig::from_toml("defaultLimit = 50\nmaxLimit = 20").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = EngineConfig::from_toml("default_limit = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(..)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            EngineConfig::load_from(&missing),
            Err(ConfigError::NotFound(_))
        ));

        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "defaultAccept = \"application/cbor\"\n").unwrap();
        let cfg = EngineConfig::load_from(&path).unwrap();
        assert_eq!(cfg.default_accept, "application/cbor");
    }
}
