use crate::core::{AssemblyError, Result};
use serde::{Deserialize, Serialize};

/// Assembler configuration
///
/// Controls how eagerly references are resolved and how the orchestrator
/// treats incomplete or rolled back work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Assemble a relationship end synchronously when its referent is present
    /// in the domain graph, instead of deferring it.
    pub resolve_domain_references: bool,

    /// Fail with a stale object error when a persisted domain object's version
    /// differs from its persistent counterpart.
    pub check_versions: bool,

    /// Maximum replay passes in one round of deferred assembly
    pub max_deferred_passes: usize,

    /// Delete relationships dropped from an entity's collection
    pub remove_orphans: bool,

    /// Reset identifiers tentatively assigned to new objects on rollback
    pub revert_ids_on_rollback: bool,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            resolve_domain_references: true,
            check_versions: true,
            max_deferred_passes: 64,
            remove_orphans: true,
            revert_ids_on_rollback: true,
        }
    }
}

impl AssemblerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AssemblyError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_deferred_passes == 0 {
            return Err(AssemblyError::ConfigError(
                "max_deferred_passes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Set whether referents present in the domain graph resolve synchronously
    pub fn resolve_domain_references(mut self, enabled: bool) -> Self {
        self.resolve_domain_references = enabled;
        self
    }

    /// Set optimistic version checking
    pub fn check_versions(mut self, enabled: bool) -> Self {
        self.check_versions = enabled;
        self
    }

    /// Set the replay pass bound
    pub fn max_deferred_passes(mut self, passes: usize) -> Self {
        self.max_deferred_passes = passes;
        self
    }

    /// Set orphan removal
    pub fn remove_orphans(mut self, enabled: bool) -> Self {
        self.remove_orphans = enabled;
        self
    }

    /// Set identifier reversion on rollback
    pub fn revert_ids_on_rollback(mut self, enabled: bool) -> Self {
        self.revert_ids_on_rollback = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AssemblerConfig::new();
        assert!(config.resolve_domain_references);
        assert!(config.check_versions);
        assert_eq!(config.max_deferred_passes, 64);
        assert!(config.remove_orphans);
        assert!(config.revert_ids_on_rollback);
    }

    #[test]
    fn test_builder_pattern() {
        let config = AssemblerConfig::new()
            .resolve_domain_references(false)
            .check_versions(false)
            .max_deferred_passes(3);

        assert!(!config.resolve_domain_references);
        assert!(!config.check_versions);
        assert_eq!(config.max_deferred_passes, 3);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = AssemblerConfig::from_json(r#"{ "remove_orphans": false }"#).unwrap();
        assert!(!config.remove_orphans);
        assert!(config.check_versions);
    }

    #[test]
    fn test_from_json_rejects_zero_passes() {
        let result = AssemblerConfig::from_json(r#"{ "max_deferred_passes": 0 }"#);
        assert!(matches!(result, Err(AssemblyError::ConfigError(_))));
    }
}
