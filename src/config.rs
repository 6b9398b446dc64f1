//! Mapper configuration

use serde::{Deserialize, Serialize};

use crate::error::{OgmError, OgmResult};
use crate::schema::validate_identifier;

/// Configuration for a [`Session`](crate::Session)
///
/// Every field has a default, so a partial YAML document is enough:
///
/// ```yaml
/// graph: social
/// ensure_schema: false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OgmConfig {
    /// Graph name forwarded to the store with every statement
    pub graph: String,
    /// Prefix of generated parameter names (`$p0`, `$p1`, ...)
    pub parameter_prefix: String,
    /// Variable bound to the matched vertex in generated statements
    pub node_variable: String,
    /// Emit ensure-vertex-type / ensure-property statements on registration
    pub ensure_schema: bool,
}

impl Default for OgmConfig {
    fn default() -> Self {
        Self {
            graph: "default".to_string(),
            parameter_prefix: "p".to_string(),
            node_variable: "n".to_string(),
            ensure_schema: true,
        }
    }
}

impl OgmConfig {
    /// Parse a YAML document, filling omitted fields with defaults
    pub fn from_yaml_str(input: &str) -> OgmResult<Self> {
        let config: OgmConfig = serde_yaml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that generated names stay inside the label character set
    pub fn validate(&self) -> OgmResult<()> {
        validate_identifier(&self.parameter_prefix)?;
        validate_identifier(&self.node_variable)?;
        if self.graph.is_empty() {
            return Err(OgmError::InvalidOperation("graph name must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OgmConfig::default();
        assert_eq!(config.graph, "default");
        assert_eq!(config.parameter_prefix, "p");
        assert_eq!(config.node_variable, "n");
        assert!(config.ensure_schema);
    }

    #[test]
    fn test_partial_yaml() {
        let config = OgmConfig::from_yaml_str("graph: social\nensure_schema: false\n").unwrap();
        assert_eq!(config.graph, "social");
        assert!(!config.ensure_schema);
        assert_eq!(config.parameter_prefix, "p");
    }

    #[test]
    fn test_rejects_bad_prefix() {
        let err = OgmConfig::from_yaml_str("parameter_prefix: \"p-\"\n").unwrap_err();
        assert!(matches!(err, OgmError::InvalidLabel(_)));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = OgmConfig::from_yaml_str("graph: [unclosed").unwrap_err();
        assert!(matches!(err, OgmError::Config(_)));
    }
}
