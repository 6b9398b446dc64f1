//! Property and relation descriptors

use std::fmt;

use crate::error::{OgmError, OgmResult};
use crate::value::Value;

/// Semantic scalar kind of a declared property
///
/// `String` is the fallback kind for anything without a more specific mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScalarKind {
    Integer,
    Boolean,
    Float,
    Bytes,
    Date,
    DateTime,
    #[default]
    String,
}

impl ScalarKind {
    /// Store-side property type name
    pub fn store_type(&self) -> &'static str {
        match self {
            ScalarKind::Integer => "INTEGER",
            ScalarKind::Boolean => "BOOLEAN",
            ScalarKind::Float => "DOUBLE",
            ScalarKind::Bytes => "BYTES",
            ScalarKind::Date => "DATE",
            ScalarKind::DateTime => "DATETIME",
            ScalarKind::String => "STRING",
        }
    }

    /// Inverse of [`ScalarKind::store_type`]; unknown names fall back to `String`
    pub fn from_store_type(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "INTEGER" => ScalarKind::Integer,
            "BOOLEAN" => ScalarKind::Boolean,
            "DOUBLE" => ScalarKind::Float,
            "BYTES" => ScalarKind::Bytes,
            "DATE" => ScalarKind::Date,
            "DATETIME" => ScalarKind::DateTime,
            _ => ScalarKind::String,
        }
    }

    /// Whether a value may be stored under this kind. Null fits every kind.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ScalarKind::Integer, Value::Integer(_))
                | (ScalarKind::Boolean, Value::Boolean(_))
                | (ScalarKind::Float, Value::Float(_))
                | (ScalarKind::Float, Value::Integer(_))
                | (ScalarKind::Bytes, Value::Bytes(_))
                | (ScalarKind::Date, Value::Date(_))
                | (ScalarKind::DateTime, Value::DateTime(_))
                | (ScalarKind::String, Value::String(_))
        )
    }

    pub(crate) fn check(&self, value: &Value) -> OgmResult<()> {
        if self.accepts(value) {
            Ok(())
        } else {
            Err(OgmError::TypeMismatch {
                expected: self.store_type(),
                found: value.type_name(),
            })
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_type())
    }
}

/// A declared scalar property: name, kind and optional default
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: ScalarKind,
    pub default: Option<Value>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Value observed by an instance constructed without this property
    pub fn initial_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

/// How many targets a relation attribute holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    One,
    Many,
}

/// A declared relation: edge label, target type and mirroring policy
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    /// Edge label in the store
    pub name: String,
    /// Target entity type name, resolved lazily so forward references work
    pub target: String,
    pub cardinality: Cardinality,
    /// Properties carried on the edge; `None` when the edge has no property bag
    pub edge_properties: Option<Vec<PropertyDescriptor>>,
    pub bidirectional: bool,
    /// Relation on the target that mirrors this one; defaults to `name`
    pub inverse: Option<String>,
}

impl RelationDescriptor {
    pub fn new(name: impl Into<String>, target: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality,
            edge_properties: None,
            bidirectional: false,
            inverse: None,
        }
    }

    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, Cardinality::Many)
    }

    pub fn one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, Cardinality::One)
    }

    pub fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }

    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// Declare an edge property; the first call turns on the edge property bag
    pub fn with_edge_property(mut self, property: PropertyDescriptor) -> Self {
        self.edge_properties.get_or_insert_with(Vec::new).push(property);
        self
    }

    pub fn has_edge_properties(&self) -> bool {
        self.edge_properties.is_some()
    }

    pub fn inverse_name(&self) -> &str {
        self.inverse.as_deref().unwrap_or(&self.name)
    }

    pub fn edge_property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.edge_properties.as_ref()?.iter().find(|p| p.name == name)
    }
}

/// Validate a type label: letters, digits, underscore and dot
pub fn validate_label(label: &str) -> OgmResult<()> {
    let valid = !label.is_empty()
        && !label.starts_with('.')
        && !label.ends_with('.')
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(OgmError::InvalidLabel(label.to_string()))
    }
}

/// Validate a property, relation or variable name (a label without dots)
pub fn validate_identifier(name: &str) -> OgmResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(OgmError::InvalidLabel(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_type_roundtrip() {
        for kind in [
            ScalarKind::Integer,
            ScalarKind::Boolean,
            ScalarKind::Float,
            ScalarKind::Bytes,
            ScalarKind::Date,
            ScalarKind::DateTime,
            ScalarKind::String,
        ] {
            assert_eq!(ScalarKind::from_store_type(kind.store_type()), kind);
        }
        assert_eq!(ScalarKind::from_store_type("geometry"), ScalarKind::String);
    }

    #[test]
    fn test_accepts() {
        assert!(ScalarKind::Integer.accepts(&Value::Integer(1)));
        assert!(ScalarKind::Float.accepts(&Value::Integer(1)));
        assert!(ScalarKind::Boolean.accepts(&Value::Null));
        assert!(!ScalarKind::Integer.accepts(&Value::from("1")));
    }

    #[test]
    fn test_relation_builder() {
        let rel = RelationDescriptor::many("spouses", "Person")
            .bidirectional()
            .with_edge_property(PropertyDescriptor::new("since", ScalarKind::String));
        assert!(rel.bidirectional);
        assert!(rel.has_edge_properties());
        assert_eq!(rel.inverse_name(), "spouses");
        assert!(rel.edge_property("since").is_some());

        let owns = RelationDescriptor::one("owner", "Person").with_inverse("pets");
        assert_eq!(owns.inverse_name(), "pets");
        assert!(!owns.has_edge_properties());
    }

    #[test]
    fn test_labels() {
        assert!(validate_label("app.models.Person").is_ok());
        assert!(validate_label("Person_2").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label("Person)-[x").is_err());
        assert!(validate_identifier("name").is_ok());
        assert!(validate_identifier("a.b").is_err());
        assert!(validate_identifier("1abc").is_err());
    }
}
