//! Error types for the object-graph mapper

use thiserror::Error;

/// Errors that can occur while mapping objects onto the graph store
#[derive(Error, Debug)]
pub enum OgmError {
    /// A store operation was attempted without an active connection
    #[error("Database is not connected")]
    NotConnected,

    /// An entity type with the same name is already registered
    #[error("Node type {0} was already defined")]
    TypeAlreadyDefined(String),

    /// No entity type is registered under this name
    #[error("Unknown node type: {0}")]
    UnknownEntityType(String),

    /// The entity type declares no such scalar property
    #[error("Node type {entity} has no property {property}")]
    UnknownProperty { entity: String, property: String },

    /// The entity type declares no such relation
    #[error("Node type {entity} has no relation {relation}")]
    UnknownRelation { entity: String, relation: String },

    /// A single-result fetch matched zero rows
    #[error("Requested node could not be found")]
    NodeNotFound,

    /// An operation that needs a store identifier ran on an instance that was never persisted
    #[error("Attempted to use a node that was never persisted")]
    UnknownNode,

    /// A type, property or relation name outside the label character set
    #[error("Invalid label: {0:?}")]
    InvalidLabel(String),

    /// A value does not fit the declared scalar kind, or a delta does not apply to it
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The call is not valid in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Failure reported by the store, propagated as is
    #[error("Store error: {0}")]
    Store(String),

    /// Failure at the wire codec boundary
    #[error("Codec error: {0}")]
    Codec(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] serde_yaml::Error),
}

pub type OgmResult<T> = Result<T, OgmError>;
