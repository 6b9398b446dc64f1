//! Schema registry
//!
//! Entity types are declared with an explicit builder: an ordered list of scalar
//! properties (name, kind, default) and relations (name, target, cardinality,
//! bidirectional flag). Registration freezes the declaration into an [`EntityType`]
//! handle, including one condition leaf per property for building filters.

pub mod registry;
pub mod types;

pub use registry::{EntityType, EntityTypeBuilder, Registry};
pub use types::{
    validate_identifier, validate_label, Cardinality, PropertyDescriptor, RelationDescriptor,
    ScalarKind,
};
