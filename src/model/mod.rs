//! Object model
//!
//! Live instances, their tracked properties and their relation attributes. Nothing in
//! here talks to the store directly; writes go through the owning [`Session`](crate::Session).

pub mod instance;
pub mod pending;
pub mod property;
pub mod relation;

pub use instance::Instance;
pub use pending::{EdgeAction, EdgeDirection, EdgeKey, InstanceKey, PendingOperation};
pub use property::{DeltaKind, PropertyCell, PropertyChange};
pub use relation::{Relation, RelationEdge, RelationTargets};
