//! Akira: object-graph mapping for OpenCypher graph stores
//!
//! Maps typed entity instances onto vertices and their relations onto edges of a
//! property graph reached through a Cypher-style statement interface.
//!
//! # Architecture
//!
//! - [`schema`]: entity type registry (properties, relations, inheritance)
//! - [`model`]: live instances with tracked properties and relation attributes
//! - [`condition`]: composable filter expressions compiled to parameterized fragments
//! - [`query`]: statement assembly and row hydration
//! - [`store`]: the store capability, connection/cursor handling and an in-memory store
//! - [`session`]: the handle tying registry, connection and codec together
//!
//! Property changes are tracked per property: numeric deltas are written as
//! server-side increments, so concurrent writers do not overwrite each other.
//! Relation changes are queued per instance and flushed together in one transaction.
//!
//! ## Example Usage
//!
//! ```rust
//! use akira::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> OgmResult<()> {
//! let session = Session::new(OgmConfig::default())?;
//! session.connect(Arc::new(MemoryStore::new()));
//!
//! let person = session
//!     .register(
//!         EntityType::builder("Person")
//!             .property("name", ScalarKind::String)
//!             .property_with_default("visits", ScalarKind::Integer, 0)
//!             .relation(RelationDescriptor::many("spouses", "Person").bidirectional()),
//!     )
//!     .await?;
//!
//! let nana = session.instantiate(&person, [("name", "Nana")])?;
//! let senpai = session.instantiate(&person, [("name", "Senpai")])?;
//! nana.create().await?;
//! senpai.create().await?;
//!
//! nana.relation("spouses")?.add(&senpai, None)?;
//! nana.add("visits", 1)?;
//! nana.save().await?;
//!
//! let found = session
//!     .fetch_one(&person, Some(&person.field("name")?.equals("Senpai")))
//!     .await?;
//! assert!(found.relation("spouses")?.get().await?.contains(&nana));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod condition;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod schema;
pub mod session;
pub mod store;
pub mod value;

pub use codec::{Codec, JsonCodec, NULL_SENTINEL};
pub use condition::{CompiledCondition, Condition, ConditionOp};
pub use config::OgmConfig;
pub use error::{OgmError, OgmResult};
pub use model::{Instance, PropertyCell, PropertyChange, Relation, RelationEdge, RelationTargets};
pub use query::{QueryTranslator, Statement};
pub use schema::{Cardinality, EntityType, EntityTypeBuilder, PropertyDescriptor, Registry, RelationDescriptor, ScalarKind};
pub use session::Session;
pub use store::{Connection, MemoryStore, RowSet, Store};
pub use value::{property_map, NodeId, PropertyMap, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The types most programs need
pub mod prelude {
    pub use crate::{
        property_map, Cardinality, Condition, EntityType, Instance, MemoryStore, NodeId, OgmConfig, OgmError,
        OgmResult, PropertyDescriptor, RelationDescriptor, ScalarKind, Session, Value,
    };
}
