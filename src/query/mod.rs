//! Query translation and fetching
//!
//! Assembles the store statements the mapping layer issues and hydrates the rows that
//! come back:
//! - [`QueryTranslator`]: schema, create, merge, update, delete, match and edge statements
//! - [`hydrate`]: row to typed property map, with polymorphic type resolution
//!
//! Every statement is plain text plus a parameter map; literals never appear in the text.

pub mod hydrate;
pub mod statement;
pub mod translator;

pub use hydrate::{decode_properties, hydrate_row, parse_node_id, resolve_type, HydratedNode};
pub use statement::{Params, Statement, WireValue};
pub use translator::QueryTranslator;
