//! Row hydration
//!
//! Turns `id, labels, properties` rows into typed property maps. The concrete type of
//! each row is picked from its labels so that a query against a supertype yields the
//! subtype a vertex was created as.

use crate::codec::Codec;
use crate::error::{OgmError, OgmResult};
use crate::query::statement::WireValue;
use crate::schema::{EntityType, PropertyDescriptor, Registry};
use crate::value::{NodeId, PropertyMap, Value};

/// A vertex read back from the store, decoded against its resolved type
#[derive(Debug, Clone)]
pub struct HydratedNode {
    pub entity: EntityType,
    pub id: NodeId,
    pub properties: PropertyMap,
}

/// Store identifiers may come back as strings or numbers
pub fn parse_node_id(wire: &WireValue) -> OgmResult<NodeId> {
    match wire {
        WireValue::String(s) => Ok(NodeId::new(s.clone())),
        WireValue::Number(n) => Ok(NodeId::new(n.to_string())),
        other => Err(OgmError::Codec(format!("{} is not a node identifier", other))),
    }
}

/// Most specific registered type among `labels` that is (a subtype of) `requested`
pub fn resolve_type(registry: &Registry, requested: &EntityType, labels: &WireValue) -> EntityType {
    let candidates: Vec<&str> = match labels {
        WireValue::Array(items) => items.iter().filter_map(|l| l.as_str()).collect(),
        WireValue::String(label) => vec![label.as_str()],
        _ => Vec::new(),
    };
    candidates
        .into_iter()
        .filter_map(|label| registry.resolve(label).ok())
        .filter(|entity| entity.is_a(requested))
        .max_by_key(depth)
        .unwrap_or_else(|| requested.clone())
}

fn depth(entity: &EntityType) -> usize {
    std::iter::successors(entity.supertype(), |e| e.supertype()).count()
}

/// Decode a properties object against declared descriptors
///
/// Missing keys, nulls and the null sentinel all decode to `Value::Null`; keys the
/// descriptors don't name are ignored.
pub fn decode_properties(
    codec: &dyn Codec,
    descriptors: &[PropertyDescriptor],
    wire: &WireValue,
) -> OgmResult<PropertyMap> {
    let object = match wire {
        WireValue::Object(object) => Some(object),
        WireValue::Null => None,
        other => {
            return Err(OgmError::Codec(format!(
                "expected a property map, got {}",
                other
            )))
        }
    };
    descriptors
        .iter()
        .map(|descriptor| {
            let value = match object.and_then(|o| o.get(&descriptor.name)) {
                Some(wire) => codec.decode(descriptor.kind, wire)?,
                None => Value::Null,
            };
            Ok((descriptor.name.clone(), value))
        })
        .collect()
}

/// Hydrate one `id, labels, properties` row
pub fn hydrate_row(
    registry: &Registry,
    codec: &dyn Codec,
    requested: &EntityType,
    row: &[WireValue],
) -> OgmResult<HydratedNode> {
    let [id, labels, properties, ..] = row else {
        return Err(OgmError::Store(format!(
            "expected id, labels and properties columns, got {} columns",
            row.len()
        )));
    };
    let entity = resolve_type(registry, requested, labels);
    let properties = decode_properties(codec, entity.properties(), properties)?;
    Ok(HydratedNode {
        id: parse_node_id(id)?,
        entity,
        properties,
    })
}
