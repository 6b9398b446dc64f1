//! Entity type registry
//!
//! Maps entity type names to their registered vertex type, property set, relations and
//! supertype. Populated once per type and only ever grown afterwards.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::types::{
    validate_identifier, validate_label, PropertyDescriptor, RelationDescriptor, ScalarKind,
};
use crate::condition::Condition;
use crate::error::{OgmError, OgmResult};
use crate::value::Value;

/// Handle to a registered entity type
///
/// Cheap to clone; two handles are equal when they name the same type.
#[derive(Clone)]
pub struct EntityType(Arc<EntityTypeDef>);

struct EntityTypeDef {
    name: String,
    /// Inherited properties first, then the type's own, in declaration order
    properties: Vec<PropertyDescriptor>,
    own_properties: usize,
    relations: Vec<RelationDescriptor>,
    supertype: Option<EntityType>,
    /// Condition leaf per property, built once at registration
    fields: IndexMap<String, Condition>,
}

impl EntityType {
    /// Start declaring a new entity type
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// All properties, inherited ones included
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.0.properties
    }

    /// Properties declared on this type itself
    pub fn declared_properties(&self) -> &[PropertyDescriptor] {
        let inherited = self.0.properties.len() - self.0.own_properties;
        &self.0.properties[inherited..]
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.0.properties.iter().find(|p| p.name == name)
    }

    pub fn property_kind(&self, name: &str) -> OgmResult<ScalarKind> {
        self.property(name)
            .map(|p| p.kind)
            .ok_or_else(|| self.unknown_property(name))
    }

    pub fn relations(&self) -> &[RelationDescriptor] {
        &self.0.relations
    }

    pub fn relation(&self, name: &str) -> OgmResult<&RelationDescriptor> {
        self.0
            .relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| OgmError::UnknownRelation {
                entity: self.name().to_string(),
                relation: name.to_string(),
            })
    }

    pub fn supertype(&self) -> Option<&EntityType> {
        self.0.supertype.as_ref()
    }

    /// Condition leaf referring to one of this type's properties
    pub fn field(&self, name: &str) -> OgmResult<Condition> {
        self.0
            .fields
            .get(name)
            .cloned()
            .ok_or_else(|| self.unknown_property(name))
    }

    /// Whether `self` is `other` or inherits from it
    pub fn is_a(&self, other: &EntityType) -> bool {
        let mut current = Some(self);
        while let Some(entity) = current {
            if entity == other {
                return true;
            }
            current = entity.supertype();
        }
        false
    }

    pub(crate) fn unknown_property(&self, name: &str) -> OgmError {
        OgmError::UnknownProperty {
            entity: self.name().to_string(),
            property: name.to_string(),
        }
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for EntityType {}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.0.name)
            .field("properties", &self.0.properties)
            .field("relations", &self.0.relations)
            .field("supertype", &self.supertype().map(|s| s.name().to_string()))
            .finish()
    }
}

/// Explicit schema declaration for one entity type
#[derive(Debug, Clone)]
pub struct EntityTypeBuilder {
    name: String,
    properties: Vec<PropertyDescriptor>,
    relations: Vec<RelationDescriptor>,
    supertype: Option<EntityType>,
}

impl EntityTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            relations: Vec::new(),
            supertype: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property(mut self, name: impl Into<String>, kind: ScalarKind) -> Self {
        self.properties.push(PropertyDescriptor::new(name, kind));
        self
    }

    pub fn property_with_default(
        mut self,
        name: impl Into<String>,
        kind: ScalarKind,
        default: impl Into<Value>,
    ) -> Self {
        self.properties
            .push(PropertyDescriptor::new(name, kind).with_default(default));
        self
    }

    pub fn descriptor(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn extends(mut self, supertype: &EntityType) -> Self {
        self.supertype = Some(supertype.clone());
        self
    }

    /// Validate the declaration and freeze it into an [`EntityType`]
    fn build(self) -> OgmResult<EntityType> {
        validate_label(&self.name)?;

        let mut properties: Vec<PropertyDescriptor> = self
            .supertype
            .as_ref()
            .map(|s| s.properties().to_vec())
            .unwrap_or_default();
        let mut relations: Vec<RelationDescriptor> = self
            .supertype
            .as_ref()
            .map(|s| s.relations().to_vec())
            .unwrap_or_default();

        let mut names: HashSet<String> = properties
            .iter()
            .map(|p| p.name.clone())
            .chain(relations.iter().map(|r| r.name.clone()))
            .collect();

        for property in &self.properties {
            validate_identifier(&property.name)?;
            if let Some(default) = &property.default {
                property.kind.check(default)?;
            }
            if !names.insert(property.name.clone()) {
                return Err(OgmError::InvalidOperation(format!(
                    "{} declares {} twice",
                    self.name, property.name
                )));
            }
        }

        for relation in &self.relations {
            validate_identifier(&relation.name)?;
            validate_label(&relation.target)?;
            if let Some(inverse) = &relation.inverse {
                validate_identifier(inverse)?;
            }
            for edge_property in relation.edge_properties.iter().flatten() {
                validate_identifier(&edge_property.name)?;
            }
            if !names.insert(relation.name.clone()) {
                return Err(OgmError::InvalidOperation(format!(
                    "{} declares {} twice",
                    self.name, relation.name
                )));
            }
        }

        let own_properties = self.properties.len();
        properties.extend(self.properties);
        relations.extend(self.relations);

        let fields = properties
            .iter()
            .map(|p| (p.name.clone(), Condition::property(p.name.clone())))
            .collect();

        Ok(EntityType(Arc::new(EntityTypeDef {
            name: self.name,
            properties,
            own_properties,
            relations,
            supertype: self.supertype,
            fields,
        })))
    }
}

/// Process-wide table of registered entity types
///
/// Constructed once and shared (`Arc<Registry>`) with every component that resolves types.
#[derive(Default)]
pub struct Registry {
    types: RwLock<IndexMap<String, EntityType>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type
    ///
    /// Fails with `TypeAlreadyDefined` when the name is taken; the existing registration
    /// is left untouched.
    pub fn register(&self, builder: EntityTypeBuilder) -> OgmResult<EntityType> {
        let entity = self.prepare(builder)?;
        self.insert(entity)
    }

    /// Validate a declaration against the registry without inserting it
    pub(crate) fn prepare(&self, builder: EntityTypeBuilder) -> OgmResult<EntityType> {
        if self.contains(builder.name()) {
            return Err(OgmError::TypeAlreadyDefined(builder.name().to_string()));
        }
        if let Some(supertype) = &builder.supertype {
            let registered = self.resolve(supertype.name())?;
            if !Arc::ptr_eq(&registered.0, &supertype.0) {
                return Err(OgmError::UnknownEntityType(supertype.name().to_string()));
            }
        }
        builder.build()
    }

    pub(crate) fn insert(&self, entity: EntityType) -> OgmResult<EntityType> {
        let mut types = self.types.write();
        if types.contains_key(entity.name()) {
            return Err(OgmError::TypeAlreadyDefined(entity.name().to_string()));
        }
        info!(
            "Registered node type {} ({} properties, {} relations)",
            entity.name(),
            entity.properties().len(),
            entity.relations().len()
        );
        types.insert(entity.name().to_string(), entity.clone());
        Ok(entity)
    }

    pub fn resolve(&self, name: &str) -> OgmResult<EntityType> {
        self.types
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| OgmError::UnknownEntityType(name.to_string()))
    }

    pub fn property_kind(&self, entity: &EntityType, property: &str) -> OgmResult<ScalarKind> {
        entity.property_kind(property)
    }

    /// Resolve the (possibly forward-referenced) target type of a relation
    pub fn relation_target(&self, relation: &RelationDescriptor) -> OgmResult<EntityType> {
        self.resolve(&relation.target)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    /// Registered type names in registration order
    pub fn names(&self) -> Vec<String> {
        self.types.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("types", &self.names()).finish()
    }
}
