//! Relation attributes
//!
//! Each instance keeps a local list of targets per relation. Adding or removing a target
//! updates that list immediately, mirrors the change into the target's inverse relation
//! when the relation is bidirectional, and queues the edge write for the next flush.
//! Reading a relation of a persisted instance fetches its targets from the store once
//! and serves later reads from the local list.
//!
//! Once the owner is persisted its entries hold targets weakly, next to the stored view
//! of each target. A target dropped by the caller is rebuilt from that view on the next
//! read; only the operation queue owns its peers, and only until the flush.

use std::collections::HashSet;
use tracing::debug;

use super::instance::{Instance, WeakInstance};
use super::pending::{EdgeAction, EdgeDirection, EdgeKey, InstanceKey};
use crate::error::{OgmError, OgmResult};
use crate::query::HydratedNode;
use crate::schema::{Cardinality, RelationDescriptor};
use crate::session::Session;
use crate::value::{NodeId, PropertyMap, Value};

/// A relation target plus the properties carried on the edge
#[derive(Debug, Clone)]
pub struct RelationEdge {
    pub target: Instance,
    /// `None` when the relation declares no edge properties
    pub properties: Option<PropertyMap>,
}

impl RelationEdge {
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.as_ref()?.get(name)
    }
}

/// Targets of a relation, shaped by its cardinality
#[derive(Debug, Clone)]
pub enum RelationTargets {
    One(Option<RelationEdge>),
    Many(Vec<RelationEdge>),
}

impl RelationTargets {
    pub fn len(&self) -> usize {
        match self {
            RelationTargets::One(edge) => usize::from(edge.is_some()),
            RelationTargets::Many(edges) => edges.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First target, if any
    pub fn one(&self) -> Option<&RelationEdge> {
        match self {
            RelationTargets::One(edge) => edge.as_ref(),
            RelationTargets::Many(edges) => edges.first(),
        }
    }

    pub fn into_vec(self) -> Vec<RelationEdge> {
        match self {
            RelationTargets::One(edge) => edge.into_iter().collect(),
            RelationTargets::Many(edges) => edges,
        }
    }

    /// Whether `instance` is among the targets
    pub fn contains(&self, instance: &Instance) -> bool {
        match self {
            RelationTargets::One(edge) => edge.iter().any(|e| e.target.same_node(instance)),
            RelationTargets::Many(edges) => edges.iter().any(|e| e.target.same_node(instance)),
        }
    }
}

enum EdgeTarget {
    /// Added before the owner had an identifier; queued once it is created
    Staged(Instance),
    Live(WeakInstance),
    /// Read from the store and never handed out live
    Stored,
}

struct EdgeEntry {
    key: InstanceKey,
    target: EdgeTarget,
    snapshot: Option<HydratedNode>,
    properties: Option<PropertyMap>,
    /// Relation on the target that this entry mirrors
    mirror_of: Option<String>,
}

impl EdgeEntry {
    fn live(target: &Instance, snapshot: Option<HydratedNode>, properties: Option<PropertyMap>) -> Self {
        Self {
            key: target.key(),
            target: EdgeTarget::Live(target.downgrade()),
            snapshot,
            properties,
            mirror_of: None,
        }
    }

    fn staged(target: &Instance, snapshot: Option<HydratedNode>, properties: Option<PropertyMap>) -> Self {
        Self {
            key: target.key(),
            target: EdgeTarget::Staged(target.clone()),
            snapshot,
            properties,
            mirror_of: None,
        }
    }

    fn stored(node: HydratedNode, properties: Option<PropertyMap>) -> Self {
        Self {
            key: InstanceKey::next(),
            target: EdgeTarget::Stored,
            snapshot: Some(node),
            properties,
            mirror_of: None,
        }
    }

    fn instance(&self) -> Option<Instance> {
        match &self.target {
            EdgeTarget::Staged(instance) => Some(instance.clone()),
            EdgeTarget::Live(weak) => weak.upgrade(),
            EdgeTarget::Stored => None,
        }
    }

    fn is_staged(&self) -> bool {
        matches!(self.target, EdgeTarget::Staged(_))
    }

    fn node_id(&self) -> Option<NodeId> {
        self.instance()
            .and_then(|instance| instance.id())
            .or_else(|| self.snapshot.as_ref().map(|node| node.id.clone()))
    }

    fn matches(&self, key: InstanceKey, id: Option<&NodeId>) -> bool {
        self.key == key || id.is_some_and(|id| self.node_id().as_ref() == Some(id))
    }

    /// The live target, or a fresh instance built from the stored view
    fn resolve(&self, session: &Session) -> Option<Instance> {
        self.instance().or_else(|| {
            let node = self.snapshot.clone()?;
            session.materialize(node).ok()
        })
    }
}

/// Local state of one relation attribute
#[derive(Default)]
pub(crate) struct RelationState {
    entries: Vec<EdgeEntry>,
    /// Sources whose mirrored edge was removed here and is not deleted in the store yet
    retracted: Vec<WeakInstance>,
    loaded: bool,
}

impl RelationState {
    fn insert(&mut self, entry: EdgeEntry, cardinality: Cardinality) {
        self.retracted.retain(|source| source.key() != entry.key);
        if cardinality == Cardinality::One {
            self.entries.clear();
        }
        let id = entry.node_id();
        match self.entries.iter().position(|e| e.matches(entry.key, id.as_ref())) {
            Some(index) => {
                let existing = &mut self.entries[index];
                if existing.is_staged() && !entry.is_staged() {
                    existing.properties = entry.properties;
                } else {
                    let snapshot = entry.snapshot.or_else(|| existing.snapshot.take());
                    *existing = EdgeEntry { snapshot, ..entry };
                }
            }
            None => self.entries.push(entry),
        }
    }

    fn remove(&mut self, target: &Instance) {
        let id = target.id();
        self.entries.retain(|e| !e.matches(target.key(), id.as_ref()));
    }

    fn retract(&mut self, source: &Instance) {
        if !self.retracted.iter().any(|s| s.key() == source.key()) {
            self.retracted.push(source.downgrade());
        }
    }

    /// Resolve every entry
    ///
    /// An entry whose target is gone and was never stored cannot be rebuilt; it is
    /// dropped and the relation is fetched again on next access.
    fn edges(&mut self, session: &Session) -> Vec<RelationEdge> {
        let before = self.entries.len();
        let mut edges = Vec::with_capacity(before);
        self.entries.retain(|entry| match entry.resolve(session) {
            Some(target) => {
                edges.push(RelationEdge {
                    target,
                    properties: entry.properties.clone(),
                });
                true
            }
            None => false,
        });
        if self.entries.len() < before {
            self.loaded = false;
        }
        edges
    }

    pub(crate) fn invalidate(&mut self) {
        self.loaded = false;
    }
}

/// Handle to one relation of an instance
pub struct Relation<'a> {
    owner: &'a Instance,
    descriptor: &'a RelationDescriptor,
}

impl<'a> Relation<'a> {
    pub(crate) fn new(owner: &'a Instance, descriptor: &'a RelationDescriptor) -> Self {
        Self { owner, descriptor }
    }

    pub fn descriptor(&self) -> &RelationDescriptor {
        self.descriptor
    }

    fn with_local<R>(&self, f: impl FnOnce(&mut RelationState) -> R) -> R {
        self.owner
            .with_state(|state| f(state.relation_mut(&self.descriptor.name)))
    }

    /// Validate a target's type; for bidirectional relations, return the cardinality
    /// of the relation mirroring this one on the target
    fn check_target(&self, target: &Instance) -> OgmResult<Option<Cardinality>> {
        let expected = self
            .owner
            .session()
            .registry()
            .relation_target(self.descriptor)?;
        if !target.entity().is_a(&expected) {
            return Err(OgmError::InvalidOperation(format!(
                "{} cannot be a target of {}.{} (expects {})",
                target.entity().name(),
                self.owner.entity().name(),
                self.descriptor.name,
                expected.name()
            )));
        }
        if !self.descriptor.bidirectional {
            return Ok(None);
        }
        let inverse = target.entity().relation(self.descriptor.inverse_name())?;
        Ok(Some(inverse.cardinality))
    }

    /// Validate an edge property bag against the relation's declared edge properties
    fn check_properties(&self, properties: Option<PropertyMap>) -> OgmResult<Option<PropertyMap>> {
        let Some(declared) = &self.descriptor.edge_properties else {
            return match properties {
                Some(bag) if !bag.is_empty() => Err(OgmError::InvalidOperation(format!(
                    "relation {} carries no edge properties",
                    self.descriptor.name
                ))),
                _ => Ok(None),
            };
        };
        let mut bag = properties.unwrap_or_default();
        for name in bag.keys() {
            if self.descriptor.edge_property(name).is_none() {
                return Err(OgmError::UnknownProperty {
                    entity: self.descriptor.name.clone(),
                    property: name.clone(),
                });
            }
        }
        let mut checked = PropertyMap::with_capacity(declared.len());
        for property in declared {
            let value = bag
                .shift_remove(&property.name)
                .unwrap_or_else(|| property.initial_value());
            property.kind.check(&value)?;
            checked.insert(property.name.clone(), value);
        }
        Ok(Some(checked))
    }

    fn queue(&self, action: EdgeAction, target: &Instance, properties: Option<PropertyMap>) {
        queue_edge(self.owner, self.descriptor, action, target, properties);
    }

    /// Add a target, replacing the current one for single-valued relations
    ///
    /// `properties` is the edge's property bag; declared edge properties left out take
    /// their default (or null).
    pub fn add(&self, target: &Instance, properties: Option<PropertyMap>) -> OgmResult<()> {
        let inverse = self.check_target(target)?;
        let properties = self.check_properties(properties)?;
        if self.descriptor.cardinality == Cardinality::One {
            self.displace(target)?;
        }

        let persisted = self.owner.is_persisted();
        let snapshot = target.snapshot();
        let entry = if persisted {
            EdgeEntry::live(target, snapshot, properties.clone())
        } else {
            EdgeEntry::staged(target, snapshot, properties.clone())
        };
        self.with_local(|relation| relation.insert(entry, self.descriptor.cardinality));
        if persisted {
            self.queue(EdgeAction::Link, target, properties.clone());
        }

        if let Some(cardinality) = inverse {
            let mut mirror = EdgeEntry::live(self.owner, self.owner.snapshot(), properties);
            mirror.mirror_of = Some(self.descriptor.name.clone());
            target.with_state(|state| {
                state
                    .relation_mut(self.descriptor.inverse_name())
                    .insert(mirror, cardinality)
            });
        }
        debug!(
            "Added {} to {}.{}",
            target,
            self.owner,
            self.descriptor.name
        );
        Ok(())
    }

    /// Unlink whatever a single-valued relation points at before `target` is linked
    fn displace(&self, target: &Instance) -> OgmResult<()> {
        let session = self.owner.session();
        let current = self.with_local(|relation| relation.edges(session));
        for edge in current.iter().filter(|edge| !edge.target.same_node(target)) {
            self.remove(&edge.target)?;
        }

        // edges never read back may still exist in the store
        let loaded = self.with_local(|relation| relation.loaded);
        if self.owner.is_persisted() && !loaded {
            self.owner.with_queue(|queue| {
                queue.push(
                    EdgeKey {
                        source: self.owner.key(),
                        target: self.owner.key(),
                        relation: self.descriptor.name.clone(),
                        direction: EdgeDirection::Outgoing,
                    },
                    EdgeAction::Clear,
                    self.owner.clone(),
                    None,
                )
            });
        }
        Ok(())
    }

    /// Remove a target; removing an absent target is a no-op locally
    pub fn remove(&self, target: &Instance) -> OgmResult<()> {
        let inverse = self.check_target(target)?;
        self.with_local(|relation| relation.remove(target));
        let persisted = self.owner.is_persisted();
        if persisted {
            self.queue(EdgeAction::Unlink, target, None);
        }
        if inverse.is_some() {
            let owner = self.owner;
            target.with_state(|state| {
                let mirror = state.relation_mut(self.descriptor.inverse_name());
                mirror.remove(owner);
                if persisted {
                    mirror.retract(owner);
                }
            });
        }
        debug!(
            "Removed {} from {}.{}",
            target,
            self.owner,
            self.descriptor.name
        );
        Ok(())
    }

    /// Current targets, fetched from the store on first access
    ///
    /// Fails with `UnknownNode` when the owner was never persisted.
    pub async fn get(&self) -> OgmResult<RelationTargets> {
        let id = self.owner.require_id()?;
        let loaded = self.with_local(|relation| relation.loaded);
        if !loaded {
            self.fetch(&id).await?;
        }
        Ok(self.targets())
    }

    /// Discard the local list and fetch the targets again
    pub async fn reload(&self) -> OgmResult<RelationTargets> {
        let id = self.owner.require_id()?;
        self.fetch(&id).await?;
        Ok(self.targets())
    }

    async fn fetch(&self, id: &NodeId) -> OgmResult<()> {
        let fetched: Vec<EdgeEntry> = self
            .owner
            .session()
            .fetch_relation(id, self.descriptor)
            .await?
            .into_iter()
            .map(|(node, properties)| EdgeEntry::stored(node, properties))
            .collect();

        // mirrored changes still queued on their source outlive the fetch
        let (mirrors, retracted) = self.with_local(|relation| {
            let mirrors: Vec<(Instance, String)> = relation
                .entries
                .iter()
                .filter_map(|entry| {
                    let source_relation = entry.mirror_of.clone()?;
                    entry.instance().map(|source| (source, source_relation))
                })
                .collect();
            let retracted: Vec<Instance> = relation.retracted.iter().filter_map(WeakInstance::upgrade).collect();
            (mirrors, retracted)
        });
        let pending: HashSet<InstanceKey> = mirrors
            .iter()
            .filter(|(source, source_relation)| match self.mirror_queued(source) {
                Some(action) => action == EdgeAction::Link,
                None => self.staged_on(source, source_relation),
            })
            .map(|(source, _)| source.key())
            .collect();
        let retracted: Vec<Instance> = retracted
            .into_iter()
            .filter(|source| self.mirror_queued(source) == Some(EdgeAction::Unlink))
            .collect();

        self.with_local(|relation| {
            let carried: Vec<EdgeEntry> = relation
                .entries
                .drain(..)
                .filter(|entry| entry.mirror_of.is_some() && pending.contains(&entry.key))
                .collect();
            relation.entries = fetched;
            for entry in carried {
                relation.insert(entry, self.descriptor.cardinality);
            }
            for source in &retracted {
                relation.remove(source);
            }
            relation.retracted = retracted.iter().map(Instance::downgrade).collect();
            relation.loaded = true;
        });

        // the owner's own edge changes not flushed yet
        let queued = self.owner.with_queue(|queue| queue.snapshot());
        for op in queued.iter().filter(|op| {
            op.relation() == self.descriptor.name && op.key().direction != EdgeDirection::Inverse
        }) {
            match op.action() {
                EdgeAction::Link => {
                    let entry = EdgeEntry::live(op.peer(), op.peer().snapshot(), op.properties().cloned());
                    self.with_local(|relation| relation.insert(entry, self.descriptor.cardinality));
                }
                EdgeAction::Unlink => self.with_local(|relation| relation.remove(op.peer())),
                EdgeAction::Clear => self.with_local(|relation| relation.entries.clear()),
            }
        }
        Ok(())
    }

    /// Action `source` has queued for the mirror of its edge to the owner
    fn mirror_queued(&self, source: &Instance) -> Option<EdgeAction> {
        let key = EdgeKey {
            source: self.owner.key(),
            target: source.key(),
            relation: self.descriptor.name.clone(),
            direction: EdgeDirection::Inverse,
        };
        source.with_queue(|queue| queue.action_for(&key))
    }

    /// Whether an unpersisted `source` still holds the owner as a staged target
    fn staged_on(&self, source: &Instance, source_relation: &str) -> bool {
        let owner = self.owner.key();
        source.with_state(|state| {
            state
                .relations
                .get(source_relation)
                .is_some_and(|relation| relation.entries.iter().any(|e| e.is_staged() && e.key == owner))
        })
    }

    /// Local view of the targets without touching the store
    pub fn targets(&self) -> RelationTargets {
        let session = self.owner.session();
        let edges = self.with_local(|relation| relation.edges(session));
        match self.descriptor.cardinality {
            Cardinality::One => RelationTargets::One(edges.into_iter().next()),
            Cardinality::Many => RelationTargets::Many(edges),
        }
    }
}

fn queue_edge(
    owner: &Instance,
    descriptor: &RelationDescriptor,
    action: EdgeAction,
    target: &Instance,
    properties: Option<PropertyMap>,
) {
    let forward = EdgeKey {
        source: owner.key(),
        target: target.key(),
        relation: descriptor.name.clone(),
        direction: EdgeDirection::Forward,
    };
    let inverse = descriptor.bidirectional.then(|| EdgeKey {
        source: target.key(),
        target: owner.key(),
        relation: descriptor.inverse_name().to_string(),
        direction: EdgeDirection::Inverse,
    });
    owner.with_queue(|queue| {
        // an edge to a target that was never stored cannot exist in the store
        if action == EdgeAction::Unlink && !target.is_persisted() {
            queue.discard(&forward);
            if let Some(key) = &inverse {
                queue.discard(key);
            }
            return;
        }
        queue.push(forward, action, target.clone(), properties.clone());
        if let Some(key) = inverse {
            queue.push(key, action, target.clone(), properties);
        }
    });
}

/// Queue the edges added while `owner` had no identifier
///
/// Staged entries drop their strong handle here; from now on the queue owns the target
/// until the flush.
pub(crate) fn queue_staged(owner: &Instance) {
    for descriptor in owner.entity().relations() {
        let staged: Vec<(Instance, Option<PropertyMap>)> = owner.with_state(|state| {
            let Some(relation) = state.relations.get_mut(&descriptor.name) else {
                return Vec::new();
            };
            relation
                .entries
                .iter_mut()
                .filter_map(|entry| {
                    let EdgeTarget::Staged(target) = &entry.target else {
                        return None;
                    };
                    let target = target.clone();
                    entry.target = EdgeTarget::Live(target.downgrade());
                    Some((target, entry.properties.clone()))
                })
                .collect()
        });
        for (target, properties) in staged {
            queue_edge(owner, descriptor, EdgeAction::Link, &target, properties);
        }
    }
}
