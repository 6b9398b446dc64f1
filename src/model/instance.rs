//! Live instances of registered entity types

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use super::pending::{InstanceKey, OperationQueue, PendingOperation};
use super::property::{DeltaKind, PropertyCell, PropertyChange};
use super::relation::{Relation, RelationState};
use crate::condition::Condition;
use crate::error::{OgmError, OgmResult};
use crate::query::HydratedNode;
use crate::schema::EntityType;
use crate::session::Session;
use crate::value::{NodeId, PropertyMap, Value};

/// A live object of a registered entity type
///
/// Cheap to clone; clones share state. The store identifier is assigned at most once,
/// when the instance is first persisted.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

pub(crate) struct InstanceInner {
    key: InstanceKey,
    entity: EntityType,
    session: Session,
    id: OnceLock<NodeId>,
    state: Mutex<InstanceState>,
    queue: Mutex<OperationQueue>,
}

#[derive(Default)]
pub(crate) struct InstanceState {
    pub(crate) properties: IndexMap<String, PropertyCell>,
    pub(crate) relations: HashMap<String, RelationState>,
}

impl InstanceState {
    pub(crate) fn relation_mut(&mut self, name: &str) -> &mut RelationState {
        self.relations.entry(name.to_string()).or_default()
    }
}

/// Non-owning handle used for mirrored relation entries
#[derive(Clone)]
pub(crate) struct WeakInstance {
    key: InstanceKey,
    inner: Weak<InstanceInner>,
}

impl WeakInstance {
    pub(crate) fn key(&self) -> InstanceKey {
        self.key
    }

    pub(crate) fn upgrade(&self) -> Option<Instance> {
        self.inner.upgrade().map(|inner| Instance { inner })
    }
}

/// Property state captured at the start of a flush
pub(crate) struct FlushSnapshot {
    pub(crate) dirty: Vec<(String, PropertyCell)>,
    pub(crate) operations: Vec<PendingOperation>,
}

impl Instance {
    pub(crate) fn new(session: Session, entity: EntityType, properties: IndexMap<String, PropertyCell>) -> Self {
        Self {
            inner: Arc::new(InstanceInner {
                key: InstanceKey::next(),
                entity,
                session,
                id: OnceLock::new(),
                state: Mutex::new(InstanceState {
                    properties,
                    relations: HashMap::new(),
                }),
                queue: Mutex::new(OperationQueue::default()),
            }),
        }
    }

    pub fn entity(&self) -> &EntityType {
        &self.inner.entity
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn key(&self) -> InstanceKey {
        self.inner.key
    }

    /// Store identifier, once persisted
    pub fn id(&self) -> Option<NodeId> {
        self.inner.id.get().cloned()
    }

    pub fn is_persisted(&self) -> bool {
        self.inner.id.get().is_some()
    }

    /// Store identifier, or `UnknownNode` if the instance was never persisted
    pub fn require_id(&self) -> OgmResult<NodeId> {
        self.id().ok_or(OgmError::UnknownNode)
    }

    pub(crate) fn assign_id(&self, id: NodeId) -> OgmResult<()> {
        self.inner.id.set(id).map_err(|id| {
            OgmError::InvalidOperation(format!("{} already has an identifier, cannot assign {}", self, id))
        })
    }

    /// Whether two handles refer to the same live object
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Same live object, or two objects standing for the same stored vertex
    pub fn same_node(&self, other: &Instance) -> bool {
        self.ptr_eq(other)
            || matches!((self.inner.id.get(), other.inner.id.get()), (Some(a), Some(b)) if a == b)
    }

    pub(crate) fn downgrade(&self) -> WeakInstance {
        WeakInstance {
            key: self.inner.key,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut InstanceState) -> R) -> R {
        f(&mut self.inner.state.lock())
    }

    pub(crate) fn with_queue<R>(&self, f: impl FnOnce(&mut OperationQueue) -> R) -> R {
        f(&mut self.inner.queue.lock())
    }

    fn with_cell<R>(&self, name: &str, f: impl FnOnce(&mut PropertyCell) -> OgmResult<R>) -> OgmResult<R> {
        let mut state = self.inner.state.lock();
        let cell = state
            .properties
            .get_mut(name)
            .ok_or_else(|| self.entity().unknown_property(name))?;
        f(cell)
    }

    /// Current value of a property
    pub fn get(&self, name: &str) -> OgmResult<Value> {
        self.with_cell(name, |cell| Ok(cell.value().clone()))
    }

    /// Snapshot of a property's cell, value and change log
    pub fn cell(&self, name: &str) -> OgmResult<PropertyCell> {
        self.with_cell(name, |cell| Ok(cell.clone()))
    }

    pub fn changes(&self, name: &str) -> OgmResult<Vec<PropertyChange>> {
        self.with_cell(name, |cell| Ok(cell.changes().to_vec()))
    }

    /// Assign a property, logging a replace
    pub fn set(&self, name: &str, value: impl Into<Value>) -> OgmResult<()> {
        let value = value.into();
        let kind = self.entity().property_kind(name)?;
        kind.check(&value)?;
        self.with_cell(name, |cell| {
            cell.set(value);
            Ok(())
        })
    }

    fn delta(&self, name: &str, op: DeltaKind, delta: Value) -> OgmResult<()> {
        let kind = self.entity().property_kind(name)?;
        self.with_cell(name, |cell| {
            kind.check(&cell.preview(op, &delta)?)?;
            cell.apply(op, delta)
        })
    }

    pub fn add(&self, name: &str, delta: impl Into<Value>) -> OgmResult<()> {
        self.delta(name, DeltaKind::Add, delta.into())
    }

    pub fn subtract(&self, name: &str, delta: impl Into<Value>) -> OgmResult<()> {
        self.delta(name, DeltaKind::Subtract, delta.into())
    }

    pub fn multiply(&self, name: &str, factor: impl Into<Value>) -> OgmResult<()> {
        self.delta(name, DeltaKind::Multiply, factor.into())
    }

    /// Current values of every declared property
    pub fn properties(&self) -> PropertyMap {
        self.inner
            .state
            .lock()
            .properties
            .iter()
            .map(|(name, cell)| (name.clone(), cell.value().clone()))
            .collect()
    }

    /// Stored view of this instance, for relation entries that outlive it
    pub(crate) fn snapshot(&self) -> Option<HydratedNode> {
        let id = self.id()?;
        Some(HydratedNode {
            entity: self.entity().clone(),
            id,
            properties: self.properties(),
        })
    }

    /// Whether any property has unwritten changes
    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().properties.values().any(PropertyCell::is_dirty)
    }

    /// Current value of a property as a condition literal
    pub fn field(&self, name: &str) -> OgmResult<Condition> {
        self.with_cell(name, |cell| Ok(Condition::from(&*cell)))
    }

    /// Handle to one of the instance's relations
    pub fn relation(&self, name: &str) -> OgmResult<Relation<'_>> {
        let descriptor = self.entity().relation(name)?;
        Ok(Relation::new(self, descriptor))
    }

    /// Number of edge operations waiting for the next flush
    pub fn pending_operations(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub(crate) fn clear_changes(&self) {
        for cell in self.inner.state.lock().properties.values_mut() {
            cell.clear_changes();
        }
    }

    pub(crate) fn flush_snapshot(&self) -> FlushSnapshot {
        let dirty = self
            .inner
            .state
            .lock()
            .properties
            .iter()
            .filter(|(_, cell)| cell.is_dirty())
            .map(|(name, cell)| (name.clone(), cell.clone()))
            .collect();
        FlushSnapshot {
            dirty,
            operations: self.inner.queue.lock().snapshot(),
        }
    }

    /// Forget what a successful flush wrote, keeping anything recorded since
    pub(crate) fn retire(&self, snapshot: &FlushSnapshot) {
        {
            let mut state = self.inner.state.lock();
            for (name, written) in &snapshot.dirty {
                if let Some(cell) = state.properties.get_mut(name) {
                    cell.drain_changes(written.changes().len());
                }
            }
        }
        let flushed: HashSet<u64> = snapshot.operations.iter().map(PendingOperation::seq).collect();
        self.inner.queue.lock().retire(&flushed);
    }

    pub(crate) fn discard_pending(&self) {
        self.inner.queue.lock().clear();
    }

    /// Replace every property with values read from the store
    pub(crate) fn reset_properties(&self, values: PropertyMap) {
        let mut state = self.inner.state.lock();
        for (name, cell) in state.properties.iter_mut() {
            cell.reset(values.get(name).cloned().unwrap_or(Value::Null));
        }
        for relation in state.relations.values_mut() {
            relation.invalidate();
        }
    }

    /// Insert this instance into the store; see [`Session::create`]
    pub async fn create(&self) -> OgmResult<()> {
        self.session().create(self).await
    }

    /// Flush this instance's changes; see [`Session::bulk_save`]
    pub async fn save(&self) -> OgmResult<()> {
        self.session().bulk_save(std::slice::from_ref(self)).await
    }

    /// Re-read this instance from the store; see [`Session::load`]
    pub async fn load(&self) -> OgmResult<()> {
        self.session().load(self).await
    }

    /// Create-or-update keyed on identifying properties; see [`Session::upsert`]
    pub async fn upsert(&self, identifying: &[&str]) -> OgmResult<()> {
        self.session().upsert(self, identifying).await
    }

    /// Remove this instance's vertex and its edges; see [`Session::delete`]
    pub async fn delete(&self) -> OgmResult<()> {
        self.session().delete(self).await
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.id.get() {
            Some(id) => write!(f, "{}({})", self.entity().name(), id.as_str()),
            None => write!(f, "{}(unsaved)", self.entity().name()),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("entity", &self.entity().name())
            .field("key", &self.inner.key)
            .field("id", &self.inner.id.get())
            .finish()
    }
}
