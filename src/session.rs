//! Session: registry, connection and codec behind one handle
//!
//! A [`Session`] is what entity instances belong to. It registers entity types, creates
//! instances, writes them (create, bulk create, upsert, flush, delete) and reads them
//! back (load, fetch by id or condition, relation traversal). Sessions are cheap to clone
//! and every clone shares the same registry and connection.

use futures::future::try_join_all;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec::{Codec, JsonCodec};
use crate::condition::Condition;
use crate::config::OgmConfig;
use crate::error::{OgmError, OgmResult};
use crate::model::instance::FlushSnapshot;
use crate::model::pending::EdgeAction;
use crate::model::{relation, Instance, PropertyCell};
use crate::query::{decode_properties, hydrate_row, parse_node_id, HydratedNode, QueryTranslator, Statement};
use crate::schema::{EntityType, EntityTypeBuilder, Registry, RelationDescriptor};
use crate::store::{Connection, CursorOptions, RowSet, Store};
use crate::value::{NodeId, PropertyMap, Value};

/// Shared handle to the mapping layer
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    registry: Arc<Registry>,
    connection: Connection,
    codec: Arc<dyn Codec>,
    config: OgmConfig,
}

impl Session {
    /// New session with its own registry and the JSON codec
    pub fn new(config: OgmConfig) -> OgmResult<Self> {
        Self::with_parts(config, Arc::new(Registry::new()), Arc::new(JsonCodec))
    }

    pub fn with_codec(config: OgmConfig, codec: Arc<dyn Codec>) -> OgmResult<Self> {
        Self::with_parts(config, Arc::new(Registry::new()), codec)
    }

    /// Session over an existing registry, e.g. one shared with other sessions
    pub fn with_parts(config: OgmConfig, registry: Arc<Registry>, codec: Arc<dyn Codec>) -> OgmResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                registry,
                connection: Connection::new(config.graph.clone()),
                codec,
                config,
            }),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn codec(&self) -> &dyn Codec {
        self.inner.codec.as_ref()
    }

    pub fn config(&self) -> &OgmConfig {
        &self.inner.config
    }

    pub fn translator(&self) -> QueryTranslator<'_> {
        QueryTranslator::new(self.codec(), self.config())
    }

    pub fn connect(&self, store: Arc<dyn Store>) {
        self.connection().connect(store);
    }

    pub async fn close(&self) -> OgmResult<()> {
        self.connection().close().await
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_connected()
    }

    /// Register an entity type
    ///
    /// When connected (and `ensure_schema` is on) the type's vertex label and properties
    /// are ensured in the store first; if that fails nothing is registered.
    pub async fn register(&self, builder: EntityTypeBuilder) -> OgmResult<EntityType> {
        let entity = self.registry().prepare(builder)?;
        if self.config().ensure_schema && self.is_connected() {
            let statements = self.translator().schema(&entity)?;
            self.connection().pipeline(&statements).await?;
        }
        self.registry().insert(entity)
    }

    /// Ensure every registered type in the store, e.g. after registering offline
    pub async fn sync_schema(&self) -> OgmResult<()> {
        let mut statements = Vec::new();
        for name in self.registry().names() {
            let entity = self.registry().resolve(&name)?;
            statements.extend(self.translator().schema(&entity)?);
        }
        self.connection().pipeline(&statements).await?;
        info!("Synchronized {} node types", self.registry().len());
        Ok(())
    }

    /// New, unsaved instance of a registered type
    ///
    /// Properties left out take their declared default, or null.
    pub fn instantiate<K, V, I>(&self, entity: &EntityType, values: I) -> OgmResult<Instance>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.registry().resolve(entity.name())?;
        let mut supplied: IndexMap<String, Value> =
            values.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        if let Some(unknown) = supplied.keys().find(|name| entity.property(name).is_none()) {
            return Err(entity.unknown_property(unknown));
        }
        let cells = entity
            .properties()
            .iter()
            .map(|property| {
                let value = supplied
                    .shift_remove(&property.name)
                    .unwrap_or_else(|| property.initial_value());
                property.kind.check(&value)?;
                Ok((property.name.clone(), PropertyCell::new(value)))
            })
            .collect::<OgmResult<IndexMap<_, _>>>()?;
        Ok(Instance::new(self.clone(), entity.clone(), cells))
    }

    pub(crate) fn materialize(&self, node: HydratedNode) -> OgmResult<Instance> {
        let cells = node
            .properties
            .into_iter()
            .map(|(name, value)| (name, PropertyCell::new(value)))
            .collect();
        let instance = Instance::new(self.clone(), node.entity, cells);
        instance.assign_id(node.id)?;
        Ok(instance)
    }

    fn first_id(rows: &RowSet) -> OgmResult<NodeId> {
        rows.scalar()
            .map(parse_node_id)
            .unwrap_or_else(|| Err(OgmError::Store("statement returned no identifier".to_string())))
    }

    /// Mark a freshly written instance as persisted
    fn settle(&self, instance: &Instance, id: NodeId) -> OgmResult<()> {
        instance.assign_id(id)?;
        instance.clear_changes();
        relation::queue_staged(instance);
        debug!("Persisted {}", instance);
        Ok(())
    }

    /// Insert an unsaved instance and assign its identifier
    ///
    /// Relation targets added before this call are queued for the next flush.
    pub async fn create(&self, instance: &Instance) -> OgmResult<()> {
        if instance.is_persisted() {
            return Err(OgmError::InvalidOperation(format!("{} is already persisted", instance)));
        }
        let statement = self.translator().create(instance.entity(), &instance.properties())?;
        let cursor = self.connection().cursor(CursorOptions::read_write()).await?;
        let rows = cursor.execute(&statement).await?;
        let id = Self::first_id(&rows)?;
        cursor.commit().await?;
        self.settle(instance, id)
    }

    /// Insert many unsaved instances, one statement per entity type
    ///
    /// Identifiers are assigned in the order the store returns them, which matches the
    /// order of the instances within each type.
    pub async fn bulk_create(&self, instances: &[Instance]) -> OgmResult<()> {
        let mut seen = HashSet::new();
        let mut groups: IndexMap<String, (EntityType, Vec<&Instance>)> = IndexMap::new();
        for instance in instances {
            if instance.is_persisted() {
                return Err(OgmError::InvalidOperation(format!("{} is already persisted", instance)));
            }
            if !seen.insert(instance.key()) {
                return Err(OgmError::InvalidOperation(format!("{} appears twice", instance)));
            }
            groups
                .entry(instance.entity().name().to_string())
                .or_insert_with(|| (instance.entity().clone(), Vec::new()))
                .1
                .push(instance);
        }
        if groups.is_empty() {
            return Ok(());
        }

        let cursor = self.connection().cursor(CursorOptions::read_write()).await?;
        let mut assigned = Vec::with_capacity(instances.len());
        for (entity, members) in groups.values() {
            let rows: Vec<_> = members.iter().map(|i| i.properties()).collect();
            let statement = self.translator().bulk_create(entity, &rows)?;
            let result = cursor.execute(&statement).await?;
            if result.len() != members.len() {
                return Err(OgmError::Store(format!(
                    "bulk create of {} {} returned {} identifiers",
                    members.len(),
                    entity.name(),
                    result.len()
                )));
            }
            for (member, row) in members.iter().zip(&result.rows) {
                let id = row
                    .first()
                    .map(parse_node_id)
                    .unwrap_or_else(|| Err(OgmError::Store("missing identifier column".to_string())))?;
                assigned.push(((*member).clone(), id));
            }
        }
        cursor.commit().await?;

        for (instance, id) in assigned {
            self.settle(&instance, id)?;
        }
        info!("Bulk created {} nodes", instances.len());
        Ok(())
    }

    /// Create-or-update keyed on `identifying` properties
    pub async fn upsert(&self, instance: &Instance, identifying: &[&str]) -> OgmResult<()> {
        let statement = self
            .translator()
            .merge(instance.entity(), &instance.properties(), identifying)?;
        let cursor = self.connection().cursor(CursorOptions::read_write()).await?;
        let rows = cursor.execute(&statement).await?;
        let id = Self::first_id(&rows)?;
        if instance.id().is_some_and(|existing| existing != id) {
            cursor.rollback().await?;
            return Err(OgmError::InvalidOperation(format!(
                "{} would merge into a different node {}",
                instance, id
            )));
        }
        cursor.commit().await?;
        if instance.is_persisted() {
            instance.clear_changes();
            Ok(())
        } else {
            self.settle(instance, id)
        }
    }

    /// Flush property changes and queued edge operations of persisted instances
    ///
    /// All statements run concurrently inside one transaction. On failure the
    /// transaction is rolled back and every change and queued operation is kept, so the
    /// flush can simply be retried.
    pub async fn bulk_save(&self, instances: &[Instance]) -> OgmResult<()> {
        let translator = self.translator();
        let mut seen = HashSet::new();
        let mut flushed: Vec<(Instance, FlushSnapshot)> = Vec::new();
        let mut detaches: Vec<Statement> = Vec::new();
        let mut statements: Vec<Statement> = Vec::new();

        for instance in instances {
            if !seen.insert(instance.key()) {
                continue;
            }
            let id = instance.require_id()?;
            let snapshot = instance.flush_snapshot();
            if let Some(update) = translator.update(&id, &snapshot.dirty)? {
                statements.push(update);
            }
            for op in &snapshot.operations {
                if op.action() == EdgeAction::Clear {
                    let descriptor = instance.entity().relation(op.relation())?;
                    detaches.push(translator.detach(&id, &descriptor.name));
                    if descriptor.bidirectional {
                        detaches.push(translator.detach_incoming(&id, descriptor.inverse_name()));
                    }
                    continue;
                }
                let (source, target) = op.endpoints(instance);
                let source = source.require_id()?;
                let target = target.require_id()?;
                statements.push(match op.action() {
                    EdgeAction::Link => translator.link(&source, &target, op.relation(), op.properties())?,
                    _ => translator.unlink(&source, &target, op.relation()),
                });
            }
            flushed.push((instance.clone(), snapshot));
        }
        let total = detaches.len() + statements.len();
        if total == 0 {
            return Ok(());
        }

        // relations being cleared are detached before any edge is linked
        let cursor = self.connection().cursor(CursorOptions::read_write()).await?;
        let mut outcome = try_join_all(detaches.iter().map(|s| cursor.execute(s))).await;
        if outcome.is_ok() {
            outcome = try_join_all(statements.iter().map(|s| cursor.execute(s))).await;
        }
        if let Err(e) = outcome {
            warn!("Flush of {} statements failed: {}", total, e);
            if let Err(rollback) = cursor.rollback().await {
                warn!("Rollback after failed flush also failed: {}", rollback);
            }
            return Err(e);
        }
        cursor.commit().await?;

        for (instance, snapshot) in &flushed {
            instance.retire(snapshot);
        }
        debug!("Flushed {} statements for {} nodes", total, flushed.len());
        Ok(())
    }

    /// Flush one instance; see [`Session::bulk_save`]
    pub async fn save(&self, instance: &Instance) -> OgmResult<()> {
        self.bulk_save(std::slice::from_ref(instance)).await
    }

    /// Delete an instance's vertex and every edge touching it
    pub async fn delete(&self, instance: &Instance) -> OgmResult<()> {
        let id = instance.require_id()?;
        let statement = self.translator().delete(&id);
        let cursor = self.connection().cursor(CursorOptions::read_write()).await?;
        cursor.execute(&statement).await?;
        cursor.commit().await?;
        instance.discard_pending();
        debug!("Deleted {}", instance);
        Ok(())
    }

    /// Re-read an instance's properties from the store
    ///
    /// Pending edge operations and unsaved property changes are discarded, and relation
    /// lists are fetched again on next access.
    pub async fn load(&self, instance: &Instance) -> OgmResult<()> {
        let id = instance.require_id()?;
        instance.discard_pending();
        let rows = self.read(&self.translator().match_id(&id)).await?;
        let row = rows.rows.first().ok_or(OgmError::NodeNotFound)?;
        let node = hydrate_row(self.registry(), self.codec(), instance.entity(), row)?;
        instance.reset_properties(node.properties);
        Ok(())
    }

    async fn read(&self, statement: &Statement) -> OgmResult<RowSet> {
        let cursor = self.connection().cursor(CursorOptions::read_only()).await?;
        cursor.execute(statement).await
    }

    fn hydrate_all(&self, entity: &EntityType, rows: &RowSet) -> OgmResult<Vec<Instance>> {
        rows.rows
            .iter()
            .map(|row| self.materialize(hydrate_row(self.registry(), self.codec(), entity, row)?))
            .collect()
    }

    /// Fetch one vertex by identifier as an instance of `entity` (or a subtype)
    pub async fn fetch_by_id(&self, entity: &EntityType, id: &NodeId) -> OgmResult<Instance> {
        let rows = self.read(&self.translator().match_id(id)).await?;
        let row = rows.rows.first().ok_or(OgmError::NodeNotFound)?;
        let node = hydrate_row(self.registry(), self.codec(), entity, row)?;
        if !node.entity.is_a(entity) {
            return Err(OgmError::NodeNotFound);
        }
        self.materialize(node)
    }

    /// First vertex of `entity` matching `condition`, or `NodeNotFound`
    pub async fn fetch_one(&self, entity: &EntityType, condition: Option<&Condition>) -> OgmResult<Instance> {
        let statement = self.translator().match_filter(entity, condition, Some(1))?;
        let rows = self.read(&statement).await?;
        self.hydrate_all(entity, &rows)?
            .into_iter()
            .next()
            .ok_or(OgmError::NodeNotFound)
    }

    /// Every vertex of `entity` (subtypes included) matching `condition`
    pub async fn fetch_many(&self, entity: &EntityType, condition: &Condition) -> OgmResult<Vec<Instance>> {
        let statement = self.translator().match_filter(entity, Some(condition), None)?;
        let rows = self.read(&statement).await?;
        self.hydrate_all(entity, &rows)
    }

    /// Every vertex of `entity`, subtypes included
    pub async fn fetch_all(&self, entity: &EntityType) -> OgmResult<Vec<Instance>> {
        let statement = self.translator().match_filter(entity, None, None)?;
        let rows = self.read(&statement).await?;
        self.hydrate_all(entity, &rows)
    }

    /// Targets of one relation of a stored vertex
    pub(crate) async fn fetch_relation(
        &self,
        source: &NodeId,
        descriptor: &RelationDescriptor,
    ) -> OgmResult<Vec<(HydratedNode, Option<PropertyMap>)>> {
        let target_type = self.registry().relation_target(descriptor)?;
        let rows = self.read(&self.translator().traverse(source, descriptor)).await?;
        let mut edges = Vec::with_capacity(rows.len());
        for row in &rows.rows {
            let node = hydrate_row(self.registry(), self.codec(), &target_type, row)?;
            let properties = match (&descriptor.edge_properties, row.get(3)) {
                (Some(declared), Some(wire)) => Some(decode_properties(self.codec(), declared, wire)?),
                (Some(declared), None) => Some(declared.iter().map(|p| (p.name.clone(), Value::Null)).collect()),
                (None, _) => None,
            };
            edges.push((node, properties));
        }
        debug!("Fetched {} targets of {}", edges.len(), descriptor.name);
        Ok(edges)
    }

    /// Run a raw statement in its own transaction
    pub async fn execute(&self, statement: &Statement) -> OgmResult<RowSet> {
        self.connection().execute(statement).await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("connection", &self.inner.connection)
            .finish()
    }
}
