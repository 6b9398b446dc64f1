//! MemoryStore: in-process graph store
//!
//! Executes the statement dialect the mapping layer emits against plain in-memory
//! graphs. Vertex labels form an inheritance tree, so matching a label also matches
//! its sub-labels. Transactions snapshot the graph on `begin` and restore it on
//! `rollback`. Every executed statement is recorded, which tests use to count round
//! trips; failures can be injected by statement text.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Map;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::parser::{
    parse_statement, Action, BinaryOp, Command, EdgePattern, Expr, Function, FunctionCall, NodePattern,
    PathPattern,
};
use super::{RowSet, Store};
use crate::codec::NULL_SENTINEL;
use crate::error::{OgmError, OgmResult};
use crate::query::{Params, Statement, WireValue};
use crate::schema::ScalarKind;

type Properties = Map<String, WireValue>;

#[derive(Debug, Clone, Default)]
struct VertexLabel {
    parent: Option<String>,
    /// Declared property type and store-side default
    properties: IndexMap<String, (ScalarKind, Option<WireValue>)>,
}

#[derive(Debug, Clone)]
struct Vertex {
    label: String,
    properties: Properties,
}

#[derive(Debug, Clone)]
struct Edge {
    source: u64,
    target: u64,
    label: String,
    properties: Properties,
}

/// One named graph
#[derive(Debug, Clone, Default)]
struct MemoryGraph {
    labels: IndexMap<String, VertexLabel>,
    vertices: BTreeMap<u64, Vertex>,
    edges: BTreeMap<u64, Edge>,
    next_id: u64,
}

/// What a pattern variable is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Vertex(u64),
    Edge(u64),
}

type Binding = HashMap<String, Bound>;

impl MemoryGraph {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_label(&mut self, label: &str) {
        if !self.labels.contains_key(label) {
            self.labels.insert(label.to_string(), VertexLabel::default());
        }
    }

    /// `label` and its ancestors, nearest first
    fn lineage(&self, label: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(label.to_string());
        while let Some(name) = current {
            if chain.contains(&name) {
                break;
            }
            current = self.labels.get(&name).and_then(|l| l.parent.clone());
            chain.push(name);
        }
        chain
    }

    fn is_a(&self, label: &str, ancestor: &str) -> bool {
        self.lineage(label).iter().any(|l| l == ancestor)
    }

    fn declared(&self, label: &str) -> Vec<(String, Option<WireValue>)> {
        let mut declared = Vec::new();
        for name in self.lineage(label).iter().rev() {
            if let Some(vlabel) = self.labels.get(name) {
                for (property, (_, default)) in &vlabel.properties {
                    declared.push((property.clone(), default.clone()));
                }
            }
        }
        declared
    }

    fn create_vertex(&mut self, label: &str, properties: Properties) -> u64 {
        self.ensure_label(label);
        let mut stored: Properties = properties.into_iter().filter(|(_, v)| !v.is_null()).collect();
        for (name, default) in self.declared(label) {
            if let Some(default) = default {
                stored.entry(name).or_insert(default);
            }
        }
        let id = self.allocate();
        self.vertices.insert(
            id,
            Vertex {
                label: label.to_string(),
                properties: stored,
            },
        );
        id
    }

    fn vertex(&self, id: u64) -> OgmResult<&Vertex> {
        self.vertices
            .get(&id)
            .ok_or_else(|| OgmError::Store(format!("vertex {} does not exist", id)))
    }

    /// Stored properties plus the null marker for declared properties without a value
    fn vertex_properties(&self, id: u64) -> OgmResult<WireValue> {
        let vertex = self.vertex(id)?;
        let mut properties = vertex.properties.clone();
        for (name, _) in self.declared(&vertex.label) {
            properties
                .entry(name)
                .or_insert_with(|| WireValue::String(NULL_SENTINEL.to_string()));
        }
        Ok(WireValue::Object(properties))
    }

    fn matches_node(&self, id: u64, pattern: &NodePattern, params: &Params) -> OgmResult<bool> {
        let vertex = self.vertex(id)?;
        if let Some(label) = &pattern.label {
            if !self.is_a(&vertex.label, label) {
                return Ok(false);
            }
        }
        for (name, param) in &pattern.properties {
            if vertex.properties.get(name) != Some(lookup(params, param)?) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn candidates(&self, pattern: &PathPattern, params: &Params) -> OgmResult<Vec<Binding>> {
        let mut found = Vec::new();
        match &pattern.hop {
            None => {
                for &id in self.vertices.keys() {
                    if self.matches_node(id, &pattern.start, params)? {
                        found.push(Binding::from([(pattern.start.variable.clone(), Bound::Vertex(id))]));
                    }
                }
            }
            Some((edge, end)) => {
                for (&edge_id, stored) in &self.edges {
                    if stored.label == edge.label
                        && self.matches_node(stored.source, &pattern.start, params)?
                        && self.matches_node(stored.target, end, params)?
                    {
                        found.push(Binding::from([
                            (pattern.start.variable.clone(), Bound::Vertex(stored.source)),
                            (edge.variable.clone(), Bound::Edge(edge_id)),
                            (end.variable.clone(), Bound::Vertex(stored.target)),
                        ]));
                    }
                }
            }
        }
        Ok(found)
    }

    /// Cartesian product of every pattern's matches, filtered by `filter`
    fn bindings(&self, patterns: &[PathPattern], filter: Option<&Expr>, params: &Params) -> OgmResult<Vec<Binding>> {
        let mut bindings = vec![Binding::new()];
        for pattern in patterns {
            let candidates = self.candidates(pattern, params)?;
            let mut next = Vec::with_capacity(bindings.len() * candidates.len());
            for binding in &bindings {
                for candidate in &candidates {
                    let mut combined = binding.clone();
                    combined.extend(candidate.iter().map(|(k, v)| (k.clone(), *v)));
                    next.push(combined);
                }
            }
            bindings = next;
        }
        match filter {
            None => Ok(bindings),
            Some(filter) => {
                let mut kept = Vec::new();
                for binding in bindings {
                    if truthy(&self.eval(filter, &binding, params)?) {
                        kept.push(binding);
                    }
                }
                Ok(kept)
            }
        }
    }

    fn bound(binding: &Binding, variable: &str) -> OgmResult<Bound> {
        binding
            .get(variable)
            .copied()
            .ok_or_else(|| OgmError::Store(format!("variable {} is not defined", variable)))
    }

    fn bound_vertex(binding: &Binding, variable: &str) -> OgmResult<u64> {
        match Self::bound(binding, variable)? {
            Bound::Vertex(id) => Ok(id),
            Bound::Edge(_) => Err(OgmError::Store(format!("{} is not a vertex", variable))),
        }
    }

    fn call(&self, call: &FunctionCall, binding: &Binding) -> OgmResult<WireValue> {
        match (call.function, Self::bound(binding, &call.variable)?) {
            (Function::Id, Bound::Vertex(id)) | (Function::Id, Bound::Edge(id)) => {
                Ok(WireValue::String(id.to_string()))
            }
            (Function::Labels, Bound::Vertex(id)) => {
                Ok(WireValue::Array(vec![WireValue::String(self.vertex(id)?.label.clone())]))
            }
            (Function::Labels, Bound::Edge(id)) => Ok(WireValue::Array(vec![WireValue::String(
                self.edge(id)?.label.clone(),
            )])),
            (Function::Properties, Bound::Vertex(id)) => self.vertex_properties(id),
            (Function::Properties, Bound::Edge(id)) => Ok(WireValue::Object(self.edge(id)?.properties.clone())),
        }
    }

    fn edge(&self, id: u64) -> OgmResult<&Edge> {
        self.edges
            .get(&id)
            .ok_or_else(|| OgmError::Store(format!("edge {} does not exist", id)))
    }

    fn eval(&self, expr: &Expr, binding: &Binding, params: &Params) -> OgmResult<WireValue> {
        match expr {
            Expr::Param(name) => lookup(params, name).cloned(),
            Expr::Integer(i) => Ok(WireValue::from(*i)),
            Expr::Property { variable, name } => {
                let properties = match Self::bound(binding, variable)? {
                    Bound::Vertex(id) => &self.vertex(id)?.properties,
                    Bound::Edge(id) => &self.edge(id)?.properties,
                };
                Ok(properties.get(name).cloned().unwrap_or(WireValue::Null))
            }
            Expr::Call(call) => self.call(call, binding),
            Expr::Not(inner) => Ok(match self.eval(inner, binding, params)? {
                WireValue::Bool(b) => WireValue::Bool(!b),
                _ => WireValue::Null,
            }),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, binding, params)?;
                let right = self.eval(right, binding, params)?;
                binary(*op, &left, &right)
            }
        }
    }
}

fn lookup<'a>(params: &'a Params, name: &str) -> OgmResult<&'a WireValue> {
    params
        .get(name)
        .ok_or_else(|| OgmError::Store(format!("parameter ${} is not bound", name)))
}

fn truthy(value: &WireValue) -> bool {
    matches!(value, WireValue::Bool(true))
}

fn compare(left: &WireValue, right: &WireValue) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (WireValue::Number(a), WireValue::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (WireValue::String(a), WireValue::String(b)) => Some(a.cmp(b)),
        (WireValue::Bool(a), WireValue::Bool(b)) => Some(a.cmp(b)),
        (a, b) if a == b && !a.is_null() => Some(std::cmp::Ordering::Equal),
        _ => None,
    }
}

fn arithmetic(op: BinaryOp, left: &WireValue, right: &WireValue) -> OgmResult<WireValue> {
    let (WireValue::Number(a), WireValue::Number(b)) = (left, right) else {
        return match (op, left, right) {
            (BinaryOp::Add, WireValue::String(a), WireValue::String(b)) => {
                Ok(WireValue::String(format!("{}{}", a, b)))
            }
            (_, WireValue::Null, _) | (_, _, WireValue::Null) => Ok(WireValue::Null),
            _ => Err(OgmError::Store(format!(
                "cannot apply {:?} to {} and {}",
                op, left, right
            ))),
        };
    };
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            _ => a.checked_mul(b),
        };
        return result
            .map(WireValue::from)
            .ok_or_else(|| OgmError::Store("integer overflow".to_string()));
    }
    let (a, b) = match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(OgmError::Store("non-numeric operand".to_string())),
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        _ => a * b,
    };
    serde_json::Number::from_f64(result)
        .map(WireValue::Number)
        .ok_or_else(|| OgmError::Store(format!("non-finite result {}", result)))
}

fn binary(op: BinaryOp, left: &WireValue, right: &WireValue) -> OgmResult<WireValue> {
    use std::cmp::Ordering::*;
    let logical = |l: &WireValue, r: &WireValue, f: fn(bool, bool) -> bool| match (l, r) {
        (WireValue::Bool(a), WireValue::Bool(b)) => WireValue::Bool(f(*a, *b)),
        _ => WireValue::Null,
    };
    let ordered = |accept: fn(std::cmp::Ordering) -> bool| match compare(left, right) {
        Some(ordering) => WireValue::Bool(accept(ordering)),
        None => WireValue::Null,
    };
    Ok(match op {
        BinaryOp::Or => logical(left, right, |a, b| a || b),
        BinaryOp::Xor => logical(left, right, |a, b| a ^ b),
        BinaryOp::And => logical(left, right, |a, b| a && b),
        BinaryOp::Eq => ordered(|o| o == Equal),
        BinaryOp::Ne => ordered(|o| o != Equal),
        BinaryOp::Lt => ordered(|o| o == Less),
        BinaryOp::Le => ordered(|o| o != Greater),
        BinaryOp::Gt => ordered(|o| o == Greater),
        BinaryOp::Ge => ordered(|o| o != Less),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => return arithmetic(op, left, right),
    })
}

fn object(value: &WireValue, what: &str) -> OgmResult<Properties> {
    match value {
        WireValue::Object(map) => Ok(map.iter().filter(|(_, v)| !v.is_null()).map(|(k, v)| (k.clone(), v.clone())).collect()),
        WireValue::Null => Ok(Properties::new()),
        other => Err(OgmError::Store(format!("{} must be a map, got {}", what, other))),
    }
}

fn node_label(node: &NodePattern) -> OgmResult<&str> {
    node.label
        .as_deref()
        .ok_or_else(|| OgmError::Store(format!("({}) needs a label", node.variable)))
}

#[derive(Default)]
struct MemoryState {
    graphs: HashMap<String, MemoryGraph>,
    /// Graph contents at `begin`, per graph with an open transaction
    snapshots: HashMap<String, MemoryGraph>,
    executed: Vec<Statement>,
    failures: Vec<String>,
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every statement executed so far, in order
    pub fn executed(&self) -> Vec<Statement> {
        self.state.lock().executed.clone()
    }

    pub fn statement_count(&self) -> usize {
        self.state.lock().executed.len()
    }

    /// Make every statement whose text contains `pattern` fail
    pub fn fail_when(&self, pattern: impl Into<String>) {
        self.state.lock().failures.push(pattern.into());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    pub fn vertex_count(&self, graph: &str) -> usize {
        self.state.lock().graphs.get(graph).map_or(0, |g| g.vertices.len())
    }

    pub fn edge_count(&self, graph: &str) -> usize {
        self.state.lock().graphs.get(graph).map_or(0, |g| g.edges.len())
    }

    /// Whether a vertex label has been declared or used
    pub fn has_label(&self, graph: &str, label: &str) -> bool {
        self.state
            .lock()
            .graphs
            .get(graph)
            .is_some_and(|g| g.labels.contains_key(label))
    }

    fn run(graph: &mut MemoryGraph, command: Command, params: &Params) -> OgmResult<RowSet> {
        match command {
            Command::CreateLabel { label, parent } => {
                if let Some(parent) = &parent {
                    graph.ensure_label(parent);
                }
                let entry = graph.labels.entry(label).or_default();
                if entry.parent.is_none() {
                    entry.parent = parent;
                }
                Ok(RowSet::default())
            }
            Command::CreateProperty {
                label,
                property,
                kind,
                default,
            } => {
                let default = default.map(|name| lookup(params, &name).cloned()).transpose()?;
                graph
                    .labels
                    .entry(label)
                    .or_default()
                    .properties
                    .entry(property)
                    .or_insert((kind, default));
                Ok(RowSet::default())
            }
            Command::Create { node, returns } => {
                let mut properties = Properties::new();
                for (name, param) in &node.properties {
                    properties.insert(name.clone(), lookup(params, param)?.clone());
                }
                let id = graph.create_vertex(node_label(&node)?, properties);
                Self::project(graph, &returns, &[Binding::from([(node.variable, Bound::Vertex(id))])], None)
            }
            Command::UnwindCreate { rows, node, returns } => {
                let label = node_label(&node)?.to_string();
                let items = match lookup(params, &rows)? {
                    WireValue::Array(items) => items.clone(),
                    other => return Err(OgmError::Store(format!("UNWIND expects a list, got {}", other))),
                };
                let mut bindings = Vec::with_capacity(items.len());
                for item in &items {
                    let id = graph.create_vertex(&label, object(item, "UNWIND row")?);
                    bindings.push(Binding::from([(node.variable.clone(), Bound::Vertex(id))]));
                }
                Self::project(graph, &returns, &bindings, None)
            }
            Command::Merge {
                node,
                properties,
                returns,
            } => {
                let label = node_label(&node)?.to_string();
                let replacement = object(lookup(params, &properties)?, "MERGE properties")?;
                let mut existing = None;
                for &id in graph.vertices.keys() {
                    if graph.matches_node(id, &node, params)? {
                        existing = Some(id);
                        break;
                    }
                }
                let id = match existing {
                    Some(id) => {
                        if let Some(vertex) = graph.vertices.get_mut(&id) {
                            vertex.properties = replacement;
                        }
                        id
                    }
                    None => {
                        let mut created = replacement;
                        for (name, param) in &node.properties {
                            created.insert(name.clone(), lookup(params, param)?.clone());
                        }
                        graph.create_vertex(&label, created)
                    }
                };
                Self::project(graph, &returns, &[Binding::from([(node.variable, Bound::Vertex(id))])], None)
            }
            Command::Match {
                patterns,
                filter,
                action,
            } => {
                let bindings = graph.bindings(&patterns, filter.as_ref(), params)?;
                Self::apply(graph, action, &bindings, params)
            }
        }
    }

    fn apply(graph: &mut MemoryGraph, action: Action, bindings: &[Binding], params: &Params) -> OgmResult<RowSet> {
        match action {
            Action::Return { items, limit } => Self::project(graph, &items, bindings, limit),
            Action::Set(assignments) => {
                for binding in bindings {
                    let mut updates = Vec::with_capacity(assignments.len());
                    for assignment in &assignments {
                        let id = MemoryGraph::bound_vertex(binding, &assignment.variable)?;
                        let value = graph.eval(&assignment.value, binding, params)?;
                        updates.push((id, assignment.property.clone(), value));
                    }
                    for (id, property, value) in updates {
                        if let Some(vertex) = graph.vertices.get_mut(&id) {
                            if value.is_null() {
                                vertex.properties.remove(&property);
                            } else {
                                vertex.properties.insert(property, value);
                            }
                        }
                    }
                }
                Ok(RowSet::default())
            }
            Action::DetachDelete(variable) => {
                for binding in bindings {
                    let id = MemoryGraph::bound_vertex(binding, &variable)?;
                    graph.vertices.remove(&id);
                    graph.edges.retain(|_, e| e.source != id && e.target != id);
                }
                Ok(RowSet::default())
            }
            Action::Delete(variable) => {
                for binding in bindings {
                    match MemoryGraph::bound(binding, &variable)? {
                        Bound::Edge(id) => {
                            graph.edges.remove(&id);
                        }
                        Bound::Vertex(id) => {
                            if graph.edges.values().any(|e| e.source == id || e.target == id) {
                                return Err(OgmError::Store(format!(
                                    "vertex {} still has edges, use DETACH DELETE",
                                    id
                                )));
                            }
                            graph.vertices.remove(&id);
                        }
                    }
                }
                Ok(RowSet::default())
            }
            Action::MergeEdge {
                source,
                edge,
                target,
                properties,
            } => {
                let bag = object(lookup(params, &properties)?, "edge properties")?;
                for binding in bindings {
                    let s = MemoryGraph::bound_vertex(binding, &source)?;
                    let t = MemoryGraph::bound_vertex(binding, &target)?;
                    Self::merge_edge(graph, s, t, &edge, bag.clone());
                }
                Ok(RowSet::default())
            }
        }
    }

    fn merge_edge(graph: &mut MemoryGraph, source: u64, target: u64, edge: &EdgePattern, properties: Properties) {
        let existing = graph
            .edges
            .iter()
            .find(|(_, e)| e.source == source && e.target == target && e.label == edge.label)
            .map(|(id, _)| *id);
        match existing.and_then(|id| graph.edges.get_mut(&id)) {
            Some(stored) => stored.properties = properties,
            None => {
                let id = graph.allocate();
                graph.edges.insert(
                    id,
                    Edge {
                        source,
                        target,
                        label: edge.label.clone(),
                        properties,
                    },
                );
            }
        }
    }

    fn project(
        graph: &MemoryGraph,
        items: &[FunctionCall],
        bindings: &[Binding],
        limit: Option<usize>,
    ) -> OgmResult<RowSet> {
        let mut rows = RowSet::new(items.iter().map(|i| i.column.clone()).collect());
        for binding in bindings.iter().take(limit.unwrap_or(usize::MAX)) {
            let row = items
                .iter()
                .map(|item| graph.call(item, binding))
                .collect::<OgmResult<Vec<_>>>()?;
            rows.rows.push(row);
        }
        Ok(rows)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn execute(&self, graph: &str, statement: &Statement) -> OgmResult<RowSet> {
        let mut state = self.state.lock();
        state.executed.push(statement.clone());
        if let Some(pattern) = state.failures.iter().find(|p| statement.text.contains(p.as_str())) {
            return Err(OgmError::Store(format!("injected failure on {:?}", pattern)));
        }
        let command = parse_statement(&statement.text)?;
        debug!("Memory store executing {:?}", command);
        let target = state.graphs.entry(graph.to_string()).or_default();
        Self::run(target, command, &statement.params)
    }

    async fn begin(&self, graph: &str) -> OgmResult<()> {
        let mut state = self.state.lock();
        if state.snapshots.contains_key(graph) {
            return Err(OgmError::Store(format!("transaction already open on {}", graph)));
        }
        let snapshot = state.graphs.get(graph).cloned().unwrap_or_default();
        state.snapshots.insert(graph.to_string(), snapshot);
        Ok(())
    }

    async fn commit(&self, graph: &str) -> OgmResult<()> {
        self.state.lock().snapshots.remove(graph);
        Ok(())
    }

    async fn rollback(&self, graph: &str) -> OgmResult<()> {
        let mut state = self.state.lock();
        if let Some(snapshot) = state.snapshots.remove(graph) {
            info!("Rolled back transaction on {}", graph);
            state.graphs.insert(graph.to_string(), snapshot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn statement(text: &str, params: &[(&str, WireValue)]) -> Statement {
        params
            .iter()
            .fold(Statement::new(text), |s, (k, v)| s.with_param(*k, v.clone()))
    }

    #[tokio::test]
    async fn test_create_and_match() {
        let store = MemoryStore::new();
        let created = store
            .execute(
                "g",
                &statement(
                    "CREATE (n:Person {name: $p0, age: $p1}) RETURN id(n)",
                    &[("p0", json!("Nana")), ("p1", json!(3))],
                ),
            )
            .await
            .unwrap();
        let id = created.scalar().cloned().unwrap();

        let rows = store
            .execute(
                "g",
                &statement(
                    "MATCH (n:Person) WHERE (n.name = $p0) AND (n.age > $p1) RETURN id(n), labels(n), properties(n)",
                    &[("p0", json!("Nana")), ("p1", json!(2))],
                ),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.rows[0][0], id);
        assert_eq!(rows.rows[0][1], json!(["Person"]));
        assert_eq!(rows.rows[0][2], json!({"name": "Nana", "age": 3}));
    }

    #[tokio::test]
    async fn test_declared_properties_and_inheritance() {
        let store = MemoryStore::new();
        for text in [
            "CREATE VLABEL IF NOT EXISTS Person",
            "CREATE VLABEL IF NOT EXISTS Employee INHERITS Person",
            "CREATE PROPERTY IF NOT EXISTS Person.name STRING",
        ] {
            store.execute("g", &Statement::new(text)).await.unwrap();
        }
        store
            .execute(
                "g",
                &statement(
                    "CREATE PROPERTY IF NOT EXISTS Person.married BOOLEAN DEFAULT $p0",
                    &[("p0", json!(false))],
                ),
            )
            .await
            .unwrap();
        store
            .execute("g", &Statement::new("CREATE (n:Employee) RETURN id(n)"))
            .await
            .unwrap();

        let rows = store
            .execute("g", &Statement::new("MATCH (n:Person) RETURN labels(n), properties(n)"))
            .await
            .unwrap();
        assert_eq!(rows.rows[0][0], json!(["Employee"]));
        assert_eq!(rows.rows[0][1], json!({"married": false, "name": NULL_SENTINEL}));
    }

    #[tokio::test]
    async fn test_update_expression() {
        let store = MemoryStore::new();
        let id = store
            .execute("g", &statement("CREATE (n:C {v: $p0}) RETURN id(n)", &[("p0", json!(5))]))
            .await
            .unwrap()
            .scalar()
            .cloned()
            .unwrap();
        store
            .execute(
                "g",
                &statement(
                    "MATCH (n) WHERE id(n) = $p0 SET n.v = (n.v + $p1) * $p2",
                    &[("p0", id.clone()), ("p1", json!(10)), ("p2", json!(2))],
                ),
            )
            .await
            .unwrap();
        let rows = store
            .execute(
                "g",
                &statement("MATCH (n) WHERE id(n) = $p0 RETURN properties(n)", &[("p0", id)]),
            )
            .await
            .unwrap();
        assert_eq!(rows.rows[0][0], json!({"v": 30}));
    }

    #[tokio::test]
    async fn test_edges() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let rows = store
                .execute("g", &Statement::new("CREATE (n:P) RETURN id(n)"))
                .await
                .unwrap();
            ids.push(rows.scalar().cloned().unwrap());
        }
        let link = statement(
            "MATCH (s), (t) WHERE id(s) = $p0 AND id(t) = $p1 MERGE (s)-[r:knows]->(t) SET r = $p2",
            &[("p0", ids[0].clone()), ("p1", ids[1].clone()), ("p2", json!({"w": 1}))],
        );
        store.execute("g", &link).await.unwrap();
        store.execute("g", &link).await.unwrap();
        assert_eq!(store.edge_count("g"), 1);

        let rows = store
            .execute(
                "g",
                &statement(
                    "MATCH (s)-[r:knows]->(t) WHERE id(s) = $p0 RETURN id(t), properties(r)",
                    &[("p0", ids[0].clone())],
                ),
            )
            .await
            .unwrap();
        assert_eq!(rows.rows, vec![vec![ids[1].clone(), json!({"w": 1})]]);

        store
            .execute(
                "g",
                &statement(
                    "MATCH (s)-[r:knows]->(t) WHERE id(s) = $p0 AND id(t) = $p1 DELETE r",
                    &[("p0", ids[0].clone()), ("p1", ids[1].clone())],
                ),
            )
            .await
            .unwrap();
        assert_eq!(store.edge_count("g"), 0);
    }

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let store = MemoryStore::new();
        store.begin("g").await.unwrap();
        store
            .execute("g", &Statement::new("CREATE (n:P) RETURN id(n)"))
            .await
            .unwrap();
        assert_eq!(store.vertex_count("g"), 1);
        store.rollback("g").await.unwrap();
        assert_eq!(store.vertex_count("g"), 0);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail_when("DETACH DELETE");
        let result = store
            .execute(
                "g",
                &statement("MATCH (n) WHERE id(n) = $p0 DETACH DELETE n", &[("p0", json!("1"))]),
            )
            .await;
        assert!(matches!(result, Err(OgmError::Store(_))));
        assert_eq!(store.statement_count(), 1);
    }
}
