//! Statement assembly
//!
//! Builds complete parameterized statements from schema metadata, compiled conditions
//! and edge specs. Type, property and relation names are rendered as labels (validated
//! at registration); every value crosses the boundary as a bound parameter.

use crate::codec::Codec;
use crate::condition::Condition;
use crate::config::OgmConfig;
use crate::error::{OgmError, OgmResult};
use crate::model::PropertyCell;
use crate::query::statement::{ParamBinder, Statement};
use crate::schema::{EntityType, RelationDescriptor};
use crate::value::{NodeId, PropertyMap};

pub struct QueryTranslator<'a> {
    codec: &'a dyn Codec,
    variable: &'a str,
    prefix: &'a str,
}

impl<'a> QueryTranslator<'a> {
    pub fn new(codec: &'a dyn Codec, config: &'a OgmConfig) -> Self {
        Self {
            codec,
            variable: &config.node_variable,
            prefix: &config.parameter_prefix,
        }
    }

    fn binder(&self) -> ParamBinder<'a> {
        ParamBinder::new(self.codec, self.prefix)
    }

    /// Idempotent "ensure vertex type" statement
    pub fn ensure_vertex_type(&self, entity: &EntityType) -> Statement {
        match entity.supertype() {
            Some(supertype) => Statement::new(format!(
                "CREATE VLABEL IF NOT EXISTS {} INHERITS {}",
                entity.name(),
                supertype.name()
            )),
            None => Statement::new(format!("CREATE VLABEL IF NOT EXISTS {}", entity.name())),
        }
    }

    /// Idempotent "ensure property" statements for the type's own properties
    pub fn ensure_properties(&self, entity: &EntityType) -> OgmResult<Vec<Statement>> {
        entity
            .declared_properties()
            .iter()
            .map(|property| {
                let mut binder = self.binder();
                let mut text = format!(
                    "CREATE PROPERTY IF NOT EXISTS {}.{} {}",
                    entity.name(),
                    property.name,
                    property.kind.store_type()
                );
                if let Some(default) = &property.default {
                    let placeholder = binder.bind(default)?;
                    text.push_str(&format!(" DEFAULT {}", placeholder));
                }
                Ok(binder.finish(text))
            })
            .collect()
    }

    /// Every statement needed to make the store aware of an entity type
    pub fn schema(&self, entity: &EntityType) -> OgmResult<Vec<Statement>> {
        let mut statements = vec![self.ensure_vertex_type(entity)];
        statements.extend(self.ensure_properties(entity)?);
        Ok(statements)
    }

    /// Inline property bag of placeholders, skipping null values
    fn inline_bag(&self, binder: &mut ParamBinder<'_>, properties: &PropertyMap) -> OgmResult<String> {
        let mut entries = Vec::new();
        for (name, value) in properties.iter().filter(|(_, v)| !v.is_null()) {
            entries.push(format!("{}: {}", name, binder.bind(value)?));
        }
        Ok(if entries.is_empty() {
            String::new()
        } else {
            format!(" {{{}}}", entries.join(", "))
        })
    }

    fn non_null(properties: &PropertyMap) -> PropertyMap {
        properties
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// `CREATE` with all non-null properties, returning the new identifier
    pub fn create(&self, entity: &EntityType, properties: &PropertyMap) -> OgmResult<Statement> {
        let mut binder = self.binder();
        let bag = self.inline_bag(&mut binder, properties)?;
        let v = self.variable;
        Ok(binder.finish(format!(
            "CREATE ({}:{}{}) RETURN id({})",
            v,
            entity.name(),
            bag,
            v
        )))
    }

    /// One statement creating a vertex per row; identifiers stream back in row order
    pub fn bulk_create(&self, entity: &EntityType, rows: &[PropertyMap]) -> OgmResult<Statement> {
        let mut binder = self.binder();
        let encoded = rows
            .iter()
            .map(|row| self.codec.encode_bag(&Self::non_null(row)))
            .collect::<OgmResult<Vec<_>>>()?;
        let placeholder = binder.bind_wire(serde_json::Value::Array(encoded));
        let v = self.variable;
        Ok(binder.finish(format!(
            "UNWIND {} AS row CREATE ({}:{}) SET {} = row RETURN id({})",
            placeholder,
            v,
            entity.name(),
            v,
            v
        )))
    }

    /// Upsert matching on the identifying properties, replacing the whole property bag
    pub fn merge(
        &self,
        entity: &EntityType,
        properties: &PropertyMap,
        identifying: &[&str],
    ) -> OgmResult<Statement> {
        if identifying.is_empty() {
            return Err(OgmError::InvalidOperation(
                "merge needs at least one identifying property".to_string(),
            ));
        }
        let mut key = PropertyMap::new();
        for name in identifying {
            entity.property_kind(name)?;
            let value = properties
                .get(*name)
                .filter(|v| !v.is_null())
                .ok_or_else(|| {
                    OgmError::InvalidOperation(format!("identifying property {} is null", name))
                })?;
            key.insert((*name).to_string(), value.clone());
        }

        let mut binder = self.binder();
        let key_bag = self.inline_bag(&mut binder, &key)?;
        let full = binder.bind_bag(&Self::non_null(properties))?;
        let v = self.variable;
        Ok(binder.finish(format!(
            "MERGE ({}:{}{}) SET {} = {} RETURN id({})",
            v,
            entity.name(),
            key_bag,
            v,
            full,
            v
        )))
    }

    /// One update covering every dirty property; `None` when nothing changed
    ///
    /// A property whose log holds a replace is written whole; otherwise its deltas are
    /// folded into a single server-side expression over the stored value.
    pub fn update(&self, id: &NodeId, dirty: &[(String, PropertyCell)]) -> OgmResult<Option<Statement>> {
        let dirty: Vec<_> = dirty.iter().filter(|(_, cell)| cell.is_dirty()).collect();
        if dirty.is_empty() {
            return Ok(None);
        }

        let mut binder = self.binder();
        let v = self.variable;
        let id_placeholder = binder.bind_id(id);
        let mut assignments = Vec::with_capacity(dirty.len());
        for (name, cell) in dirty {
            let target = format!("{}.{}", v, name);
            let expression = if cell.needs_replace() {
                binder.bind(cell.value())?
            } else {
                let mut expression = target.clone();
                for (i, change) in cell.changes().iter().enumerate() {
                    if let Some((op, delta)) = change.delta() {
                        let placeholder = binder.bind(delta)?;
                        expression = if i == 0 {
                            format!("{} {} {}", expression, op, placeholder)
                        } else {
                            format!("({}) {} {}", expression, op, placeholder)
                        };
                    }
                }
                expression
            };
            assignments.push(format!("{} = {}", target, expression));
        }

        Ok(Some(binder.finish(format!(
            "MATCH ({}) WHERE id({}) = {} SET {}",
            v,
            v,
            id_placeholder,
            assignments.join(", ")
        ))))
    }

    pub fn delete(&self, id: &NodeId) -> Statement {
        let mut binder = self.binder();
        let v = self.variable;
        let placeholder = binder.bind_id(id);
        binder.finish(format!(
            "MATCH ({}) WHERE id({}) = {} DETACH DELETE {}",
            v, v, placeholder, v
        ))
    }

    fn return_node(&self) -> String {
        let v = self.variable;
        format!("RETURN id({}), labels({}), properties({})", v, v, v)
    }

    /// Whole rows of one type (subtypes included), optionally filtered and limited
    pub fn match_filter(
        &self,
        entity: &EntityType,
        condition: Option<&Condition>,
        limit: Option<usize>,
    ) -> OgmResult<Statement> {
        let mut binder = self.binder();
        let v = self.variable;
        let mut text = format!("MATCH ({}:{})", v, entity.name());
        if let Some(condition) = condition {
            // property leaves are rendered as labels, so only declared names get through
            for name in condition.referenced_properties() {
                entity.property_kind(name)?;
            }
            let compiled = condition.compile_with(v, self.prefix, binder.next_index());
            let fragment = binder.absorb(compiled)?;
            text.push_str(&format!(" WHERE {}", fragment));
        }
        text.push(' ');
        text.push_str(&self.return_node());
        if let Some(limit) = limit {
            text.push_str(&format!(" LIMIT {}", limit));
        }
        Ok(binder.finish(text))
    }

    pub fn match_id(&self, id: &NodeId) -> Statement {
        let mut binder = self.binder();
        let v = self.variable;
        let placeholder = binder.bind_id(id);
        binder.finish(format!(
            "MATCH ({}) WHERE id({}) = {} {}",
            v,
            v,
            placeholder,
            self.return_node()
        ))
    }

    /// Idempotent edge creation; re-running it replaces the edge's property bag
    pub fn link(
        &self,
        source: &NodeId,
        target: &NodeId,
        relation: &str,
        properties: Option<&PropertyMap>,
    ) -> OgmResult<Statement> {
        let mut binder = self.binder();
        let s = binder.bind_id(source);
        let t = binder.bind_id(target);
        let empty = PropertyMap::new();
        let bag = binder.bind_bag(&Self::non_null(properties.unwrap_or(&empty)))?;
        Ok(binder.finish(format!(
            "MATCH (s), (t) WHERE id(s) = {} AND id(t) = {} MERGE (s)-[r:{}]->(t) SET r = {}",
            s, t, relation, bag
        )))
    }

    pub fn unlink(&self, source: &NodeId, target: &NodeId, relation: &str) -> Statement {
        let mut binder = self.binder();
        let s = binder.bind_id(source);
        let t = binder.bind_id(target);
        binder.finish(format!(
            "MATCH (s)-[r:{}]->(t) WHERE id(s) = {} AND id(t) = {} DELETE r",
            relation, s, t
        ))
    }

    /// Delete every edge of `relation` leaving `source`
    pub fn detach(&self, source: &NodeId, relation: &str) -> Statement {
        let mut binder = self.binder();
        let s = binder.bind_id(source);
        binder.finish(format!("MATCH (s)-[r:{}]->(t) WHERE id(s) = {} DELETE r", relation, s))
    }

    /// Delete every edge of `relation` arriving at `target`
    pub fn detach_incoming(&self, target: &NodeId, relation: &str) -> Statement {
        let mut binder = self.binder();
        let t = binder.bind_id(target);
        binder.finish(format!("MATCH (s)-[r:{}]->(t) WHERE id(t) = {} DELETE r", relation, t))
    }

    /// Targets of one relation: id, labels and properties of each target, plus the
    /// edge's properties when the relation declares a property bag
    pub fn traverse(&self, source: &NodeId, relation: &RelationDescriptor) -> Statement {
        let mut binder = self.binder();
        let s = binder.bind_id(source);
        let mut text = format!(
            "MATCH (s)-[r:{}]->(t) WHERE id(s) = {} RETURN id(t), labels(t), properties(t)",
            relation.name, s
        );
        if relation.has_edge_properties() {
            text.push_str(", properties(r)");
        }
        binder.finish(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::schema::{PropertyDescriptor, Registry, ScalarKind};
    use crate::value::{property_map, Value};
    use serde_json::json;

    fn person(registry: &Registry) -> EntityType {
        registry
            .register(
                EntityType::builder("Person")
                    .property("name", ScalarKind::String)
                    .property("age", ScalarKind::Integer)
                    .property_with_default("married", ScalarKind::Boolean, false)
                    .relation(
                        RelationDescriptor::many("spouses", "Person")
                            .bidirectional()
                            .with_edge_property(PropertyDescriptor::new("since", ScalarKind::String)),
                    )
                    .relation(RelationDescriptor::many("friends", "Person")),
            )
            .unwrap()
    }

    #[test]
    fn test_schema_statements() {
        let registry = Registry::new();
        let entity = person(&registry);
        let employee = registry
            .register(EntityType::builder("Employee").extends(&entity).property("salary", ScalarKind::Float))
            .unwrap();
        let config = OgmConfig::default();
        let codec = JsonCodec;
        let translator = QueryTranslator::new(&codec, &config);

        let statements = translator.schema(&entity).unwrap();
        assert_eq!(statements[0].text, "CREATE VLABEL IF NOT EXISTS Person");
        assert_eq!(statements[1].text, "CREATE PROPERTY IF NOT EXISTS Person.name STRING");
        assert_eq!(
            statements[3].text,
            "CREATE PROPERTY IF NOT EXISTS Person.married BOOLEAN DEFAULT $p0"
        );
        assert_eq!(statements[3].param("p0"), Some(&json!(false)));

        let statements = translator.schema(&employee).unwrap();
        assert_eq!(statements[0].text, "CREATE VLABEL IF NOT EXISTS Employee INHERITS Person");
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn test_create_skips_nulls() {
        let registry = Registry::new();
        let entity = person(&registry);
        let config = OgmConfig::default();
        let codec = JsonCodec;
        let translator = QueryTranslator::new(&codec, &config);

        let props = property_map([
            ("name", Value::from("Nana")),
            ("age", Value::Null),
            ("married", Value::from(false)),
        ]);
        let statement = translator.create(&entity, &props).unwrap();
        assert_eq!(
            statement.text,
            "CREATE (n:Person {name: $p0, married: $p1}) RETURN id(n)"
        );
        assert_eq!(statement.param("p0"), Some(&json!("Nana")));
        assert!(!statement.text.contains("Nana"));
    }

    #[test]
    fn test_update_uses_deltas() {
        let config = OgmConfig::default();
        let codec = JsonCodec;
        let translator = QueryTranslator::new(&codec, &config);

        let mut age = PropertyCell::new(5);
        age.add(10).unwrap();
        let mut name = PropertyCell::new("a");
        name.add("b").unwrap();
        let untouched = PropertyCell::new(true);

        let dirty = vec![
            ("age".to_string(), age),
            ("name".to_string(), name),
            ("married".to_string(), untouched),
        ];
        let statement = translator.update(&NodeId::new("7"), &dirty).unwrap().unwrap();
        assert_eq!(
            statement.text,
            "MATCH (n) WHERE id(n) = $p0 SET n.age = n.age + $p1, n.name = $p2"
        );
        assert_eq!(statement.param("p0"), Some(&json!("7")));
        assert_eq!(statement.param("p1"), Some(&json!(10)));
        assert_eq!(statement.param("p2"), Some(&json!("ab")));
    }

    #[test]
    fn test_update_folds_chained_deltas() {
        let config = OgmConfig::default();
        let codec = JsonCodec;
        let translator = QueryTranslator::new(&codec, &config);

        let mut score = PropertyCell::new(1);
        score.add(2).unwrap();
        score.multiply(3).unwrap();
        score.subtract(4).unwrap();
        let statement = translator
            .update(&NodeId::new("1"), &[("score".to_string(), score)])
            .unwrap()
            .unwrap();
        assert!(statement
            .text
            .ends_with("SET n.score = ((n.score + $p1) * $p2) - $p3"));
    }

    #[test]
    fn test_update_without_changes() {
        let config = OgmConfig::default();
        let codec = JsonCodec;
        let translator = QueryTranslator::new(&codec, &config);
        let clean = vec![("age".to_string(), PropertyCell::new(1))];
        assert!(translator.update(&NodeId::new("1"), &clean).unwrap().is_none());
    }

    #[test]
    fn test_match_filter() {
        let registry = Registry::new();
        let entity = person(&registry);
        let config = OgmConfig::default();
        let codec = JsonCodec;
        let translator = QueryTranslator::new(&codec, &config);

        let condition = entity.field("name").unwrap().equals("X")
            & entity.field("age").unwrap().greater_than(3);
        let statement = translator.match_filter(&entity, Some(&condition), Some(1)).unwrap();
        assert_eq!(
            statement.text,
            "MATCH (n:Person) WHERE (n.name = $p0) AND (n.age > $p1) \
             RETURN id(n), labels(n), properties(n) LIMIT 1"
        );
        assert_eq!(statement.params.len(), 2);
        assert_eq!(statement.param("p1"), Some(&json!(3)));
    }

    #[test]
    fn test_match_filter_rejects_undeclared_properties() {
        let registry = Registry::new();
        let entity = person(&registry);
        let config = OgmConfig::default();
        let codec = JsonCodec;
        let translator = QueryTranslator::new(&codec, &config);

        let smuggled = Condition::property("age OR n.age").greater_than(100);
        assert!(matches!(
            translator.match_filter(&entity, Some(&smuggled), None),
            Err(OgmError::UnknownProperty { .. })
        ));
        let misspelled = Condition::property("name").equals("X") | Condition::property("agee").equals(3);
        assert!(matches!(
            translator.match_filter(&entity, Some(&misspelled), None),
            Err(OgmError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_merge() {
        let registry = Registry::new();
        let entity = person(&registry);
        let config = OgmConfig::default();
        let codec = JsonCodec;
        let translator = QueryTranslator::new(&codec, &config);

        let props = property_map([("name", Value::from("Nana")), ("age", Value::from(3))]);
        let statement = translator.merge(&entity, &props, &["name"]).unwrap();
        assert_eq!(
            statement.text,
            "MERGE (n:Person {name: $p0}) SET n = $p1 RETURN id(n)"
        );
        assert_eq!(statement.param("p1"), Some(&json!({"name": "Nana", "age": 3})));

        assert!(translator.merge(&entity, &props, &[]).is_err());
        assert!(matches!(
            translator.merge(&entity, &props, &["nickname"]),
            Err(OgmError::UnknownProperty { .. })
        ));
        let nameless = property_map([("age", Value::from(3))]);
        assert!(translator.merge(&entity, &nameless, &["name"]).is_err());
    }

    #[test]
    fn test_edge_statements() {
        let registry = Registry::new();
        let entity = person(&registry);
        let config = OgmConfig::default();
        let codec = JsonCodec;
        let translator = QueryTranslator::new(&codec, &config);
        let a = NodeId::new("1");
        let b = NodeId::new("2");

        let since = property_map([("since", "2024-01-01")]);
        let link = translator.link(&a, &b, "spouses", Some(&since)).unwrap();
        assert_eq!(
            link.text,
            "MATCH (s), (t) WHERE id(s) = $p0 AND id(t) = $p1 MERGE (s)-[r:spouses]->(t) SET r = $p2"
        );
        assert_eq!(link.param("p2"), Some(&json!({"since": "2024-01-01"})));

        let unlink = translator.unlink(&a, &b, "spouses");
        assert_eq!(
            unlink.text,
            "MATCH (s)-[r:spouses]->(t) WHERE id(s) = $p0 AND id(t) = $p1 DELETE r"
        );

        assert_eq!(
            translator.detach(&a, "spouses").text,
            "MATCH (s)-[r:spouses]->(t) WHERE id(s) = $p0 DELETE r"
        );
        let incoming = translator.detach_incoming(&a, "spouses");
        assert_eq!(incoming.text, "MATCH (s)-[r:spouses]->(t) WHERE id(t) = $p0 DELETE r");
        assert_eq!(incoming.params.len(), 1);

        let spouses = entity.relation("spouses").unwrap();
        assert!(translator.traverse(&a, spouses).text.ends_with(", properties(r)"));
        let friends = entity.relation("friends").unwrap();
        assert!(translator.traverse(&a, friends).text.ends_with("properties(t)"));
    }

    #[test]
    fn test_bulk_create() {
        let registry = Registry::new();
        let entity = person(&registry);
        let config = OgmConfig::default();
        let codec = JsonCodec;
        let translator = QueryTranslator::new(&codec, &config);

        let rows = vec![
            property_map([("name", Value::from("a")), ("age", Value::Null)]),
            property_map([("name", Value::from("b"))]),
        ];
        let statement = translator.bulk_create(&entity, &rows).unwrap();
        assert_eq!(
            statement.text,
            "UNWIND $p0 AS row CREATE (n:Person) SET n = row RETURN id(n)"
        );
        assert_eq!(statement.param("p0"), Some(&json!([{"name": "a"}, {"name": "b"}])));
    }
}
