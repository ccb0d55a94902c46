//! JSON fixture documents: a schema plus a target and an incoming graph

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use grove_core::{
    AttrValue, Builder, Cardinality, ConnectionId, EntityData, EntityId, EntityKind, Optionality, PersistentId,
    Schema, Snapshot, StoreError,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("kind declared twice: {0}")]
    DuplicateKind(String),

    #[error("unknown kind: {0}")]
    UnknownKind(String),

    #[error("{0} entities: key used twice: {1}")]
    DuplicateKey(Side, String),

    #[error("{side} entity {key}: parent {parent} is not declared before it")]
    UnknownParent { side: Side, key: String, parent: String },

    #[error("{side} entity {key}: no connection from {parent_kind} to {child_kind}")]
    NoConnection {
        side: Side,
        key: String,
        parent_kind: String,
        child_kind: String,
    },

    #[error("{side} entity {key}: attribute {name}: {reason}")]
    BadAttribute {
        side: Side,
        key: String,
        name: String,
        reason: String,
    },

    #[error("{side} entity {key}: {source}")]
    Store {
        side: Side,
        key: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Target,
    Incoming,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Target => f.write_str("target"),
            Side::Incoming => f.write_str("incoming"),
        }
    }
}

/// On-disk shape of a fixture.
#[derive(Debug, Deserialize)]
pub struct Document {
    pub kinds: Vec<KindSpec>,
    #[serde(default)]
    pub target: Vec<EntitySpec>,
    #[serde(default)]
    pub incoming: Vec<EntitySpec>,
}

#[derive(Debug, Deserialize)]
pub struct KindSpec {
    pub name: String,
    /// Attributes forming the persistent id, if any.
    #[serde(default)]
    pub persistent_id: Vec<String>,
    #[serde(default)]
    pub parents: Vec<ParentSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ParentSpec {
    pub kind: String,
    #[serde(default = "default_cardinality")]
    pub cardinality: Cardinality,
    #[serde(default = "default_optionality")]
    pub optionality: Optionality,
}

fn default_cardinality() -> Cardinality {
    Cardinality::Many
}

fn default_optionality() -> Optionality {
    Optionality::Required
}

/// One entity. `key` is local to the document and names the entity in
/// `parents` lists; parents must appear earlier on the same side.
#[derive(Debug, Deserialize)]
pub struct EntitySpec {
    pub key: String,
    pub kind: String,
    pub source: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub parents: Vec<String>,
    /// External metadata by mapping name.
    #[serde(default)]
    pub external: BTreeMap<String, Value>,
}

/// A document turned into graphs sharing one schema.
pub struct Loaded {
    pub schema: Arc<Schema>,
    pub target: Builder,
    pub incoming: Snapshot,
}

impl Document {
    pub fn load(path: &Path) -> Result<Document, DocumentError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn build(&self) -> Result<Loaded, DocumentError> {
        let schema = Arc::new(self.schema()?);
        let target = populate(&schema, Side::Target, &self.target)?;
        let incoming = populate(&schema, Side::Incoming, &self.incoming)?.to_snapshot();
        Ok(Loaded {
            schema,
            target,
            incoming,
        })
    }

    fn schema(&self) -> Result<Schema, DocumentError> {
        let mut builder = Schema::builder();
        let mut kinds: HashMap<&str, EntityKind> = HashMap::new();
        // Declare every kind first so parents may be listed in any order.
        for spec in &self.kinds {
            if kinds.contains_key(spec.name.as_str()) {
                return Err(DocumentError::DuplicateKind(spec.name.clone()));
            }
            kinds.insert(&spec.name, builder.kind(&spec.name));
        }
        for spec in &self.kinds {
            let kind = kinds[spec.name.as_str()];
            if !spec.persistent_id.is_empty() {
                let attributes: Vec<&str> = spec.persistent_id.iter().map(String::as_str).collect();
                builder.persistent_id(kind, &attributes);
            }
            for parent in &spec.parents {
                let parent_kind = kinds
                    .get(parent.kind.as_str())
                    .copied()
                    .ok_or_else(|| DocumentError::UnknownKind(parent.kind.clone()))?;
                builder.connect(parent_kind, kind, parent.cardinality, parent.optionality);
            }
        }
        Ok(builder.build())
    }
}

fn populate(schema: &Arc<Schema>, side: Side, specs: &[EntitySpec]) -> Result<Builder, DocumentError> {
    let mut builder = Builder::new(Arc::clone(schema));
    let mut keys: HashMap<&str, EntityId> = HashMap::new();

    for spec in specs {
        if keys.contains_key(spec.key.as_str()) {
            return Err(DocumentError::DuplicateKey(side, spec.key.clone()));
        }
        let kind = schema
            .kind_by_name(&spec.kind)
            .ok_or_else(|| DocumentError::UnknownKind(spec.kind.clone()))?;

        let mut data = EntityData::new(kind, spec.source.as_str());
        for (name, value) in &spec.attributes {
            let value = attr_value(schema, value).map_err(|reason| DocumentError::BadAttribute {
                side,
                key: spec.key.clone(),
                name: name.clone(),
                reason,
            })?;
            data.set(name, value);
        }

        let mut parents: Vec<(ConnectionId, EntityId)> = Vec::with_capacity(spec.parents.len());
        for parent_key in &spec.parents {
            let parent = keys
                .get(parent_key.as_str())
                .copied()
                .ok_or_else(|| DocumentError::UnknownParent {
                    side,
                    key: spec.key.clone(),
                    parent: parent_key.clone(),
                })?;
            let connection =
                schema
                    .connection_between(parent.kind, kind)
                    .ok_or_else(|| DocumentError::NoConnection {
                        side,
                        key: spec.key.clone(),
                        parent_kind: schema.name(parent.kind).to_string(),
                        child_kind: spec.kind.clone(),
                    })?;
            parents.push((connection, parent));
        }

        let store_error = |source| DocumentError::Store {
            side,
            key: spec.key.clone(),
            source,
        };
        let id = builder.add_entity(data, &parents).map_err(store_error)?;
        for (mapping, value) in &spec.external {
            builder.set_external(mapping, id, value.clone()).map_err(store_error)?;
        }
        keys.insert(&spec.key, id);
    }

    tracing::debug!("loaded {} {} entities", builder.len(), side);
    Ok(builder)
}

/// `{"ref": {"kind": .., "key": ..}}` is a soft reference; any other object
/// is rejected.
fn attr_value(schema: &Schema, value: &Value) -> Result<AttrValue, String> {
    Ok(match value {
        Value::Null => AttrValue::Null,
        Value::Bool(b) => AttrValue::Bool(*b),
        Value::Number(n) => AttrValue::Int(n.as_i64().ok_or_else(|| format!("{n} is not a 64-bit integer"))?),
        Value::String(s) => AttrValue::Str(s.clone()),
        Value::Array(items) => AttrValue::List(
            items
                .iter()
                .map(|item| attr_value(schema, item))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(object) => {
            let reference = object
                .get("ref")
                .and_then(Value::as_object)
                .filter(|_| object.len() == 1)
                .ok_or("objects must have the form {\"ref\": {\"kind\", \"key\"}}")?;
            let kind_name = reference
                .get("kind")
                .and_then(Value::as_str)
                .ok_or("reference without a kind")?;
            let key = reference.get("key").and_then(Value::as_str).ok_or("reference without a key")?;
            let kind = schema
                .kind_by_name(kind_name)
                .ok_or_else(|| format!("unknown kind {kind_name}"))?;
            AttrValue::Ref(PersistentId::new(kind, key))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "kinds": [
            {"name": "Module", "persistent_id": ["name"]},
            {"name": "Root", "parents": [{"kind": "Module"}]},
            {"name": "Facet", "parents": [{"kind": "Module", "cardinality": "one", "optionality": "optional"}]}
        ],
        "target": [
            {"key": "m", "kind": "Module", "source": "gradle", "attributes": {"name": "core"}},
            {"key": "r", "kind": "Root", "source": "gradle", "attributes": {"url": "/src", "depth": 2}, "parents": ["m"]}
        ],
        "incoming": [
            {"key": "m", "kind": "Module", "source": "gradle", "attributes": {"name": "core"},
             "external": {"ui": {"expanded": true}}},
            {"key": "f", "kind": "Facet", "source": "gradle",
             "attributes": {"uses": {"ref": {"kind": "Module", "key": "core"}}, "tags": ["a", null]},
             "parents": ["m"]}
        ]
    }"#;

    fn parse(text: &str) -> Document {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_build_document() {
        let loaded = parse(DOCUMENT).build().unwrap();
        assert_eq!(loaded.schema.kind_count(), 3);
        assert_eq!(loaded.target.len(), 2);
        assert_eq!(loaded.incoming.len(), 2);

        let module = loaded.schema.kind_by_name("Module").unwrap();
        let facet = loaded.schema.kind_by_name("Facet").unwrap();
        let core = loaded.incoming.resolve(&PersistentId::new(module, "core")).unwrap();
        assert_eq!(
            loaded.incoming.external("ui", core),
            Some(&serde_json::json!({"expanded": true}))
        );

        let facet_id = loaded.incoming.entities_of_kind(facet).next().unwrap();
        let data = loaded.incoming.entity(facet_id).unwrap();
        assert_eq!(data.get("uses"), Some(&AttrValue::Ref(PersistentId::new(module, "core"))));
        assert_eq!(
            data.get("tags"),
            Some(&AttrValue::List(vec![AttrValue::Str("a".into()), AttrValue::Null]))
        );
        assert_eq!(loaded.incoming.parents_of(facet_id).unwrap(), vec![(
            loaded.schema.connection_between(module, facet).unwrap(),
            core
        )]);
    }

    #[test]
    fn test_parent_must_come_first() {
        let document = parse(
            r#"{"kinds": [{"name": "A"}, {"name": "B", "parents": [{"kind": "A"}]}],
                "target": [{"key": "b", "kind": "B", "source": "s", "parents": ["a"]},
                           {"key": "a", "kind": "A", "source": "s"}]}"#,
        );
        assert!(matches!(
            document.build(),
            Err(DocumentError::UnknownParent { side: Side::Target, .. })
        ));
    }

    #[test]
    fn test_missing_required_parent_is_a_store_error() {
        let document = parse(
            r#"{"kinds": [{"name": "A"}, {"name": "B", "parents": [{"kind": "A"}]}],
                "incoming": [{"key": "b", "kind": "B", "source": "s"}]}"#,
        );
        assert!(matches!(
            document.build(),
            Err(DocumentError::Store { side: Side::Incoming, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_input() {
        let unknown_parent_kind = parse(r#"{"kinds": [{"name": "B", "parents": [{"kind": "A"}]}]}"#);
        assert!(matches!(unknown_parent_kind.build(), Err(DocumentError::UnknownKind(kind)) if kind == "A"));

        let duplicate = parse(r#"{"kinds": [{"name": "A"}, {"name": "A"}]}"#);
        assert!(matches!(duplicate.build(), Err(DocumentError::DuplicateKind(_))));

        let float = parse(
            r#"{"kinds": [{"name": "A"}], "target": [{"key": "a", "kind": "A", "source": "s", "attributes": {"x": 1.5}}]}"#,
        );
        assert!(matches!(float.build(), Err(DocumentError::BadAttribute { name, .. }) if name == "x"));

        let unrelated = parse(
            r#"{"kinds": [{"name": "A"}, {"name": "B"}],
                "target": [{"key": "a", "kind": "A", "source": "s"},
                           {"key": "b", "kind": "B", "source": "s", "parents": ["a"]}]}"#,
        );
        assert!(matches!(unrelated.build(), Err(DocumentError::NoConnection { .. })));
    }
}
