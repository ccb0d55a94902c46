//! Core data structures for the entity graph

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Index of an entity kind inside a [`crate::Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKind(pub u16);

/// Stable identifier of an entity, scoped by its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub kind: EntityKind,
    pub index: u32,
}

impl EntityId {
    pub fn new(kind: EntityKind, index: u32) -> Self {
        EntityId { kind, index }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.0, self.index)
    }
}

/// Opaque provenance tag. Only ever fed to reconciliation filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitySource(pub String);

impl EntitySource {
    pub fn new(tag: impl Into<String>) -> Self {
        EntitySource(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntitySource {
    fn from(tag: &str) -> Self {
        EntitySource::new(tag)
    }
}

impl fmt::Display for EntitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How many children a parent may hold through one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// Whether the child may exist without a parent on this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optionality {
    Required,
    Optional,
}

/// Cardinality x optionality of a parent-child link type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionKind {
    pub cardinality: Cardinality,
    pub optionality: Optionality,
}

impl ConnectionKind {
    pub fn new(cardinality: Cardinality, optionality: Optionality) -> Self {
        ConnectionKind { cardinality, optionality }
    }

    pub fn is_required(&self) -> bool {
        self.optionality == Optionality::Required
    }
}

/// A declared link type between a parent kind and a child kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId {
    pub parent: EntityKind,
    pub child: EntityKind,
    pub kind: ConnectionKind,
}

impl ConnectionId {
    pub fn is_required(&self) -> bool {
        self.kind.is_required()
    }
}

/// Natural key of an entity, unique within its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersistentId {
    pub kind: EntityKind,
    pub key: String,
}

impl PersistentId {
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        PersistentId { kind, key: key.into() }
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.0, self.key)
    }
}

/// Attribute payload. `Ref` is a soft reference resolved through persistent ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<AttrValue>),
    Ref(PersistentId),
}

impl AttrValue {
    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a PersistentId>) {
        match self {
            AttrValue::Ref(pid) => out.push(pid),
            AttrValue::List(items) => items.iter().for_each(|item| item.collect_refs(out)),
            _ => {}
        }
    }

    fn rewrite_refs(&mut self, old: &PersistentId, new: &PersistentId) -> bool {
        match self {
            AttrValue::Ref(pid) if pid == old => {
                *pid = new.clone();
                true
            }
            AttrValue::List(items) => items
                .iter_mut()
                .fold(false, |changed, item| item.rewrite_refs(old, new) || changed),
            _ => false,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Null => f.write_str("null"),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Str(s) => f.write_str(s),
            AttrValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            AttrValue::Ref(pid) => f.write_str(&pid.key),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<PersistentId> for AttrValue {
    fn from(pid: PersistentId) -> Self {
        AttrValue::Ref(pid)
    }
}

/// Payload of a single entity. Links live in the store, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityData {
    pub kind: EntityKind,
    pub source: EntitySource,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl EntityData {
    pub fn new(kind: EntityKind, source: impl Into<EntitySource>) -> Self {
        EntityData {
            kind,
            source: source.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<AttrValue>) {
        self.attributes.insert(name.to_string(), value.into());
    }

    /// All soft references held by this entity, in attribute order.
    pub fn soft_refs(&self) -> Vec<&PersistentId> {
        let mut out = Vec::new();
        for value in self.attributes.values() {
            value.collect_refs(&mut out);
        }
        out
    }

    /// Point every soft reference at `old` to `new`. Returns whether anything changed.
    pub fn rewrite_refs(&mut self, old: &PersistentId, new: &PersistentId) -> bool {
        self.attributes
            .values_mut()
            .fold(false, |changed, value| value.rewrite_refs(old, new) || changed)
    }

    /// Names of attributes whose values differ between `self` and `other`.
    pub fn changed_attributes(&self, other: &EntityData) -> Vec<String> {
        let mut names: Vec<String> = self
            .attributes
            .iter()
            .filter(|(name, value)| other.attributes.get(*name) != Some(*value))
            .map(|(name, _)| name.clone())
            .collect();
        names.extend(
            other
                .attributes
                .keys()
                .filter(|name| !self.attributes.contains_key(*name))
                .cloned(),
        );
        names.sort();
        names
    }
}

/// Per-kind capabilities the reconciler relies on.
///
/// Equality and hashing ignore the entity source so that the same logical
/// record coming from two providers compares equal.
pub trait EntityContent {
    fn content_eq(&self, other: &Self) -> bool;
    fn content_hash(&self) -> u64;
    /// Take over attributes and source of `other`, keeping identity.
    fn relabel_from(&mut self, other: &Self);
}

impl EntityContent for EntityData {
    fn content_eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.attributes == other.attributes
    }

    fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.kind.hash(&mut hasher);
        self.attributes.hash(&mut hasher);
        hasher.finish()
    }

    fn relabel_from(&mut self, other: &Self) {
        self.source = other.source.clone();
        self.attributes = other.attributes.clone();
    }
}
