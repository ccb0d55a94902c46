//! Entity kinds and the connections declared between them

use serde::{Deserialize, Serialize};

use crate::model::*;

/// Declaration of one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindDef {
    pub name: String,
    /// Attributes composing the persistent id. Empty means the kind has none.
    pub persistent_id: Vec<String>,
    /// Parent connections, in declaration order.
    pub parents: Vec<ConnectionId>,
}

/// The type system shared by every snapshot of one graph.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    kinds: Vec<KindDef>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn kind(&self, kind: EntityKind) -> Option<&KindDef> {
        self.kinds.get(kind.0 as usize)
    }

    pub fn kind_by_name(&self, name: &str) -> Option<EntityKind> {
        self.kinds
            .iter()
            .position(|def| def.name == name)
            .map(|idx| EntityKind(idx as u16))
    }

    /// Human readable kind name, for logs and change listings.
    pub fn name(&self, kind: EntityKind) -> &str {
        self.kind(kind).map_or("<unknown>", |def| def.name.as_str())
    }

    pub fn kinds(&self) -> impl Iterator<Item = (EntityKind, &KindDef)> {
        self.kinds
            .iter()
            .enumerate()
            .map(|(idx, def)| (EntityKind(idx as u16), def))
    }

    pub fn kind_count(&self) -> usize {
        self.kinds.len()
    }

    /// Parent connections of `kind`, in declaration order.
    pub fn parent_connections(&self, kind: EntityKind) -> &[ConnectionId] {
        self.kind(kind).map_or(&[], |def| def.parents.as_slice())
    }

    pub fn required_connections(&self, kind: EntityKind) -> impl Iterator<Item = &ConnectionId> {
        self.parent_connections(kind).iter().filter(|c| c.is_required())
    }

    /// Connections in which `kind` is the parent, ordered by child kind then declaration.
    pub fn child_connections(&self, kind: EntityKind) -> impl Iterator<Item = &ConnectionId> {
        self.kinds
            .iter()
            .flat_map(|def| def.parents.iter())
            .filter(move |c| c.parent == kind)
    }

    pub fn has_connection(&self, connection: &ConnectionId) -> bool {
        self.parent_connections(connection.child).contains(connection)
    }

    /// First declared connection from `parent` to `child`.
    pub fn connection_between(&self, parent: EntityKind, child: EntityKind) -> Option<ConnectionId> {
        self.parent_connections(child)
            .iter()
            .find(|c| c.parent == parent)
            .copied()
    }

    /// Derive the persistent id of `data`, if its kind declares one.
    pub fn persistent_id(&self, data: &EntityData) -> Option<PersistentId> {
        let def = self.kind(data.kind)?;
        if def.persistent_id.is_empty() {
            return None;
        }
        let key = def
            .persistent_id
            .iter()
            .map(|attr| data.get(attr).unwrap_or(&AttrValue::Null).to_string())
            .collect::<Vec<_>>()
            .join("/");
        Some(PersistentId::new(data.kind, key))
    }
}

/// Incremental constructor for a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    kinds: Vec<KindDef>,
}

impl SchemaBuilder {
    /// Declare a new kind and return its index.
    pub fn kind(&mut self, name: &str) -> EntityKind {
        self.kinds.push(KindDef {
            name: name.to_string(),
            persistent_id: Vec::new(),
            parents: Vec::new(),
        });
        EntityKind((self.kinds.len() - 1) as u16)
    }

    /// Declare the attributes composing the persistent id of `kind`.
    pub fn persistent_id(&mut self, kind: EntityKind, attributes: &[&str]) -> &mut Self {
        if let Some(def) = self.kinds.get_mut(kind.0 as usize) {
            def.persistent_id = attributes.iter().map(|a| a.to_string()).collect();
        }
        self
    }

    /// Declare a parent -> child connection. Declaration order is the order
    /// in which parents of a child are visited.
    pub fn connect(
        &mut self,
        parent: EntityKind,
        child: EntityKind,
        cardinality: Cardinality,
        optionality: Optionality,
    ) -> ConnectionId {
        let connection = ConnectionId {
            parent,
            child,
            kind: ConnectionKind::new(cardinality, optionality),
        };
        if let Some(def) = self.kinds.get_mut(child.0 as usize) {
            def.parents.push(connection);
        }
        connection
    }

    pub fn build(self) -> Schema {
        Schema { kinds: self.kinds }
    }
}
