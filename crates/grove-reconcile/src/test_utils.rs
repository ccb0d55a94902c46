//! Test utilities for Grove Reconcile

use std::sync::Arc;

use grove_core::*;

/// Kinds and connections shared by the reconciliation tests.
pub struct Fixture {
    pub schema: Arc<Schema>,
    pub parent: EntityKind,
    pub child: EntityKind,
    pub named: EntityKind,
    pub linked: EntityKind,
    pub oo_parent: EntityKind,
    pub oo_child: EntityKind,
    pub folder: EntityKind,
    pub parent_child: ConnectionId,
    pub oo_link: ConnectionId,
    pub folder_named: ConnectionId,
}

/// Parent/Child (many, required), Named (persistent id `name`, optionally
/// inside a Folder), Linked (soft reference holder) and a one-to-one
/// OoParent/OoChild pair.
pub fn fixture() -> Fixture {
    let mut builder = Schema::builder();
    let parent = builder.kind("Parent");
    let child = builder.kind("Child");
    let named = builder.kind("Named");
    let linked = builder.kind("Linked");
    let oo_parent = builder.kind("OoParent");
    let oo_child = builder.kind("OoChild");
    let folder = builder.kind("Folder");
    builder.persistent_id(named, &["name"]);
    let parent_child = builder.connect(parent, child, Cardinality::Many, Optionality::Required);
    let oo_link = builder.connect(oo_parent, oo_child, Cardinality::One, Optionality::Optional);
    let folder_named = builder.connect(folder, named, Cardinality::Many, Optionality::Optional);
    Fixture {
        schema: Arc::new(builder.build()),
        parent,
        child,
        named,
        linked,
        oo_parent,
        oo_child,
        folder,
        parent_child,
        oo_link,
        folder_named,
    }
}

impl Fixture {
    pub fn builder(&self) -> Builder {
        Builder::new(Arc::clone(&self.schema))
    }

    pub fn add_parent(&self, builder: &mut Builder, property: &str, source: &str) -> EntityId {
        builder
            .add_entity(EntityData::new(self.parent, source).with("property", property), &[])
            .unwrap()
    }

    pub fn add_child(&self, builder: &mut Builder, parent: EntityId, property: &str, source: &str) -> EntityId {
        builder
            .add_entity(
                EntityData::new(self.child, source).with("property", property),
                &[(self.parent_child, parent)],
            )
            .unwrap()
    }

    pub fn add_named(&self, builder: &mut Builder, name: &str, source: &str) -> EntityId {
        builder
            .add_entity(EntityData::new(self.named, source).with("name", name), &[])
            .unwrap()
    }

    /// `property` of every entity of `kind`, sorted.
    pub fn properties(&self, graph: &EntityGraph, kind: EntityKind) -> Vec<String> {
        let mut values: Vec<String> = graph
            .entities_of_kind(kind)
            .filter_map(|id| graph.entity(id).ok()?.get_str("property").map(str::to_string))
            .collect();
        values.sort();
        values
    }

    /// `property` of each child of `parent`, in index order.
    pub fn child_properties(&self, graph: &EntityGraph, parent: EntityId) -> Vec<String> {
        graph
            .children_of(parent, &self.parent_child)
            .unwrap()
            .into_iter()
            .filter_map(|id| graph.entity(id).ok()?.get_str("property").map(str::to_string))
            .collect()
    }

    /// The only entity of `kind` whose `property` equals `value`.
    pub fn find(&self, graph: &EntityGraph, kind: EntityKind, value: &str) -> EntityId {
        let found: Vec<EntityId> = graph
            .entities_of_kind(kind)
            .filter(|id| graph.entity(*id).unwrap().get_str("property") == Some(value))
            .collect();
        assert_eq!(found.len(), 1, "expected exactly one {} with property {}", self.schema.name(kind), value);
        found[0]
    }
}

/// Filter accepting exactly the listed sources.
pub fn sources(accepted: &'static [&'static str]) -> impl Fn(&EntitySource) -> bool {
    move |source| accepted.contains(&source.as_str())
}

/// Order-independent description of a graph: one line per entity with its
/// attributes, source and the attributes of its parents.
pub fn summary(graph: &EntityGraph) -> Vec<String> {
    let mut lines: Vec<String> = graph
        .entities()
        .map(|(id, data)| {
            let parents: Vec<String> = graph
                .parents_of(id)
                .unwrap()
                .into_iter()
                .map(|(_, parent)| format!("{:?}", graph.entity(parent).unwrap().attributes))
                .collect();
            format!(
                "{} {:?} ({}) <- {:?}",
                graph.schema().name(id.kind),
                data.attributes,
                data.source,
                parents
            )
        })
        .collect();
    lines.sort();
    lines
}
