//! Test utilities for Grove Core

use std::sync::Arc;

use crate::*;

/// Kinds and connections of the sample schema.
pub struct Sample {
    pub schema: Arc<Schema>,
    pub parent: EntityKind,
    pub child: EntityKind,
    pub named: EntityKind,
    pub linked: EntityKind,
    pub oo_parent: EntityKind,
    pub oo_child: EntityKind,
    pub parent_child: ConnectionId,
    pub oo_link: ConnectionId,
}

/// Parent/Child (many, required), Named (persistent id `name`), Linked (soft
/// reference holder) and a one-to-one OoParent/OoChild pair.
pub fn sample_schema() -> Sample {
    let mut builder = Schema::builder();
    let parent = builder.kind("Parent");
    let child = builder.kind("Child");
    let named = builder.kind("Named");
    let linked = builder.kind("Linked");
    let oo_parent = builder.kind("OoParent");
    let oo_child = builder.kind("OoChild");
    builder.persistent_id(named, &["name"]);
    let parent_child = builder.connect(parent, child, Cardinality::Many, Optionality::Required);
    let oo_link = builder.connect(oo_parent, oo_child, Cardinality::One, Optionality::Optional);
    Sample {
        schema: Arc::new(builder.build()),
        parent,
        child,
        named,
        linked,
        oo_parent,
        oo_child,
        parent_child,
        oo_link,
    }
}

pub fn parent_data(sample: &Sample, property: &str, source: &str) -> EntityData {
    EntityData::new(sample.parent, source).with("property", property)
}

pub fn child_data(sample: &Sample, property: &str, source: &str) -> EntityData {
    EntityData::new(sample.child, source).with("property", property)
}

pub fn named_data(sample: &Sample, name: &str, source: &str) -> EntityData {
    EntityData::new(sample.named, source).with("name", name)
}
