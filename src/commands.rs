//! CLI command implementations

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use grove_core::{EntityGraph, EntitySource, Schema};
use grove_reconcile::{DecisionTable, Operation, ReconcileOptions, Reconciler};
use serde_json::json;

use crate::document::{Document, Loaded};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Text,
    Json,
}

fn load(path: &Path) -> anyhow::Result<Loaded> {
    let document = Document::load(path).with_context(|| format!("loading {}", path.display()))?;
    document
        .build()
        .with_context(|| format!("building graphs from {}", path.display()))
}

pub fn reconcile(
    path: &Path,
    sources: &[String],
    options: ReconcileOptions,
    output: Output,
    dry_run: bool,
) -> anyhow::Result<()> {
    let loaded = load(path)?;
    let accepted: BTreeSet<&str> = sources.iter().map(String::as_str).collect();
    let filter = |source: &EntitySource| accepted.contains(source.as_str());
    let reconciler = Reconciler::with_options(options);

    tracing::info!(
        "Reconciling {} incoming into {} target entities for sources {:?}",
        loaded.incoming.len(),
        loaded.target.len(),
        accepted
    );

    if dry_run {
        let table = reconciler
            .decide(loaded.target.graph(), &loaded.incoming, filter)
            .context("planning reconciliation")?;
        match output {
            Output::Json => println!("{}", serde_json::to_string_pretty(&table)?),
            Output::Text => print!("{}", render_plan(&loaded.schema, &table)),
        }
        return Ok(());
    }

    let mut target = loaded.target;
    // Only report what the pass itself changed.
    target.reset_changes();
    let report = reconciler
        .run(&mut target, &loaded.incoming, filter)
        .context("reconciliation failed")?;
    let changes = target.changes();

    match output {
        Output::Json => {
            let value = json!({
                "report": report,
                "changes": changes,
                "entities": describe(target.graph()),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Output::Text => {
            print!("{}", changes.render(&loaded.schema));
            println!();
            print!("{}", list_entities(target.graph()));
            println!("{}", report);
        }
    }
    Ok(())
}

pub fn check(path: &Path) -> anyhow::Result<()> {
    let loaded = load(path)?;
    for (kind, def) in loaded.schema.kinds() {
        println!(
            "{}: {} target, {} incoming",
            def.name,
            loaded.target.entities_of_kind(kind).count(),
            loaded.incoming.entities_of_kind(kind).count()
        );
    }

    let all_sources = |graph: &EntityGraph| -> BTreeSet<String> {
        graph.entities().map(|(_, data)| data.source.to_string()).collect()
    };
    let mut sources = all_sources(loaded.target.graph());
    sources.extend(all_sources(&loaded.incoming));
    println!("sources: {}", sources.into_iter().collect::<Vec<_>>().join(", "));
    Ok(())
}

fn render_plan(schema: &Schema, table: &DecisionTable) -> String {
    let mut out = String::new();
    for (id, operation) in &table.operations {
        let line = match operation {
            Operation::Relabel { counterpart, .. } => {
                format!("relabel {} {} from incoming {}\n", schema.name(id.kind), id, counterpart)
            }
            Operation::Remove => format!("remove {} {}\n", schema.name(id.kind), id),
        };
        out.push_str(&line);
    }
    for add in &table.adds {
        out.push_str(&format!("add {} from incoming {}\n", schema.name(add.incoming.kind), add.incoming));
    }
    if table.is_empty() {
        out.push_str("nothing to do\n");
    }
    out
}

fn list_entities(graph: &EntityGraph) -> String {
    let mut out = String::new();
    for entity in describe(graph) {
        out.push_str(&format!(
            "{} {} ({}) {} <- {}\n",
            entity["kind"].as_str().unwrap_or_default(),
            entity["id"].as_str().unwrap_or_default(),
            entity["source"].as_str().unwrap_or_default(),
            entity["attributes"],
            entity["parents"]
        ));
    }
    out
}

/// Entities of `graph` as JSON, in id order.
fn describe(graph: &EntityGraph) -> Vec<serde_json::Value> {
    let schema = graph.schema();
    let mut entities: Vec<_> = graph.entities().collect();
    entities.sort_by_key(|(id, _)| *id);
    entities
        .into_iter()
        .map(|(id, data)| {
            let parents: Vec<String> = graph
                .parents_of(id)
                .map(|parents| parents.into_iter().map(|(_, parent)| parent.to_string()).collect())
                .unwrap_or_default();
            let attributes: serde_json::Map<String, serde_json::Value> = data
                .attributes
                .iter()
                .map(|(name, value)| (name.clone(), json!(value.to_string())))
                .collect();
            json!({
                "id": id.to_string(),
                "kind": schema.name(id.kind),
                "source": data.source,
                "attributes": attributes,
                "parents": parents,
            })
        })
        .collect()
}
