//! Integration tests for Grove
//!
//! End-to-end reconciliation through the library crates, then the same
//! scenario through the `grove` binary.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use grove_core::*;
use grove_reconcile::{reconcile, ReconcileOptions, Reconciler};
use serde_json::{json, Value};
use tempfile::TempDir;

/// A build-tool workspace: modules with content roots and source roots,
/// libraries referenced softly from dependencies.
struct Workspace {
    schema: Arc<Schema>,
    module: EntityKind,
    content_root: EntityKind,
    source_root: EntityKind,
    library: EntityKind,
    dependency: EntityKind,
    module_root: ConnectionId,
    root_source: ConnectionId,
    module_dependency: ConnectionId,
}

fn workspace() -> Workspace {
    let mut builder = Schema::builder();
    let module = builder.kind("Module");
    let content_root = builder.kind("ContentRoot");
    let source_root = builder.kind("SourceRoot");
    let library = builder.kind("Library");
    let dependency = builder.kind("Dependency");
    builder.persistent_id(module, &["name"]);
    builder.persistent_id(library, &["name"]);
    let module_root = builder.connect(module, content_root, Cardinality::Many, Optionality::Required);
    let root_source = builder.connect(content_root, source_root, Cardinality::Many, Optionality::Required);
    let module_dependency = builder.connect(module, dependency, Cardinality::Many, Optionality::Required);
    Workspace {
        schema: Arc::new(builder.build()),
        module,
        content_root,
        source_root,
        library,
        dependency,
        module_root,
        root_source,
        module_dependency,
    }
}

impl Workspace {
    fn module(&self, graph: &mut Builder, name: &str, source: &str) -> EntityId {
        graph
            .add_entity(EntityData::new(self.module, source).with("name", name), &[])
            .unwrap()
    }

    fn content_root(&self, graph: &mut Builder, module: EntityId, url: &str, source: &str) -> EntityId {
        graph
            .add_entity(
                EntityData::new(self.content_root, source).with("url", url),
                &[(self.module_root, module)],
            )
            .unwrap()
    }

    fn source_root(&self, graph: &mut Builder, root: EntityId, path: &str, source: &str) -> EntityId {
        graph
            .add_entity(
                EntityData::new(self.source_root, source).with("path", path),
                &[(self.root_source, root)],
            )
            .unwrap()
    }

    fn library(&self, graph: &mut Builder, name: &str, version: &str) -> EntityId {
        graph
            .add_entity(
                EntityData::new(self.library, "gradle")
                    .with("name", name)
                    .with("version", version),
                &[],
            )
            .unwrap()
    }

    fn dependency(&self, graph: &mut Builder, module: EntityId, library: &str) -> EntityId {
        graph
            .add_entity(
                EntityData::new(self.dependency, "gradle").with("library", PersistentId::new(self.library, library)),
                &[(self.module_dependency, module)],
            )
            .unwrap()
    }

    /// What the user had before a re-import: a gradle module with one
    /// stale content root, plus hand-made entities from the `local` source.
    fn before_sync(&self) -> Builder {
        let mut graph = Builder::new(Arc::clone(&self.schema));
        let core = self.module(&mut graph, "core", "gradle");
        self.module(&mut graph, "scratch", "local");
        let core_root = self.content_root(&mut graph, core, "/core", "gradle");
        let old_root = self.content_root(&mut graph, core, "/old", "gradle");
        self.source_root(&mut graph, core_root, "/core/src", "gradle");
        self.source_root(&mut graph, core_root, "/core/gen", "local");
        self.source_root(&mut graph, old_root, "/old/gen", "local");
        self.library(&mut graph, "guava", "30");
        self.dependency(&mut graph, core, "guava");
        graph.reset_changes();
        graph
    }

    /// What the build tool reports now.
    fn after_sync(&self) -> Snapshot {
        let mut graph = Builder::new(Arc::clone(&self.schema));
        let core = self.module(&mut graph, "core", "gradle");
        let app = self.module(&mut graph, "app", "gradle");
        let core_root = self.content_root(&mut graph, core, "/core", "gradle");
        self.content_root(&mut graph, app, "/app", "gradle");
        self.source_root(&mut graph, core_root, "/core/src", "gradle");
        self.source_root(&mut graph, core_root, "/core/test", "gradle");
        self.library(&mut graph, "guava", "31");
        self.dependency(&mut graph, core, "guava");
        graph.to_snapshot()
    }
}

fn gradle(source: &EntitySource) -> bool {
    source.as_str() == "gradle"
}

/// Sorted description of the entities from `source`, with parent attributes.
fn describe_source(graph: &EntityGraph, source: &str) -> Vec<String> {
    let mut lines: Vec<String> = graph
        .entities()
        .filter(|(_, data)| data.source.as_str() == source)
        .map(|(id, data)| {
            let parents: Vec<_> = graph
                .parents_of(id)
                .unwrap()
                .into_iter()
                .map(|(_, parent)| graph.entity(parent).unwrap().attributes.clone())
                .collect();
            format!("{} {:?} <- {:?}", graph.schema().name(id.kind), data.attributes, parents)
        })
        .collect();
    lines.sort();
    lines
}

/// Test a full re-import: stale gradle data goes, new gradle data comes,
/// local entities survive unless they hang off something removed
#[test]
fn test_workspace_sync() {
    let ws = workspace();
    let mut target = ws.before_sync();
    let incoming = ws.after_sync();

    let report = Reconciler::new().run(&mut target, &incoming, gradle).unwrap();
    assert_eq!(report.added, 3);
    assert_eq!(report.relabeled, 5);
    // The stale content root and the local source root under it.
    assert_eq!(report.removed, 2);
    assert_eq!(report.trace_lost, 0);

    assert_eq!(describe_source(&target, "gradle"), describe_source(&incoming, "gradle"));

    let local = describe_source(&target, "local");
    assert_eq!(local.len(), 2);
    assert!(local.iter().any(|line| line.contains("/core/gen")));
    assert!(local.iter().any(|line| line.contains("scratch")));

    let guava = target.resolve(&PersistentId::new(ws.library, "guava")).unwrap();
    assert_eq!(target.entity(guava).unwrap().get_str("version"), Some("31"));
    assert_eq!(target.referrers(&PersistentId::new(ws.library, "guava")).len(), 1);
}

/// Test that the ids of matched entities survive the pass
#[test]
fn test_matched_entities_keep_their_ids() {
    let ws = workspace();
    let mut target = ws.before_sync();
    let core = target.resolve(&PersistentId::new(ws.module, "core")).unwrap();
    let roots_before = target.children_of(core, &ws.module_root).unwrap();

    reconcile(&mut target, &ws.after_sync(), gradle).unwrap();

    assert_eq!(target.resolve(&PersistentId::new(ws.module, "core")), Some(core));
    let roots_after = target.children_of(core, &ws.module_root).unwrap();
    assert_eq!(roots_after, vec![roots_before[0]]);
    assert_eq!(target.children_of(roots_before[0], &ws.root_source).unwrap().len(), 3);
}

/// Test that a second pass with the same data changes nothing
#[test]
fn test_second_sync_changes_nothing() {
    let ws = workspace();
    let mut target = ws.before_sync();
    let incoming = ws.after_sync();

    reconcile(&mut target, &incoming, gradle).unwrap();
    target.reset_changes();
    let report = Reconciler::new().run(&mut target, &incoming, gradle).unwrap();

    assert_eq!(report.added, 0);
    assert_eq!(report.removed, 0);
    assert!(target.changes().is_empty());
}

/// Test that a filter matching nothing leaves the target alone
#[test]
fn test_unrelated_source_is_untouched() {
    let ws = workspace();
    let mut target = ws.before_sync();

    let report = Reconciler::new()
        .run(&mut target, &ws.after_sync(), |source| source.as_str() == "maven")
        .unwrap();

    assert!(report.is_noop());
    assert!(target.changes().is_empty());
}

/// Test that shuffled visitation reaches the same graph
#[test]
fn test_seeded_sync_matches_ordered_sync() {
    let ws = workspace();
    let incoming = ws.after_sync();
    let mut ordered = ws.before_sync();
    Reconciler::new().run(&mut ordered, &incoming, gradle).unwrap();

    for seed in [1, 42, 7_000_000_007] {
        let mut shuffled = ws.before_sync();
        Reconciler::with_options(ReconcileOptions::with_seed(seed))
            .run(&mut shuffled, &incoming, gradle)
            .unwrap();
        assert_eq!(describe_source(&shuffled, "gradle"), describe_source(&ordered, "gradle"));
        assert_eq!(describe_source(&shuffled, "local"), describe_source(&ordered, "local"));
    }
}

// CLI

/// The workspace scenario as a fixture document.
fn document() -> Value {
    json!({
        "kinds": [
            {"name": "Module", "persistent_id": ["name"]},
            {"name": "ContentRoot", "parents": [{"kind": "Module"}]},
            {"name": "SourceRoot", "parents": [{"kind": "ContentRoot"}]},
            {"name": "Library", "persistent_id": ["name"]},
            {"name": "Dependency", "parents": [{"kind": "Module"}]}
        ],
        "target": [
            {"key": "core", "kind": "Module", "source": "gradle", "attributes": {"name": "core"}},
            {"key": "scratch", "kind": "Module", "source": "local", "attributes": {"name": "scratch"}},
            {"key": "core-root", "kind": "ContentRoot", "source": "gradle", "attributes": {"url": "/core"}, "parents": ["core"]},
            {"key": "old-root", "kind": "ContentRoot", "source": "gradle", "attributes": {"url": "/old"}, "parents": ["core"]},
            {"key": "src", "kind": "SourceRoot", "source": "gradle", "attributes": {"path": "/core/src"}, "parents": ["core-root"]},
            {"key": "gen", "kind": "SourceRoot", "source": "local", "attributes": {"path": "/core/gen"}, "parents": ["core-root"]},
            {"key": "old-gen", "kind": "SourceRoot", "source": "local", "attributes": {"path": "/old/gen"}, "parents": ["old-root"]},
            {"key": "guava", "kind": "Library", "source": "gradle", "attributes": {"name": "guava", "version": "30"}},
            {"key": "dep", "kind": "Dependency", "source": "gradle",
             "attributes": {"library": {"ref": {"kind": "Library", "key": "guava"}}}, "parents": ["core"]}
        ],
        "incoming": [
            {"key": "core", "kind": "Module", "source": "gradle", "attributes": {"name": "core"}},
            {"key": "app", "kind": "Module", "source": "gradle", "attributes": {"name": "app"}},
            {"key": "core-root", "kind": "ContentRoot", "source": "gradle", "attributes": {"url": "/core"}, "parents": ["core"]},
            {"key": "app-root", "kind": "ContentRoot", "source": "gradle", "attributes": {"url": "/app"}, "parents": ["app"]},
            {"key": "src", "kind": "SourceRoot", "source": "gradle", "attributes": {"path": "/core/src"}, "parents": ["core-root"]},
            {"key": "test", "kind": "SourceRoot", "source": "gradle", "attributes": {"path": "/core/test"}, "parents": ["core-root"]},
            {"key": "guava", "kind": "Library", "source": "gradle", "attributes": {"name": "guava", "version": "31"}},
            {"key": "dep", "kind": "Dependency", "source": "gradle",
             "attributes": {"library": {"ref": {"kind": "Library", "key": "guava"}}}, "parents": ["core"]}
        ]
    })
}

fn write_document(dir: &TempDir, value: &Value) -> std::path::PathBuf {
    let path = dir.path().join("workspace.json");
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

fn grove(args: &[&str], document: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_grove"))
        .args(args)
        .arg(document)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute grove")
}

/// Test that the CLI can be invoked
#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_grove"))
        .arg("--help")
        .output()
        .expect("Failed to execute grove");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Replace-by-source reconciliation"));
    assert!(stdout.contains("reconcile"));
}

#[test]
fn test_cli_reconcile_text() {
    let dir = TempDir::new().unwrap();
    let path = write_document(&dir, &document());

    let output = grove(&["reconcile", "--source", "gradle"], &path);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("+ Module 0#2 (gradle)"));
    assert!(stdout.contains("- ContentRoot 1#1 (gradle)"));
    assert!(stdout.contains("- SourceRoot 2#2 (local)"));
    assert!(stdout.contains("~ Library 3#0 (gradle) version"));
    assert_eq!(
        stdout.lines().last(),
        Some("3 added, 5 relabeled, 2 removed, 0 untouched, 0 trace lost")
    );
}

#[test]
fn test_cli_reconcile_json() {
    let dir = TempDir::new().unwrap();
    let path = write_document(&dir, &document());

    let output = grove(&["reconcile", "--source", "gradle", "--json"], &path);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["report"]["added"], 3);
    assert_eq!(value["report"]["removed"], 2);
    assert_eq!(value["entities"].as_array().unwrap().len(), 10);
    let library = value["entities"]
        .as_array()
        .unwrap()
        .iter()
        .find(|entity| entity["kind"] == "Library")
        .unwrap();
    assert_eq!(library["attributes"]["version"], "31");
}

#[test]
fn test_cli_dry_run_leaves_plan_only() {
    let dir = TempDir::new().unwrap();
    let path = write_document(&dir, &document());

    let output = grove(&["reconcile", "--source", "gradle", "--dry-run", "--json"], &path);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let table: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(table["adds"].as_array().unwrap().len(), 3);
    let operations = table["operations"].as_array().unwrap();
    assert_eq!(operations.len(), 6);
    assert_eq!(operations.iter().filter(|op| op["op"] == "remove").count(), 1);

    let text = grove(&["reconcile", "--source", "gradle", "--dry-run"], &path);
    let stdout = String::from_utf8_lossy(&text.stdout);
    assert!(stdout.contains("remove ContentRoot 1#1"));
    assert!(stdout.contains("add Module from incoming 0#1"));
}

#[test]
fn test_cli_seed_from_config() {
    let dir = TempDir::new().unwrap();
    let path = write_document(&dir, &document());
    let config = dir.path().join("grove.toml");
    std::fs::write(&config, "[reconcile]\nshuffle_seed = 99\n\n[log]\nlevel = \"warn\"\n").unwrap();

    let output = grove(
        &["--config", config.to_str().unwrap(), "reconcile", "--source", "gradle"],
        &path,
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.lines().last(),
        Some("3 added, 5 relabeled, 2 removed, 0 untouched, 0 trace lost")
    );
}

#[test]
fn test_cli_check() {
    let dir = TempDir::new().unwrap();
    let path = write_document(&dir, &document());

    let output = grove(&["check"], &path);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Module: 2 target, 2 incoming"));
    assert!(stdout.contains("SourceRoot: 3 target, 2 incoming"));
    assert!(stdout.contains("sources: gradle, local"));
}

#[test]
fn test_cli_rejects_bad_document() {
    let dir = TempDir::new().unwrap();
    let mut bad = document();
    bad["incoming"][0]["kind"] = json!("Widget");
    let path = write_document(&dir, &bad);

    let output = grove(&["reconcile", "--source", "gradle"], &path);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown kind: Widget"));
}

#[test]
fn test_cli_requires_a_source() {
    let dir = TempDir::new().unwrap();
    let path = write_document(&dir, &document());

    let output = grove(&["reconcile"], &path);
    assert!(!output.status.success());
}
