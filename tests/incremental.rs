use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use prefabricator::{
    Asset, AssetId, BuildAllocator, BuildLedger, BuildRecords, CacheSet, ErrorKind, GroupContext,
    Groups, NodeData, NodeError, PlanAllocator, Prefab, Prefabricator, Settings, Strategy, Target,
};

/// Builds one prefab per group at `<group>/out.pfb`.
struct Trees {
    force: bool,
    fail_on: Option<&'static str>,
}

impl Trees {
    fn new() -> Self {
        Self {
            force: false,
            fail_on: None,
        }
    }

    fn forced() -> Self {
        Self {
            force: true,
            fail_on: None,
        }
    }

    fn failing_on(group: &'static str) -> Self {
        Self {
            force: false,
            fail_on: Some(group),
        }
    }
}

impl Strategy for Trees {
    fn plan(&self, ctx: &GroupContext<'_>, allocate: &mut PlanAllocator<'_>) -> Result<(), NodeError> {
        if ctx.inputs.is_empty() {
            return Err(ctx.reject("a tree needs at least one mesh"));
        }

        allocate.allocate(&format!("{}/out.pfb", ctx.group))?;
        Ok(())
    }

    fn build(
        &self,
        ctx: &GroupContext<'_>,
        allocate: &mut BuildAllocator<'_, dyn BuildRecords + '_>,
    ) -> anyhow::Result<()> {
        if self.fail_on == Some(ctx.group) {
            anyhow::bail!("mesh of {} is corrupted", ctx.group);
        }

        let prefab = Prefab::from_inputs(ctx.group, ctx.inputs);
        allocate.allocate(&prefab, &format!("{}/out.pfb", ctx.group), self.force)?;
        Ok(())
    }
}

struct Workspace {
    _guard: tempfile::TempDir,
    root: Utf8PathBuf,
    target: Target,
    node: NodeData,
}

impl Workspace {
    fn new() -> Self {
        let guard = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(guard.path().to_path_buf()).unwrap();

        Self {
            _guard: guard,
            root,
            target: Target::new("linux"),
            node: NodeData::new("trees", "Trees"),
        }
    }

    fn settings(&self) -> Settings {
        Settings {
            cache_root: self.root.join("cache"),
            ledger: self.root.join("prefabs.ledger"),
            ..Settings::default()
        }
    }

    fn prefabricator<S: Strategy>(&self, strategy: S, ledger: BuildLedger) -> Prefabricator<S> {
        Prefabricator::new(strategy, ledger).with_settings(self.settings())
    }

    fn output_dir(&self) -> Utf8PathBuf {
        self.root.join("cache").join("trees").join("linux")
    }

    fn out(&self, group: &str) -> Utf8PathBuf {
        self.output_dir().join(group).join("out.pfb")
    }

    fn import(&self, name: &str, content: &str) -> Asset {
        let path = self.root.join("imported").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        Asset::imported(AssetId::new(), format!("raw/{name}"), path, "model")
    }

    fn groups(&self, keys: &[&str]) -> Groups {
        keys.iter()
            .map(|key| (key.to_string(), vec![self.import(&format!("{key}.fbx"), key)]))
            .collect()
    }
}

/// Every file below `dir`, sidecars included, with their contents.
fn snapshot(dir: &Utf8Path) -> Vec<(Utf8PathBuf, String)> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(dir.as_str()));
    let mut files: Vec<_> = glob::glob(&pattern)
        .unwrap()
        .map(|entry| Utf8PathBuf::try_from(entry.unwrap()).unwrap())
        .filter(|path| path.is_file())
        .map(|path| {
            let content = fs::read_to_string(&path).unwrap();
            (path, content)
        })
        .collect();

    files.sort();
    files
}

fn set(paths: &[Utf8PathBuf]) -> CacheSet {
    paths.iter().cloned().collect()
}

#[test]
fn unresolved_input_fails_both_phases_without_writes() {
    let ws = Workspace::new();
    let mut groups = ws.groups(&["g1"]);
    groups.insert("g2".into(), vec![Asset::unresolved("raw/missing.fbx")]);

    let mut node = ws.prefabricator(Trees::new(), BuildLedger::new());

    let err = node.validate(&ws.target, &ws.node, &groups).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::UnresolvedInput { paths } if paths == &["raw/missing.fbx"]));
    assert!(err.to_string().contains("raw/missing.fbx are not imported yet"));

    let err = node
        .execute(&ws.target, &ws.node, &groups, &CacheSet::new())
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::UnresolvedInput { .. }));
    assert_eq!(err.node_id, "trees");

    assert!(!ws.root.join("cache").exists());
    assert!(node.records().is_empty());
}

#[test]
fn plan_rejection_names_the_group() {
    let ws = Workspace::new();
    let mut groups = ws.groups(&["g1"]);
    groups.insert("empty".into(), Vec::new());

    let err = ws
        .prefabricator(Trees::new(), BuildLedger::new())
        .validate(&ws.target, &ws.node, &groups)
        .unwrap_err();

    assert!(matches!(err.kind(), ErrorKind::PlanRejected { group, .. } if group == "empty"));
}

#[test]
fn validate_matches_execute_paths() {
    let ws = Workspace::new();
    let groups = ws.groups(&["g1", "g2"]);
    let mut node = ws.prefabricator(Trees::new(), BuildLedger::new());

    let planned = node.validate(&ws.target, &ws.node, &groups).unwrap();
    let built = node
        .execute(&ws.target, &ws.node, &groups, &CacheSet::new())
        .unwrap();

    assert_eq!(planned.report.generated, built.report.generated);
    assert_eq!(planned.groups.len(), built.groups.len());
}

#[test]
fn rebuild_without_changes_only_hits_the_cache() {
    let ws = Workspace::new();
    let groups = ws.groups(&["g1", "g2"]);
    let mut node = ws.prefabricator(Trees::new(), BuildLedger::new());

    let first = node
        .execute(&ws.target, &ws.node, &groups, &CacheSet::new())
        .unwrap();
    let before = snapshot(&ws.output_dir());

    let second = node
        .execute(&ws.target, &ws.node, &groups, &set(&first.report.generated))
        .unwrap();

    assert_eq!(first.report.generated, vec![ws.out("g1"), ws.out("g2")]);
    assert!(first.used_cache.is_empty());

    assert!(second.report.generated.is_empty());
    assert_eq!(second.used_cache, set(&first.report.generated));
    assert!(second.report.pruned.is_empty());
    assert_eq!(snapshot(&ws.output_dir()), before);

    for key in ["g1", "g2"] {
        let paths = |output: &prefabricator::NodeOutput| {
            output.groups[key]
                .iter()
                .map(|asset| asset.import_from.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(paths(&first), paths(&second));
    }
}

#[test]
fn untouched_cache_entries_are_pruned() {
    let ws = Workspace::new();
    let mut groups = ws.groups(&["a", "b", "c"]);
    let mut node = ws.prefabricator(Trees::new(), BuildLedger::new());

    let first = node
        .execute(&ws.target, &ws.node, &groups, &CacheSet::new())
        .unwrap();
    let a = fs::read_to_string(ws.out("a")).unwrap();
    let b = fs::read_to_string(ws.out("b")).unwrap();

    groups.remove("c");
    let second = node
        .execute(&ws.target, &ws.node, &groups, &set(&first.report.generated))
        .unwrap();

    assert_eq!(second.report.pruned, vec![ws.out("c")]);
    assert!(!ws.out("c").exists());
    assert!(!ws.output_dir().join("c/out.pfb.meta").exists());
    assert!(!ws.output_dir().join("c").exists());
    assert_eq!(fs::read_to_string(ws.out("a")).unwrap(), a);
    assert_eq!(fs::read_to_string(ws.out("b")).unwrap(), b);
    assert!(!node.records().contains(&ws.out("c")));
    assert_eq!(node.records().len(), 2);
}

#[test]
fn forced_build_always_regenerates() {
    let ws = Workspace::new();
    let groups = ws.groups(&["g1"]);
    let mut node = ws.prefabricator(Trees::forced(), BuildLedger::new());

    let first = node
        .execute(&ws.target, &ws.node, &groups, &CacheSet::new())
        .unwrap();
    let first_id = first.groups["g1"][0].id;

    let second = node
        .execute(&ws.target, &ws.node, &groups, &set(&first.report.generated))
        .unwrap();

    assert_eq!(second.report.generated, vec![ws.out("g1")]);
    assert!(second.used_cache.is_empty());
    assert!(second.report.pruned.is_empty());

    let artifact = &second.groups["g1"][0];
    assert!(artifact.is_new);
    assert!(!artifact.is_cached);
    assert_ne!(artifact.id, first_id);
    assert!(ws.out("g1").exists());
}

#[test]
fn failing_group_commits_nothing() {
    let ws = Workspace::new();

    let mut node = ws.prefabricator(Trees::new(), BuildLedger::new());
    let first = node
        .execute(&ws.target, &ws.node, &ws.groups(&["g0"]), &CacheSet::new())
        .unwrap();
    let ledger = node.into_records();
    let before = snapshot(&ws.output_dir());

    let mut node = ws.prefabricator(Trees::failing_on("g2"), ledger.clone());
    let err = node
        .execute(
            &ws.target,
            &ws.node,
            &ws.groups(&["g1", "g2", "g3"]),
            &set(&first.report.generated),
        )
        .unwrap_err();

    match err.kind() {
        ErrorKind::BuildFailed { group, cause } => {
            assert_eq!(group, "g2");
            assert!(cause.to_string().contains("corrupted"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // g0 would have been pruned, g1 was written before the failure
    let after = snapshot(&ws.output_dir());
    assert!(ws.out("g0").exists());
    assert!(ws.out("g1").exists());
    assert!(!ws.out("g3").exists());
    assert!(before.iter().all(|entry| after.contains(entry)));
    assert_eq!(after.len(), before.len() + 2);

    assert_eq!(node.records(), &ledger);
}

#[test]
fn group_output_lists_artifacts_then_inputs() {
    let ws = Workspace::new();
    let groups = ws.groups(&["g1"]);
    let asset_x = groups["g1"][0].clone();
    let mut node = ws.prefabricator(Trees::new(), BuildLedger::new());

    let first = node
        .execute(&ws.target, &ws.node, &groups, &CacheSet::new())
        .unwrap();

    let g1 = &first.groups["g1"];
    assert_eq!(g1.len(), 2);
    assert_eq!(g1[0].import_from.as_deref(), Some(ws.out("g1").as_path()));
    assert_eq!(g1[0].file_name, "out.pfb");
    assert_eq!(g1[0].asset_type, "pfb");
    assert!(g1[0].is_new && !g1[0].is_cached);
    assert_eq!(g1[1], asset_x);
    assert!(first.used_cache.is_empty());

    let second = node
        .execute(&ws.target, &ws.node, &groups, &CacheSet::from([ws.out("g1")]))
        .unwrap();

    let g1 = &second.groups["g1"];
    assert_eq!(second.used_cache, CacheSet::from([ws.out("g1")]));
    assert!(second.report.generated.is_empty());
    assert!(!g1[0].is_new && g1[0].is_cached);
    assert_eq!(g1[0].id, first.groups["g1"][0].id);
    assert_eq!(g1[1], asset_x);
}

#[test]
fn changed_input_invalidates_its_group() {
    let ws = Workspace::new();
    let groups = ws.groups(&["g1", "g2"]);
    let mut node = ws.prefabricator(Trees::new(), BuildLedger::new());

    let first = node
        .execute(&ws.target, &ws.node, &groups, &CacheSet::new())
        .unwrap();

    let changed = groups["g2"][0].import_from.clone().unwrap();
    fs::write(&changed, "g2, now with leaves").unwrap();

    let second = node
        .execute(&ws.target, &ws.node, &groups, &set(&first.report.generated))
        .unwrap();

    assert_eq!(second.report.generated, vec![ws.out("g2")]);
    assert_eq!(second.report.reused, vec![ws.out("g1")]);
}

#[test]
fn ledger_survives_between_processes() {
    let ws = Workspace::new();
    let settings = ws.settings();
    let groups = ws.groups(&["g1"]);

    let mut node = ws.prefabricator(Trees::new(), BuildLedger::open(&settings.ledger).unwrap());
    let first = node
        .execute(&ws.target, &ws.node, &groups, &CacheSet::new())
        .unwrap();
    node.records().save(&settings.ledger).unwrap();

    let mut node = ws.prefabricator(Trees::new(), BuildLedger::open(&settings.ledger).unwrap());
    let second = node
        .execute(&ws.target, &ws.node, &groups, &set(&first.report.generated))
        .unwrap();

    assert_eq!(second.used_cache, CacheSet::from([ws.out("g1")]));
}

#[test]
fn inputs_listed_as_cached_are_never_deleted() {
    let ws = Workspace::new();
    let groups = ws.groups(&["g1"]);
    let input = groups["g1"][0].import_from.clone().unwrap();
    let mut node = ws.prefabricator(Trees::new(), BuildLedger::new());

    let output = node
        .execute(&ws.target, &ws.node, &groups, &CacheSet::from([input.clone()]))
        .unwrap();

    assert!(output.report.pruned.is_empty());
    assert!(input.exists());
}

#[test]
fn damaged_sidecars_never_block_the_node() {
    let ws = Workspace::new();
    let mut groups = ws.groups(&["kept", "dropped"]);
    let mut node = ws.prefabricator(Trees::new(), BuildLedger::new());

    let first = node
        .execute(&ws.target, &ws.node, &groups, &CacheSet::new())
        .unwrap();

    for group in ["kept", "dropped"] {
        fs::write(ws.output_dir().join(group).join("out.pfb.meta"), "").unwrap();
    }

    groups.remove("dropped");
    let second = node
        .execute(&ws.target, &ws.node, &groups, &set(&first.report.generated))
        .unwrap();

    assert_eq!(second.used_cache, CacheSet::from([ws.out("kept")]));
    assert_eq!(second.report.pruned, vec![ws.out("dropped")]);
    assert!(!ws.output_dir().join("dropped").exists());

    let third = node
        .execute(&ws.target, &ws.node, &groups, &set(&second.report.reused))
        .unwrap();

    // the restored sidecar keeps the identity stable from now on
    assert_eq!(third.groups["kept"][0].id, second.groups["kept"][0].id);
}
