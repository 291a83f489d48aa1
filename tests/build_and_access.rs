use std::path::Path;
use std::time::SystemTime;

use faust_remeshed::synth::{synthetic_diameter, synthetic_mesh, write_archive};
use faust_remeshed::{
    AttrValue, DatasetConfig, DatasetError, FaustRemeshed, HookStage, MeshData, MeshHooks,
    NoHooks, SourceInfo, SplitSpec,
};

const SOURCE_TAG: &str = "source";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A root holding the full 100-mesh synthetic archive.
fn prepared_root() -> tempfile::TempDir {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = DatasetConfig::new(dir.path());
    std::fs::create_dir_all(config.raw_dir()).unwrap();
    let diameters: Vec<f32> = (0..100).map(synthetic_diameter).collect();
    write_archive(&config.archive_path(), 0..100, &diameters).unwrap();
    dir
}

fn open<H: MeshHooks>(root: &Path, train: bool, hooks: H) -> FaustRemeshed<H> {
    FaustRemeshed::open(DatasetConfig::new(root), train, hooks).unwrap()
}

/// Tags each record with its source index so splits can be traced back.
struct Tag;

impl MeshHooks for Tag {
    fn pre_transform(&self, mesh: MeshData, source: &SourceInfo) -> anyhow::Result<MeshData> {
        Ok(mesh.with_attr(SOURCE_TAG, AttrValue::Int(source.index as i64)))
    }
}

/// Keeps source indices accepted by `keep`, tagging the survivors.
struct KeepIf(fn(usize) -> bool);

impl MeshHooks for KeepIf {
    fn pre_filter(&self, _mesh: &MeshData, source: &SourceInfo) -> anyhow::Result<bool> {
        Ok((self.0)(source.index))
    }

    fn pre_transform(&self, mesh: MeshData, source: &SourceInfo) -> anyhow::Result<MeshData> {
        Tag.pre_transform(mesh, source)
    }
}

fn sources<H: MeshHooks>(ds: &FaustRemeshed<H>) -> Vec<i64> {
    ds.iter()
        .map(|m| m.unwrap().attr(SOURCE_TAG).and_then(AttrValue::as_i64).unwrap())
        .collect()
}

fn mtimes(paths: &[std::path::PathBuf]) -> Vec<SystemTime> {
    paths
        .iter()
        .map(|p| std::fs::metadata(p).unwrap().modified().unwrap())
        .collect()
}

#[test]
fn missing_archive_mentions_file_name() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let err = FaustRemeshed::new(dir.path(), true).err().unwrap();
    assert!(matches!(err, DatasetError::MissingRawInput { .. }));
    assert!(err.to_string().contains("FAUST_remeshed.zip"));
}

#[test]
fn full_build_without_hooks() {
    let dir = prepared_root();
    let train = FaustRemeshed::new(dir.path(), true).unwrap();
    let test = FaustRemeshed::new(dir.path(), false).unwrap();

    assert_eq!(train.len(), 80);
    assert_eq!(test.len(), 20);
    assert_eq!(train.split_name(), "training");
    assert_eq!(test.split_name(), "test");

    assert_eq!(train.get(0).unwrap().num_faces(), synthetic_mesh(0).num_faces());
    for k in 0..80 {
        assert_eq!(train.get(k).unwrap(), synthetic_mesh(k));
    }
    for k in 0..20 {
        assert_eq!(test.get(k).unwrap(), synthetic_mesh(80 + k));
    }

    let root = dir.path();
    assert!(!root.join("raw/shapes").exists());
    assert!(root.join("raw/FAUST_remeshed.zip").is_file());
    assert!(root.join("processed/training.pt").is_file());
    assert!(root.join("processed/test.pt").is_file());
}

#[test]
fn split_locality_and_order() {
    let dir = prepared_root();
    let train = open(dir.path(), true, Tag);
    let test = open(dir.path(), false, Tag);

    assert_eq!(sources(&train), (0..80).collect::<Vec<_>>());
    assert_eq!(sources(&test), (80..100).collect::<Vec<_>>());
}

#[test]
fn odd_filter_halves_both_splits() {
    let dir = prepared_root();
    let train = open(dir.path(), true, KeepIf(|i| i % 2 == 1));
    let test = open(dir.path(), false, KeepIf(|i| i % 2 == 1));

    assert_eq!(train.len(), 40);
    assert_eq!(test.len(), 10);
    assert!(sources(&train).iter().all(|&s| s % 2 == 1 && s < 80));
    assert!(sources(&test).iter().all(|&s| s % 2 == 1 && s >= 80));
}

#[test]
fn boundary_fires_when_last_index_is_filtered() {
    // 79 and 99 are both rejected; each split is still written once.
    let dir = prepared_root();
    let train = open(dir.path(), true, KeepIf(|i| i % 2 == 0));
    let test = open(dir.path(), false, KeepIf(|i| i % 2 == 0));

    assert_eq!(train.len(), 40);
    assert_eq!(test.len(), 10);
    assert_eq!(sources(&test).first(), Some(&80));
}

#[test]
fn pre_transform_sees_diameter_but_artifact_does_not() {
    struct ScaleByDiameter;

    impl MeshHooks for ScaleByDiameter {
        fn pre_transform(
            &self,
            mut mesh: MeshData,
            source: &SourceInfo,
        ) -> anyhow::Result<MeshData> {
            mesh.scale(source.diameter as f32);
            // Mimic a transform that records the diameter on the record.
            mesh.set_attr("diameter", AttrValue::Float(source.diameter));
            Ok(mesh)
        }
    }

    let dir = prepared_root();
    let train = open(dir.path(), true, ScaleByDiameter);
    let test = open(dir.path(), false, ScaleByDiameter);

    let mut expected = synthetic_mesh(0);
    expected.scale(synthetic_diameter(0));
    assert_eq!(train.get(0).unwrap().pos, expected.pos);

    for ds in [&train, &test] {
        for mesh in ds.iter() {
            assert!(!mesh.unwrap().has_attr("diameter"));
        }
    }
}

#[test]
fn dropping_everything_writes_empty_splits() {
    let dir = prepared_root();
    let train = open(dir.path(), true, KeepIf(|_| false));
    let test = open(dir.path(), false, KeepIf(|_| false));

    assert_eq!(train.len(), 0);
    assert!(test.is_empty());
    assert!(train.processed_paths().iter().all(|p| p.is_file()));
}

#[test]
fn wider_filter_keeps_at_least_as_much() {
    let narrow_dir = prepared_root();
    let wide_dir = prepared_root();
    let narrow = |i: usize| i % 3 == 0;
    let wide = |i: usize| i % 3 == 0 || i % 5 == 0;

    for train in [true, false] {
        let n = open(narrow_dir.path(), train, KeepIf(narrow)).len();
        let w = open(wide_dir.path(), train, KeepIf(wide)).len();
        assert!(w >= n, "wide {w} < narrow {n}");
    }
}

#[test]
fn repeated_access_is_stable() {
    struct Center;

    impl MeshHooks for Center {
        fn transform(&self, mut mesh: MeshData) -> anyhow::Result<MeshData> {
            let n = mesh.num_vertices() as f32;
            let mut centroid = [0.0f32; 3];
            for p in &mesh.pos {
                for (c, v) in centroid.iter_mut().zip(p) {
                    *c += v / n;
                }
            }
            for p in &mut mesh.pos {
                for (v, c) in p.iter_mut().zip(centroid) {
                    *v -= c;
                }
            }
            Ok(mesh)
        }
    }

    let dir = prepared_root();
    let ds = open(dir.path(), true, Center);
    assert_eq!(ds.get(5).unwrap(), ds.get(5).unwrap());
    assert_ne!(ds.get(5).unwrap(), synthetic_mesh(5));
}

#[test]
fn reopening_does_not_touch_processed_files() {
    let dir = prepared_root();
    let config = DatasetConfig::new(dir.path());
    faust_remeshed::build(&config, &NoHooks).unwrap();
    let before = mtimes(&config.processed_paths());

    let train = open(dir.path(), true, NoHooks);
    let test = open(dir.path(), false, NoHooks);
    assert_eq!(train.len(), 80);
    assert_eq!(test.len(), 20);

    assert_eq!(mtimes(&config.processed_paths()), before);
    assert!(!config.shapes_dir().exists());
}

#[test]
fn reopening_with_other_hooks_keeps_processed_files() {
    let dir = prepared_root();
    let config = DatasetConfig::new(dir.path());
    faust_remeshed::build(&config, &NoHooks).unwrap();
    let mut watched = config.processed_paths();
    watched.push(config.hooks_path());
    let before = mtimes(&watched);
    let record = std::fs::read_to_string(config.hooks_path()).unwrap();

    let train = open(dir.path(), true, Tag);
    let test = open(dir.path(), false, Tag);
    assert_eq!(train.len(), 80);
    assert_eq!(test.len(), 20);
    // Served from the files built without hooks.
    assert!(train.iter().all(|m| !m.unwrap().has_attr(SOURCE_TAG)));
    assert_eq!(train.get(3).unwrap(), synthetic_mesh(3));

    assert_eq!(mtimes(&watched), before);
    assert_eq!(std::fs::read_to_string(config.hooks_path()).unwrap(), record);
    assert!(!config.shapes_dir().exists());
}

#[test]
fn reopening_without_archive_uses_processed_files() {
    let dir = prepared_root();
    let config = DatasetConfig::new(dir.path());
    faust_remeshed::build(&config, &NoHooks).unwrap();
    std::fs::remove_file(config.archive_path()).unwrap();

    assert_eq!(open(dir.path(), false, NoHooks).len(), 20);
}

fn hook_error(err: DatasetError) -> (HookStage, usize, String) {
    match err {
        DatasetError::Hook {
            stage,
            index,
            source,
        } => (stage, index, source.to_string()),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn hook_errors_propagate() {
    struct Fails;

    impl MeshHooks for Fails {
        fn pre_transform(
            &self,
            _mesh: MeshData,
            source: &SourceInfo,
        ) -> anyhow::Result<MeshData> {
            anyhow::bail!("cannot handle mesh {}", source.index)
        }
    }

    let dir = prepared_root();
    let err = FaustRemeshed::open(DatasetConfig::new(dir.path()), true, Fails)
        .err()
        .unwrap();
    assert_eq!(
        hook_error(err),
        (HookStage::PreTransform, 0, "cannot handle mesh 0".to_string())
    );
    assert!(!DatasetConfig::new(dir.path()).is_processed());
}

#[test]
fn pre_filter_errors_name_their_stage() {
    struct RejectsLate;

    impl MeshHooks for RejectsLate {
        fn pre_filter(&self, _mesh: &MeshData, source: &SourceInfo) -> anyhow::Result<bool> {
            if source.index == 85 {
                anyhow::bail!("no opinion on mesh {}", source.index);
            }
            Ok(true)
        }
    }

    let dir = prepared_root();
    let err = FaustRemeshed::open(DatasetConfig::new(dir.path()), false, RejectsLate)
        .err()
        .unwrap();
    assert_eq!(
        hook_error(err),
        (HookStage::PreFilter, 85, "no opinion on mesh 85".to_string())
    );
    // The training split was complete but nothing is moved into place.
    let config = DatasetConfig::new(dir.path());
    assert!(!config.is_processed());
    assert!(config.processed_paths().iter().all(|p| !p.exists()));
}

#[test]
fn transform_errors_report_split_position() {
    struct FailsOnThird;

    impl MeshHooks for FailsOnThird {
        fn transform(&self, mesh: MeshData) -> anyhow::Result<MeshData> {
            if mesh.num_vertices() == 6 {
                anyhow::bail!("pentagon base");
            }
            Ok(mesh)
        }
    }

    let dir = prepared_root();
    let test = open(dir.path(), false, FailsOnThird);
    assert_eq!(test.len(), 20);
    // Source 82 is the first test mesh with a five-corner base.
    assert!(test.get(0).is_ok());
    assert_eq!(
        hook_error(test.get(2).unwrap_err()),
        (HookStage::Transform, 2, "pentagon base".to_string())
    );
    assert_eq!(test.iter().filter(|m| m.is_err()).count(), 5);
}

#[test]
fn missing_mesh_is_fatal() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = DatasetConfig::new(dir.path());
    std::fs::create_dir_all(config.raw_dir()).unwrap();
    let diameters: Vec<f32> = (0..100).map(synthetic_diameter).collect();
    write_archive(
        &config.archive_path(),
        (0..100).filter(|&i| i != 42),
        &diameters,
    )
    .unwrap();

    let err = FaustRemeshed::open(config.clone(), true, NoHooks).err().unwrap();
    match err {
        DatasetError::MissingMesh { path } => assert!(path.ends_with("tr_reg_042.ply")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!config.is_processed());
}

#[test]
fn diameter_table_must_match_mesh_count() {
    init_logging();
    for count in [50, 101] {
        let dir = tempfile::tempdir().unwrap();
        let config = DatasetConfig::new(dir.path());
        std::fs::create_dir_all(config.raw_dir()).unwrap();
        let diameters: Vec<f32> = (0..count).map(synthetic_diameter).collect();
        write_archive(&config.archive_path(), 0..100, &diameters).unwrap();

        let err = FaustRemeshed::open(config.clone(), true, NoHooks).err().unwrap();
        assert!(
            matches!(err, DatasetError::CorruptDiameters { .. }),
            "{count} diameters: {err}"
        );
        assert!(!config.is_processed());
    }
}

#[test]
fn three_way_split_on_small_corpus() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = DatasetConfig::new(dir.path())
        .with_mesh_count(10)
        .with_splits(vec![
            SplitSpec::new("training", 5),
            SplitSpec::new("val", 7),
            SplitSpec::new("test", 9),
        ]);
    std::fs::create_dir_all(config.raw_dir()).unwrap();
    let diameters: Vec<f32> = (0..10).map(synthetic_diameter).collect();
    write_archive(&config.archive_path(), 0..10, &diameters).unwrap();

    let val = FaustRemeshed::open_split(config.clone(), "val", Tag).unwrap();
    assert_eq!(sources(&val), vec![6, 7]);
    let test = FaustRemeshed::open(config.clone(), false, Tag).unwrap();
    assert_eq!(sources(&test), vec![8, 9]);
    let train = FaustRemeshed::open(config, true, Tag).unwrap();
    assert_eq!(train.len(), 6);

    let slices = train.collated().slices();
    assert_eq!(slices["pos"].len(), 7);
    assert_eq!(slices[SOURCE_TAG], (0..=6).collect::<Vec<_>>());
}
