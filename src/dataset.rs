use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{DatasetConfig, SplitSpec, SOURCE_URL};
use crate::data::collate::{collate, Collated};
use crate::data::hooks::{HookStage, MeshHooks, NoHooks};
use crate::data::loader::{extract_archive, load_diameters, read_mesh};
use crate::data::model::{MeshData, SourceInfo, DIAMETER_KEY};
use crate::data::store::{load_collated, save_collated};
use crate::error::{DatasetError, Result};

// ---------------------------------------------------------------------------
// FaustRemeshed – build once, then serve one split from memory
// ---------------------------------------------------------------------------

/// The remeshed FAUST humans: 100 watertight meshes of 10 subjects in 10
/// poses, split into `training` (meshes 0..=79) and `test` (80..=99).
///
/// Records hold faces rather than edges; `pos` and `face` can be turned into a
/// graph or sampled into a point cloud by the hooks.
///
/// The first time a root is opened the raw archive is unpacked and every mesh
/// is read, filtered and pre-transformed, then each split is collated and
/// written under `<root>/processed`. Later opens only load the selected split.
pub struct FaustRemeshed<H = NoHooks> {
    config: DatasetConfig,
    split: SplitSpec,
    data: Collated,
    hooks: H,
}

#[derive(Debug, Serialize, Deserialize)]
struct HookRecord {
    signature: String,
}

impl FaustRemeshed<NoHooks> {
    /// Open the standard layout under `root` without hooks.
    pub fn new(root: impl Into<PathBuf>, train: bool) -> Result<Self> {
        Self::open(DatasetConfig::new(root), train, NoHooks)
    }
}

impl<H: MeshHooks> FaustRemeshed<H> {
    /// Open the first configured split when `train` is set, the last otherwise.
    pub fn open(config: DatasetConfig, train: bool, hooks: H) -> Result<Self> {
        config.validate()?;
        let split = if train {
            config.splits.first()
        } else {
            config.splits.last()
        };
        let name = split.map(|s| s.name.clone()).unwrap_or_default();
        Self::open_split(config, &name, hooks)
    }

    /// Open the split called `name`, building the processed files if needed.
    pub fn open_split(config: DatasetConfig, name: &str, hooks: H) -> Result<Self> {
        config.validate()?;
        let split = config
            .split(name)
            .cloned()
            .ok_or_else(|| DatasetError::InvalidConfig(format!("no split named '{name}'")))?;

        if config.is_processed() {
            check_hook_signature(&config, &hooks);
        } else {
            build(&config, &hooks)?;
        }

        let path = config.artifact_path(&split);
        let data = load_collated(&path)?;
        log::info!(
            "Loaded split '{}' with {} meshes from {}",
            split.name,
            data.len(),
            path.display()
        );

        Ok(FaustRemeshed {
            config,
            split,
            data,
            hooks,
        })
    }

    /// Number of meshes in the loaded split.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The `index`-th mesh of the split with the `transform` hook applied.
    pub fn get(&self, index: usize) -> Result<MeshData> {
        let mesh = self.data.get(index)?;
        self.hooks
            .transform(mesh)
            .map_err(|source| DatasetError::Hook {
                stage: HookStage::Transform,
                index,
                source,
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<MeshData>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    pub fn split_name(&self) -> &str {
        &self.split.name
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// The loaded split as one batch with its slice index.
    pub fn collated(&self) -> &Collated {
        &self.data
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.config.raw_dir()
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.config.processed_dir()
    }

    pub fn raw_paths(&self) -> Vec<PathBuf> {
        self.config.raw_paths()
    }

    pub fn processed_paths(&self) -> Vec<PathBuf> {
        self.config.processed_paths()
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Turn the raw archive into one processed file per split.
///
/// Splits are first written next to their final path and only moved into
/// place once all of them succeeded.
pub fn build<H: MeshHooks + ?Sized>(config: &DatasetConfig, hooks: &H) -> Result<()> {
    config.validate()?;
    let archive = config.archive_path();
    if !archive.is_file() {
        return Err(DatasetError::MissingRawInput {
            archive: config.archive_name.clone(),
            url: SOURCE_URL,
            raw_dir: config.raw_dir(),
        });
    }

    log::info!("Processing {} ...", archive.display());
    let raw_dir = config.raw_dir();
    extract_archive(&archive, &raw_dir)?;

    for index in 0..config.mesh_count {
        let path = config.mesh_path(index);
        if !path.is_file() {
            return Err(DatasetError::MissingMesh { path });
        }
    }
    let diameters_path = config.diameters_path();
    let diameters = load_diameters(&diameters_path)?;
    if diameters.len() != config.mesh_count {
        return Err(DatasetError::CorruptDiameters {
            path: diameters_path,
            reason: format!(
                "{} entries for {} meshes",
                diameters.len(),
                config.mesh_count
            ),
        });
    }

    let processed_dir = config.processed_dir();
    std::fs::create_dir_all(&processed_dir).map_err(|e| DatasetError::io(&processed_dir, e))?;

    let mut pending: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(config.splits.len());
    let mut accumulated: Vec<MeshData> = Vec::new();
    let mut splits = config.splits.iter();
    let mut current = splits.next();

    for (index, &diameter) in diameters.iter().enumerate().take(config.mesh_count) {
        let info = SourceInfo { index, diameter };
        let mesh = read_mesh(&config.mesh_path(index))?;

        let keep = hooks
            .pre_filter(&mesh, &info)
            .map_err(|source| DatasetError::Hook {
                stage: HookStage::PreFilter,
                index,
                source,
            })?;
        if keep {
            let mut mesh = hooks
                .pre_transform(mesh, &info)
                .map_err(|source| DatasetError::Hook {
                    stage: HookStage::PreTransform,
                    index,
                    source,
                })?;
            mesh.remove_attr(DIAMETER_KEY);
            accumulated.push(mesh);
        } else {
            log::debug!("Mesh {index:03} rejected by pre_filter");
        }
        log::debug!("Mesh {:03}/{:03} done", index + 1, config.mesh_count);

        if let Some(split) = current.filter(|s| s.last_index == index) {
            let target = config.artifact_path(split);
            let partial = partial_path(&target);
            let collated = collate(&accumulated)?;
            save_collated(&partial, &collated)?;
            log::info!(
                "Wrote split '{}' ({} meshes) to {}",
                split.name,
                collated.len(),
                partial.display()
            );
            pending.push((partial, target));
            accumulated.clear();
            current = splits.next();
        }
    }

    for (partial, target) in &pending {
        std::fs::rename(partial, target).map_err(|e| DatasetError::io(target, e))?;
    }
    write_hook_record(config, hooks)?;

    let shapes = config.shapes_dir();
    std::fs::remove_dir_all(&shapes).map_err(|e| DatasetError::io(&shapes, e))?;
    log::info!("Done processing {} splits", pending.len());
    Ok(())
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}

fn write_hook_record<H: MeshHooks + ?Sized>(config: &DatasetConfig, hooks: &H) -> Result<()> {
    let path = config.hooks_path();
    let record = HookRecord {
        signature: hooks.signature(),
    };
    let json =
        serde_json::to_string_pretty(&record).map_err(|e| DatasetError::io(&path, e.into()))?;
    std::fs::write(&path, json).map_err(|e| DatasetError::io(&path, e))
}

/// Warn when the processed files were built with other hooks than the
/// current ones. Never writes.
fn check_hook_signature<H: MeshHooks + ?Sized>(config: &DatasetConfig, hooks: &H) {
    let path = config.hooks_path();
    let Ok(text) = std::fs::read_to_string(&path) else {
        return;
    };
    match serde_json::from_str::<HookRecord>(&text) {
        Ok(record) if record.signature != hooks.signature() => log::warn!(
            "The pre-processing hooks differ from the ones used to build {} \
             (`{}` vs `{}`). Delete that directory to rebuild with the current hooks.",
            config.processed_dir().display(),
            record.signature,
            hooks.signature()
        ),
        Ok(_) => {}
        Err(e) => log::warn!("Ignoring unreadable {}: {e}", path.display()),
    }
}
