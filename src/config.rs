use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};

pub const ARCHIVE_NAME: &str = "FAUST_remeshed.zip";
pub const SOURCE_URL: &str = "https://github.com/rubenwiersma/hsn";
pub const MESH_COUNT: usize = 100;

const RAW_DIR: &str = "raw";
const PROCESSED_DIR: &str = "processed";
const SHAPES_DIR: &str = "shapes";
const DIAMETERS_FILE: &str = "diameters.pt";
const HOOKS_FILE: &str = "pre_hooks.json";

// ---------------------------------------------------------------------------
// Split points
// ---------------------------------------------------------------------------

/// One persisted split: every source index up to and including `last_index`
/// (and above the previous split's) lands in `<processed>/<name>.pt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSpec {
    pub name: String,
    pub last_index: usize,
}

impl SplitSpec {
    pub fn new(name: impl Into<String>, last_index: usize) -> Self {
        SplitSpec {
            name: name.into(),
            last_index,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.pt", self.name)
    }
}

fn default_splits() -> Vec<SplitSpec> {
    vec![SplitSpec::new("training", 79), SplitSpec::new("test", 99)]
}

fn default_archive_name() -> String {
    ARCHIVE_NAME.to_string()
}

fn default_mesh_count() -> usize {
    MESH_COUNT
}

// ---------------------------------------------------------------------------
// DatasetConfig – where things live and how the corpus is split
// ---------------------------------------------------------------------------

/// Location and shape of one dataset root.
///
/// ```text
/// <root>/raw/FAUST_remeshed.zip
/// <root>/raw/shapes/tr_reg_000.ply ...   (only while building)
/// <root>/raw/diameters.pt
/// <root>/processed/training.pt
/// <root>/processed/test.pt
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub root: PathBuf,
    #[serde(default = "default_archive_name")]
    pub archive_name: String,
    #[serde(default = "default_mesh_count")]
    pub mesh_count: usize,
    #[serde(default = "default_splits")]
    pub splits: Vec<SplitSpec>,
}

impl DatasetConfig {
    /// The standard 100-mesh corpus, split 80/20.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DatasetConfig {
            root: root.into(),
            archive_name: default_archive_name(),
            mesh_count: default_mesh_count(),
            splits: default_splits(),
        }
    }

    pub fn with_mesh_count(mut self, mesh_count: usize) -> Self {
        self.mesh_count = mesh_count;
        self
    }

    pub fn with_splits(mut self, splits: Vec<SplitSpec>) -> Self {
        self.splits = splits;
        self
    }

    /// Read a JSON configuration; omitted fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
        let config: DatasetConfig =
            serde_json::from_str(&text).map_err(|source| DatasetError::Config {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the splits partition `0..mesh_count` in ascending order.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DatasetError::InvalidConfig(msg));

        if self.mesh_count == 0 {
            return invalid("mesh_count must be positive".into());
        }
        if self.mesh_count > 1000 {
            return invalid(format!(
                "mesh_count {} exceeds the three-digit file pattern",
                self.mesh_count
            ));
        }
        let Some(last) = self.splits.last() else {
            return invalid("at least one split is required".into());
        };
        if last.last_index != self.mesh_count - 1 {
            return invalid(format!(
                "last split '{}' ends at {} but the corpus ends at {}",
                last.name,
                last.last_index,
                self.mesh_count - 1
            ));
        }
        for pair in self.splits.windows(2) {
            if pair[1].last_index <= pair[0].last_index {
                return invalid(format!(
                    "split '{}' must end after split '{}'",
                    pair[1].name, pair[0].name
                ));
            }
        }
        let mut names = BTreeSet::new();
        for split in &self.splits {
            if split.name.is_empty() || split.name.contains(['/', '\\']) {
                return invalid(format!("'{}' is not a usable split name", split.name));
            }
            if !names.insert(split.name.as_str()) {
                return invalid(format!("split '{}' is listed twice", split.name));
            }
        }
        Ok(())
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join(RAW_DIR)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.raw_dir().join(&self.archive_name)
    }

    pub fn shapes_dir(&self) -> PathBuf {
        self.raw_dir().join(SHAPES_DIR)
    }

    /// `<raw>/shapes/tr_reg_{index:03}.ply`
    pub fn mesh_path(&self, index: usize) -> PathBuf {
        self.shapes_dir().join(format!("tr_reg_{index:03}.ply"))
    }

    pub fn diameters_path(&self) -> PathBuf {
        self.raw_dir().join(DIAMETERS_FILE)
    }

    pub fn hooks_path(&self) -> PathBuf {
        self.processed_dir().join(HOOKS_FILE)
    }

    /// Files the user has to provide.
    pub fn raw_paths(&self) -> Vec<PathBuf> {
        vec![self.archive_path()]
    }

    /// One artifact per split, in split order.
    pub fn processed_paths(&self) -> Vec<PathBuf> {
        self.splits.iter().map(|s| self.artifact_path(s)).collect()
    }

    pub fn artifact_path(&self, split: &SplitSpec) -> PathBuf {
        self.processed_dir().join(split.file_name())
    }

    pub fn split(&self, name: &str) -> Option<&SplitSpec> {
        self.splits.iter().find(|s| s.name == name)
    }

    /// Every split artifact is present.
    pub fn is_processed(&self) -> bool {
        self.processed_paths().iter().all(|p| p.is_file())
    }
}
