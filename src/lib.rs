//! Loader for the remeshed FAUST humans dataset.
//!
//! 100 watertight meshes (10 subjects in 10 poses) shipped as
//! `FAUST_remeshed.zip` are unpacked once, optionally filtered and
//! pre-transformed, and stored as two collated splits under
//! `<root>/processed`. Opening the dataset afterwards only loads the selected
//! split.
//!
//! ```no_run
//! use faust_remeshed::FaustRemeshed;
//!
//! let train = FaustRemeshed::new("data/faust", true)?;
//! let first = train.get(0)?;
//! println!("{} meshes, first has {} faces", train.len(), first.num_faces());
//! # Ok::<(), faust_remeshed::DatasetError>(())
//! ```

pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod synth;

pub use config::{DatasetConfig, SplitSpec};
pub use data::collate::{collate, Collated};
pub use data::hooks::{HookStage, MeshHooks, NoHooks};
pub use data::model::{AttrKind, AttrValue, MeshData, SourceInfo};
pub use dataset::{build, FaustRemeshed};
pub use error::{DatasetError, Result};
