use std::fmt;

use super::model::{MeshData, SourceInfo};

// ---------------------------------------------------------------------------
// User hooks: filter / pre-transform at build time, transform at access time
// ---------------------------------------------------------------------------

/// User-supplied processing steps.
///
/// Every method has a pass-through default, so an implementation only
/// overrides the stages it cares about. Build hooks see the record together
/// with its [`SourceInfo`]; the diameter reaches them only through that side
/// channel and never ends up in a persisted split.
pub trait MeshHooks {
    /// Decide whether a raw record goes into its split.
    fn pre_filter(&self, _mesh: &MeshData, _source: &SourceInfo) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Rewrite a record once, before it is persisted.
    fn pre_transform(&self, mesh: MeshData, _source: &SourceInfo) -> anyhow::Result<MeshData> {
        Ok(mesh)
    }

    /// Rewrite a record every time it is fetched.
    fn transform(&self, mesh: MeshData) -> anyhow::Result<MeshData> {
        Ok(mesh)
    }

    /// Identifies the build-time behaviour. Stored next to the processed
    /// splits and compared when they are reopened.
    fn signature(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Hooks that leave every record untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl MeshHooks for NoHooks {}

impl<H: MeshHooks + ?Sized> MeshHooks for &H {
    fn pre_filter(&self, mesh: &MeshData, source: &SourceInfo) -> anyhow::Result<bool> {
        (**self).pre_filter(mesh, source)
    }

    fn pre_transform(&self, mesh: MeshData, source: &SourceInfo) -> anyhow::Result<MeshData> {
        (**self).pre_transform(mesh, source)
    }

    fn transform(&self, mesh: MeshData) -> anyhow::Result<MeshData> {
        (**self).transform(mesh)
    }

    fn signature(&self) -> String {
        (**self).signature()
    }
}

/// Which hook produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    PreFilter,
    PreTransform,
    Transform,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookStage::PreFilter => f.write_str("pre_filter"),
            HookStage::PreTransform => f.write_str("pre_transform"),
            HookStage::Transform => f.write_str("transform"),
        }
    }
}
