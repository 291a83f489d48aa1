/// Data layer: record types, readers, hooks, collation and persistence.
///
/// Architecture:
/// ```text
///  FAUST_remeshed.zip
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  unzip, tr_reg_XXX.ply → MeshData, diameters.pt → Vec<f64>
///   │  (torch)  │  tensor view (storage key, offset, size) from data.pkl
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  hooks    │  pre_filter / pre_transform (with SourceInfo), transform
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ collate   │  Vec<MeshData> → one Arrow batch + slice index
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  store    │  Parquet on disk (training.pt / test.pt)
///   └──────────┘
/// ```

pub mod collate;
pub mod hooks;
pub mod loader;
pub mod model;
pub mod store;
pub mod torch;
