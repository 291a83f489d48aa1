use std::path::PathBuf;

use anyhow::{Context, Result};

use faust_remeshed::synth::{synthetic_diameter, write_archive};
use faust_remeshed::{DatasetConfig, FaustRemeshed, NoHooks, SplitSpec};

/// Usage: `generate_sample [ROOT] [MESH_COUNT]`
///
/// Writes `<ROOT>/raw/FAUST_remeshed.zip` with synthetic meshes, then opens
/// both splits once so `<ROOT>/processed` is populated.
fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let root = PathBuf::from(args.next().unwrap_or_else(|| "faust_sample".to_string()));
    let mesh_count: usize = match args.next() {
        Some(n) => n.parse().with_context(|| format!("'{n}' is not a mesh count"))?,
        None => 100,
    };

    let mut config = DatasetConfig::new(&root).with_mesh_count(mesh_count);
    if mesh_count != 100 {
        config = config.with_splits(sample_splits(mesh_count)?);
    }
    config.validate().context("invalid sample configuration")?;

    let raw_dir = config.raw_dir();
    std::fs::create_dir_all(&raw_dir)
        .with_context(|| format!("creating {}", raw_dir.display()))?;
    let diameters: Vec<f32> = (0..mesh_count).map(synthetic_diameter).collect();
    let archive = config.archive_path();
    write_archive(&archive, 0..mesh_count, &diameters)
        .with_context(|| format!("writing {}", archive.display()))?;
    println!("Wrote {mesh_count} synthetic meshes to {}", archive.display());

    for split in &config.splits {
        let ds = FaustRemeshed::open_split(config.clone(), &split.name, NoHooks)
            .with_context(|| format!("opening split '{}'", split.name))?;
        let faces: usize = ds
            .iter()
            .map(|mesh| mesh.map(|m| m.num_faces()))
            .sum::<faust_remeshed::Result<usize>>()?;
        println!(
            "Split '{}': {} meshes, {faces} faces in total",
            ds.split_name(),
            ds.len()
        );
    }
    Ok(())
}

/// Splits keeping the 80/20 ratio of the real corpus.
fn sample_splits(mesh_count: usize) -> Result<Vec<SplitSpec>> {
    if mesh_count == 0 {
        anyhow::bail!("mesh count must be at least 1");
    }
    let train_last = (mesh_count * 4 / 5).clamp(1, mesh_count) - 1;
    Ok(if train_last + 1 < mesh_count {
        vec![
            SplitSpec::new("training", train_last),
            SplitSpec::new("test", mesh_count - 1),
        ]
    } else {
        vec![SplitSpec::new("training", mesh_count - 1)]
    })
}
