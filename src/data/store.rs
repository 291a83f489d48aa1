use std::fs::File;
use std::path::Path;

use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::errors::ParquetError;

use super::collate::Collated;
use crate::error::{DatasetError, Result};

/// Write a collated split to `path` as a single Parquet file.
pub fn save_collated(path: &Path, collated: &Collated) -> Result<()> {
    let persistence = |source: ParquetError| DatasetError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(|e| DatasetError::io(path, e))?;
    let mut writer = ArrowWriter::try_new(file, collated.schema(), None).map_err(persistence)?;
    if !collated.is_empty() {
        writer.write(collated.batch()).map_err(persistence)?;
    }
    writer.close().map_err(persistence)?;
    Ok(())
}

/// Read a split written by [`save_collated`] back into memory.
pub fn load_collated(path: &Path) -> Result<Collated> {
    let artifact = |source: ParquetError| DatasetError::Artifact {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|e| DatasetError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(artifact)?;
    let schema = builder.schema().clone();
    let reader = builder.build().map_err(artifact)?;

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    let batch = arrow::compute::concat_batches(&schema, &batches)?;
    Collated::from_batch(batch)
}
