use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float32Builder, Float64Array, Float64Builder,
    Int64Array, ListArray, ListBuilder, StringArray, UInt32Builder,
};
use arrow::datatypes::{
    DataType, Field, Float32Type, Float64Type, Int64Type, Schema, SchemaRef, UInt32Type,
};
use arrow::record_batch::RecordBatch;

use super::model::{AttrKind, AttrValue, MeshData, FACE_KEY, POS_KEY};
use crate::error::{DatasetError, Result};

// ---------------------------------------------------------------------------
// Collated – many records in one columnar batch
// ---------------------------------------------------------------------------

/// An ordered sequence of [`MeshData`] records packed into one Arrow batch.
///
/// Layout, one row per record:
/// * `pos`  – `List<Float32>`, flattened xyz triples
/// * `face` – `List<UInt32>`, flattened triangles (indices local to the record)
/// * one column per attribute: `Float64`, `Int64`, `Boolean`, `Utf8`, or
///   `List<Float64>` for float vectors
///
/// List offsets are the slice index: record `k` occupies
/// `offsets[k]..offsets[k + 1]` of the concatenated values.
#[derive(Debug, Clone)]
pub struct Collated {
    batch: RecordBatch,
}

fn list_of(item: DataType) -> DataType {
    DataType::List(Arc::new(Field::new("item", item, true)))
}

fn attr_type(kind: AttrKind) -> DataType {
    match kind {
        AttrKind::Float => DataType::Float64,
        AttrKind::Int => DataType::Int64,
        AttrKind::Bool => DataType::Boolean,
        AttrKind::Text => DataType::Utf8,
        AttrKind::Floats => list_of(DataType::Float64),
    }
}

fn base_fields() -> Vec<Field> {
    vec![
        Field::new(POS_KEY, list_of(DataType::Float32), false),
        Field::new(FACE_KEY, list_of(DataType::UInt32), false),
    ]
}

/// Pack `records` into a single batch, preserving order.
///
/// All records must carry the same attribute names with the same kinds.
pub fn collate(records: &[MeshData]) -> Result<Collated> {
    let schema_attrs: BTreeMap<&str, AttrKind> = match records.first() {
        Some(first) => first
            .attrs
            .iter()
            .map(|(name, value)| (name.as_str(), value.kind()))
            .collect(),
        None => BTreeMap::new(),
    };

    for name in schema_attrs.keys() {
        if *name == POS_KEY || *name == FACE_KEY {
            return Err(DatasetError::SchemaMismatch(format!(
                "attribute name '{name}' is reserved"
            )));
        }
    }
    for (row, record) in records.iter().enumerate() {
        if record.attrs.len() != schema_attrs.len() {
            return Err(DatasetError::SchemaMismatch(format!(
                "record {row} has {} attributes, record 0 has {}",
                record.attrs.len(),
                schema_attrs.len()
            )));
        }
        for (name, value) in &record.attrs {
            match schema_attrs.get(name.as_str()) {
                Some(kind) if *kind == value.kind() => {}
                Some(kind) => {
                    return Err(DatasetError::SchemaMismatch(format!(
                        "record {row}: '{name}' is {} but record 0 has {kind}",
                        value.kind()
                    )))
                }
                None => {
                    return Err(DatasetError::SchemaMismatch(format!(
                        "record {row}: unexpected attribute '{name}'"
                    )))
                }
            }
        }
    }

    let mut pos_builder = ListBuilder::new(Float32Builder::new());
    let mut face_builder = ListBuilder::new(UInt32Builder::new());
    for record in records {
        let values = pos_builder.values();
        for p in &record.pos {
            values.append_slice(p);
        }
        pos_builder.append(true);

        let values = face_builder.values();
        for f in &record.face {
            values.append_slice(f);
        }
        face_builder.append(true);
    }

    let mut fields = base_fields();
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(pos_builder.finish()),
        Arc::new(face_builder.finish()),
    ];

    for (name, kind) in &schema_attrs {
        let cells = records.iter().map(|r| &r.attrs[*name]);
        let column: ArrayRef = match kind {
            AttrKind::Float => Arc::new(Float64Array::from_iter_values(
                cells.filter_map(AttrValue::as_f64),
            )),
            AttrKind::Int => Arc::new(Int64Array::from_iter_values(
                cells.filter_map(AttrValue::as_i64),
            )),
            AttrKind::Bool => Arc::new(BooleanArray::from(
                cells
                    .filter_map(|v| match v {
                        AttrValue::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            AttrKind::Text => Arc::new(StringArray::from_iter_values(cells.filter_map(
                |v| match v {
                    AttrValue::Text(s) => Some(s.as_str()),
                    _ => None,
                },
            ))),
            AttrKind::Floats => {
                let mut builder = ListBuilder::new(Float64Builder::new());
                for cell in cells {
                    if let AttrValue::Floats(values) = cell {
                        builder.values().append_slice(values);
                    }
                    builder.append(true);
                }
                Arc::new(builder.finish())
            }
        };
        fields.push(Field::new(*name, attr_type(*kind), false));
        columns.push(column);
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    Ok(Collated { batch })
}

impl Collated {
    /// An empty batch with only the geometry columns.
    pub fn empty() -> Self {
        Collated {
            batch: RecordBatch::new_empty(Arc::new(Schema::new(base_fields()))),
        }
    }

    /// Wrap a batch read back from disk, checking the geometry columns.
    pub fn from_batch(batch: RecordBatch) -> Result<Self> {
        for key in [POS_KEY, FACE_KEY] {
            let column = batch
                .column_by_name(key)
                .ok_or_else(|| DatasetError::CorruptArtifact(format!("missing '{key}' column")))?;
            if column.as_list_opt::<i32>().is_none() {
                return Err(DatasetError::CorruptArtifact(format!(
                    "'{key}' column is {}, expected a list",
                    column.data_type()
                )));
            }
        }
        Ok(Collated { batch })
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    /// Range of record `index` inside the concatenated values of `key`.
    pub fn slice(&self, key: &str, index: usize) -> Option<Range<usize>> {
        if index >= self.len() {
            return None;
        }
        let column = self.batch.column_by_name(key)?;
        match column.as_list_opt::<i32>() {
            Some(list) => {
                let offsets = list.value_offsets();
                Some(offsets[index] as usize..offsets[index + 1] as usize)
            }
            None => Some(index..index + 1),
        }
    }

    /// The full slice index: for every column, `len() + 1` boundaries into its
    /// concatenated values.
    pub fn slices(&self) -> BTreeMap<String, Vec<usize>> {
        let schema = self.batch.schema();
        schema
            .fields()
            .iter()
            .zip(self.batch.columns())
            .map(|(field, column)| {
                let bounds = match column.as_list_opt::<i32>() {
                    Some(list) => list.value_offsets().iter().map(|&o| o as usize).collect(),
                    None => (0..=self.len()).collect(),
                };
                (field.name().clone(), bounds)
            })
            .collect()
    }

    /// Rebuild record `index`.
    pub fn get(&self, index: usize) -> Result<MeshData> {
        if index >= self.len() {
            return Err(DatasetError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }

        let pos = list_column(&self.batch, POS_KEY)?;
        let pos_values = list_values::<Float32Type>(pos, index, POS_KEY)?;
        let pos = chunk3(&pos_values, POS_KEY)?;

        let face = list_column(&self.batch, FACE_KEY)?;
        let face_values = list_values::<UInt32Type>(face, index, FACE_KEY)?;
        let face = chunk3(&face_values, FACE_KEY)?;

        let mut mesh = MeshData::new(pos, face);
        let schema = self.batch.schema();
        for (field, column) in schema.fields().iter().zip(self.batch.columns()) {
            let name = field.name();
            if name == POS_KEY || name == FACE_KEY {
                continue;
            }
            mesh.set_attr(name.clone(), attr_at(column, index, name)?);
        }
        Ok(mesh)
    }
}

fn list_column<'a>(batch: &'a RecordBatch, key: &str) -> Result<&'a ListArray> {
    batch
        .column_by_name(key)
        .and_then(|c| c.as_list_opt::<i32>())
        .ok_or_else(|| DatasetError::CorruptArtifact(format!("'{key}' is not a list column")))
}

fn list_values<T: arrow::datatypes::ArrowPrimitiveType>(
    list: &ListArray,
    index: usize,
    key: &str,
) -> Result<Vec<T::Native>> {
    let values = list.value(index);
    let values = values.as_primitive_opt::<T>().ok_or_else(|| {
        DatasetError::CorruptArtifact(format!(
            "'{key}' holds {} values, expected {}",
            values.data_type(),
            T::DATA_TYPE
        ))
    })?;
    Ok(values.values().to_vec())
}

fn chunk3<T: Copy>(flat: &[T], key: &str) -> Result<Vec<[T; 3]>> {
    if flat.len() % 3 != 0 {
        return Err(DatasetError::CorruptArtifact(format!(
            "'{key}' has {} values, not a multiple of 3",
            flat.len()
        )));
    }
    Ok(flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
}

fn attr_at(column: &ArrayRef, index: usize, name: &str) -> Result<AttrValue> {
    let value = match column.data_type() {
        DataType::Float64 => AttrValue::Float(column.as_primitive::<Float64Type>().value(index)),
        DataType::Int64 => AttrValue::Int(column.as_primitive::<Int64Type>().value(index)),
        DataType::Boolean => AttrValue::Bool(column.as_boolean().value(index)),
        DataType::Utf8 => AttrValue::Text(column.as_string::<i32>().value(index).to_string()),
        DataType::List(_) => {
            let list = column.as_list::<i32>();
            AttrValue::Floats(list_values::<Float64Type>(list, index, name)?)
        }
        other => {
            return Err(DatasetError::CorruptArtifact(format!(
                "attribute '{name}' has unsupported type {other}"
            )))
        }
    };
    Ok(value)
}
