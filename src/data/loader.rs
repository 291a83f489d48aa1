use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};

use super::model::MeshData;
use super::torch::{parse_tensor_pickle, StorageType};
use crate::error::{DatasetError, Result};

// ---------------------------------------------------------------------------
// Archive extraction
// ---------------------------------------------------------------------------

/// Unpack `archive` into `dest`, creating directories as needed.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let corrupt = |source: zip::result::ZipError| DatasetError::CorruptArchive {
        path: archive.to_path_buf(),
        source,
    };
    let file = File::open(archive).map_err(|e| corrupt(e.into()))?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(corrupt)?;
    log::debug!(
        "Extracting {} entries from {} into {}",
        zip.len(),
        archive.display(),
        dest.display()
    );
    zip.extract(dest).map_err(corrupt)
}

// ---------------------------------------------------------------------------
// PLY meshes
// ---------------------------------------------------------------------------

/// Read a triangular mesh from a PLY file (ascii or binary).
///
/// Expects a `vertex` element with `x`, `y`, `z` and a `face` element with a
/// `vertex_indices` (or `vertex_index`) list. Polygons are fan-triangulated.
pub fn read_mesh(path: &Path) -> Result<MeshData> {
    if !path.is_file() {
        return Err(DatasetError::MissingMesh {
            path: path.to_path_buf(),
        });
    }
    let corrupt = |reason: String| DatasetError::CorruptMesh {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| DatasetError::io(path, e))?;
    let parser = Parser::<DefaultElement>::new();
    let ply = parser
        .read_ply(&mut BufReader::new(file))
        .map_err(|e| corrupt(e.to_string()))?;

    let vertices = ply
        .payload
        .get("vertex")
        .ok_or_else(|| corrupt("missing 'vertex' element".into()))?;

    let mut pos = Vec::with_capacity(vertices.len());
    for (i, v) in vertices.iter().enumerate() {
        let coord = |name: &str| {
            v.get(name)
                .and_then(property_f32)
                .ok_or_else(|| corrupt(format!("vertex {i}: missing or non-numeric '{name}'")))
        };
        pos.push([coord("x")?, coord("y")?, coord("z")?]);
    }

    let faces = ply
        .payload
        .get("face")
        .ok_or_else(|| corrupt("missing 'face' element".into()))?;

    let mut face = Vec::with_capacity(faces.len());
    for (i, f) in faces.iter().enumerate() {
        let indices = f
            .get("vertex_indices")
            .or_else(|| f.get("vertex_index"))
            .and_then(property_indices)
            .ok_or_else(|| corrupt(format!("face {i}: missing 'vertex_indices' list")))?;

        if indices.len() < 3 {
            return Err(corrupt(format!("face {i} has {} corners", indices.len())));
        }
        if let Some(bad) = indices.iter().find(|&&ix| ix as usize >= pos.len()) {
            return Err(corrupt(format!(
                "face {i} references vertex {bad} but only {} exist",
                pos.len()
            )));
        }
        for k in 1..indices.len() - 1 {
            face.push([indices[0], indices[k], indices[k + 1]]);
        }
    }

    Ok(MeshData::new(pos, face))
}

fn property_f32(prop: &Property) -> Option<f32> {
    match prop {
        Property::Float(v) => Some(*v),
        Property::Double(v) => Some(*v as f32),
        Property::Int(v) => Some(*v as f32),
        Property::UInt(v) => Some(*v as f32),
        Property::Short(v) => Some(*v as f32),
        Property::UShort(v) => Some(*v as f32),
        Property::Char(v) => Some(*v as f32),
        Property::UChar(v) => Some(*v as f32),
        _ => None,
    }
}

fn property_indices(prop: &Property) -> Option<Vec<u32>> {
    fn signed<T: Copy + TryInto<u32>>(v: &[T]) -> Option<Vec<u32>> {
        v.iter().map(|&x| x.try_into().ok()).collect()
    }
    match prop {
        Property::ListInt(v) => signed(v),
        Property::ListShort(v) => signed(v),
        Property::ListChar(v) => signed(v),
        Property::ListUInt(v) => Some(v.clone()),
        Property::ListUShort(v) => Some(v.iter().map(|&x| x as u32).collect()),
        Property::ListUChar(v) => Some(v.iter().map(|&x| x as u32).collect()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Diameter table
// ---------------------------------------------------------------------------

/// Load the per-mesh diameter table. Dispatch by content.
///
/// Supported encodings:
/// * torch serialisation (a zip holding `data.pkl` and a raw storage record)
///   of a 1-D `float32` or `float64` tensor, possibly a view into a larger
///   storage
/// * JSON array of numbers
/// * plain text: numbers separated by commas, whitespace or newlines
pub fn load_diameters(path: &Path) -> Result<Vec<f64>> {
    if !path.is_file() {
        return Err(DatasetError::MissingDiameters {
            path: path.to_path_buf(),
        });
    }
    let bytes = std::fs::read(path).map_err(|e| DatasetError::io(path, e))?;

    let decoded = if bytes.starts_with(b"PK") {
        decode_torch_tensor(&bytes)
    } else if bytes.trim_ascii_start().starts_with(b"[") {
        serde_json::from_slice::<Vec<f64>>(&bytes).map_err(|e| e.to_string())
    } else {
        decode_text(&bytes)
    };

    decoded.map_err(|reason| DatasetError::CorruptDiameters {
        path: path.to_path_buf(),
        reason,
    })
}

fn decode_torch_tensor(bytes: &[u8]) -> std::result::Result<Vec<f64>, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a torch file: {e}"))?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    let pickle_name = names
        .iter()
        .find(|n| n.ends_with("data.pkl"))
        .ok_or("no data.pkl record")?;
    let view = parse_tensor_pickle(&read_entry(&mut archive, pickle_name)?)?;

    let big_endian = match names.iter().find(|n| n.ends_with("/byteorder")) {
        Some(name) => read_entry(&mut archive, name)?.starts_with(b"big"),
        None => false,
    };

    let storage_suffix = format!("/data/{}", view.key);
    let storage_name = names
        .iter()
        .find(|n| n.ends_with(&storage_suffix))
        .ok_or_else(|| format!("no storage record '{}'", view.key))?;
    let raw = read_entry(&mut archive, storage_name)?;

    let width = view.storage.width();
    if raw.len() % width != 0 {
        return Err(format!(
            "storage of {} bytes is not a whole number of {width}-byte elements",
            raw.len()
        ));
    }
    let element = |i: usize| {
        let c = &raw[i * width..(i + 1) * width];
        match view.storage {
            StorageType::F32 => {
                let b = [c[0], c[1], c[2], c[3]];
                let v = if big_endian {
                    f32::from_be_bytes(b)
                } else {
                    f32::from_le_bytes(b)
                };
                v as f64
            }
            StorageType::F64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                if big_endian {
                    f64::from_be_bytes(b)
                } else {
                    f64::from_le_bytes(b)
                }
            }
        }
    };

    let positions = view.positions(raw.len() / width)?;
    Ok(positions.into_iter().map(element).collect())
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> std::result::Result<Vec<u8>, String> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| format!("reading '{name}': {e}"))?;
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .map_err(|e| format!("reading '{name}': {e}"))?;
    Ok(buf)
}

fn decode_text(bytes: &[u8]) -> std::result::Result<Vec<f64>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut values = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| format!("line {row}: {e}"))?;
        for field in record.iter() {
            for tok in field.split_whitespace() {
                let v = tok
                    .parse::<f64>()
                    .map_err(|_| format!("line {row}: '{tok}' is not a number"))?;
                values.push(v);
            }
        }
    }
    Ok(values)
}
