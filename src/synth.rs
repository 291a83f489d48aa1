//! Deterministic stand-in for `FAUST_remeshed.zip`.
//!
//! Every mesh is a small pyramid whose shape depends on its index, so tests
//! and demos can check which source mesh ended up where.

use std::fs::File;
use std::io::{self, Cursor, Seek, Write};
use std::path::Path;

use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::data::model::MeshData;

/// Pyramid with `3 + index % 4` base corners, shifted along x by the index.
pub fn synthetic_mesh(index: usize) -> MeshData {
    let corners = 3 + index % 4;
    let radius = 1.0 + (index % 10) as f32 * 0.05;
    let shift = index as f32 * 0.1;

    let mut pos: Vec<[f32; 3]> = (0..corners)
        .map(|k| {
            let angle = k as f32 * std::f32::consts::TAU / corners as f32;
            [shift + radius * angle.cos(), radius * angle.sin(), 0.0]
        })
        .collect();
    pos.push([shift, 0.0, 1.0]);

    let apex = corners as u32;
    let n = corners as u32;
    let mut face: Vec<[u32; 3]> = (0..n).map(|k| [k, (k + 1) % n, apex]).collect();
    face.extend((1..n - 1).map(|k| [0, k + 1, k]));

    MeshData::new(pos, face)
}

pub fn synthetic_diameter(index: usize) -> f32 {
    1.0 + index as f32 * 0.01
}

/// Write `mesh` as an ascii PLY file.
pub fn write_ascii_ply<W: Write>(mesh: &MeshData, mut out: W) -> io::Result<()> {
    writeln!(out, "ply")?;
    writeln!(out, "format ascii 1.0")?;
    writeln!(out, "element vertex {}", mesh.num_vertices())?;
    for axis in ["x", "y", "z"] {
        writeln!(out, "property float {axis}")?;
    }
    writeln!(out, "element face {}", mesh.num_faces())?;
    writeln!(out, "property list uchar int vertex_indices")?;
    writeln!(out, "end_header")?;
    for [x, y, z] in &mesh.pos {
        writeln!(out, "{x} {y} {z}")?;
    }
    for [a, b, c] in &mesh.face {
        writeln!(out, "3 {a} {b} {c}")?;
    }
    Ok(())
}

/// Write a 1-D float32 tensor in torch's zip serialisation.
pub fn write_torch_tensor<W: Write + Seek>(values: &[f32], out: W) -> ZipResult<W> {
    write_torch_view(values, 0, values.len(), out)
}

/// Write the contiguous view `storage[offset..offset + numel]` the way
/// `torch.save` stores a sliced tensor: the full storage plus the view's
/// offset and size. The view is not checked against the storage.
pub fn write_torch_view<W: Write + Seek>(
    storage: &[f32],
    offset: usize,
    numel: usize,
    out: W,
) -> ZipResult<W> {
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut zip = ZipWriter::new(out);

    zip.start_file("diameters/data.pkl", stored)?;
    zip.write_all(&tensor_pickle(storage.len() as i32, offset as i32, numel as i32))?;

    zip.start_file("diameters/byteorder", stored)?;
    zip.write_all(b"little")?;

    zip.start_file("diameters/data/0", stored)?;
    for v in storage {
        zip.write_all(&v.to_le_bytes())?;
    }

    zip.start_file("diameters/version", stored)?;
    zip.write_all(b"3\n")?;

    zip.finish()
}

/// Protocol 2 pickle of `_rebuild_tensor_v2(('storage', FloatStorage, '0',
/// 'cpu', len), offset, (numel,), (1,), False, OrderedDict())`.
fn tensor_pickle(storage_len: i32, offset: i32, numel: i32) -> Vec<u8> {
    fn global(buf: &mut Vec<u8>, module: &str, name: &str) {
        buf.push(b'c');
        buf.extend_from_slice(format!("{module}\n{name}\n").as_bytes());
    }
    fn unicode(buf: &mut Vec<u8>, s: &str) {
        buf.push(b'X');
        buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }
    fn int(buf: &mut Vec<u8>, v: i32) {
        buf.push(b'J');
        buf.extend_from_slice(&v.to_le_bytes());
    }

    let mut p = vec![0x80, 0x02];
    global(&mut p, "torch._utils", "_rebuild_tensor_v2");
    p.push(b'(');
    p.push(b'(');
    unicode(&mut p, "storage");
    global(&mut p, "torch", "FloatStorage");
    unicode(&mut p, "0");
    unicode(&mut p, "cpu");
    int(&mut p, storage_len);
    p.push(b't');
    p.push(b'Q');
    int(&mut p, offset);
    int(&mut p, numel);
    p.push(0x85);
    int(&mut p, 1);
    p.push(0x85);
    p.push(0x89);
    global(&mut p, "collections", "OrderedDict");
    p.push(b')');
    p.push(b'R');
    p.push(b't');
    p.push(b'R');
    p.push(b'.');
    p
}

/// Write an archive laid out like `FAUST_remeshed.zip` holding the meshes
/// listed in `indices` and the given diameter table.
pub fn write_archive(
    path: &Path,
    indices: impl IntoIterator<Item = usize>,
    diameters: &[f32],
) -> ZipResult<()> {
    let mut zip = ZipWriter::new(File::create(path)?);
    let options = SimpleFileOptions::default();

    for index in indices {
        zip.start_file(format!("shapes/tr_reg_{index:03}.ply"), options)?;
        write_ascii_ply(&synthetic_mesh(index), &mut zip)?;
    }

    let tensor = write_torch_tensor(diameters, Cursor::new(Vec::new()))?.into_inner();
    zip.start_file("diameters.pt", options)?;
    zip.write_all(&tensor)?;

    zip.finish()?;
    Ok(())
}
