use std::collections::BTreeMap;
use std::fmt;

/// Attribute stripped from every record before it is collated.
pub const DIAMETER_KEY: &str = "diameter";

/// Column names reserved for the geometry itself.
pub const POS_KEY: &str = "pos";
pub const FACE_KEY: &str = "face";

// ---------------------------------------------------------------------------
// AttrValue – a single named attribute on a record
// ---------------------------------------------------------------------------

/// A dynamically-typed attribute value attached to a mesh record.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
    /// Variable-length float vector (per-record descriptor, label set, ...).
    Floats(Vec<f64>),
}

/// The kind of an [`AttrValue`], used to check that collated records agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Float,
    Int,
    Bool,
    Text,
    Floats,
}

impl AttrValue {
    pub fn kind(&self) -> AttrKind {
        match self {
            AttrValue::Float(_) => AttrKind::Float,
            AttrValue::Int(_) => AttrKind::Int,
            AttrValue::Bool(_) => AttrKind::Bool,
            AttrValue::Text(_) => AttrKind::Text,
            AttrValue::Floats(_) => AttrKind::Floats,
        }
    }

    /// Try to interpret the value as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Float(v) => write!(f, "{v:.4}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Text(s) => write!(f, "{s}"),
            AttrValue::Floats(v) => write!(f, "[{} floats]", v.len()),
        }
    }
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrKind::Float => "float",
            AttrKind::Int => "int",
            AttrKind::Bool => "bool",
            AttrKind::Text => "text",
            AttrKind::Floats => "float list",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// MeshData – one triangular mesh
// ---------------------------------------------------------------------------

/// A single triangular mesh with optional named attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    /// Vertex positions.
    pub pos: Vec<[f32; 3]>,
    /// Triangles as indices into `pos`.
    pub face: Vec<[u32; 3]>,
    /// Free-form attributes: name → value.
    pub attrs: BTreeMap<String, AttrValue>,
}

impl MeshData {
    pub fn new(pos: Vec<[f32; 3]>, face: Vec<[u32; 3]>) -> Self {
        MeshData {
            pos,
            face,
            attrs: BTreeMap::new(),
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.pos.len()
    }

    pub fn num_faces(&self) -> usize {
        self.face.len()
    }

    /// Attach (or replace) a named attribute.
    pub fn set_attr(&mut self, name: impl Into<String>, value: AttrValue) {
        self.attrs.insert(name.into(), value);
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Remove a named attribute. Removing an absent attribute is a no-op.
    pub fn remove_attr(&mut self, name: &str) -> Option<AttrValue> {
        self.attrs.remove(name)
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }

    /// Multiply every vertex position by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for p in &mut self.pos {
            for c in p.iter_mut() {
                *c *= factor;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SourceInfo – build-time side channel
// ---------------------------------------------------------------------------

/// Information about the source mesh handed to the build hooks alongside the
/// record. Nothing in here is persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    /// Position of the mesh in the raw corpus (`tr_reg_{index:03}.ply`).
    pub index: usize,
    /// Out-of-band extent of the mesh.
    pub diameter: f64,
}
