//! Just enough of torch's pickle format to locate a tensor inside its storage.
//!
//! `torch.save` writes the whole storage a tensor views, so the values only
//! follow from the storage record together with the offset, sizes and strides
//! that `data.pkl` passes to `torch._utils._rebuild_tensor_v2`.

use std::collections::HashMap;

const REBUILD_TENSOR: &str = "torch._utils._rebuild_tensor_v2";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StorageType {
    F32,
    F64,
}

impl StorageType {
    pub fn width(self) -> usize {
        match self {
            StorageType::F32 => 4,
            StorageType::F64 => 8,
        }
    }
}

/// Where a tensor's elements sit inside its storage record.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorView {
    pub storage: StorageType,
    /// Name of the storage record under `<prefix>/data/`.
    pub key: String,
    pub offset: usize,
    pub size: Vec<usize>,
    pub stride: Vec<usize>,
}

impl TensorView {
    pub fn numel(&self) -> usize {
        self.size.iter().product()
    }

    /// Storage positions of the elements of a 0-d or 1-d view, in order.
    /// Fails when the view reaches past `storage_len` elements.
    pub fn positions(&self, storage_len: usize) -> Result<Vec<usize>, String> {
        if self.size.len() > 1 {
            return Err(format!("expected a 1-D tensor, found shape {:?}", self.size));
        }
        let numel = self.numel();
        let step = self.stride.first().copied().unwrap_or(1);
        if numel > 0 {
            let last = (numel - 1)
                .checked_mul(step)
                .and_then(|span| span.checked_add(self.offset))
                .filter(|&last| last < storage_len);
            if last.is_none() {
                return Err(format!(
                    "{numel} elements from offset {} (stride {step}) \
                     exceed a storage of {storage_len}",
                    self.offset
                ));
            }
        }
        Ok((0..numel).map(|k| self.offset + k * step).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Mark,
    Int(i64),
    Str(String),
    Global(String),
    Tuple(Vec<Value>),
    PersistentId(Box<Value>),
    Call(Box<Value>, Box<Value>),
    /// None, booleans, floats, dicts and objects the tensor view ignores.
    Opaque,
}

/// Read the `_rebuild_tensor_v2` call out of a `data.pkl` record.
pub fn parse_tensor_pickle(bytes: &[u8]) -> Result<TensorView, String> {
    let root = Machine::new(bytes).run()?;
    let Value::Call(func, args) = root else {
        return Err("data.pkl does not hold a tensor".into());
    };
    match (*func, *args) {
        (Value::Global(name), Value::Tuple(args)) if name == REBUILD_TENSOR => tensor_view(&args),
        (Value::Global(name), _) => Err(format!("unsupported tensor constructor '{name}'")),
        _ => Err("data.pkl does not hold a tensor".into()),
    }
}

fn tensor_view(args: &[Value]) -> Result<TensorView, String> {
    let [Value::PersistentId(pid), offset, size, stride, ..] = args else {
        return Err("malformed _rebuild_tensor_v2 arguments".into());
    };
    let Value::Tuple(pid) = pid.as_ref() else {
        return Err("malformed storage reference".into());
    };
    let (storage, key) = match pid.as_slice() {
        [Value::Str(tag), Value::Global(class), Value::Str(key), ..] if tag == "storage" => {
            let storage = match class.rsplit('.').next() {
                Some("FloatStorage") => StorageType::F32,
                Some("DoubleStorage") => StorageType::F64,
                _ => return Err(format!("tensor is neither float32 nor float64 ({class})")),
            };
            (storage, key.clone())
        }
        _ => return Err("malformed storage reference".into()),
    };

    Ok(TensorView {
        storage,
        key,
        offset: as_index(offset, "storage offset")?,
        size: as_indices(size, "size")?,
        stride: as_indices(stride, "stride")?,
    })
}

fn as_index(value: &Value, what: &str) -> Result<usize, String> {
    match value {
        Value::Int(v) => usize::try_from(*v).map_err(|_| format!("negative {what} {v}")),
        other => Err(format!("{what} is not an integer: {other:?}")),
    }
}

fn as_indices(value: &Value, what: &str) -> Result<Vec<usize>, String> {
    match value {
        Value::Tuple(items) => items.iter().map(|v| as_index(v, what)).collect(),
        other => Err(format!("{what} is not a tuple: {other:?}")),
    }
}

// ---------------------------------------------------------------------------
// Pickle machine (the opcodes torch emits for a plain tensor)
// ---------------------------------------------------------------------------

struct Machine<'a> {
    bytes: &'a [u8],
    at: usize,
    stack: Vec<Value>,
    memo: HashMap<u32, Value>,
}

impl<'a> Machine<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Machine {
            bytes,
            at: 0,
            stack: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Value, String> {
        loop {
            let op = self.take(1)?[0];
            match op {
                0x80 => {
                    self.take(1)?;
                }
                0x95 => {
                    self.take(8)?;
                }
                b'.' => return self.pop(),
                b'(' => self.stack.push(Value::Mark),
                b'N' | 0x88 | 0x89 => self.stack.push(Value::Opaque),
                b'K' => {
                    let v = self.take(1)?[0];
                    self.stack.push(Value::Int(v.into()));
                }
                b'M' => {
                    let v = u16::from_le_bytes(self.array()?);
                    self.stack.push(Value::Int(v.into()));
                }
                b'J' => {
                    let v = i32::from_le_bytes(self.array()?);
                    self.stack.push(Value::Int(v.into()));
                }
                0x8a => {
                    let n = self.take(1)?[0] as usize;
                    let v = long1(self.take(n)?)?;
                    self.stack.push(Value::Int(v));
                }
                b'G' => {
                    self.take(8)?;
                    self.stack.push(Value::Opaque);
                }
                b'X' => {
                    let n = u32::from_le_bytes(self.array()?) as usize;
                    let s = self.text(n)?;
                    self.stack.push(Value::Str(s));
                }
                0x8c => {
                    let n = self.take(1)?[0] as usize;
                    let s = self.text(n)?;
                    self.stack.push(Value::Str(s));
                }
                b'c' => {
                    let module = self.line()?;
                    let name = self.line()?;
                    self.stack.push(Value::Global(format!("{module}.{name}")));
                }
                0x93 => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    match (module, name) {
                        (Value::Str(module), Value::Str(name)) => {
                            self.stack.push(Value::Global(format!("{module}.{name}")))
                        }
                        _ => return Err("STACK_GLOBAL expects two strings".into()),
                    }
                }
                b')' => self.stack.push(Value::Tuple(Vec::new())),
                b't' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                }
                0x85..=0x87 => {
                    let n = (op - 0x84) as usize;
                    if self.stack.len() < n {
                        return Err("stack underflow".into());
                    }
                    let items = self.stack.split_off(self.stack.len() - n);
                    self.stack.push(Value::Tuple(items));
                }
                b'}' | b']' => self.stack.push(Value::Opaque),
                b's' => {
                    self.pop()?;
                    self.pop()?;
                }
                b'a' | b'b' => {
                    self.pop()?;
                }
                b'u' | b'e' => {
                    self.pop_mark()?;
                }
                b'Q' => {
                    let pid = self.pop()?;
                    self.stack.push(Value::PersistentId(Box::new(pid)));
                }
                b'R' => {
                    let args = self.pop()?;
                    let func = self.pop()?;
                    self.stack.push(Value::Call(Box::new(func), Box::new(args)));
                }
                0x81 => {
                    self.pop()?;
                    self.pop()?;
                    self.stack.push(Value::Opaque);
                }
                b'q' => {
                    let slot = u32::from(self.take(1)?[0]);
                    self.memoize(slot)?;
                }
                b'r' => {
                    let slot = u32::from_le_bytes(self.array()?);
                    self.memoize(slot)?;
                }
                0x94 => {
                    let slot = self.memo.len() as u32;
                    self.memoize(slot)?;
                }
                b'h' => {
                    let slot = u32::from(self.take(1)?[0]);
                    self.recall(slot)?;
                }
                b'j' => {
                    let slot = u32::from_le_bytes(self.array()?);
                    self.recall(slot)?;
                }
                other => {
                    return Err(format!(
                        "unsupported pickle opcode 0x{other:02x} at byte {}",
                        self.at - 1
                    ))
                }
            }
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let bytes: &'a [u8] = self.bytes;
        let end = self
            .at
            .checked_add(n)
            .filter(|&end| end <= bytes.len())
            .ok_or("truncated pickle")?;
        let out = &bytes[self.at..end];
        self.at = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], String> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn text(&mut self, n: usize) -> Result<String, String> {
        String::from_utf8(self.take(n)?.to_vec()).map_err(|e| e.to_string())
    }

    fn line(&mut self) -> Result<String, String> {
        let rest = &self.bytes[self.at..];
        let len = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or("unterminated GLOBAL")?;
        let s = self.text(len)?;
        self.at += 1;
        Ok(s)
    }

    fn pop(&mut self) -> Result<Value, String> {
        self.stack.pop().ok_or_else(|| "stack underflow".into())
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>, String> {
        let mark = self
            .stack
            .iter()
            .rposition(|v| matches!(v, Value::Mark))
            .ok_or("missing MARK")?;
        let items = self.stack.split_off(mark + 1);
        self.stack.pop();
        Ok(items)
    }

    fn memoize(&mut self, slot: u32) -> Result<(), String> {
        let top = self.stack.last().ok_or("stack underflow")?.clone();
        self.memo.insert(slot, top);
        Ok(())
    }

    fn recall(&mut self, slot: u32) -> Result<(), String> {
        let value = self
            .memo
            .get(&slot)
            .cloned()
            .ok_or_else(|| format!("memo slot {slot} is empty"))?;
        self.stack.push(value);
        Ok(())
    }
}

fn long1(bytes: &[u8]) -> Result<i64, String> {
    if bytes.len() > 8 {
        return Err("integer does not fit 64 bits".into());
    }
    let fill = if bytes.last().is_some_and(|&b| b & 0x80 != 0) {
        0xff
    } else {
        0
    };
    let mut buf = [fill; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(i64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    // torch.save(torch.arange(6.)[3:], ...) with protocol 2, memo ops included.
    const SLICED: &[u8] = b"\x80\x02ctorch._utils\n_rebuild_tensor_v2\nq\x00\
((X\x07\x00\x00\x00storageq\x01\
ctorch\nFloatStorage\nq\x02X\x01\x00\x00\x000q\x03X\x03\x00\x00\x00cpuq\x04K\x06tq\x05Q\
K\x03K\x03\x85q\x06K\x01\x85q\x07\x89ccollections\nOrderedDict\nq\x08)Rq\ttq\nRq\x0b.";

    #[test]
    fn reads_offset_size_and_stride() {
        let view = parse_tensor_pickle(SLICED).unwrap();
        assert_eq!(
            view,
            TensorView {
                storage: StorageType::F32,
                key: "0".into(),
                offset: 3,
                size: vec![3],
                stride: vec![1],
            }
        );
        assert_eq!(view.positions(6).unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn view_past_storage_end_fails() {
        let view = parse_tensor_pickle(SLICED).unwrap();
        assert!(view.positions(5).is_err());
    }

    #[test]
    fn strided_view_skips_elements() {
        let view = TensorView {
            storage: StorageType::F64,
            key: "0".into(),
            offset: 1,
            size: vec![3],
            stride: vec![2],
        };
        assert_eq!(view.positions(6).unwrap(), vec![1, 3, 5]);
        assert!(view.positions(5).is_err());
    }

    #[test]
    fn rejects_other_payloads() {
        assert!(parse_tensor_pickle(b"\x80\x02K\x01.").is_err());
        assert!(parse_tensor_pickle(b"\x80\x02K").is_err());
        assert!(parse_tensor_pickle(b"\x80\x02\xff.").is_err());
    }

    #[test]
    fn long1_is_signed() {
        assert_eq!(long1(&[0x2c, 0x01]).unwrap(), 300);
        assert_eq!(long1(&[0xff]).unwrap(), -1);
        assert_eq!(long1(&[]).unwrap(), 0);
    }
}
