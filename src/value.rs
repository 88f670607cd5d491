//! Typed value codec for the data section.
//!
//! Values are stored as a control byte (3 bits of type code, 5 bits of size
//! code), an optional extended-type byte, an optional size extension, and the
//! payload. Integers are big-endian and left-truncated to their minimal
//! width. Pointers reference earlier offsets in the same section and are an
//! internal indirection only: the decoder follows them transparently and
//! never surfaces them to callers.
//!
//! The encoder deduplicates aggressively. Every value it emits is recorded
//! by content; re-encoding an identical value (a whole payload, a nested
//! map, or a single string) yields the existing offset, and repeated values
//! inside containers are written as pointers to the first occurrence.

use crate::error::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

/// Type code for pointers.
const TYPE_POINTER: u8 = 1;
/// Type code for UTF-8 strings.
const TYPE_STRING: u8 = 2;
/// Type code for 64-bit IEEE-754 doubles.
const TYPE_DOUBLE: u8 = 3;
/// Type code for raw byte arrays.
const TYPE_BYTES: u8 = 4;
/// Type code for 16-bit unsigned integers.
const TYPE_UINT16: u8 = 5;
/// Type code for 32-bit unsigned integers.
const TYPE_UINT32: u8 = 6;
/// Type code for maps.
const TYPE_MAP: u8 = 7;
/// Extended type code for 32-bit signed integers.
const TYPE_INT32: u8 = 8;
/// Extended type code for 64-bit unsigned integers.
const TYPE_UINT64: u8 = 9;
/// Extended type code for 128-bit unsigned integers.
const TYPE_UINT128: u8 = 10;
/// Extended type code for arrays.
const TYPE_ARRAY: u8 = 11;
/// Extended type code for booleans.
const TYPE_BOOL: u8 = 14;
/// Extended type code for 32-bit IEEE-754 floats.
const TYPE_FLOAT: u8 = 15;

/// Maximum pointer dereferences per decode call before the chain is treated
/// as corrupt.
const MAX_POINTER_DEREFS: u32 = 128;

/// A decoded data-section value.
///
/// Maps keep their pairs in a `BTreeMap` so key order is always sorted and
/// unique; this is also the order the encoder emits and the order `flatten`
/// reports. `Pointer` never appears in decoded output.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 string.
    String(String),
    /// 64-bit float.
    Double(f64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer.
    Uint16(u16),
    /// Unsigned 32-bit integer.
    Uint32(u32),
    /// String-keyed map with unique, sorted keys.
    Map(BTreeMap<String, Value>),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 64-bit integer.
    Uint64(u64),
    /// Unsigned 128-bit integer.
    Uint128(u128),
    /// Ordered array of values.
    Array(Vec<Value>),
    /// Boolean.
    Bool(bool),
    /// 32-bit float.
    Float(f32),
}

impl Value {
    /// Convert a parsed JSON document into the storage model.
    ///
    /// Numeric literals become `Double` regardless of their lexical shape;
    /// callers that need explicit integer storage construct [`Value`]
    /// directly. JSON `null` has no counterpart in the storage model and is
    /// rejected.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Null => Err(Error::InvalidData(
                "JSON null is not representable in the data model".to_string(),
            )),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                let d = n
                    .as_f64()
                    .ok_or_else(|| Error::InvalidData(format!("unrepresentable number {n}")))?;
                Ok(Value::Double(d))
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(items) => {
                let values = items.iter().map(Value::from_json).collect::<Result<_>>()?;
                Ok(Value::Array(values))
            }
            serde_json::Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), Value::from_json(v)?);
                }
                Ok(Value::Map(out))
            }
        }
    }

    /// Convert to a JSON document.
    ///
    /// `Uint128` values above `u64::MAX` and raw bytes have no native JSON
    /// form; they are rendered as decimal and hex strings respectively.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value as Json};
        match self {
            Value::String(s) => Json::String(s.clone()),
            Value::Double(d) => json!(d),
            Value::Bytes(b) => {
                let mut hex = String::with_capacity(b.len() * 2);
                for byte in b {
                    hex.push_str(&format!("{byte:02x}"));
                }
                Json::String(hex)
            }
            Value::Uint16(n) => json!(n),
            Value::Uint32(n) => json!(n),
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m {
                    obj.insert(k.clone(), v.to_json());
                }
                Json::Object(obj)
            }
            Value::Int32(n) => json!(n),
            Value::Uint64(n) => json!(n),
            Value::Uint128(n) => {
                if *n <= u64::MAX as u128 {
                    json!(*n as u64)
                } else {
                    Json::String(n.to_string())
                }
            }
            Value::Array(a) => Json::Array(a.iter().map(Value::to_json).collect()),
            Value::Bool(b) => Json::Bool(*b),
            Value::Float(f) => json!(f),
        }
    }
}

/// One step of a prefix-order linearization of a value subtree.
///
/// Containers appear as headers carrying their pair/element count; map keys
/// appear as `Scalar(Value::String(..))` entries immediately before the
/// value they name.
#[derive(Debug, Clone, PartialEq)]
pub enum FlatEntry {
    /// A map with this many key/value pairs follows.
    MapHeader(usize),
    /// An array with this many elements follows.
    ArrayHeader(usize),
    /// A scalar value (or a map key).
    Scalar(Value),
}

/// A decoded value head that borrows its payload from the section.
///
/// This is the zero-copy sibling of [`Value`]/[`FlatEntry`]: strings and
/// byte arrays point into the mapped buffer and stay valid for as long as
/// the buffer does. Containers appear as headers only; use the decoder to
/// descend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue<'a> {
    /// A map head with its pair count.
    MapHeader(usize),
    /// An array head with its element count.
    ArrayHeader(usize),
    /// UTF-8 string borrowed from the section.
    String(&'a str),
    /// Raw bytes borrowed from the section.
    Bytes(&'a [u8]),
    /// 64-bit float.
    Double(f64),
    /// 32-bit float.
    Float(f32),
    /// Unsigned 16-bit integer.
    Uint16(u16),
    /// Unsigned 32-bit integer.
    Uint32(u32),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 64-bit integer.
    Uint64(u64),
    /// Unsigned 128-bit integer.
    Uint128(u128),
    /// Boolean.
    Bool(bool),
}

impl RawValue<'_> {
    fn into_flat(self) -> FlatEntry {
        match self {
            RawValue::MapHeader(n) => FlatEntry::MapHeader(n),
            RawValue::ArrayHeader(n) => FlatEntry::ArrayHeader(n),
            RawValue::String(s) => FlatEntry::Scalar(Value::String(s.to_string())),
            RawValue::Bytes(b) => FlatEntry::Scalar(Value::Bytes(b.to_vec())),
            RawValue::Double(d) => FlatEntry::Scalar(Value::Double(d)),
            RawValue::Float(f) => FlatEntry::Scalar(Value::Float(f)),
            RawValue::Uint16(n) => FlatEntry::Scalar(Value::Uint16(n)),
            RawValue::Uint32(n) => FlatEntry::Scalar(Value::Uint32(n)),
            RawValue::Int32(n) => FlatEntry::Scalar(Value::Int32(n)),
            RawValue::Uint64(n) => FlatEntry::Scalar(Value::Uint64(n)),
            RawValue::Uint128(n) => FlatEntry::Scalar(Value::Uint128(n)),
            RawValue::Bool(b) => FlatEntry::Scalar(Value::Bool(b)),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Data-section encoder with content-addressed deduplication.
#[derive(Default)]
pub struct Encoder {
    buffer: Vec<u8>,
    dedup: FxHashMap<Vec<u8>, u32>,
}

impl Encoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a value and return its data-section offset.
    ///
    /// Identical values always share one offset, so the returned offset may
    /// address bytes written by an earlier call.
    pub fn encode(&mut self, value: &Value) -> u32 {
        let key = canonical_bytes(value);
        if let Some(&offset) = self.dedup.get(&key) {
            return offset;
        }
        self.write_value(value, key)
    }

    /// Current section size in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if nothing has been encoded yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consume the encoder and return the section bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Write `value` at the current end of the buffer, registering it and
    /// every nested value it emits in the dedup table.
    fn write_value(&mut self, value: &Value, canonical: Vec<u8>) -> u32 {
        let offset = self.buffer.len() as u32;
        self.dedup.insert(canonical, offset);

        match value {
            Value::Map(m) => {
                push_control(TYPE_MAP, m.len(), &mut self.buffer);
                for (k, v) in m {
                    self.write_child(&Value::String(k.clone()));
                    self.write_child(v);
                }
            }
            Value::Array(a) => {
                push_control(TYPE_ARRAY, a.len(), &mut self.buffer);
                for v in a {
                    self.write_child(v);
                }
            }
            scalar => push_scalar(scalar, &mut self.buffer),
        }
        offset
    }

    /// Write a nested value: a pointer if it was seen before, inline (and
    /// registered) otherwise.
    fn write_child(&mut self, value: &Value) {
        let key = canonical_bytes(value);
        match self.dedup.get(&key) {
            Some(&offset) => push_pointer(offset, &mut self.buffer),
            None => {
                self.write_value(value, key);
            }
        }
    }
}

/// Fully self-contained (pointer-free) encoding, used as the dedup key.
fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_inline(value, &mut out);
    out
}

fn encode_inline(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Map(m) => {
            push_control(TYPE_MAP, m.len(), out);
            for (k, v) in m {
                encode_inline(&Value::String(k.clone()), out);
                encode_inline(v, out);
            }
        }
        Value::Array(a) => {
            push_control(TYPE_ARRAY, a.len(), out);
            for v in a {
                encode_inline(v, out);
            }
        }
        scalar => push_scalar(scalar, out),
    }
}

/// Emit a non-container value.
fn push_scalar(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::String(s) => {
            push_control(TYPE_STRING, s.len(), out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Double(d) => {
            push_control(TYPE_DOUBLE, 8, out);
            out.extend_from_slice(&d.to_be_bytes());
        }
        Value::Bytes(b) => {
            push_control(TYPE_BYTES, b.len(), out);
            out.extend_from_slice(b);
        }
        Value::Uint16(n) => {
            let bytes = n.to_be_bytes();
            let trimmed = trim_leading_zeros(&bytes);
            push_control(TYPE_UINT16, trimmed.len(), out);
            out.extend_from_slice(trimmed);
        }
        Value::Uint32(n) => {
            let bytes = n.to_be_bytes();
            let trimmed = trim_leading_zeros(&bytes);
            push_control(TYPE_UINT32, trimmed.len(), out);
            out.extend_from_slice(trimmed);
        }
        Value::Int32(n) => {
            push_control(TYPE_INT32, 4, out);
            out.extend_from_slice(&n.to_be_bytes());
        }
        Value::Uint64(n) => {
            let bytes = n.to_be_bytes();
            let trimmed = trim_leading_zeros(&bytes);
            push_control(TYPE_UINT64, trimmed.len(), out);
            out.extend_from_slice(trimmed);
        }
        Value::Uint128(n) => {
            let bytes = n.to_be_bytes();
            let trimmed = trim_leading_zeros(&bytes);
            push_control(TYPE_UINT128, trimmed.len(), out);
            out.extend_from_slice(trimmed);
        }
        Value::Bool(b) => push_control(TYPE_BOOL, usize::from(*b), out),
        Value::Float(f) => {
            push_control(TYPE_FLOAT, 4, out);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Map(_) | Value::Array(_) => unreachable!("containers handled by caller"),
    }
}

/// Emit a control byte (plus extended-type byte and size extension).
fn push_control(type_code: u8, size: usize, out: &mut Vec<u8>) {
    let size_bits = |code: u8, out: &mut Vec<u8>| match size {
        0..=28 => out.push(code << 5 | size as u8),
        29..=284 => {
            out.push(code << 5 | 29);
            out.push((size - 29) as u8);
        }
        285..=65820 => {
            out.push(code << 5 | 30);
            out.extend_from_slice(&((size - 285) as u16).to_be_bytes());
        }
        _ => {
            out.push(code << 5 | 31);
            let adjusted = (size - 65821) as u32;
            out.extend_from_slice(&adjusted.to_be_bytes()[1..]);
        }
    };

    if type_code < 8 {
        size_bits(type_code, out);
    } else {
        // Extended types: the type byte sits between the control byte and
        // any size-extension bytes.
        size_bits(0, out);
        let ctrl_at = find_control_position(out, size);
        out.insert(ctrl_at + 1, type_code - 7);
    }
}

/// Position of the control byte just written for a value of `size`.
fn find_control_position(out: &[u8], size: usize) -> usize {
    let ext_len = match size {
        0..=28 => 0,
        29..=284 => 1,
        285..=65820 => 2,
        _ => 3,
    };
    out.len() - 1 - ext_len
}

/// Emit a pointer to `offset` using the smallest pointer width.
fn push_pointer(offset: u32, out: &mut Vec<u8>) {
    if offset < 0x800 {
        out.push(TYPE_POINTER << 5 | ((offset >> 8) as u8 & 0x07));
        out.push(offset as u8);
    } else if offset < 0x80800 {
        let v = offset - 0x800;
        out.push(TYPE_POINTER << 5 | 0x08 | ((v >> 16) as u8 & 0x07));
        out.push((v >> 8) as u8);
        out.push(v as u8);
    } else if offset < 0x8080800 {
        let v = offset - 0x80800;
        out.push(TYPE_POINTER << 5 | 0x10 | ((v >> 24) as u8 & 0x07));
        out.push((v >> 16) as u8);
        out.push((v >> 8) as u8);
        out.push(v as u8);
    } else {
        out.push(TYPE_POINTER << 5 | 0x18);
        out.extend_from_slice(&offset.to_be_bytes());
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Tracks the active pointer chain during one decode call.
///
/// A target showing up twice on the same chain is a cycle; the same target
/// reached from different chains is ordinary sharing. Chain depth is capped
/// at [`MAX_POINTER_DEREFS`].
struct DerefGuard {
    active: FxHashSet<u32>,
}

impl DerefGuard {
    fn new() -> Self {
        Self {
            active: FxHashSet::default(),
        }
    }

    fn enter(&mut self, target: u32) -> Result<()> {
        if self.active.len() >= MAX_POINTER_DEREFS as usize {
            return Err(Error::InvalidData("pointer chain too long".to_string()));
        }
        if !self.active.insert(target) {
            return Err(Error::InvalidData(format!(
                "pointer cycle at offset {target}"
            )));
        }
        Ok(())
    }

    fn leave(&mut self, target: u32) {
        self.active.remove(&target);
    }
}

/// Data-section decoder over a borrowed byte slice.
///
/// All offsets are relative to the start of the slice. The decoder is
/// stateless between calls; every public method is safe for concurrent use.
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Create a decoder over a data section.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Read one value at `offset`, following pointers transparently.
    ///
    /// Returns the value and the offset of the first byte after the value's
    /// own encoding at `offset` (pointer bytes, not target bytes).
    pub fn read_value(&self, offset: usize) -> Result<(Value, usize)> {
        let mut cursor = offset;
        let mut guard = DerefGuard::new();
        let value = self.decode_at(&mut cursor, &mut guard)?;
        Ok((value, cursor))
    }

    /// Resolve a lookup path to the offset of the value it names.
    ///
    /// Path components are map keys; for arrays a component must parse as a
    /// decimal index. Missing keys or out-of-range indices yield
    /// [`Error::LookupPathInvalid`]; descending into a scalar yields
    /// [`Error::LookupPathDoesNotMatchData`].
    pub fn navigate(&self, offset: usize, path: &[&str]) -> Result<usize> {
        let mut at = offset;
        for component in path {
            let mut guard = DerefGuard::new();
            at = self.follow_pointers(at, &mut guard)?;
            let mut cursor = at;
            let (type_code, size) = self.read_header(&mut cursor)?;
            match type_code {
                TYPE_MAP => {
                    let mut found = None;
                    for _ in 0..size {
                        let key = self.read_key(&mut cursor)?;
                        if key == *component {
                            found = Some(cursor);
                            break;
                        }
                        self.skip_value(&mut cursor)?;
                    }
                    at = found.ok_or_else(|| {
                        Error::LookupPathInvalid(format!("no key {component:?} in map"))
                    })?;
                }
                TYPE_ARRAY => {
                    let index: usize = component.parse().map_err(|_| {
                        Error::LookupPathDoesNotMatchData(format!(
                            "array indexed with non-numeric component {component:?}"
                        ))
                    })?;
                    if index >= size {
                        return Err(Error::LookupPathInvalid(format!(
                            "index {index} out of range for array of {size}"
                        )));
                    }
                    for _ in 0..index {
                        self.skip_value(&mut cursor)?;
                    }
                    at = cursor;
                }
                _ => {
                    return Err(Error::LookupPathDoesNotMatchData(format!(
                        "path component {component:?} applied to a scalar"
                    )))
                }
            }
        }
        Ok(at)
    }

    /// Read the head of the value at `offset` without materializing it.
    ///
    /// Pointers are followed; strings and bytes borrow from the section;
    /// containers come back as headers.
    pub fn peek(&self, offset: usize) -> Result<RawValue<'a>> {
        let mut guard = DerefGuard::new();
        let at = self.follow_pointers(offset, &mut guard)?;
        let mut cursor = at;
        let (type_code, size) = self.read_header(&mut cursor)?;
        match type_code {
            TYPE_MAP => Ok(RawValue::MapHeader(size)),
            TYPE_ARRAY => Ok(RawValue::ArrayHeader(size)),
            _ => self.decode_scalar_raw(type_code, size, &mut cursor),
        }
    }

    /// Produce the prefix-order linearization of the value at `offset`
    /// with owned scalars.
    pub fn flatten(&self, offset: usize) -> Result<Vec<FlatEntry>> {
        Ok(self
            .flatten_raw(offset)?
            .into_iter()
            .map(RawValue::into_flat)
            .collect())
    }

    /// Produce the prefix-order linearization of the value at `offset`.
    ///
    /// The walk is iterative; nesting depth costs a frame on an explicit
    /// stack, never the call stack. Pointer targets are expanded in place.
    pub fn flatten_raw(&self, offset: usize) -> Result<Vec<RawValue<'a>>> {
        struct Frame {
            cursor: usize,
            remaining: usize,
            /// Set when this frame was spawned by a pointer jump; the value
            /// is the target offset to release from the active chain.
            pointer_target: Option<u32>,
        }

        let mut out = Vec::new();
        let mut guard = DerefGuard::new();
        let mut stack = vec![Frame {
            cursor: offset,
            remaining: 1,
            pointer_target: None,
        }];

        while let Some(frame) = stack.last_mut() {
            if frame.remaining == 0 {
                if let Some(target) = frame.pointer_target {
                    guard.leave(target);
                }
                stack.pop();
                continue;
            }
            frame.remaining -= 1;

            let mut cursor = frame.cursor;
            let ctrl = self.byte_at(cursor)?;
            if ctrl >> 5 == TYPE_POINTER {
                let mut c = cursor;
                let target = self.read_pointer(&mut c)?;
                frame.cursor = c;
                guard.enter(target)?;
                stack.push(Frame {
                    cursor: target as usize,
                    remaining: 1,
                    pointer_target: Some(target),
                });
                continue;
            }

            let (type_code, size) = self.read_header(&mut cursor)?;
            match type_code {
                TYPE_MAP => {
                    out.push(RawValue::MapHeader(size));
                    frame.remaining += size * 2;
                    frame.cursor = cursor;
                }
                TYPE_ARRAY => {
                    out.push(RawValue::ArrayHeader(size));
                    frame.remaining += size;
                    frame.cursor = cursor;
                }
                _ => {
                    out.push(self.decode_scalar_raw(type_code, size, &mut cursor)?);
                    frame.cursor = cursor;
                }
            }
        }
        Ok(out)
    }

    // -- internals ----------------------------------------------------------

    fn byte_at(&self, offset: usize) -> Result<u8> {
        self.data
            .get(offset)
            .copied()
            .ok_or_else(|| Error::InvalidData(format!("offset {offset} past end of data section")))
    }

    /// Decode the value at `cursor`, advancing it past the value's encoding.
    fn decode_at(&self, cursor: &mut usize, guard: &mut DerefGuard) -> Result<Value> {
        let ctrl = self.byte_at(*cursor)?;
        if ctrl >> 5 == TYPE_POINTER {
            let target = self.read_pointer(cursor)?;
            guard.enter(target)?;
            let mut target_cursor = target as usize;
            let value = self.decode_at(&mut target_cursor, guard)?;
            guard.leave(target);
            return Ok(value);
        }

        let (type_code, size) = self.read_header(cursor)?;
        match type_code {
            TYPE_MAP => {
                let mut map = BTreeMap::new();
                for _ in 0..size {
                    let key = match self.decode_at(cursor, guard)? {
                        Value::String(s) => s,
                        other => {
                            return Err(Error::InvalidData(format!(
                                "map key decoded to non-string {other:?}"
                            )))
                        }
                    };
                    let value = self.decode_at(cursor, guard)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            TYPE_ARRAY => {
                let mut items = Vec::with_capacity(size.min(4096));
                for _ in 0..size {
                    items.push(self.decode_at(cursor, guard)?);
                }
                Ok(Value::Array(items))
            }
            _ => self.decode_scalar(type_code, size, cursor),
        }
    }

    /// Decode a non-container value body into owned form.
    fn decode_scalar(&self, type_code: u8, size: usize, cursor: &mut usize) -> Result<Value> {
        Ok(match self.decode_scalar_raw(type_code, size, cursor)?.into_flat() {
            FlatEntry::Scalar(value) => value,
            _ => unreachable!("scalar type codes never produce headers"),
        })
    }

    /// Decode a non-container value body, borrowing where possible.
    fn decode_scalar_raw(
        &self,
        type_code: u8,
        size: usize,
        cursor: &mut usize,
    ) -> Result<RawValue<'a>> {
        match type_code {
            TYPE_STRING => {
                let bytes = self.take(cursor, size)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| Error::InvalidData("string is not valid UTF-8".to_string()))?;
                Ok(RawValue::String(s))
            }
            TYPE_DOUBLE => {
                if size != 8 {
                    return Err(Error::InvalidData(format!("double with size {size}")));
                }
                let bytes = self.take(cursor, 8)?;
                Ok(RawValue::Double(f64::from_be_bytes(bytes.try_into().unwrap())))
            }
            TYPE_BYTES => Ok(RawValue::Bytes(self.take(cursor, size)?)),
            TYPE_UINT16 => {
                if size > 2 {
                    return Err(Error::InvalidData(format!("uint16 with size {size}")));
                }
                Ok(RawValue::Uint16(self.take_uint(cursor, size)? as u16))
            }
            TYPE_UINT32 => {
                if size > 4 {
                    return Err(Error::InvalidData(format!("uint32 with size {size}")));
                }
                Ok(RawValue::Uint32(self.take_uint(cursor, size)? as u32))
            }
            TYPE_INT32 => {
                if size > 4 {
                    return Err(Error::InvalidData(format!("int32 with size {size}")));
                }
                let mut buf = [0u8; 4];
                let bytes = self.take(cursor, size)?;
                buf[4 - size..].copy_from_slice(bytes);
                Ok(RawValue::Int32(i32::from_be_bytes(buf)))
            }
            TYPE_UINT64 => {
                if size > 8 {
                    return Err(Error::InvalidData(format!("uint64 with size {size}")));
                }
                Ok(RawValue::Uint64(self.take_uint(cursor, size)? as u64))
            }
            TYPE_UINT128 => {
                if size > 16 {
                    return Err(Error::InvalidData(format!("uint128 with size {size}")));
                }
                Ok(RawValue::Uint128(self.take_uint(cursor, size)?))
            }
            TYPE_BOOL => match size {
                0 => Ok(RawValue::Bool(false)),
                1 => Ok(RawValue::Bool(true)),
                _ => Err(Error::InvalidData(format!("boolean with size {size}"))),
            },
            TYPE_FLOAT => {
                if size != 4 {
                    return Err(Error::InvalidData(format!("float with size {size}")));
                }
                let bytes = self.take(cursor, 4)?;
                Ok(RawValue::Float(f32::from_be_bytes(bytes.try_into().unwrap())))
            }
            other => Err(Error::InvalidData(format!("unknown type code {other}"))),
        }
    }

    /// Read a control byte (and extended-type byte and size extension),
    /// advancing the cursor. Not valid for pointers.
    fn read_header(&self, cursor: &mut usize) -> Result<(u8, usize)> {
        let ctrl = self.byte_at(*cursor)?;
        *cursor += 1;
        let mut type_code = ctrl >> 5;
        if type_code == TYPE_POINTER {
            return Err(Error::InvalidData(
                "pointer where a value header was required".to_string(),
            ));
        }
        if type_code == 0 {
            let ext = self.byte_at(*cursor)?;
            *cursor += 1;
            type_code = ext
                .checked_add(7)
                .ok_or_else(|| Error::InvalidData(format!("extended type byte {ext}")))?;
            if !(8..=15).contains(&type_code) {
                return Err(Error::InvalidData(format!(
                    "extended type code {type_code} out of range"
                )));
            }
        }
        let size = self.read_size(ctrl & 0x1f, cursor)?;
        Ok((type_code, size))
    }

    fn read_size(&self, size_code: u8, cursor: &mut usize) -> Result<usize> {
        match size_code {
            0..=28 => Ok(size_code as usize),
            29 => {
                let b = self.byte_at(*cursor)?;
                *cursor += 1;
                Ok(29 + b as usize)
            }
            30 => {
                let bytes = self.take(cursor, 2)?;
                Ok(285 + u16::from_be_bytes(bytes.try_into().unwrap()) as usize)
            }
            _ => {
                let bytes = self.take(cursor, 3)?;
                let v = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | bytes[2] as usize;
                Ok(65821 + v)
            }
        }
    }

    /// Read a pointer value at `cursor`, advancing past its encoding.
    fn read_pointer(&self, cursor: &mut usize) -> Result<u32> {
        let ctrl = self.byte_at(*cursor)?;
        *cursor += 1;
        let pointer_size = (ctrl >> 3) & 0x03;
        let payload = (ctrl & 0x07) as u32;
        let value = match pointer_size {
            0 => {
                let b = self.byte_at(*cursor)? as u32;
                *cursor += 1;
                (payload << 8) | b
            }
            1 => {
                let bytes = self.take(cursor, 2)?;
                0x800 + ((payload << 16) | ((bytes[0] as u32) << 8) | bytes[1] as u32)
            }
            2 => {
                let bytes = self.take(cursor, 3)?;
                0x80800
                    + ((payload << 24)
                        | ((bytes[0] as u32) << 16)
                        | ((bytes[1] as u32) << 8)
                        | bytes[2] as u32)
            }
            _ => {
                let bytes = self.take(cursor, 4)?;
                u32::from_be_bytes(bytes.try_into().unwrap())
            }
        };
        if value as usize >= self.data.len() {
            return Err(Error::InvalidData(format!(
                "pointer target {value} past end of data section"
            )));
        }
        Ok(value)
    }

    /// Resolve pointer chains starting at `offset`; returns the offset of
    /// the first non-pointer value header.
    fn follow_pointers(&self, offset: usize, guard: &mut DerefGuard) -> Result<usize> {
        let mut at = offset;
        loop {
            let ctrl = self.byte_at(at)?;
            if ctrl >> 5 != TYPE_POINTER {
                return Ok(at);
            }
            let mut cursor = at;
            let target = self.read_pointer(&mut cursor)?;
            guard.enter(target)?;
            at = target as usize;
        }
    }

    /// Read a map key as a borrowed string, following pointers for the key
    /// only. The cursor advances past the key's encoding at its original
    /// position.
    fn read_key(&self, cursor: &mut usize) -> Result<&'a str> {
        let mut guard = DerefGuard::new();
        let ctrl = self.byte_at(*cursor)?;
        let mut key_at = *cursor;
        if ctrl >> 5 == TYPE_POINTER {
            let target = self.read_pointer(cursor)?;
            guard.enter(target)?;
            key_at = self.follow_pointers(target as usize, &mut guard)?;
        } else {
            self.skip_value(cursor)?;
        }
        let mut key_cursor = key_at;
        let (type_code, size) = self.read_header(&mut key_cursor)?;
        if type_code != TYPE_STRING {
            return Err(Error::InvalidData("map key is not a string".to_string()));
        }
        let end = key_cursor
            .checked_add(size)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| Error::InvalidData("map key past end of data section".to_string()))?;
        std::str::from_utf8(&self.data[key_cursor..end])
            .map_err(|_| Error::InvalidData("map key is not valid UTF-8".to_string()))
    }

    /// Advance the cursor past one value without decoding it. Pointer cells
    /// are skipped in place; their targets are not visited.
    fn skip_value(&self, cursor: &mut usize) -> Result<()> {
        let mut remaining = 1usize;
        while remaining > 0 {
            remaining -= 1;
            let ctrl = self.byte_at(*cursor)?;
            if ctrl >> 5 == TYPE_POINTER {
                self.read_pointer(cursor)?;
                continue;
            }
            let (type_code, size) = self.read_header(cursor)?;
            match type_code {
                TYPE_MAP => remaining += size * 2,
                TYPE_ARRAY => remaining += size,
                TYPE_BOOL => {}
                _ => {
                    self.take(cursor, size)?;
                }
            }
        }
        Ok(())
    }

    fn take(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
        let end = cursor
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| {
                Error::InvalidData(format!("read of {len} bytes at {cursor} out of bounds"))
            })?;
        let slice = &self.data[*cursor..end];
        *cursor = end;
        Ok(slice)
    }

    fn take_uint(&self, cursor: &mut usize, size: usize) -> Result<u128> {
        let bytes = self.take(cursor, size)?;
        let mut acc: u128 = 0;
        for &b in bytes {
            acc = (acc << 8) | b as u128;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: &Value) -> Value {
        let mut enc = Encoder::new();
        let offset = enc.encode(value);
        let bytes = enc.into_bytes();
        let (decoded, _) = Decoder::new(&bytes).read_value(offset as usize).unwrap();
        decoded
    }

    #[test]
    fn scalar_roundtrips() {
        for v in [
            Value::String("hello".to_string()),
            Value::String(String::new()),
            Value::Double(37.751),
            Value::Float(2.5),
            Value::Uint16(12345),
            Value::Uint32(0),
            Value::Uint32(0xDEAD_BEEF),
            Value::Uint64(0x0123_4567_89AB_CDEF),
            Value::Uint128(1 << 100),
            Value::Int32(-42),
            Value::Bool(true),
            Value::Bool(false),
            Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
        ] {
            assert_eq!(roundtrip(&v), v);
        }
    }

    #[test]
    fn nested_map_roundtrips() {
        let mut country = BTreeMap::new();
        country.insert("iso_code".to_string(), Value::String("US".to_string()));
        let mut names = BTreeMap::new();
        names.insert("en".to_string(), Value::String("United States".to_string()));
        country.insert("names".to_string(), Value::Map(names));
        let mut root = BTreeMap::new();
        root.insert("country".to_string(), Value::Map(country));
        root.insert(
            "tags".to_string(),
            Value::Array(vec![
                Value::String("anycast".to_string()),
                Value::Uint32(13335),
            ]),
        );
        let value = Value::Map(root);
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn identical_values_share_one_offset() {
        let mut enc = Encoder::new();
        let v = Value::String("shared".to_string());
        let a = enc.encode(&v);
        let b = enc.encode(&v);
        assert_eq!(a, b);
        let c = enc.encode(&Value::String("different".to_string()));
        assert_ne!(a, c);
    }

    #[test]
    fn repeated_strings_become_pointers() {
        let mut enc = Encoder::new();
        let mut first = BTreeMap::new();
        first.insert("name".to_string(), Value::String("repeated".to_string()));
        let a = enc.encode(&Value::Map(first));

        let mut second = BTreeMap::new();
        second.insert("label".to_string(), Value::String("repeated".to_string()));
        let b = enc.encode(&Value::Map(second));

        let bytes = enc.into_bytes();
        let decoder = Decoder::new(&bytes);
        let (va, _) = decoder.read_value(a as usize).unwrap();
        let (vb, _) = decoder.read_value(b as usize).unwrap();
        match (va, vb) {
            (Value::Map(ma), Value::Map(mb)) => {
                assert_eq!(ma["name"], Value::String("repeated".to_string()));
                assert_eq!(mb["label"], Value::String("repeated".to_string()));
            }
            other => panic!("expected maps, got {other:?}"),
        }
        // The second map must be smaller than a self-contained encoding
        // because its value cell is a pointer.
        let standalone = canonical_bytes(&Value::Map({
            let mut m = BTreeMap::new();
            m.insert("label".to_string(), Value::String("repeated".to_string()));
            m
        }));
        assert!((bytes.len() - b as usize) < standalone.len());
    }

    #[test]
    fn decoded_output_never_contains_pointers() {
        // Build a payload whose encoding is guaranteed to contain pointers,
        // then check the decoded tree is pure data.
        let mut enc = Encoder::new();
        let shared = Value::String("dup".to_string());
        enc.encode(&shared);
        let mut m = BTreeMap::new();
        m.insert("a".to_string(), shared.clone());
        m.insert("b".to_string(), shared.clone());
        let off = enc.encode(&Value::Map(m));
        let bytes = enc.into_bytes();
        let (decoded, _) = Decoder::new(&bytes).read_value(off as usize).unwrap();
        match decoded {
            Value::Map(m) => {
                assert_eq!(m["a"], shared);
                assert_eq!(m["b"], shared);
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn navigate_map_and_array() {
        let mut enc = Encoder::new();
        let mut inner = BTreeMap::new();
        inner.insert("latitude".to_string(), Value::Double(37.751));
        let mut root = BTreeMap::new();
        root.insert("location".to_string(), Value::Map(inner));
        root.insert(
            "subdivisions".to_string(),
            Value::Array(vec![
                Value::String("CA".to_string()),
                Value::String("NV".to_string()),
            ]),
        );
        let off = enc.encode(&Value::Map(root));
        let bytes = enc.into_bytes();
        let dec = Decoder::new(&bytes);

        let at = dec
            .navigate(off as usize, &["location", "latitude"])
            .unwrap();
        let (v, _) = dec.read_value(at).unwrap();
        assert_eq!(v, Value::Double(37.751));

        let at = dec.navigate(off as usize, &["subdivisions", "1"]).unwrap();
        let (v, _) = dec.read_value(at).unwrap();
        assert_eq!(v, Value::String("NV".to_string()));
    }

    #[test]
    fn navigate_missing_key_is_path_invalid() {
        let mut enc = Encoder::new();
        let mut root = BTreeMap::new();
        root.insert("present".to_string(), Value::Bool(true));
        let off = enc.encode(&Value::Map(root));
        let bytes = enc.into_bytes();
        let err = Decoder::new(&bytes)
            .navigate(off as usize, &["nonexistent", "path"])
            .unwrap_err();
        assert!(matches!(err, Error::LookupPathInvalid(_)));
    }

    #[test]
    fn navigate_into_scalar_is_type_mismatch() {
        let mut enc = Encoder::new();
        let mut root = BTreeMap::new();
        root.insert("leaf".to_string(), Value::Uint32(1));
        let off = enc.encode(&Value::Map(root));
        let bytes = enc.into_bytes();
        let err = Decoder::new(&bytes)
            .navigate(off as usize, &["leaf", "deeper"])
            .unwrap_err();
        assert!(matches!(err, Error::LookupPathDoesNotMatchData(_)));
    }

    #[test]
    fn flatten_is_prefix_order() {
        let mut enc = Encoder::new();
        let mut root = BTreeMap::new();
        root.insert(
            "arr".to_string(),
            Value::Array(vec![Value::Uint32(1), Value::Uint32(2)]),
        );
        root.insert("z".to_string(), Value::Bool(true));
        let off = enc.encode(&Value::Map(root));
        let bytes = enc.into_bytes();
        let flat = Decoder::new(&bytes).flatten(off as usize).unwrap();
        assert_eq!(
            flat,
            vec![
                FlatEntry::MapHeader(2),
                FlatEntry::Scalar(Value::String("arr".to_string())),
                FlatEntry::ArrayHeader(2),
                FlatEntry::Scalar(Value::Uint32(1)),
                FlatEntry::Scalar(Value::Uint32(2)),
                FlatEntry::Scalar(Value::String("z".to_string())),
                FlatEntry::Scalar(Value::Bool(true)),
            ]
        );
    }

    #[test]
    fn flatten_expands_pointer_targets() {
        let mut enc = Encoder::new();
        let shared = Value::String("both".to_string());
        enc.encode(&shared);
        let mut m = BTreeMap::new();
        m.insert("x".to_string(), shared.clone());
        m.insert("y".to_string(), shared.clone());
        let off = enc.encode(&Value::Map(m));
        let bytes = enc.into_bytes();
        let flat = Decoder::new(&bytes).flatten(off as usize).unwrap();
        let scalars = flat
            .iter()
            .filter(|e| matches!(e, FlatEntry::Scalar(Value::String(s)) if s == "both"))
            .count();
        assert_eq!(scalars, 2);
    }

    #[test]
    fn pointer_cycle_is_rejected() {
        // Hand-craft two pointers that reference each other.
        let mut bytes = Vec::new();
        push_pointer(2, &mut bytes); // offset 0 -> 2
        push_pointer(0, &mut bytes); // offset 2 -> 0
        let err = Decoder::new(&bytes).read_value(0).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn truncated_buffer_is_invalid_data() {
        let mut enc = Encoder::new();
        let off = enc.encode(&Value::String("truncate me please".to_string()));
        let mut bytes = enc.into_bytes();
        bytes.truncate(bytes.len() - 4);
        let err = Decoder::new(&bytes).read_value(off as usize).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn large_size_encodings_roundtrip() {
        for len in [28usize, 29, 284, 285, 65820, 65821, 70000] {
            let v = Value::String("x".repeat(len));
            assert_eq!(roundtrip(&v), v);
        }
    }

    #[test]
    fn json_numbers_become_doubles() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"count": 3, "ratio": 0.5, "ok": true}"#).unwrap();
        let value = Value::from_json(&json).unwrap();
        match value {
            Value::Map(m) => {
                assert_eq!(m["count"], Value::Double(3.0));
                assert_eq!(m["ratio"], Value::Double(0.5));
                assert_eq!(m["ok"], Value::Bool(true));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn json_null_is_rejected() {
        let json: serde_json::Value = serde_json::from_str(r#"{"bad": null}"#).unwrap();
        assert!(Value::from_json(&json).is_err());
    }
}
