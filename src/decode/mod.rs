//! Generic field-tree decoding of raw bytes against a resolved layout.
//!
//! One unpack pass per node, strictly left to right: fixed-width leaves
//! consume exactly their width, string leaves scan to the next NUL
//! (inclusive), a trailing blob leaf takes everything that remains. Running
//! out of bytes mid-node is not an error: the remainder degrades to a raw
//! blob leaf, so truncated captures stay representable.

pub mod special;

use crate::schema::{self, Prim, Schema, SchemaError, Shape};
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Decode failures that cannot degrade gracefully.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A count-prefixed record enumeration promised more records than the
    /// buffer holds.
    #[error("short read decoding {context}: need {need} bytes, have {have}")]
    ShortRecord {
        context: &'static str,
        need: usize,
        have: usize,
    },
}

/// One decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    /// Fixed-size byte array or raw trailing blob.
    Bytes(Bytes),
    /// NUL-terminated string, NUL stripped.
    Str(String),
    /// Nested decoded struct.
    Node(FieldNode),
}

impl Value {
    /// Numeric view of an unsigned leaf.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U16(v) => Some(u64::from(*v)),
            Value::U32(v) => Some(u64::from(*v)),
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of a signed leaf.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Raw bytes of an array or blob leaf.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// String view of a string leaf.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Nested node view.
    pub fn as_node(&self) -> Option<&FieldNode> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }
}

/// An ordered, named tree of decoded values. Entry order mirrors on-wire
/// field order; top-level layout entries are unnamed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldNode {
    tag: Option<String>,
    entries: Vec<(Option<String>, Value)>,
}

impl FieldNode {
    /// Create an empty node, optionally tagged with the struct name it was
    /// decoded from.
    pub fn new(tag: Option<&str>) -> Self {
        Self {
            tag: tag.map(str::to_string),
            entries: Vec::new(),
        }
    }

    /// A node holding a single unnamed raw-blob leaf.
    pub fn from_blob(bytes: Bytes) -> Self {
        let mut node = Self::new(None);
        node.push(None, Value::Bytes(bytes));
        node
    }

    /// Struct/type name this node was decoded from, if any.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Append an entry, preserving wire order.
    pub fn push(&mut self, name: Option<&str>, value: Value) {
        self.entries.push((name.map(str::to_string), value));
    }

    /// First entry whose field name matches. Linear scan; field names are
    /// unique per node in practice.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_deref() == Some(name))
            .map(|(_, v)| v)
    }

    /// Iterate entries in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (Option<&str>, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_deref(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for FieldNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::format::render_node(self, 0))
    }
}

/// Sequential byte cursor over one node's backing span.
struct Cursor {
    buf: Bytes,
    pos: usize,
}

impl Cursor {
    fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<Bytes> {
        if self.remaining() < n {
            return None;
        }
        let out = self.buf.slice(self.pos..self.pos + n);
        self.pos += n;
        Some(out)
    }

    /// Bytes up to the next NUL (exclusive), consuming through the NUL.
    /// Without a NUL the rest of the span is taken, matching a dump cut
    /// mid-string.
    fn take_str(&mut self) -> Bytes {
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(idx) => {
                let out = self.buf.slice(self.pos..self.pos + idx);
                self.pos += idx + 1;
                out
            }
            None => self.rest(),
        }
    }

    fn rest(&mut self) -> Bytes {
        let out = self.buf.slice(self.pos..);
        self.pos = self.buf.len();
        out
    }
}

/// Decode a byte span against an explicit token-list layout (the shape of a
/// top-level opcode body). A `None` layout is the opaque-body sentinel and
/// yields a single raw-blob leaf.
pub fn decode_layout(
    schema: &Schema,
    layout: Option<&[String]>,
    bytes: Bytes,
) -> Result<FieldNode, SchemaError> {
    let Some(tokens) = layout else {
        return Ok(FieldNode::from_blob(bytes));
    };
    let shapes = schema::resolve_tokens(schema, tokens)?;
    let mut node = FieldNode::new(None);
    let mut cursor = Cursor::new(bytes);
    decode_shapes(&shapes, &mut cursor, &mut node);
    Ok(node)
}

/// Decode a byte span as one named struct.
pub fn decode_struct(schema: &Schema, name: &str, bytes: Bytes) -> Result<FieldNode, SchemaError> {
    let shapes = schema::resolve_struct(schema, name)?;
    let mut node = FieldNode::new(Some(name));
    let mut cursor = Cursor::new(bytes);
    decode_shapes(&shapes, &mut cursor, &mut node);
    Ok(node)
}

/// Unpack shapes in order. Returns false once the span ran dry under a
/// fixed-width leaf; the remainder has then been attached to `node` as a
/// blob leaf and the whole decode stops.
fn decode_shapes(shapes: &[Shape], cursor: &mut Cursor, node: &mut FieldNode) -> bool {
    for shape in shapes {
        match shape {
            Shape::Leaf { name, prim } => {
                let value = match decode_prim(*prim, cursor) {
                    Some(value) => value,
                    None => {
                        node.push(None, Value::Bytes(cursor.rest()));
                        return false;
                    }
                };
                node.push(name.as_deref(), value);
            }
            Shape::Struct { name, tag, fields } => {
                let mut child = FieldNode::new(Some(tag));
                let complete = decode_shapes(fields, cursor, &mut child);
                node.push(name.as_deref(), Value::Node(child));
                if !complete {
                    return false;
                }
            }
        }
    }
    true
}

fn decode_prim(prim: Prim, cursor: &mut Cursor) -> Option<Value> {
    // Wire integers are little-endian (host order of the capturing kernel).
    Some(match prim {
        Prim::U16 => {
            let b = cursor.take(2)?;
            Value::U16(u16::from_le_bytes([b[0], b[1]]))
        }
        Prim::U32 => {
            let b = cursor.take(4)?;
            Value::U32(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }
        Prim::U64 => {
            let b = cursor.take(8)?;
            Value::U64(u64::from_le_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ]))
        }
        Prim::I32 => {
            let b = cursor.take(4)?;
            Value::I32(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }
        Prim::I64 => {
            let b = cursor.take(8)?;
            Value::I64(i64::from_le_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ]))
        }
        Prim::Array(n) => Value::Bytes(cursor.take(n)?),
        Prim::Str => Value::Str(String::from_utf8_lossy(&cursor.take_str()).into_owned()),
        Prim::Blob => Value::Bytes(cursor.rest()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn schema() -> Schema {
        Schema::builder()
            .struct_def(
                "mixed",
                &[
                    ("__u16", "half"),
                    ("__u32", "word"),
                    ("__s32", "serr"),
                    ("__s64", "swide"),
                    ("__u64", "wide"),
                ],
            )
            .struct_def("pair", &[("__u32", "a"), ("__u32", "b")])
            .struct_def("outer", &[("__u64", "id"), ("pair", "p")])
            .struct_def("tail", &[("__u32", "n"), ("buf", "data")])
            .enum_def("ops", &[])
            .build("ops")
            .unwrap()
    }

    fn pack_mixed() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0xffffu16.to_le_bytes());
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&(-13i32).to_le_bytes());
        buf.extend_from_slice(&i64::MIN.to_le_bytes());
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf
    }

    #[test]
    fn test_primitive_values_and_sign_extension() {
        let node = decode_struct(&schema(), "mixed", Bytes::from(pack_mixed())).unwrap();
        assert_eq!(node.tag(), Some("mixed"));
        assert_eq!(node.get("half").unwrap().as_u64(), Some(0xffff));
        assert_eq!(node.get("word").unwrap().as_u64(), Some(7));
        assert_eq!(node.get("serr").unwrap().as_i64(), Some(-13));
        assert_eq!(node.get("swide").unwrap().as_i64(), Some(i64::MIN));
        assert_eq!(node.get("wide").unwrap().as_u64(), Some(u64::MAX));
    }

    #[test]
    fn test_zero_values() {
        let node = decode_struct(&schema(), "mixed", Bytes::from(vec![0u8; 26])).unwrap();
        assert_eq!(node.get("half").unwrap().as_u64(), Some(0));
        assert_eq!(node.get("serr").unwrap().as_i64(), Some(0));
        assert_eq!(node.get("wide").unwrap().as_u64(), Some(0));
    }

    #[test]
    fn test_leaf_order_roundtrip() {
        // Re-serializing the decoded leaves in order must reproduce the
        // original buffer
        let original = pack_mixed();
        let node = decode_struct(&schema(), "mixed", Bytes::from(original.clone())).unwrap();
        let mut repacked = Vec::new();
        for (_, value) in node.iter() {
            match value {
                Value::U16(v) => repacked.extend_from_slice(&v.to_le_bytes()),
                Value::U32(v) => repacked.extend_from_slice(&v.to_le_bytes()),
                Value::U64(v) => repacked.extend_from_slice(&v.to_le_bytes()),
                Value::I32(v) => repacked.extend_from_slice(&v.to_le_bytes()),
                Value::I64(v) => repacked.extend_from_slice(&v.to_le_bytes()),
                other => panic!("unexpected leaf {other:?}"),
            }
        }
        assert_eq!(repacked, original);
    }

    #[test]
    fn test_nested_struct_decode() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&42u64.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        let node = decode_struct(&schema(), "outer", Bytes::from(buf)).unwrap();
        let pair = node.get("p").unwrap().as_node().unwrap();
        assert_eq!(pair.tag(), Some("pair"));
        assert_eq!(pair.get("a").unwrap().as_u64(), Some(1));
        assert_eq!(pair.get("b").unwrap().as_u64(), Some(2));
    }

    #[test]
    fn test_string_scan_consumes_nul() {
        let tokens = vec!["string".to_string(), "string".to_string()];
        let node = decode_layout(
            &schema(),
            Some(&tokens),
            Bytes::from_static(b"old\0new\0"),
        )
        .unwrap();
        let names: Vec<&str> = node.iter().filter_map(|(_, v)| v.as_str()).collect();
        assert_eq!(names, vec!["old", "new"]);
    }

    #[test]
    fn test_string_without_nul_takes_rest() {
        let tokens = vec!["string".to_string()];
        let node = decode_layout(&schema(), Some(&tokens), Bytes::from_static(b"cut")).unwrap();
        assert_eq!(node.iter().next().unwrap().1.as_str(), Some("cut"));
    }

    #[test]
    fn test_trailing_blob() {
        let mut buf = 9u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"payload");
        let node = decode_struct(&schema(), "tail", Bytes::from(buf)).unwrap();
        assert_eq!(node.get("n").unwrap().as_u64(), Some(9));
        assert_eq!(
            node.get("data").unwrap().as_bytes().unwrap().as_ref(),
            b"payload"
        );
    }

    #[test]
    fn test_truncated_span_degrades_to_blob() {
        // 4 bytes into a struct needing 26: "word" cannot complete, so the
        // remainder after "half" lands in an unnamed blob leaf
        let node = decode_struct(&schema(), "mixed", Bytes::from_static(&[1, 0, 0xaa, 0xbb]))
            .unwrap();
        assert_eq!(node.get("half").unwrap().as_u64(), Some(1));
        assert_eq!(node.len(), 2);
        let (name, tail) = node.iter().nth(1).unwrap();
        assert_eq!(name, None);
        assert_eq!(tail.as_bytes().unwrap().as_ref(), &[0xaa, 0xbb]);
    }

    #[test]
    fn test_truncation_stops_outer_decode_too() {
        // Truncation inside the nested struct must not resume in the parent
        let mut buf = Vec::new();
        buf.extend_from_slice(&42u64.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.push(0xcc);
        let node = decode_struct(&schema(), "outer", Bytes::from(buf)).unwrap();
        assert_eq!(node.len(), 2);
        let pair = node.get("p").unwrap().as_node().unwrap();
        assert_eq!(pair.get("a").unwrap().as_u64(), Some(1));
        assert_eq!(pair.iter().nth(1).unwrap().1.as_bytes().unwrap().as_ref(), &[0xcc]);
    }

    #[test]
    fn test_opaque_sentinel_yields_blob() {
        let node = decode_layout(&schema(), None, Bytes::from_static(b"\x01\x02")).unwrap();
        assert_eq!(node.len(), 1);
        assert_eq!(
            node.iter().next().unwrap().1.as_bytes().unwrap().as_ref(),
            &[1, 2]
        );
    }

    #[test]
    fn test_empty_layout_empty_body() {
        let node = decode_layout(&schema(), Some(&[]), Bytes::new()).unwrap();
        assert!(node.is_empty());
    }

    #[test]
    fn test_get_returns_first_match() {
        let mut node = FieldNode::new(None);
        node.push(Some("x"), Value::U32(1));
        node.push(Some("x"), Value::U32(2));
        assert_eq!(node.get("x").unwrap().as_u64(), Some(1));
        assert!(node.get("y").is_none());
    }

    #[test]
    fn test_fixed_array_leaf() {
        let s = Schema::builder()
            .struct_def("padded", &[("__u32", "n"), ("char[4]", "spare")])
            .enum_def("ops", &[])
            .build("ops")
            .unwrap();
        let node =
            decode_struct(&s, "padded", Bytes::from_static(&[5, 0, 0, 0, 9, 9, 9, 9])).unwrap();
        assert_eq!(node.get("spare").unwrap().as_bytes().unwrap().len(), 4);
    }
}
