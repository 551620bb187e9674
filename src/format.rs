//! Frame formatting: a compact one-line text form and a JSON form.
//!
//! The text form mirrors the decoded tree: `TAG<field: value ...>`, with
//! struct tags stripped of their `fuse_` prefix and request headers tagged
//! with the operation name. Byte blobs are clipped to a configurable limit
//! with a `... [N bytes]` tail so huge read/write payloads stay printable.

use crate::decode::{FieldNode, Value};
use crate::schema::Direction;
use crate::stream::Frame;
use serde_json::json;

/// Render one frame as a single text line.
pub fn format_frame(frame: &Frame, limit: usize) -> String {
    let header = match frame.direction {
        Direction::Request => {
            let opname = frame.opcode.clone().unwrap_or_else(|| {
                let num = frame
                    .header
                    .get("opcode")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                format!("OP#{num}")
            });
            render_with_tag(Some(&opname), &frame.header, limit)
        }
        Direction::Response => render_node(&frame.header, limit),
    };
    format!("{header} {}", render_node(&frame.body, limit))
}

/// Render a node as `tag<field: value ...>`; a limit of 0 never truncates.
pub fn render_node(node: &FieldNode, limit: usize) -> String {
    render_with_tag(node.tag(), node, limit)
}

fn render_with_tag(tag: Option<&str>, node: &FieldNode, limit: usize) -> String {
    let tag = tag.map(|t| t.trim_start_matches("fuse_")).unwrap_or("");
    let fields: Vec<String> = node
        .iter()
        .map(|(name, value)| match name {
            Some(name) => format!("{name}: {}", render_value(value, limit)),
            None => render_value(value, limit),
        })
        .collect();
    format!("{tag}<{}>", fields.join(" "))
}

fn render_value(value: &Value, limit: usize) -> String {
    match value {
        Value::U16(v) => v.to_string(),
        Value::U32(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::Str(s) => format!("{s:?}"),
        Value::Bytes(b) => render_bytes(b, limit),
        Value::Node(n) => render_node(n, limit),
    }
}

fn render_bytes(bytes: &[u8], limit: usize) -> String {
    if limit > 0 && bytes.len() > limit {
        format!("{} ... [{} bytes]", escape_bytes(&bytes[..limit]), bytes.len())
    } else {
        escape_bytes(bytes)
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            0 => out.push_str("\\0"),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push('"');
    out
}

/// Render one frame as a JSON record.
pub fn frame_to_json(frame: &Frame, limit: usize) -> serde_json::Value {
    json!({
        "dir": match frame.direction {
            Direction::Request => "R",
            Direction::Response => "W",
        },
        "op": frame.opcode,
        "unique": frame.unique,
        "header": node_to_json(&frame.header, limit),
        "body": node_to_json(&frame.body, limit),
    })
}

fn node_to_json(node: &FieldNode, limit: usize) -> serde_json::Value {
    let fields: Vec<serde_json::Value> = node
        .iter()
        .map(|(name, value)| {
            json!({
                "name": name,
                "value": value_to_json(value, limit),
            })
        })
        .collect();
    json!({
        "tag": node.tag(),
        "fields": fields,
    })
}

fn value_to_json(value: &Value, limit: usize) -> serde_json::Value {
    match value {
        Value::U16(v) => json!(v),
        Value::U32(v) => json!(v),
        Value::U64(v) => json!(v),
        Value::I32(v) => json!(v),
        Value::I64(v) => json!(v),
        Value::Str(s) => json!(s),
        Value::Bytes(b) => {
            let truncated = limit > 0 && b.len() > limit;
            let shown = if truncated { &b[..limit] } else { &b[..] };
            json!({
                "len": b.len(),
                "truncated": truncated,
                "data": String::from_utf8_lossy(shown),
            })
        }
        Value::Node(n) => node_to_json(n, limit),
    }
}
