//! Opcode-specific body decoders for the payload shapes a flat field list
//! cannot express: the conditional xattr responses, the variable-count
//! directory listings, and the count-prefixed batch-forget request.
//!
//! Dispatch is a closed table built once from the schema. Everything else
//! goes through the generic layout decoder.

use super::{decode_struct, DecodeError, FieldNode, Value};
use crate::schema::{Direction, Schema};
use bytes::Bytes;
use std::collections::HashMap;

/// Which decoder handles one `(direction, opcode)` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyDecoder {
    /// Generic decode driven by the message-layout table.
    Layout,
    /// Response to an extended-attribute read: shape depends on the paired
    /// request's `size` field. The list variant re-splits the value blob on
    /// NULs.
    XattrRead { list: bool },
    /// Directory entries: fixed record header, length-prefixed name, 8-byte
    /// alignment padding. The plus variant prefixes each record with an
    /// entry-out struct.
    DirEntries { plus: bool },
    /// Count-prefixed forget records.
    BatchForget,
}

/// The override table: a finite map from `(direction, opcode name)` to a
/// named decoder, everything else falling back to [`BodyDecoder::Layout`].
#[derive(Debug)]
pub struct DecoderTable {
    map: HashMap<(Direction, String), BodyDecoder>,
}

impl DecoderTable {
    /// Build the dispatch table. Overrides are registered only for opcodes
    /// the schema actually knows, so a stripped-down schema degrades to
    /// generic decoding instead of dispatching into missing struct defs.
    pub fn new(schema: &Schema) -> Self {
        let overrides: &[(Direction, &str, BodyDecoder)] = &[
            (
                Direction::Response,
                "FUSE_GETXATTR",
                BodyDecoder::XattrRead { list: false },
            ),
            (
                Direction::Response,
                "FUSE_LISTXATTR",
                BodyDecoder::XattrRead { list: true },
            ),
            (
                Direction::Response,
                "FUSE_READDIR",
                BodyDecoder::DirEntries { plus: false },
            ),
            (
                Direction::Response,
                "FUSE_READDIRPLUS",
                BodyDecoder::DirEntries { plus: true },
            ),
            (Direction::Request, "FUSE_BATCH_FORGET", BodyDecoder::BatchForget),
        ];

        let mut map = HashMap::new();
        for (dir, op, decoder) in overrides {
            if schema.opcode_value(op).is_some() {
                map.insert((*dir, op.to_string()), *decoder);
            }
        }
        Self { map }
    }

    /// Decoder for one body; [`BodyDecoder::Layout`] when no override applies.
    pub fn get(&self, dir: Direction, op: &str) -> BodyDecoder {
        self.map
            .get(&(dir, op.to_string()))
            .copied()
            .unwrap_or(BodyDecoder::Layout)
    }
}

/// `size` field of an xattr request body. The layout wraps the fixed
/// struct as the first (unnamed) entry, so look one level down as well.
fn request_size(body: &FieldNode) -> Option<u64> {
    if let Some(size) = body.get("size").and_then(Value::as_u64) {
        return Some(size);
    }
    body.iter().find_map(|(_, value)| match value {
        Value::Node(node) => node.get("size").and_then(Value::as_u64),
        _ => None,
    })
}

/// Decode a GETXATTR/LISTXATTR response. With a zero-size query the daemon
/// answers with the fixed size struct; otherwise the body is the attribute
/// value itself (LISTXATTR: a NUL-separated name list).
pub fn decode_xattr_read(
    schema: &Schema,
    bytes: Bytes,
    request_body: Option<&FieldNode>,
    list: bool,
) -> Result<FieldNode, DecodeError> {
    let size_probe = request_body.and_then(request_size) == Some(0);
    if size_probe {
        return Ok(decode_struct(schema, "fuse_getxattr_out", bytes)?);
    }
    if list {
        let mut node = FieldNode::new(None);
        for name in bytes.split(|&b| b == 0) {
            if name.is_empty() {
                continue;
            }
            node.push(
                None,
                Value::Str(String::from_utf8_lossy(name).into_owned()),
            );
        }
        return Ok(node);
    }
    Ok(FieldNode::from_blob(bytes))
}

/// Decode a READDIR/READDIRPLUS response: repeated `(fixed part, name)`
/// records. The name is `namelen` bytes, followed by padding to the next
/// 8-byte boundary. A dangling partial record at the tail (cut anywhere in
/// its fixed part, name, or padding) is dropped, not an error.
pub fn decode_dir_entries(
    schema: &Schema,
    bytes: Bytes,
    plus: bool,
) -> Result<FieldNode, DecodeError> {
    let record_structs: &[&str] = if plus {
        &["fuse_entry_out", "fuse_dirent"]
    } else {
        &["fuse_dirent"]
    };
    let mut fixed_size = 0usize;
    for name in record_structs {
        fixed_size += schema.sizeof(name)?;
    }

    let mut out = FieldNode::new(None);
    let mut off = 0usize;
    loop {
        let remaining = bytes.len() - off;
        if remaining < fixed_size {
            break;
        }
        let mut record = FieldNode::new(None);
        let mut part_off = off;
        let mut namelen = 0usize;
        for name in record_structs {
            let part_size = schema.sizeof(name)?;
            let part = decode_struct(
                schema,
                name,
                bytes.slice(part_off..part_off + part_size),
            )?;
            if *name == "fuse_dirent" {
                namelen = part.get("namelen").and_then(Value::as_u64).unwrap_or(0) as usize;
            }
            record.push(None, Value::Node(part));
            part_off += part_size;
        }

        let pad = (8 - namelen % 8) % 8;
        if fixed_size + namelen + pad > remaining {
            // record cut inside its name or padding
            break;
        }
        let name = bytes.slice(off + fixed_size..off + fixed_size + namelen);
        record.push(None, Value::Str(String::from_utf8_lossy(&name).into_owned()));
        out.push(None, Value::Node(record));

        off += fixed_size + namelen + pad;
    }
    Ok(out)
}

/// Decode a BATCH_FORGET request: a count-prefixed header followed by
/// exactly `count` fixed records, no padding. A buffer shorter than the
/// promised records is a hard short read, not a graceful truncation.
pub fn decode_batch_forget(schema: &Schema, bytes: Bytes) -> Result<FieldNode, DecodeError> {
    let head_size = schema.sizeof("fuse_batch_forget_in")?;
    if bytes.len() < head_size {
        return Err(DecodeError::ShortRecord {
            context: "batch-forget header",
            need: head_size,
            have: bytes.len(),
        });
    }
    let head = decode_struct(schema, "fuse_batch_forget_in", bytes.slice(..head_size))?;
    let count = head.get("count").and_then(Value::as_u64).unwrap_or(0) as usize;

    let one_size = schema.sizeof("fuse_forget_one")?;
    let need = head_size + count * one_size;
    if bytes.len() < need {
        return Err(DecodeError::ShortRecord {
            context: "batch-forget records",
            need,
            have: bytes.len(),
        });
    }

    let mut out = FieldNode::new(None);
    out.push(None, Value::Node(head));
    let mut off = head_size;
    for _ in 0..count {
        let one = decode_struct(schema, "fuse_forget_one", bytes.slice(off..off + one_size))?;
        out.push(None, Value::Node(one));
        off += one_size;
    }
    Ok(out)
}
