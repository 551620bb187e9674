//! Wire-type schema: struct member tables, enums, opcode names, and the
//! per-opcode message layout map.
//!
//! A [`Schema`] is built once (from an external C-header parse, or from the
//! compiled-in tables in [`crate::proto`]) and is read-only afterwards.
//! [`SchemaBuilder::build`] runs an iterative fixed-point resolution over the
//! struct table: a struct is resolved once every member token names either a
//! primitive or an already-resolved struct. If a pass resolves nothing while
//! unresolved structs remain, the type graph is cyclic or dangling and the
//! build fails. Fixed struct sizes are precomputed during that pass.

mod resolve;

pub use resolve::{flatten, resolve_struct, resolve_tokens, Shape};

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Schema construction and lookup errors. All of these are fatal at load
/// time; decoding never starts against a schema that failed to build.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("type token {token:?} in {context:?} does not name a primitive or a known struct")]
    UnknownType { context: String, token: String },

    #[error("unknown struct {0:?}")]
    UnknownStruct(String),

    #[error("unknown enum {0:?}")]
    UnknownEnum(String),

    #[error("unresolvable type graph (cyclic or dangling references): {remaining:?}")]
    UnresolvableGraph { remaining: Vec<String> },

    #[error("{context:?}: a trailing-blob leaf is followed by more fields")]
    BlobNotLast { context: String },

    #[error("struct {0:?} has no fixed size (contains string or blob leaves)")]
    VariableSize(String),
}

/// A primitive wire type: the leaves a layout ultimately flattens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    U16,
    U32,
    U64,
    I32,
    I64,
    /// Fixed-size byte array.
    Array(usize),
    /// NUL-terminated string (the NUL is consumed, not part of the value).
    Str,
    /// Raw trailing byte span; must be the last leaf of its layout.
    Blob,
}

impl Prim {
    /// Parse a schema type token. Accepts the kernel spellings (`__u32`),
    /// the stdint spellings (`uint32_t`), `string`, `char`/`buf` for a
    /// trailing blob, and `char[N]` for a fixed-size byte array.
    pub fn from_token(token: &str) -> Option<Prim> {
        match token {
            "__u16" | "uint16_t" => Some(Prim::U16),
            "__u32" | "uint32_t" => Some(Prim::U32),
            "__u64" | "uint64_t" => Some(Prim::U64),
            "__s32" | "int32_t" => Some(Prim::I32),
            "__s64" | "int64_t" => Some(Prim::I64),
            "string" => Some(Prim::Str),
            "char" | "buf" => Some(Prim::Blob),
            _ => token
                .strip_prefix("char[")
                .and_then(|rest| rest.strip_suffix(']'))
                .and_then(|n| n.parse().ok())
                .map(Prim::Array),
        }
    }

    /// Byte width of a fixed-width primitive; `None` for strings and blobs.
    pub fn width(&self) -> Option<usize> {
        match self {
            Prim::U16 => Some(2),
            Prim::U32 | Prim::I32 => Some(4),
            Prim::U64 | Prim::I64 => Some(8),
            Prim::Array(n) => Some(*n),
            Prim::Str | Prim::Blob => None,
        }
    }
}

/// Frame direction tag as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// `'R'`: kernel-to-daemon request.
    Request,
    /// `'W'`: daemon-to-kernel response.
    Response,
}

impl Direction {
    /// The wire tag byte for this direction.
    pub fn tag(&self) -> u8 {
        match self {
            Direction::Request => b'R',
            Direction::Response => b'W',
        }
    }

    /// Parse a wire tag byte.
    pub fn from_tag(tag: u8) -> Option<Direction> {
        match tag {
            b'R' => Some(Direction::Request),
            b'W' => Some(Direction::Response),
            _ => None,
        }
    }
}

/// Resolution state for one struct, computed at build time.
#[derive(Debug, Clone, Copy)]
struct StructInfo {
    /// Total byte size if every leaf is fixed-width.
    size: Option<usize>,
    /// Flattened leaves end in a trailing blob.
    terminal_blob: bool,
}

/// Immutable wire-type tables: struct members, enums, and the opcode
/// name/value maps. Shared read-only by all decoding.
#[derive(Debug, Clone)]
pub struct Schema {
    structs: HashMap<String, Vec<(String, String)>>,
    enums: HashMap<String, Vec<(String, u32)>>,
    opcode_to_name: HashMap<u32, String>,
    name_to_opcode: HashMap<String, u32>,
    sizes: HashMap<String, usize>,
}

impl Schema {
    /// Start building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Ordered `(type token, field name)` member list of a struct.
    pub fn struct_members(&self, name: &str) -> Option<&[(String, String)]> {
        self.structs.get(name).map(Vec::as_slice)
    }

    /// Ordered `(name, value)` list of an enum.
    pub fn enum_values(&self, name: &str) -> Option<&[(String, u32)]> {
        self.enums.get(name).map(Vec::as_slice)
    }

    /// Symbolic operation name for a numeric opcode.
    pub fn opcode_name(&self, opcode: u32) -> Option<&str> {
        self.opcode_to_name.get(&opcode).map(String::as_str)
    }

    /// Numeric opcode for a symbolic operation name.
    pub fn opcode_value(&self, name: &str) -> Option<u32> {
        self.name_to_opcode.get(name).copied()
    }

    /// All known operation names, ordered by opcode value.
    pub fn opcode_names(&self) -> Vec<(u32, &str)> {
        let mut names: Vec<_> = self
            .opcode_to_name
            .iter()
            .map(|(op, name)| (*op, name.as_str()))
            .collect();
        names.sort_unstable_by_key(|(op, _)| *op);
        names
    }

    /// Fixed byte size of a struct, precomputed at build time.
    pub fn sizeof(&self, name: &str) -> Result<usize, SchemaError> {
        if let Some(size) = self.sizes.get(name) {
            return Ok(*size);
        }
        if self.structs.contains_key(name) {
            Err(SchemaError::VariableSize(name.to_string()))
        } else {
            Err(SchemaError::UnknownStruct(name.to_string()))
        }
    }
}

/// Builder for [`Schema`]. Collects struct and enum definitions, then
/// validates the whole type graph in [`SchemaBuilder::build`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    structs: HashMap<String, Vec<(String, String)>>,
    enums: HashMap<String, Vec<(String, u32)>>,
}

impl SchemaBuilder {
    /// Define a struct from ordered `(type token, field name)` members.
    pub fn struct_def(mut self, name: &str, members: &[(&str, &str)]) -> Self {
        self.structs.insert(
            name.to_string(),
            members
                .iter()
                .map(|(token, field)| (token.to_string(), field.to_string()))
                .collect(),
        );
        self
    }

    /// Define an enum from ordered `(name, value)` entries.
    pub fn enum_def(mut self, name: &str, values: &[(&str, u32)]) -> Self {
        self.enums.insert(
            name.to_string(),
            values
                .iter()
                .map(|(entry, value)| (entry.to_string(), *value))
                .collect(),
        );
        self
    }

    /// Validate the type graph and freeze the schema. `opcode_enum` names
    /// the enum holding the operation-code table (e.g. `fuse_opcode`).
    ///
    /// Resolution runs as an explicit work list: each pass resolves every
    /// struct whose members are all primitives or already-resolved structs;
    /// the loop ends when a pass makes no progress. Leftover structs at that
    /// point form an unresolvable (cyclic or dangling) graph.
    pub fn build(self, opcode_enum: &str) -> Result<Schema, SchemaError> {
        let opcodes = self
            .enums
            .get(opcode_enum)
            .ok_or_else(|| SchemaError::UnknownEnum(opcode_enum.to_string()))?;

        let mut opcode_to_name = HashMap::new();
        let mut name_to_opcode = HashMap::new();
        for (name, value) in opcodes {
            opcode_to_name.insert(*value, name.clone());
            name_to_opcode.insert(name.clone(), *value);
        }

        let mut resolved: HashMap<String, StructInfo> = HashMap::new();
        let mut worklist: Vec<&String> = self.structs.keys().collect();

        while !worklist.is_empty() {
            let before = worklist.len();
            let mut next = Vec::new();
            for name in worklist {
                match Self::try_resolve(&self.structs, &resolved, name)? {
                    Some(info) => {
                        resolved.insert(name.clone(), info);
                    }
                    None => next.push(name),
                }
            }
            if next.len() == before {
                // A full pass without progress: whatever is left references
                // itself or nothing the table will ever contain.
                let mut remaining: Vec<String> = next.iter().map(|s| (*s).clone()).collect();
                remaining.sort_unstable();
                return Err(SchemaError::UnresolvableGraph { remaining });
            }
            worklist = next;
        }

        let mut sizes = HashMap::new();
        for (name, info) in &resolved {
            if let Some(size) = info.size {
                sizes.insert(name.clone(), size);
            }
        }

        Ok(Schema {
            structs: self.structs,
            enums: self.enums,
            opcode_to_name,
            name_to_opcode,
            sizes,
        })
    }

    /// Try to resolve one struct against the already-resolved set. Returns
    /// `Ok(None)` when a member references a known but not-yet-resolved
    /// struct (retry next pass); errs on tokens that name nothing at all
    /// and on blob leaves followed by more fields.
    fn try_resolve(
        structs: &HashMap<String, Vec<(String, String)>>,
        resolved: &HashMap<String, StructInfo>,
        name: &str,
    ) -> Result<Option<StructInfo>, SchemaError> {
        let members = &structs[name];
        let mut size = Some(0usize);
        let mut terminal_blob = false;

        for (token, _field) in members {
            if terminal_blob {
                return Err(SchemaError::BlobNotLast {
                    context: name.to_string(),
                });
            }
            let member = if let Some(prim) = Prim::from_token(token) {
                StructInfo {
                    size: prim.width(),
                    terminal_blob: prim == Prim::Blob,
                }
            } else if let Some(info) = resolved.get(token) {
                *info
            } else if structs.contains_key(token) {
                return Ok(None);
            } else {
                return Err(SchemaError::UnknownType {
                    context: name.to_string(),
                    token: token.clone(),
                });
            };
            size = match (size, member.size) {
                (Some(total), Some(w)) => Some(total + w),
                _ => None,
            };
            terminal_blob = member.terminal_blob;
        }

        Ok(Some(StructInfo {
            size,
            terminal_blob,
        }))
    }
}

/// Per-opcode top-level body layouts: `(direction, operation name)` mapped
/// to an ordered token list, or `None` as the deliberate "no structural
/// decoding, keep the body as a raw blob" sentinel.
#[derive(Debug, Clone, Default)]
pub struct MessageLayouts {
    map: HashMap<(Direction, String), Option<Vec<String>>>,
}

impl MessageLayouts {
    /// Create an empty layout map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a structured layout for one operation body.
    pub fn insert(&mut self, dir: Direction, op: &str, tokens: &[&str]) {
        self.map.insert(
            (dir, op.to_string()),
            Some(tokens.iter().map(|t| t.to_string()).collect()),
        );
    }

    /// Register the explicit "no layout" sentinel for one operation body.
    pub fn insert_opaque(&mut self, dir: Direction, op: &str) {
        self.map.insert((dir, op.to_string()), None);
    }

    /// Look up the layout for an operation body. Outer `None` means the
    /// operation is absent from the map entirely; `Some(None)` is the
    /// opaque-body sentinel.
    pub fn get(&self, dir: Direction, op: &str) -> Option<Option<&[String]>> {
        self.map
            .get(&(dir, op.to_string()))
            .map(|tokens| tokens.as_deref())
    }

    /// Check every registered layout against the schema: all tokens must
    /// resolve, and a blob token may only appear as the final leaf.
    pub fn validate(&self, schema: &Schema) -> Result<(), SchemaError> {
        for ((_dir, op), tokens) in &self.map {
            let Some(tokens) = tokens else { continue };
            let shapes = resolve::resolve_tokens(schema, tokens)?;
            let leaves = resolve::flatten(&shapes);
            for (i, (path, prim)) in leaves.iter().enumerate() {
                if *prim == Prim::Blob && i + 1 != leaves.len() {
                    return Err(SchemaError::BlobNotLast {
                        context: format!("{op}:{path}"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_schema() -> SchemaBuilder {
        Schema::builder()
            .struct_def("inner", &[("__u32", "a"), ("__u16", "b")])
            .struct_def("outer", &[("__u64", "id"), ("inner", "in")])
            .enum_def("ops", &[("OP_PING", 1), ("OP_PONG", 2)])
    }

    #[test]
    fn test_prim_tokens() {
        assert_eq!(Prim::from_token("__u32"), Some(Prim::U32));
        assert_eq!(Prim::from_token("uint64_t"), Some(Prim::U64));
        assert_eq!(Prim::from_token("__s64"), Some(Prim::I64));
        assert_eq!(Prim::from_token("string"), Some(Prim::Str));
        assert_eq!(Prim::from_token("buf"), Some(Prim::Blob));
        assert_eq!(Prim::from_token("char[24]"), Some(Prim::Array(24)));
        assert_eq!(Prim::from_token("struct_name"), None);
        assert_eq!(Prim::from_token("char[x]"), None);
    }

    #[test]
    fn test_build_and_sizeof() {
        let schema = small_schema().build("ops").unwrap();
        assert_eq!(schema.sizeof("inner").unwrap(), 6);
        assert_eq!(schema.sizeof("outer").unwrap(), 14);
        assert_eq!(schema.opcode_name(1), Some("OP_PING"));
        assert_eq!(schema.opcode_value("OP_PONG"), Some(2));
        assert!(schema.opcode_name(99).is_none());
    }

    #[test]
    fn test_enum_values_in_definition_order() {
        let schema = small_schema().build("ops").unwrap();
        let values = schema.enum_values("ops").unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], ("OP_PING".to_string(), 1));
        assert_eq!(values[1], ("OP_PONG".to_string(), 2));
        assert!(schema.enum_values("nope").is_none());
    }

    #[test]
    fn test_sizeof_variable_struct() {
        let schema = small_schema()
            .struct_def("named", &[("__u32", "len"), ("string", "name")])
            .build("ops")
            .unwrap();
        assert!(matches!(
            schema.sizeof("named"),
            Err(SchemaError::VariableSize(_))
        ));
        assert!(matches!(
            schema.sizeof("nonesuch"),
            Err(SchemaError::UnknownStruct(_))
        ));
    }

    #[test]
    fn test_unknown_token_fails() {
        let err = small_schema()
            .struct_def("bad", &[("no_such_type", "x")])
            .build("ops")
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { .. }));
    }

    #[test]
    fn test_cycle_fails() {
        let err = Schema::builder()
            .struct_def("a", &[("b", "x")])
            .struct_def("b", &[("a", "y")])
            .enum_def("ops", &[])
            .build("ops")
            .unwrap_err();
        match err {
            SchemaError::UnresolvableGraph { remaining } => {
                assert_eq!(remaining, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected UnresolvableGraph, got {other:?}"),
        }
    }

    #[test]
    fn test_deep_reference_chain_resolves() {
        // c -> b -> a forces more than one fixed-point pass in the worst
        // iteration order
        let schema = Schema::builder()
            .struct_def("c", &[("b", "x")])
            .struct_def("b", &[("a", "x")])
            .struct_def("a", &[("__u32", "x")])
            .enum_def("ops", &[])
            .build("ops")
            .unwrap();
        assert_eq!(schema.sizeof("c").unwrap(), 4);
    }

    #[test]
    fn test_blob_not_last_fails() {
        let err = small_schema()
            .struct_def("bad", &[("buf", "data"), ("__u32", "after")])
            .build("ops")
            .unwrap_err();
        assert!(matches!(err, SchemaError::BlobNotLast { .. }));
    }

    #[test]
    fn test_missing_opcode_enum() {
        let err = small_schema().build("not_an_enum").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownEnum(_)));
    }

    #[test]
    fn test_layout_validation() {
        let schema = small_schema().build("ops").unwrap();

        let mut ok = MessageLayouts::new();
        ok.insert(Direction::Request, "OP_PING", &["inner", "buf"]);
        ok.insert_opaque(Direction::Response, "OP_PING");
        ok.validate(&schema).unwrap();

        let mut bad = MessageLayouts::new();
        bad.insert(Direction::Request, "OP_PING", &["buf", "inner"]);
        assert!(matches!(
            bad.validate(&schema),
            Err(SchemaError::BlobNotLast { .. })
        ));

        let mut unknown = MessageLayouts::new();
        unknown.insert(Direction::Request, "OP_PING", &["mystery"]);
        assert!(matches!(
            unknown.validate(&schema),
            Err(SchemaError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_direction_tags() {
        assert_eq!(Direction::from_tag(b'R'), Some(Direction::Request));
        assert_eq!(Direction::from_tag(b'W'), Some(Direction::Response));
        assert_eq!(Direction::from_tag(b'X'), None);
        assert_eq!(Direction::Request.tag(), 0x52);
        assert_eq!(Direction::Response.tag(), 0x57);
    }
}
