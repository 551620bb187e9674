//! Layout resolution: expanding type-token lists into leaf trees.
//!
//! A resolved [`Shape`] mirrors the nesting of the schema's struct
//! references; flattening it yields the ordered primitive leaves the
//! decoder unpacks against. Resolution never mutates the schema and is
//! idempotent for a given token list.

use super::{Prim, Schema, SchemaError};

/// One resolved node of a layout: either a primitive leaf, or a struct
/// expanded into its member shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Leaf {
        name: Option<String>,
        prim: Prim,
    },
    Struct {
        name: Option<String>,
        tag: String,
        fields: Vec<Shape>,
    },
}

/// Expand an ordered list of type tokens (a top-level opcode body layout)
/// into resolved shapes. Top-level entries carry no field names.
pub fn resolve_tokens(schema: &Schema, tokens: &[String]) -> Result<Vec<Shape>, SchemaError> {
    tokens
        .iter()
        .map(|token| resolve_one(schema, token, None, "<layout>"))
        .collect()
}

/// Expand a named struct into the shapes of its members.
pub fn resolve_struct(schema: &Schema, name: &str) -> Result<Vec<Shape>, SchemaError> {
    let members = schema
        .struct_members(name)
        .ok_or_else(|| SchemaError::UnknownStruct(name.to_string()))?;
    members
        .iter()
        .map(|(token, field)| resolve_one(schema, token, Some(field), name))
        .collect()
}

fn resolve_one(
    schema: &Schema,
    token: &str,
    field: Option<&str>,
    context: &str,
) -> Result<Shape, SchemaError> {
    if let Some(prim) = Prim::from_token(token) {
        return Ok(Shape::Leaf {
            name: field.map(str::to_string),
            prim,
        });
    }
    if schema.struct_members(token).is_some() {
        return Ok(Shape::Struct {
            name: field.map(str::to_string),
            tag: token.to_string(),
            fields: resolve_struct(schema, token)?,
        });
    }
    Err(SchemaError::UnknownType {
        context: context.to_string(),
        token: token.to_string(),
    })
}

/// Flatten resolved shapes into the ordered `(field path, primitive)` leaf
/// list, paths dot-joined through nested structs.
pub fn flatten(shapes: &[Shape]) -> Vec<(String, Prim)> {
    let mut leaves = Vec::new();
    for shape in shapes {
        flatten_into(shape, "", &mut leaves);
    }
    leaves
}

fn flatten_into(shape: &Shape, prefix: &str, leaves: &mut Vec<(String, Prim)>) {
    match shape {
        Shape::Leaf { name, prim } => {
            let path = match (prefix.is_empty(), name) {
                (true, Some(n)) => n.clone(),
                (true, None) => String::new(),
                (false, Some(n)) => format!("{prefix}.{n}"),
                (false, None) => prefix.to_string(),
            };
            leaves.push((path, *prim));
        }
        Shape::Struct { name, fields, .. } => {
            let next = match (prefix.is_empty(), name) {
                (true, Some(n)) => n.clone(),
                (true, None) => String::new(),
                (false, Some(n)) => format!("{prefix}.{n}"),
                (false, None) => prefix.to_string(),
            };
            for field in fields {
                flatten_into(field, &next, leaves);
            }
        }
    }
}
