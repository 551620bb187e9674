//! Schema-driven dissector for FUSE kernel/daemon wire dumps.
//!
//! `fusetrace` turns the opaque byte stream exchanged between the kernel
//! FUSE driver and a userspace daemon into a structured, named-field
//! representation, without a hand-written decoder per operation:
//!
//! - **Schema**: immutable struct/enum/opcode tables describing the wire types
//! - **Decode**: a generic field-tree decoder driven by per-opcode layouts,
//!   plus a closed set of overrides for the payloads a flat layout cannot
//!   express (directory listings, conditional xattr responses, batch forgets)
//! - **Stream**: a pull-based frame reader that splits the dump into tagged
//!   frames and correlates each response with its originating request
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use fusetrace::{proto, FrameReader};
//!
//! let (schema, layouts) = proto::tables()?;
//! let file = std::fs::File::open("capture.fusedump")?;
//! for frame in FrameReader::new(file, &schema, &layouts)? {
//!     println!("{}", fusetrace::format::format_frame(&frame?, 512));
//! }
//! ```

pub mod cli;
pub mod decode;
pub mod format;
pub mod proto;
pub mod schema;
pub mod stream;

// Re-export the main types at crate root for convenience
pub use decode::{DecodeError, FieldNode, Value};
pub use schema::{Direction, MessageLayouts, Prim, Schema, SchemaBuilder, SchemaError};
pub use stream::{Frame, FrameReader, Message, StreamError};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::decode::{FieldNode, Value};
    pub use crate::schema::{Direction, MessageLayouts, Schema};
    pub use crate::stream::{Frame, FrameReader, Message};
}
