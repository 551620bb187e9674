//! Frame reading and request/response correlation.
//!
//! A fusedump is a flat byte stream of tagged frames: one direction byte
//! (`'R'` or `'W'`), a fixed header whose shape the schema dictates, and a
//! body whose length comes from the header's `len` field. [`FrameReader`]
//! pulls one frame at a time, decodes it, and pairs responses with their
//! originating requests through the `unique` correlation id. Frames are
//! emitted immediately as they are read; pairing only selects the decoder
//! for a response body, never delays emission.
//!
//! The reader is single-threaded and pull-based. Dropping it between frames
//! loses nothing: no partially-applied state survives a frame boundary.

use crate::decode::special::{decode_batch_forget, decode_dir_entries, decode_xattr_read};
use crate::decode::special::{BodyDecoder, DecoderTable};
use crate::decode::{self, DecodeError, FieldNode, Value};
use crate::schema::{Direction, MessageLayouts, Schema, SchemaError};
use bytes::Bytes;
use std::collections::HashMap;
use std::io::{self, Read};
use thiserror::Error;

/// Struct name of the fixed request header. Field widths and order come
/// from the schema, never from hardcoded offsets.
pub const REQUEST_HEADER: &str = "fuse_in_header";

/// Struct name of the fixed response header.
pub const RESPONSE_HEADER: &str = "fuse_out_header";

/// Operations whose requests never receive a response frame. They are
/// decoded and emitted but never enter the pending table.
pub const NO_RESPONSE_OPS: &[&str] = &["FUSE_FORGET", "FUSE_BATCH_FORGET"];

/// Stream-level failures. All of these end consumption of the stream;
/// frames already emitted remain valid.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("read: {0}")]
    Io(#[from] io::Error),

    /// The stream ended inside a header or a length-determined body.
    /// Clean end-of-stream happens only at a tag boundary.
    #[error("short read: stream ended inside {context} ({need} bytes expected)")]
    ShortRead { context: &'static str, need: usize },

    /// A tag byte that is neither `'R'` nor `'W'`. Framing is unrecoverable
    /// past this point.
    #[error("unknown direction tag {0:#04x}")]
    UnknownDirection(u8),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// One decoded wire frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub direction: Direction,
    /// Symbolic operation name; for responses, taken from the paired
    /// request. `None` when the opcode is unknown or no request was seen.
    pub opcode: Option<String>,
    /// Correlation id shared by a request and its response.
    pub unique: u64,
    pub header: FieldNode,
    pub body: FieldNode,
    /// For responses: the completed request/response pair. Requests carry
    /// `None` here; their message completes when the response arrives.
    pub message: Option<Box<Message>>,
}

/// A logical request/response pair keyed by `unique`. The request side is
/// absent for a response whose request was never seen (a capture started
/// mid-stream); that is a representable outcome, not an error.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub opcode: Option<String>,
    pub in_head: Option<FieldNode>,
    pub in_body: Option<FieldNode>,
    pub out_head: Option<FieldNode>,
    pub out_body: Option<FieldNode>,
}

/// Pull-based frame decoder over a byte stream.
///
/// Implements `Iterator`; the sequence ends cleanly at end-of-stream on a
/// tag boundary and terminally after the first fatal error.
pub struct FrameReader<'a, R: Read> {
    reader: R,
    schema: &'a Schema,
    layouts: &'a MessageLayouts,
    decoders: DecoderTable,
    pending: HashMap<u64, Message>,
    in_header_size: usize,
    out_header_size: usize,
    done: bool,
}

impl<'a, R: Read> FrameReader<'a, R> {
    /// Wrap a byte stream. Validates the layout map against the schema and
    /// resolves the fixed header sizes up front, so shape problems surface
    /// before any decoding starts.
    pub fn new(
        reader: R,
        schema: &'a Schema,
        layouts: &'a MessageLayouts,
    ) -> Result<Self, SchemaError> {
        layouts.validate(schema)?;
        let in_header_size = schema.sizeof(REQUEST_HEADER)?;
        let out_header_size = schema.sizeof(RESPONSE_HEADER)?;
        Ok(Self {
            reader,
            schema,
            layouts,
            decoders: DecoderTable::new(schema),
            pending: HashMap::new(),
            in_header_size,
            out_header_size,
            done: false,
        })
    }

    /// Number of requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn read_chunk(&mut self, n: usize, context: &'static str) -> Result<Bytes, StreamError> {
        let mut buf = vec![0u8; n];
        self.reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                StreamError::ShortRead { context, need: n }
            } else {
                StreamError::Io(e)
            }
        })?;
        Ok(Bytes::from(buf))
    }

    /// Read one frame; `Ok(None)` is clean end-of-stream, which can only
    /// occur exactly at a tag boundary.
    fn next_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        let mut tag = [0u8; 1];
        loop {
            match self.reader.read(&mut tag) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StreamError::Io(e)),
            }
        }
        match Direction::from_tag(tag[0]) {
            Some(Direction::Request) => self.read_request().map(Some),
            Some(Direction::Response) => self.read_response().map(Some),
            None => Err(StreamError::UnknownDirection(tag[0])),
        }
    }

    fn read_request(&mut self) -> Result<Frame, StreamError> {
        let head_bytes = self.read_chunk(self.in_header_size, "request header")?;
        let header = decode::decode_struct(self.schema, REQUEST_HEADER, head_bytes)?;

        let len = header.get("len").and_then(Value::as_u64).unwrap_or(0) as usize;
        let opcode_num = header.get("opcode").and_then(Value::as_u64).unwrap_or(0) as u32;
        let unique = header.get("unique").and_then(Value::as_u64).unwrap_or(0);

        let body_len = len.saturating_sub(self.in_header_size);
        let body_bytes = self.read_chunk(body_len, "request body")?;

        let opcode = self.schema.opcode_name(opcode_num).map(str::to_owned);
        let body = match &opcode {
            Some(op) => match self.decoders.get(Direction::Request, op) {
                BodyDecoder::BatchForget => decode_batch_forget(self.schema, body_bytes)?,
                _ => {
                    let layout = self.layouts.get(Direction::Request, op).flatten();
                    decode::decode_layout(self.schema, layout, body_bytes)?
                }
            },
            None => {
                tracing::debug!(opcode = opcode_num, unique, "unrecognized request opcode");
                FieldNode::from_blob(body_bytes)
            }
        };

        let no_response = opcode
            .as_deref()
            .is_some_and(|op| NO_RESPONSE_OPS.contains(&op));
        if !no_response {
            self.pending.insert(
                unique,
                Message {
                    opcode: opcode.clone(),
                    in_head: Some(header.clone()),
                    in_body: Some(body.clone()),
                    out_head: None,
                    out_body: None,
                },
            );
        }

        Ok(Frame {
            direction: Direction::Request,
            opcode,
            unique,
            header,
            body,
            message: None,
        })
    }

    fn read_response(&mut self) -> Result<Frame, StreamError> {
        let head_bytes = self.read_chunk(self.out_header_size, "response header")?;
        let header = decode::decode_struct(self.schema, RESPONSE_HEADER, head_bytes)?;

        let len = header.get("len").and_then(Value::as_u64).unwrap_or(0) as usize;
        let unique = header.get("unique").and_then(Value::as_u64).unwrap_or(0);

        let body_len = len.saturating_sub(self.out_header_size);
        let body_bytes = self.read_chunk(body_len, "response body")?;

        // Removed exactly once; a response with no pending request becomes a
        // free-standing response-only message.
        let mut message = self.pending.remove(&unique).unwrap_or_default();
        let opcode = message.opcode.clone();

        let body = match &opcode {
            Some(op) => match self.decoders.get(Direction::Response, op) {
                BodyDecoder::XattrRead { list } => decode_xattr_read(
                    self.schema,
                    body_bytes,
                    message.in_body.as_ref(),
                    list,
                )?,
                BodyDecoder::DirEntries { plus } => {
                    decode_dir_entries(self.schema, body_bytes, plus)?
                }
                _ => {
                    let layout = self.layouts.get(Direction::Response, op).flatten();
                    decode::decode_layout(self.schema, layout, body_bytes)?
                }
            },
            None => FieldNode::from_blob(body_bytes),
        };

        message.out_head = Some(header.clone());
        message.out_body = Some(body.clone());

        Ok(Frame {
            direction: Direction::Response,
            opcode,
            unique,
            header,
            body,
            message: Some(Box::new(message)),
        })
    }
}

impl<R: Read> Iterator for FrameReader<'_, R> {
    type Item = Result<Frame, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                // stream-level failures are terminal
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto;

    fn in_header(len: u32, opcode: u32, unique: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&opcode.to_le_bytes());
        buf.extend_from_slice(&unique.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes()); // nodeid
        buf.extend_from_slice(&1000u32.to_le_bytes()); // uid
        buf.extend_from_slice(&1000u32.to_le_bytes()); // gid
        buf.extend_from_slice(&4242u32.to_le_bytes()); // pid
        buf.extend_from_slice(&0u32.to_le_bytes()); // padding
        buf
    }

    fn out_header(len: u32, error: i32, unique: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&error.to_le_bytes());
        buf.extend_from_slice(&unique.to_le_bytes());
        buf
    }

    fn request(opcode: u32, unique: u64, body: &[u8]) -> Vec<u8> {
        let mut buf = vec![b'R'];
        buf.extend_from_slice(&in_header(40 + body.len() as u32, opcode, unique));
        buf.extend_from_slice(body);
        buf
    }

    fn response(unique: u64, body: &[u8]) -> Vec<u8> {
        let mut buf = vec![b'W'];
        buf.extend_from_slice(&out_header(16 + body.len() as u32, 0, unique));
        buf.extend_from_slice(body);
        buf
    }

    fn collect(dump: &[u8]) -> Vec<Frame> {
        let (schema, layouts) = proto::tables().unwrap();
        let reader = FrameReader::new(dump, &schema, &layouts).unwrap();
        reader.map(|f| f.unwrap()).collect()
    }

    #[test]
    fn test_lookup_pair() {
        let lookup = proto::tables().unwrap().0.opcode_value("FUSE_LOOKUP").unwrap();
        let mut dump = request(lookup, 7, b"hello.txt\0");
        let mut entry_out = vec![0u8; 128];
        entry_out[..8].copy_from_slice(&3u64.to_le_bytes());
        dump.extend_from_slice(&response(7, &entry_out));

        let frames = collect(&dump);
        assert_eq!(frames.len(), 2);

        let req = &frames[0];
        assert_eq!(req.direction, Direction::Request);
        assert_eq!(req.opcode.as_deref(), Some("FUSE_LOOKUP"));
        assert_eq!(req.unique, 7);
        assert_eq!(req.header.get("pid").unwrap().as_u64(), Some(4242));
        assert_eq!(req.body.iter().next().unwrap().1.as_str(), Some("hello.txt"));

        let resp = &frames[1];
        assert_eq!(resp.direction, Direction::Response);
        assert_eq!(resp.opcode.as_deref(), Some("FUSE_LOOKUP"));
        let entry = resp.body.iter().next().unwrap().1.as_node().unwrap();
        assert_eq!(entry.tag(), Some("fuse_entry_out"));
        assert_eq!(entry.get("nodeid").unwrap().as_u64(), Some(3));

        let msg = resp.message.as_ref().unwrap();
        assert_eq!(msg.opcode.as_deref(), Some("FUSE_LOOKUP"));
        assert!(msg.in_head.is_some());
        assert!(msg.out_body.is_some());
    }

    #[test]
    fn test_correlation_is_order_independent() {
        let schema = proto::tables().unwrap().0;
        let lookup = schema.opcode_value("FUSE_LOOKUP").unwrap();
        let getattr = schema.opcode_value("FUSE_GETATTR").unwrap();

        // two interleaved requests answered out of order
        let mut dump = request(lookup, 1, b"a\0");
        dump.extend_from_slice(&request(getattr, 2, &[0u8; 16]));
        dump.extend_from_slice(&response(2, &vec![0u8; 104]));
        dump.extend_from_slice(&response(1, &vec![0u8; 128]));

        let frames = collect(&dump);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[2].opcode.as_deref(), Some("FUSE_GETATTR"));
        assert_eq!(frames[2].unique, 2);
        assert_eq!(frames[3].opcode.as_deref(), Some("FUSE_LOOKUP"));
        assert_eq!(frames[3].unique, 1);
    }

    #[test]
    fn test_forget_never_pends() {
        let schema = proto::tables().unwrap().0;
        let forget = schema.opcode_value("FUSE_FORGET").unwrap();
        let dump = request(forget, 9, &1u64.to_le_bytes());

        let (schema, layouts) = proto::tables().unwrap();
        let mut reader = FrameReader::new(dump.as_slice(), &schema, &layouts).unwrap();
        let frame = reader.next().unwrap().unwrap();
        assert_eq!(frame.opcode.as_deref(), Some("FUSE_FORGET"));
        assert_eq!(reader.pending_count(), 0);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_unmatched_response_is_not_an_error() {
        let dump = response(99, &[1, 2, 3]);
        let frames = collect(&dump);
        assert_eq!(frames.len(), 1);
        let resp = &frames[0];
        assert!(resp.opcode.is_none());
        // body stays a raw blob without request context
        assert_eq!(
            resp.body.iter().next().unwrap().1.as_bytes().unwrap().as_ref(),
            &[1, 2, 3]
        );
        let msg = resp.message.as_ref().unwrap();
        assert!(msg.in_head.is_none());
        assert!(msg.out_head.is_some());
    }

    #[test]
    fn test_unknown_opcode_body_is_blob() {
        let dump = request(9999, 5, &[0xde, 0xad]);
        let frames = collect(&dump);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].opcode.is_none());
        assert_eq!(
            frames[0].body.iter().next().unwrap().1.as_bytes().unwrap().as_ref(),
            &[0xde, 0xad]
        );
    }

    #[test]
    fn test_unknown_direction_is_fatal() {
        let schema = proto::tables().unwrap().0;
        let lookup = schema.opcode_value("FUSE_LOOKUP").unwrap();
        let mut dump = request(lookup, 1, b"a\0");
        dump.push(b'Z');

        let (schema, layouts) = proto::tables().unwrap();
        let mut reader = FrameReader::new(dump.as_slice(), &schema, &layouts).unwrap();
        assert!(reader.next().unwrap().is_ok());
        match reader.next().unwrap() {
            Err(StreamError::UnknownDirection(0x5a)) => {}
            other => panic!("expected UnknownDirection, got {other:?}"),
        }
        // terminal after the first fatal error
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_eof_inside_header_is_short_read() {
        let dump = [b'R', 1, 2, 3];
        let (schema, layouts) = proto::tables().unwrap();
        let mut reader = FrameReader::new(&dump[..], &schema, &layouts).unwrap();
        match reader.next().unwrap() {
            Err(StreamError::ShortRead { context, .. }) => {
                assert_eq!(context, "request header");
            }
            other => panic!("expected ShortRead, got {other:?}"),
        }
    }

    #[test]
    fn test_clean_eof_at_tag_boundary() {
        let (schema, layouts) = proto::tables().unwrap();
        let mut reader = FrameReader::new(&[][..], &schema, &layouts).unwrap();
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_body_degrades_not_errors() {
        let schema = proto::tables().unwrap().0;
        let getattr = schema.opcode_value("FUSE_GETATTR").unwrap();
        // getattr_in wants 16 bytes; declare and deliver only 4
        let dump = request(getattr, 3, &[1, 0, 0, 0]);
        let frames = collect(&dump);
        assert_eq!(frames.len(), 1);
        let inner = frames[0].body.iter().next().unwrap().1.as_node().unwrap();
        assert_eq!(inner.get("getattr_flags").unwrap().as_u64(), Some(1));
    }
}
