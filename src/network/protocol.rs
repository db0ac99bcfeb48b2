//! Wire protocol shared by the server and the client.
//!
//! Every message is a frame: an 8-byte header followed by at most
//! [`PAYLOAD_SIZE`] payload bytes. All integers are little-endian.
//!
//! ```text
//! request:  [method: i32][size: u32][payload: size bytes]
//! response: [status: i32][size: u32][payload: size bytes]
//! ```
//!
//! Clients may pipeline several request frames back to back; the server
//! answers them in order, one response frame per request.
//!
//! # Payloads
//!
//! | Method | Request payload | Success payload |
//! |--------|-----------------|-----------------|
//! | MERGE  | `n` instructions | empty |
//! | INSERT | [`InsertHeader`] + `count` instructions | empty |
//! | EXEC   | empty | empty |
//! | RESET  | empty | empty |
//! | GET    | [`Range`] | up to [`GET_CHUNK`] instructions |
//! | DELETE | [`DeleteRange`] | removed count as `u32` |
//! | DUMP   | [`Range`] | up to [`DUMP_CHUNK`] memory words |

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::virtual_machine::isa::INSTRUCTION_SIZE;
use rvm_derive::BinaryCodec;
use std::fmt;
use thiserror::Error;

/// Largest payload a frame may carry.
pub const PAYLOAD_SIZE: usize = 32;
/// Size of a request or response header.
pub const HEADER_SIZE: usize = 8;
/// Largest complete frame.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + PAYLOAD_SIZE;
/// Instructions per GET or MERGE frame.
pub const GET_CHUNK: usize = PAYLOAD_SIZE / INSTRUCTION_SIZE;
/// Memory words per DUMP frame.
pub const DUMP_CHUNK: usize = PAYLOAD_SIZE / std::mem::size_of::<i32>();
/// Size of the INSERT position prefix.
pub const INSERT_HEADER_SIZE: usize = 16;
/// Instructions per INSERT frame.
pub const INSERT_CHUNK: usize = (PAYLOAD_SIZE - INSERT_HEADER_SIZE) / INSTRUCTION_SIZE;

/// Errors that make a byte stream unusable as protocol frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A header declared more payload than a frame can carry.
    #[error("declared payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },
    /// The peer closed the stream in the middle of a frame.
    #[error("connection closed with {buffered} bytes of an incomplete frame")]
    UnexpectedEof { buffered: usize },
}

/// Expands the method table into the [`Method`] enum, its `TryFrom<i32>`
/// decoding and its wire names.
macro_rules! define_methods {
    ($($name:ident = $code:literal, $wire:literal),* $(,)?) => {
        /// Request methods.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, BinaryCodec)]
        #[repr(i32)]
        pub enum Method {
            $($name = $code,)*
        }

        impl Method {
            /// Every method, in wire order.
            pub const ALL: &'static [Method] = &[$(Method::$name),*];

            pub const fn name(self) -> &'static str {
                match self {
                    $(Method::$name => $wire,)*
                }
            }
        }

        impl TryFrom<i32> for Method {
            type Error = i32;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $($code => Ok(Method::$name),)*
                    other => Err(other),
                }
            }
        }
    };
}

define_methods! {
    Merge = 0, "MERGE",
    Insert = 1, "INSERT",
    Exec = 2, "EXEC",
    Reset = 3, "RESET",
    Get = 4, "GET",
    Delete = 5, "DELETE",
    Dump = 6, "DUMP",
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Response statuses.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, BinaryCodec)]
pub enum Status {
    Success = 0,
    Failure = 1,
    UnknownMethod = 2,
    /// A GET started at or past the end of the program.
    EndOfData = 3,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, BinaryCodec)]
pub struct RequestHeader {
    /// Raw method value; unknown values are answered, not rejected.
    pub method: i32,
    pub size: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, BinaryCodec)]
pub struct ResponseHeader {
    pub status: Status,
    pub size: u32,
}

/// GET and DUMP payload: where to start and how many items to return.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BinaryCodec)]
pub struct Range {
    pub offset: u32,
    pub count: u32,
}

/// DELETE payload: inclusive instruction range.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BinaryCodec)]
pub struct DeleteRange {
    pub start: u32,
    pub end: u32,
}

/// INSERT payload prefix, followed by `count` instructions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BinaryCodec)]
pub struct InsertHeader {
    pub start: u64,
    pub count: u64,
}

/// Fixed-capacity frame payload.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Payload {
    bytes: [u8; PAYLOAD_SIZE],
    len: usize,
}

impl Default for Payload {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl Payload {
    pub const fn new() -> Self {
        Self {
            bytes: [0; PAYLOAD_SIZE],
            len: 0,
        }
    }

    /// Copies `data` into a payload.
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut payload = Self::new();
        payload.extend(data)?;
        Ok(payload)
    }

    /// Builds a payload holding one encoded value.
    pub fn of<T: Encode>(value: &T) -> Result<Self, ProtocolError> {
        let mut payload = Self::new();
        payload.push(value)?;
        Ok(payload)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        PAYLOAD_SIZE - self.len
    }

    /// Appends raw bytes, failing without change if they do not fit.
    pub fn extend(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.len() > self.remaining() {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.len + data.len(),
                max: PAYLOAD_SIZE,
            });
        }
        self.bytes[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// Appends an encoded value, failing without change if it does not fit.
    pub fn push<T: Encode>(&mut self, value: &T) -> Result<(), ProtocolError> {
        let size = value.encoded_len();
        if size > self.remaining() {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.len + size,
                max: PAYLOAD_SIZE,
            });
        }
        value.encode(self);
        Ok(())
    }

    /// Decodes the whole payload as a sequence of `T`.
    pub fn decode_all<T: Decode>(&self) -> Result<Vec<T>, DecodeError> {
        let mut input = self.as_slice();
        let mut items = Vec::new();
        while !input.is_empty() {
            items.push(T::decode(&mut input)?);
        }
        Ok(items)
    }
}

impl EncodeSink for Payload {
    /// Writes as much as fits. [`Payload::push`] checks the size first, so
    /// nothing is dropped on that path.
    fn write(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.remaining());
        self.bytes[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
    }
}

/// A request frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Request {
    /// Raw method value as sent by the client.
    pub method: i32,
    pub payload: Payload,
}

impl Request {
    pub fn new(method: Method, payload: Payload) -> Self {
        Self {
            method: method as i32,
            payload,
        }
    }

    /// A request with no payload.
    pub fn bare(method: Method) -> Self {
        Self::new(method, Payload::new())
    }

    /// The decoded method, or the raw value if it is unknown.
    pub fn method(&self) -> Result<Method, i32> {
        Method::try_from(self.method)
    }

    /// Extracts the first complete frame from `buf`.
    ///
    /// Returns `Ok(None)` while the frame is still incomplete and the number
    /// of bytes consumed alongside the request once it is complete. The
    /// declared size is validated before any payload byte is looked at.
    pub fn parse(buf: &[u8]) -> Result<Option<(Request, usize)>, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let mut input = &buf[..HEADER_SIZE];
        let header = RequestHeader::decode(&mut input)
            .map_err(|_| ProtocolError::UnexpectedEof { buffered: buf.len() })?;

        let size = header.size as usize;
        if size > PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                max: PAYLOAD_SIZE,
            });
        }

        let total = HEADER_SIZE + size;
        if buf.len() < total {
            return Ok(None);
        }

        let payload = Payload::from_slice(&buf[HEADER_SIZE..total])?;
        Ok(Some((
            Request {
                method: header.method,
                payload,
            },
            total,
        )))
    }
}

impl Encode for Request {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        RequestHeader {
            method: self.method,
            size: self.payload.len() as u32,
        }
        .encode(out);
        out.write(self.payload.as_slice());
    }
}

/// A response frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Response {
    pub status: Status,
    pub payload: Payload,
}

impl Response {
    pub fn new(status: Status, payload: Payload) -> Self {
        Self { status, payload }
    }

    /// A response with no payload.
    pub fn status(status: Status) -> Self {
        Self::new(status, Payload::new())
    }

    pub fn success(payload: Payload) -> Self {
        Self::new(Status::Success, payload)
    }

    pub fn failure() -> Self {
        Self::status(Status::Failure)
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

impl Encode for Response {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        ResponseHeader {
            status: self.status,
            size: self.payload.len() as u32,
        }
        .encode(out);
        out.write(self.payload.as_slice());
    }
}
