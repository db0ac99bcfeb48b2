//! Little-endian codec for wire records.
//!
//! Every value the protocol carries is a fixed-width integer or a record of
//! them, so there are no length prefixes: a record's size is the sum of its
//! fields. Records and `i32`-tagged enums get their impls from
//! `#[derive(BinaryCodec)]`; this module provides the traits and the
//! primitive impls the derive builds on.
//!
//! ```ignore
//! use crate::types::encoding::{Decode, Encode};
//!
//! let bytes = (7u32, -1i32).to_bytes();
//! assert_eq!(bytes, [7, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
//! assert_eq!(<(u32, i32)>::from_bytes(&bytes), Ok((7, -1)));
//! ```

use thiserror::Error;

/// Destination for encoded bytes.
pub trait EncodeSink {
    fn write(&mut self, bytes: &[u8]);
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Sink that only measures.
#[derive(Debug, Default)]
struct Measure(usize);

impl EncodeSink for Measure {
    fn write(&mut self, bytes: &[u8]) {
        self.0 += bytes.len();
    }
}

pub trait Encode {
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Number of bytes [`encode`](Encode::encode) produces.
    fn encoded_len(&self) -> usize {
        let mut measure = Measure::default();
        self.encode(&mut measure);
        measure.0
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("input ended in the middle of a value")]
    UnexpectedEof,
    /// Unknown enum tag, or bytes left over after a complete value.
    #[error("input does not encode a valid value")]
    InvalidValue,
}

pub trait Decode: Sized {
    /// Decodes one value from the front of `input` and advances past it.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value that must span all of `data`.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut rest = data;
        let value = Self::decode(&mut rest)?;
        if rest.is_empty() {
            Ok(value)
        } else {
            Err(DecodeError::InvalidValue)
        }
    }
}

/// Splits the first `N` bytes off `input`.
fn take<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], DecodeError> {
    let (head, tail) = input
        .split_first_chunk::<N>()
        .ok_or(DecodeError::UnexpectedEof)?;
    *input = tail;
    Ok(*head)
}

macro_rules! fixed_width {
    ($($int:ty),* $(,)?) => {$(
        impl Encode for $int {
            fn encode<S: EncodeSink>(&self, out: &mut S) {
                out.write(&self.to_le_bytes());
            }
        }

        impl Decode for $int {
            fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                take::<{ ::core::mem::size_of::<$int>() }>(input).map(<$int>::from_le_bytes)
            }
        }
    )*};
}

fixed_width!(i32, u32, u64);

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        let (a, b) = self;
        a.encode(out);
        b.encode(out);
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let a = A::decode(input)?;
        let b = B::decode(input)?;
        Ok((a, b))
    }
}
