//! Derive macros for the rvm wire records.

mod binary_codec;

use proc_macro::TokenStream;

/// Implements `Encode` and `Decode` from `crate::types::encoding` for a
/// fixed-width record or a fieldless `i32`-tagged enum.
#[proc_macro_derive(BinaryCodec)]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::derive_binary_codec(input)
}
