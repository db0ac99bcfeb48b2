//! `#[derive(BinaryCodec)]` for fixed-width wire records.
//!
//! Structs (named or tuple) encode their fields back to back in declaration
//! order. Fieldless enums encode their discriminant as a little-endian `i32`,
//! the width of every tag the protocol carries; decoding an unknown tag fails
//! with `DecodeError::InvalidValue`.
//!
//! ```ignore
//! #[derive(BinaryCodec)]
//! pub struct Range {
//!     pub offset: u32,
//!     pub count: u32,
//! }
//!
//! #[derive(BinaryCodec)]
//! pub enum Status {
//!     Success = 0,
//!     Failure = 1,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DataEnum, DeriveInput, Expr, Fields, Lit, UnOp};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let bodies = match &input.data {
        Data::Struct(data) => struct_bodies(&input, &data.fields),
        Data::Enum(data) => enum_bodies(data),
        Data::Union(_) => Err(syn::Error::new_spanned(
            &input.ident,
            "BinaryCodec cannot be derived for unions",
        )),
    };

    match bodies {
        Ok((encode, decode)) => wrap_impls(&input, encode, decode).into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Wraps the generated method bodies in `Encode` and `Decode` impls.
fn wrap_impls(input: &DeriveInput, encode: TokenStream2, decode: TokenStream2) -> TokenStream2 {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let codec = quote!(crate::types::encoding);

    quote! {
        impl #impl_generics #codec::Encode for #name #ty_generics #where_clause {
            fn encode<S: #codec::EncodeSink>(&self, out: &mut S) {
                #encode
            }
        }

        impl #impl_generics #codec::Decode for #name #ty_generics #where_clause {
            fn decode(input: &mut &[u8]) -> ::core::result::Result<Self, #codec::DecodeError> {
                #decode
            }
        }
    }
}

/// Field-by-field bodies. `Self { 0: .., 1: .. }` is valid for tuple structs,
/// so named and positional fields share one code path.
fn struct_bodies(input: &DeriveInput, fields: &Fields) -> syn::Result<(TokenStream2, TokenStream2)> {
    if fields.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "BinaryCodec records need at least one field",
        ));
    }

    let members: Vec<syn::Member> = fields.members().collect();
    let encode = quote! {
        #( crate::types::encoding::Encode::encode(&self.#members, out); )*
    };
    let decode = quote! {
        ::core::result::Result::Ok(Self {
            #( #members: crate::types::encoding::Decode::decode(input)?, )*
        })
    };
    Ok((encode, decode))
}

fn enum_bodies(data: &DataEnum) -> syn::Result<(TokenStream2, TokenStream2)> {
    let tags = discriminants(data)?;
    let variants: Vec<&syn::Ident> = data.variants.iter().map(|v| &v.ident).collect();

    let encode = quote! {
        let tag: i32 = match self {
            #( Self::#variants => #tags, )*
        };
        crate::types::encoding::Encode::encode(&tag, out);
    };
    let decode = quote! {
        match <i32 as crate::types::encoding::Decode>::decode(input)? {
            #( #tags => ::core::result::Result::Ok(Self::#variants), )*
            _ => ::core::result::Result::Err(crate::types::encoding::DecodeError::InvalidValue),
        }
    };
    Ok((encode, decode))
}

/// Resolves each variant's tag the way rustc does: an explicit value, or one
/// past the previous variant, starting at zero.
fn discriminants(data: &DataEnum) -> syn::Result<Vec<i32>> {
    let mut next = Some(0i32);
    data.variants
        .iter()
        .map(|variant| {
            if !variant.fields.is_empty() {
                return Err(syn::Error::new_spanned(
                    variant,
                    "BinaryCodec enums cannot carry data",
                ));
            }
            let tag = match &variant.discriminant {
                Some((_, expr)) => literal_value(expr)?,
                None => next.ok_or_else(|| {
                    syn::Error::new_spanned(variant, "discriminant overflows i32")
                })?,
            };
            next = tag.checked_add(1);
            Ok(tag)
        })
        .collect()
}

/// Accepts `5` or `-5`.
fn literal_value(expr: &Expr) -> syn::Result<i32> {
    match expr {
        Expr::Lit(syn::ExprLit {
            lit: Lit::Int(int), ..
        }) => int.base10_parse(),
        Expr::Unary(syn::ExprUnary {
            op: UnOp::Neg(_),
            expr,
            ..
        }) => literal_value(expr).and_then(|value| {
            value
                .checked_neg()
                .ok_or_else(|| syn::Error::new_spanned(expr, "discriminant overflows i32"))
        }),
        Expr::Paren(paren) => literal_value(&paren.expr),
        Expr::Group(group) => literal_value(&group.expr),
        other => Err(syn::Error::new_spanned(
            other,
            "BinaryCodec discriminants must be integer literals",
        )),
    }
}
