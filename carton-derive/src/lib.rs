//! # Carton Derive Macros
//!
//! Provides `#[derive(Archivable)]`, which writes the field table of a named-field struct and
//! implements `carton::Archivable`, `carton::Field` and (unless opted out) an empty
//! `carton::ArchiveHooks`.
//!
//! ```rust,ignore
//! #[derive(Archivable, Default)]
//! #[carton(name = "Player", version = "1.2")]
//! struct Player {
//!     id: u32,
//!     #[carton(rename = "display_name")]
//!     name: String,
//!     #[carton(skip)]
//!     cache: Vec<u8>,
//! }
//! ```
//!
//! Compatible with `syn 2.0`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, LitStr};

/// Derives `Archivable`, `Field` and `ArchiveHooks` for a struct with named fields.
#[proc_macro_derive(Archivable, attributes(carton))]
pub fn derive_archivable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

struct ContainerAttrs {
    name: Option<String>,
    version: (u16, u16),
    custom_hooks: bool,
}

struct FieldSpec {
    ident: syn::Ident,
    key: String,
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let data_struct = match &input.data {
        Data::Struct(ds) => ds,
        _ => {
            return Err(syn::Error::new(
                name.span(),
                "Archivable only supports structs",
            ))
        }
    };
    let named = match &data_struct.fields {
        Fields::Named(named) => &named.named,
        Fields::Unit => {
            return Err(syn::Error::new(
                name.span(),
                "Archivable needs named fields; use `struct Name {}` for an empty type",
            ))
        }
        Fields::Unnamed(_) => {
            return Err(syn::Error::new(
                name.span(),
                "Archivable does not support tuple structs",
            ))
        }
    };

    let container = parse_container_attributes(&input.attrs)?;
    let mut fields = Vec::new();
    for field in named {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        let (rename, skip) = parse_field_attributes(&field.attrs)?;
        if skip {
            continue;
        }
        let key = rename.unwrap_or_else(|| ident.to_string());
        if fields.iter().any(|f: &FieldSpec| f.key == key) {
            return Err(syn::Error::new(
                ident.span(),
                format!("duplicate archive field name `{key}`"),
            ));
        }
        fields.push(FieldSpec { ident, key });
    }

    let type_name = container.name.unwrap_or_else(|| name.to_string());
    let (major, minor) = container.version;
    let keys: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();
    let save_fields = fields.iter().map(|f| {
        let ident = &f.ident;
        let key = &f.key;
        quote! { ar.field(#key, &self.#ident)?; }
    });
    let load_fields = fields.iter().map(|f| {
        let ident = &f.ident;
        let key = &f.key;
        quote! { ar.field(#key, &mut self.#ident)?; }
    });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let impl_hooks = if container.custom_hooks {
        quote! {}
    } else {
        quote! {
            impl #impl_generics carton::ArchiveHooks for #name #ty_generics #where_clause {}
        }
    };

    Ok(quote! {
        impl #impl_generics carton::Archivable for #name #ty_generics #where_clause {
            const NAME: &'static str = #type_name;
            const VERSION: carton::Version = carton::Version::new(#major, #minor);
            const FIELDS: &'static [&'static str] = &[#(#keys),*];

            fn save(&self, ar: &mut carton::OutputArchive<'_>) -> carton::Result<()> {
                #(#save_fields)*
                Ok(())
            }

            fn load(&mut self, ar: &mut carton::InputArchive<'_>) -> carton::Result<()> {
                #(#load_fields)*
                Ok(())
            }
        }

        impl #impl_generics carton::Field for #name #ty_generics #where_clause {
            const ATTR: carton::ItemAttr = carton::ItemAttr::OBJECT.with(carton::ItemAttr::HAS_VERSION);
            const VERSION: carton::Version = <Self as carton::Archivable>::VERSION;

            fn save_body(&self, ar: &mut carton::OutputArchive<'_>) -> carton::Result<()> {
                ar.save_object(self)
            }

            fn load_body(
                &mut self,
                ar: &mut carton::InputArchive<'_>,
                info: &carton::ItemInfo,
            ) -> carton::Result<()> {
                ar.load_object(self, info)
            }
        }

        #impl_hooks
    })
}

/// Parses `#[carton(name = "...", version = "M.m", custom_hooks)]`.
fn parse_container_attributes(attrs: &[Attribute]) -> syn::Result<ContainerAttrs> {
    let mut out = ContainerAttrs {
        name: None,
        version: (1, 0),
        custom_hooks: false,
    };
    for attr in attrs {
        if attr.path().is_ident("carton") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("custom_hooks") {
                    out.custom_hooks = true;
                    return Ok(());
                }

                if meta.path.is_ident("name") {
                    let s: LitStr = meta.value()?.parse()?;
                    if s.value().is_empty() {
                        return Err(meta.error("type name must not be empty"));
                    }
                    out.name = Some(s.value());
                    return Ok(());
                }

                if meta.path.is_ident("version") {
                    let s: LitStr = meta.value()?.parse()?;
                    out.version = parse_version(&s.value())
                        .ok_or_else(|| meta.error("version must look like \"1.0\""))?;
                    return Ok(());
                }
                Err(meta.error("Unknown carton attribute key. Supported: name, version, custom_hooks"))
            })?;
        }
    }
    Ok(out)
}

/// Parses `#[carton(rename = "...")]` and `#[carton(skip)]`.
fn parse_field_attributes(attrs: &[Attribute]) -> syn::Result<(Option<String>, bool)> {
    let mut rename = None;
    let mut skip = false;
    for attr in attrs {
        if attr.path().is_ident("carton") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    skip = true;
                    return Ok(());
                }

                if meta.path.is_ident("rename") {
                    let s: LitStr = meta.value()?.parse()?;
                    rename = Some(s.value());
                    return Ok(());
                }
                Err(meta.error("Unknown carton field attribute. Supported: rename, skip"))
            })?;
        }
    }
    Ok((rename, skip))
}

fn parse_version(text: &str) -> Option<(u16, u16)> {
    let (major, minor) = text.split_once('.')?;
    Some((major.trim().parse().ok()?, minor.trim().parse().ok()?))
}
