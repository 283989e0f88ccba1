//! Procedural macros for ModelSync
//!
//! This crate provides the `Entity` derive macro, which turns a struct into an entity
//! declaration for the model_sync library.
//!
//! ```ignore
//! #[derive(Entity)]
//! #[entity(table = "products")]
//! #[belongs_to(column = "brand_id", table = "brands", on_delete = "set null")]
//! #[many_to_many(table1 = "products", table2 = "tags")]
//! struct Product {
//!     #[field(length = 255)]
//!     name: Option<String>,
//!     price: Option<i32>,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Lit, LitStr};

/// Derive macro implementing `model_sync::models::Entity`
#[proc_macro_derive(Entity, attributes(entity, field, belongs_to, many_to_many))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand_entity(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[derive(Default)]
struct FieldArgs {
    rename: Option<String>,
    kind: Option<String>,
    length: Option<u32>,
    nullable: Option<bool>,
    default: Option<TokenStream2>,
    skip: bool,
}

#[derive(Default)]
struct ReferenceArgs {
    column: Option<String>,
    table: Option<String>,
    entity: Option<String>,
    field: Option<String>,
    on_delete: Option<TokenStream2>,
    strict: bool,
}

fn expand_entity(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Entity can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Entity can only be derived for structs",
            ))
        }
    };

    let table = entity_table(&input.attrs)?;
    let with_table = table.map(|table| quote! { .with_table(#table) });

    let mut field_specs = Vec::new();
    for field in fields {
        let args = field_args(&field.attrs)?;
        if args.skip {
            continue;
        }

        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
        let column = args.rename.unwrap_or_else(|| ident.to_string());
        let ty = &field.ty;

        let (type_binding, field_type) = match args.kind {
            Some(kind) => (
                quote! { _ },
                quote! { ::model_sync::schema::types::AbstractType::from(#kind) },
            ),
            None => (quote! { inferred }, quote! { inferred }),
        };
        let (nullable_binding, nullable) = match args.nullable {
            Some(nullable) => (quote! { _ }, quote! { #nullable }),
            None => (quote! { inferred_nullable }, quote! { inferred_nullable }),
        };
        let length = args.length.map(|length| quote! { .length(#length) });
        let default = args.default.map(|value| quote! { .default_value(#value) });

        field_specs.push(quote! {
            {
                let (#type_binding, #nullable_binding) =
                    ::model_sync::models::infer_field_type(stringify!(#ty));
                declaration = declaration.field(
                    ::model_sync::schema::types::FieldSpec::new(#column, #field_type)
                        .nullable(#nullable)
                        #length
                        #default
                );
            }
        });
    }

    let mut relationships = Vec::new();
    for attr in &input.attrs {
        if attr.path().is_ident("belongs_to") {
            relationships.push(belongs_to(attr)?);
        } else if attr.path().is_ident("many_to_many") {
            relationships.push(many_to_many(attr)?);
        }
    }

    let entity_name = name.to_string();

    Ok(quote! {
        #[automatically_derived]
        impl #impl_generics ::model_sync::models::Entity for #name #ty_generics #where_clause {
            fn declaration() -> ::model_sync::schema::types::EntityDeclaration {
                let mut declaration =
                    ::model_sync::schema::types::EntityDeclaration::new(#entity_name) #with_table;
                #(#field_specs)*
                #(declaration = declaration.relationship(#relationships);)*
                declaration
            }
        }
    })
}

fn entity_table(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut table = None;

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                table = Some(string_value(&meta)?);
                Ok(())
            } else {
                Err(meta.error("unsupported entity attribute, expected `table`"))
            }
        })?;
    }

    Ok(table)
}

fn field_args(attrs: &[Attribute]) -> syn::Result<FieldArgs> {
    let mut args = FieldArgs::default();

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("field")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                args.skip = true;
            } else if meta.path.is_ident("rename") {
                args.rename = Some(string_value(&meta)?);
            } else if meta.path.is_ident("kind") {
                args.kind = Some(string_value(&meta)?);
            } else if meta.path.is_ident("length") {
                let length: syn::LitInt = meta.value()?.parse()?;
                args.length = Some(length.base10_parse()?);
            } else if meta.path.is_ident("nullable") {
                let nullable = if meta.input.peek(syn::Token![=]) {
                    meta.value()?.parse::<syn::LitBool>()?.value
                } else {
                    true
                };
                args.nullable = Some(nullable);
            } else if meta.path.is_ident("default") {
                args.default = Some(default_value(meta.value()?.parse()?)?);
            } else {
                return Err(meta.error(
                    "unsupported field attribute, expected one of `skip`, `rename`, `kind`, `length`, `nullable`, `default`",
                ));
            }
            Ok(())
        })?;
    }

    Ok(args)
}

fn default_value(lit: Lit) -> syn::Result<TokenStream2> {
    let value = match &lit {
        Lit::Bool(value) => {
            let value = value.value;
            quote! { ::model_sync::schema::types::DefaultValue::Bool(#value) }
        }
        Lit::Int(value) => {
            let value: i64 = value.base10_parse()?;
            quote! { ::model_sync::schema::types::DefaultValue::Integer(#value) }
        }
        Lit::Float(value) => {
            let value: f64 = value.base10_parse()?;
            quote! { ::model_sync::schema::types::DefaultValue::Float(#value) }
        }
        Lit::Str(value) => {
            let value = value.value();
            quote! { ::model_sync::schema::types::DefaultValue::Text(#value.to_string()) }
        }
        _ => {
            return Err(syn::Error::new_spanned(
                lit,
                "default must be a bool, integer, float or string literal",
            ))
        }
    };

    Ok(value)
}

fn belongs_to(attr: &Attribute) -> syn::Result<TokenStream2> {
    let mut args = ReferenceArgs::default();

    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("column") {
            args.column = Some(string_value(&meta)?);
        } else if meta.path.is_ident("table") {
            args.table = Some(string_value(&meta)?);
        } else if meta.path.is_ident("entity") {
            args.entity = Some(string_value(&meta)?);
        } else if meta.path.is_ident("references") {
            args.field = Some(string_value(&meta)?);
        } else if meta.path.is_ident("on_delete") {
            let value: LitStr = meta.value()?.parse()?;
            args.on_delete = Some(on_delete(&value)?);
        } else if meta.path.is_ident("strict") {
            args.strict = true;
        } else {
            return Err(meta.error(
                "unsupported belongs_to attribute, expected one of `column`, `table`, `entity`, `references`, `on_delete`, `strict`",
            ));
        }
        Ok(())
    })?;

    let column = optional_string(args.column);
    let table = optional_string(args.table);
    let entity = optional_string(args.entity);
    let field = args.field.unwrap_or_else(|| "id".to_string());
    let on_delete = args
        .on_delete
        .unwrap_or_else(|| quote! { ::model_sync::schema::types::OnDelete::Restrict });
    let strict = args.strict;

    Ok(quote! {
        ::model_sync::schema::types::RelationshipSpec::BelongsTo(
            ::model_sync::schema::types::SingleReference {
                column: #column,
                table: #table,
                entity: #entity,
                field: #field.to_string(),
                on_delete: #on_delete,
                strict: #strict,
            }
        )
    })
}

fn many_to_many(attr: &Attribute) -> syn::Result<TokenStream2> {
    let mut table1 = None;
    let mut table2 = None;

    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table1") {
            table1 = Some(string_value(&meta)?);
        } else if meta.path.is_ident("table2") {
            table2 = Some(string_value(&meta)?);
        } else {
            return Err(meta.error("unsupported many_to_many attribute, expected `table1` or `table2`"));
        }
        Ok(())
    })?;

    match (table1, table2) {
        (Some(table1), Some(table2)) => Ok(quote! {
            ::model_sync::schema::types::RelationshipSpec::ManyToMany(
                ::model_sync::schema::types::ManyToMany::new(#table1, #table2)
            )
        }),
        _ => Err(syn::Error::new_spanned(
            attr,
            "many_to_many needs both `table1` and `table2`",
        )),
    }
}

fn on_delete(value: &LitStr) -> syn::Result<TokenStream2> {
    let variant = match value.value().to_lowercase().as_str() {
        "restrict" => quote! { Restrict },
        "cascade" => quote! { Cascade },
        "set null" | "set-null" | "set_null" => quote! { SetNull },
        _ => {
            return Err(syn::Error::new_spanned(
                value,
                "on_delete must be `restrict`, `cascade` or `set null`",
            ))
        }
    };

    Ok(quote! { ::model_sync::schema::types::OnDelete::#variant })
}

fn string_value(meta: &ParseNestedMeta) -> syn::Result<String> {
    let value: LitStr = meta.value()?.parse()?;
    Ok(value.value())
}

fn optional_string(value: Option<String>) -> TokenStream2 {
    match value {
        Some(value) => quote! { ::std::option::Option::Some(#value.to_string()) },
        None => quote! { ::std::option::Option::None },
    }
}
