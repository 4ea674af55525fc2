//! Derive macros for bean-context
//!
//! `#[derive(Component)]` generates an `Introspect` implementation for a
//! struct with named fields: one injectable constructor built from the
//! `#[inject]` fields, member injection for `Inject<T>` fields, and the
//! markers and qualifier given in `#[component(...)]`.
//!
//! # Example
//!
//! ```rust,ignore
//! use bean_context::{Component, Inject};
//! use std::sync::Arc;
//!
//! #[derive(Component)]
//! #[component(name = "primary-db", primary)]
//! struct UserService {
//!     #[inject]
//!     db: Arc<Database>,
//!     #[inject(named = "redis")]
//!     cache: Arc<dyn Cache>,
//!     #[inject(optional)]
//!     metrics: Option<Arc<Metrics>>,
//!     // Filled after construction, so cycles through it resolve
//!     #[inject]
//!     audit: Inject<AuditLog>,
//!     // Not injected: Default::default()
//!     request_count: u64,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Expr, Fields, GenericArgument, LitStr, PathArguments, Type, parse_macro_input};

/// Derive `Introspect` for a component.
///
/// # Struct attributes
///
/// - `#[component(name = "q")]` - qualifier
/// - `#[component(primary)]` - preferred among several definitions of a type
/// - `#[component(marker = path::TO_MARKER)]` - marker, repeatable;
///   defaults to `marker::COMPONENT`
///
/// # Field attributes
///
/// - `#[inject]` on `Arc<T>` - required constructor dependency
/// - `#[inject(named = "q")]` - qualified constructor dependency
/// - `#[inject(optional)]` on `Option<Arc<T>>` - absent beans give `None`
/// - `#[inject]` on `Inject<T>` - field injected after construction
///
/// Fields without `#[inject]` use `Default::default()`.
#[proc_macro_derive(Component, attributes(component, inject))]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input).unwrap_or_else(syn::Error::into_compile_error).into()
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Component can only be derived for structs with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new_spanned(input, "Component can only be derived for structs")),
    };

    let options = ComponentOptions::parse(&input.attrs)?;

    let mut params = Vec::new();
    let mut inits = Vec::new();
    let mut members = Vec::new();

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let Some(inject) = InjectOptions::parse(&field.attrs)? else {
            inits.push(quote! { #ident: ::std::default::Default::default() });
            continue;
        };

        if wrapped_type(&field.ty, "Inject").is_some() {
            if inject.named.is_some() || inject.optional {
                return Err(syn::Error::new_spanned(
                    &field.ty,
                    "Inject<T> fields take neither `named` nor `optional`",
                ));
            }
            let field_name = ident.to_string();
            inits.push(quote! { #ident: ::bean_context::Inject::new() });
            members.push(quote! { .field(#field_name, |this: &Self| &this.#ident) });
            continue;
        }

        let inner = if inject.optional {
            wrapped_type(&field.ty, "Option").and_then(|t| wrapped_type(t, "Arc")).ok_or_else(|| {
                syn::Error::new_spanned(
                    &field.ty,
                    "Fields marked with #[inject(optional)] must have type Option<Arc<T>>",
                )
            })?
        } else {
            wrapped_type(&field.ty, "Arc").ok_or_else(|| {
                syn::Error::new_spanned(&field.ty, "Fields marked with #[inject] must have type Arc<T> or Inject<T>")
            })?
        };

        let mut dependency = quote! { ::bean_context::Dependency::on::<#inner>() };
        if let Some(qualifier) = &inject.named {
            dependency = quote! { #dependency.named(#qualifier) };
        }
        if inject.optional {
            dependency = quote! { #dependency.optional() };
        }

        inits.push(match (&inject.named, inject.optional) {
            (_, true) => quote! { #ident: resolver.resolve_typed::<#inner>(&#dependency)? },
            (Some(qualifier), false) => quote! { #ident: resolver.get_named::<#inner>(#qualifier)? },
            (None, false) => quote! { #ident: resolver.get::<#inner>()? },
        });
        params.push(dependency);
    }

    let markers = if options.markers.is_empty() {
        vec![quote! { .marker(::bean_context::marker::COMPONENT) }]
    } else {
        options.markers.iter().map(|m| quote! { .marker(#m) }).collect()
    };
    let qualifier = options.name.as_ref().map(|q| quote! { .qualifier(#q) });
    let primary = options.primary.then(|| quote! { .primary() });

    Ok(quote! {
        impl #impl_generics ::bean_context::Introspect for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn describe() -> ::bean_context::TypeDescriptor {
                ::bean_context::TypeDescriptor::builder::<Self>()
                    #(#markers)*
                    #qualifier
                    #primary
                    .constructor_with(
                        ::std::vec![#(#params),*],
                        true,
                        |resolver| {
                            ::std::result::Result::Ok(Self {
                                #(#inits),*
                            })
                        },
                    )
                    #(#members)*
                    .build()
            }
        }
    })
}

#[derive(Default)]
struct ComponentOptions {
    name: Option<LitStr>,
    primary: bool,
    markers: Vec<Expr>,
}

impl ComponentOptions {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut options = Self::default();
        for attr in attrs.iter().filter(|a| a.path().is_ident("component")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    options.name = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("primary") {
                    options.primary = true;
                } else if meta.path.is_ident("marker") {
                    options.markers.push(meta.value()?.parse()?);
                } else {
                    return Err(meta.error("expected `name`, `primary` or `marker`"));
                }
                Ok(())
            })?;
        }
        Ok(options)
    }
}

#[derive(Default)]
struct InjectOptions {
    named: Option<LitStr>,
    optional: bool,
}

impl InjectOptions {
    fn parse(attrs: &[Attribute]) -> syn::Result<Option<Self>> {
        let Some(attr) = attrs.iter().find(|a| a.path().is_ident("inject")) else {
            return Ok(None);
        };

        let mut options = Self::default();
        if attr.meta.require_path_only().is_ok() {
            return Ok(Some(options));
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("named") {
                options.named = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("optional") {
                options.optional = true;
            } else {
                return Err(meta.error("expected `named` or `optional`"));
            }
            Ok(())
        })?;
        Ok(Some(options))
    }
}

/// `T` from `Wrapper<T>`, matching on the last path segment
fn wrapped_type<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    match &segment.arguments {
        PathArguments::AngleBracketed(args) => match args.args.first() {
            Some(GenericArgument::Type(inner)) => Some(inner),
            _ => None,
        },
        _ => None,
    }
}
