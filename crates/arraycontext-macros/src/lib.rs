use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parenthesized, punctuated::Punctuated, spanned::Spanned, Data, DeriveInput, Fields,
    GenericArgument, Ident, PathArguments, Result as SynResult, Token, Type,
};

/// Derives `arraycontext::container::DataclassContainer` for a struct with named fields.
///
/// Field attributes:
/// - `#[container(array)]`: the field must be array-bearing;
/// - `#[container(union(Array, MyContainer))]`: a `Value` field restricted to the members;
/// - `#[container(skip)]`: never array-bearing.
///
/// `Option<T>` fields are declared with their payload type so that optional arrays can be
/// rejected at registration.
///
/// The type still has to be registered with `register_dataclass::<T>()`.
#[proc_macro_derive(ArrayContainer, attributes(container))]
pub fn derive_array_container(item: TokenStream) -> TokenStream {
    match expand_array_container(item) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error().into(),
    }
}

enum FieldAttr {
    Infer,
    Array,
    Union(Vec<Type>),
    Skip,
}

struct ContainerField {
    ident: Ident,
    ty: Type,
    attr: FieldAttr,
}

fn expand_array_container(item: TokenStream) -> Result<TokenStream, syn::Error> {
    let input: DeriveInput = syn::parse(item)?;
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "ArrayContainer cannot be derived for generic types; register them with \
             register_container instead",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            other => {
                return Err(syn::Error::new(
                    other.span(),
                    "ArrayContainer requires a struct with named fields",
                ))
            }
        },
        Data::Enum(data) => {
            return Err(syn::Error::new(
                data.enum_token.span(),
                "ArrayContainer can only be derived for structs",
            ))
        }
        Data::Union(data) => {
            return Err(syn::Error::new(
                data.union_token.span(),
                "ArrayContainer can only be derived for structs",
            ))
        }
    };

    let mut parsed = Vec::with_capacity(fields.len());
    for field in fields {
        let Some(ident) = field.ident.clone() else {
            return Err(syn::Error::new(field.span(), "field must be named"));
        };
        let attr = parse_field_attr(field)?;
        if let FieldAttr::Union(_) = attr {
            if !is_value_type(&field.ty) {
                return Err(syn::Error::new(
                    field.ty.span(),
                    "union fields must have type `Value`",
                ));
            }
        }
        parsed.push(ContainerField {
            ident,
            ty: field.ty.clone(),
            attr,
        });
    }

    let decls = parsed.iter().map(field_decl);
    let part_arms = parsed.iter().map(|f| {
        let ident = &f.ident;
        let key = ident.to_string();
        quote! {
            #key => ::core::option::Option::Some(
                ::arraycontext::container::Value::new(::core::clone::Clone::clone(&self.#ident))
            ),
        }
    });
    let rebuilt = parsed.iter().map(|f| {
        let ident = &f.ident;
        let ty = &f.ty;
        let key = ident.to_string();
        quote! {
            #ident: if array_fields.contains(&#key) {
                parts.take_as::<#ty>(#key)?
            } else {
                ::core::clone::Clone::clone(&self.#ident)
            },
        }
    });

    let expanded = quote! {
        impl ::arraycontext::container::DataclassContainer for #name {
            fn field_decls() -> ::std::vec::Vec<::arraycontext::container::FieldDecl> {
                ::std::vec![#(#decls),*]
            }

            fn field_part(
                &self,
                name: &str,
            ) -> ::core::option::Option<::arraycontext::container::Value> {
                match name {
                    #(#part_arms)*
                    _ => ::core::option::Option::None,
                }
            }

            fn with_parts(
                &self,
                parts: &mut ::arraycontext::container::Parts,
                array_fields: &[&'static str],
            ) -> ::arraycontext::Result<Self> {
                ::core::result::Result::Ok(Self {
                    #(#rebuilt)*
                })
            }
        }
    };
    Ok(expanded.into())
}

fn parse_field_attr(field: &syn::Field) -> SynResult<FieldAttr> {
    let mut result = FieldAttr::Infer;
    for attr in &field.attrs {
        if !attr.path().is_ident("container") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if !matches!(result, FieldAttr::Infer) {
                return Err(meta.error("only one container attribute is allowed per field"));
            }
            if meta.path.is_ident("array") {
                result = FieldAttr::Array;
                Ok(())
            } else if meta.path.is_ident("skip") {
                result = FieldAttr::Skip;
                Ok(())
            } else if meta.path.is_ident("union") {
                let content;
                parenthesized!(content in meta.input);
                let members = Punctuated::<Type, Token![,]>::parse_terminated(&content)?;
                if members.is_empty() {
                    return Err(meta.error("union requires at least one member type"));
                }
                result = FieldAttr::Union(members.into_iter().collect());
                Ok(())
            } else {
                Err(meta.error("expected `array`, `skip` or `union(..)`"))
            }
        })?;
    }
    Ok(result)
}

fn is_value_type(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident == "Value" && segment.arguments.is_empty())
            .unwrap_or(false),
        _ => false,
    }
}

/// Payload type of `Option<T>`, matched by the last path segment.
fn option_payload(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if path.qself.is_some() || segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first() {
        Some(GenericArgument::Type(payload)) if args.args.len() == 1 => Some(payload),
        _ => None,
    }
}

fn is_generic_array(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path.qself.is_none() && path.path.is_ident("Array"),
        _ => false,
    }
}

fn field_decl(field: &ContainerField) -> TokenStream2 {
    let ty = &field.ty;
    let key = field.ident.to_string();
    let kind = match &field.attr {
        FieldAttr::Infer => quote!(::arraycontext::container::FieldKind::Infer),
        FieldAttr::Array => quote!(::arraycontext::container::FieldKind::Array),
        FieldAttr::Skip => quote!(::arraycontext::container::FieldKind::Skip),
        FieldAttr::Union(members) => {
            let members = members.iter().map(|member| {
                if is_generic_array(member) {
                    quote!(::arraycontext::container::UnionMember::Array)
                } else {
                    quote!(::arraycontext::container::UnionMember::of::<#member>())
                }
            });
            quote!(::arraycontext::container::FieldKind::Union(::std::vec![#(#members),*]))
        }
    };
    match option_payload(ty) {
        Some(payload) => quote! {
            ::arraycontext::container::FieldDecl::optional::<#ty, #payload>(#key, #kind)
        },
        None => quote! {
            ::arraycontext::container::FieldDecl::new::<#ty>(#key, #kind)
        },
    }
}
