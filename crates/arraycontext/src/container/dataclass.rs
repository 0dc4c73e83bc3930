//! Registration of record types whose array-bearing fields become container parts.
//!
//! Field classification:
//! - a field whose type is [`Value`], a registered leaf type, or a registered container
//!   is array-bearing;
//! - a union declaration makes a `Value` field array-bearing when every member is the
//!   generic array or a registered leaf/container type;
//! - an `Option` of an array-bearing type is rejected, since it mixes arrays with `None`;
//! - everything else is copied verbatim from the template on reconstruction.
//!
//! Nested container types must be registered before the types that contain them.

use std::any::Any;
use std::sync::Arc;

use log::debug;

use super::registry::{
    is_container_type, is_leaf_type, register_container, register_fallible_container, Parts,
};
use super::value::{Key, TypeKey, Value};
use crate::error::{Error, Result};

/// How a field was declared.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Classified from the field's type.
    Infer,
    /// Asserted array-bearing.
    Array,
    /// A `Value` field restricted to the listed members.
    Union(Vec<UnionMember>),
    /// Never array-bearing.
    Skip,
}

/// One member of a union field declaration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnionMember {
    /// Any leaf array.
    Array,
    Type(TypeKey),
}

impl UnionMember {
    pub fn of<T: Any>() -> Self {
        let key = TypeKey::of::<T>();
        if key == TypeKey::of::<Value>() {
            UnionMember::Array
        } else {
            UnionMember::Type(key)
        }
    }
}

/// Declaration of one named field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: &'static str,
    pub ty: TypeKey,
    pub kind: FieldKind,
    /// Payload type when the field is an `Option<_>`.
    pub optional: Option<TypeKey>,
}

impl FieldDecl {
    pub fn new<F: Any>(name: &'static str, kind: FieldKind) -> Self {
        let ty = TypeKey::of::<F>();
        let optional = (ty == TypeKey::of::<Option<Value>>()).then(TypeKey::of::<Value>);
        FieldDecl {
            name,
            ty,
            kind,
            optional,
        }
    }

    /// Declaration of a field of type `F = Option<T>`.
    pub fn optional<F: Any, T: Any>(name: &'static str, kind: FieldKind) -> Self {
        FieldDecl {
            optional: Some(TypeKey::of::<T>()),
            ..FieldDecl::new::<F>(name, kind)
        }
    }
}

/// Record types registrable with [`register_dataclass`].
///
/// Usually implemented through `#[derive(ArrayContainer)]`, which only accepts structs
/// with named fields:
///
/// ```compile_fail
/// #[derive(arraycontext::ArrayContainer)]
/// enum Discretization {
///     Nodal,
///     Modal,
/// }
/// ```
///
/// ```compile_fail
/// #[derive(arraycontext::ArrayContainer)]
/// struct Pair(arraycontext::Value, arraycontext::Value);
/// ```
///
/// Union declarations are only allowed on `Value` fields:
///
/// ```compile_fail
/// #[derive(Clone, arraycontext::ArrayContainer)]
/// struct State {
///     #[container(union(Array))]
///     u: f64,
/// }
/// ```
pub trait DataclassContainer: Any + Clone + Send + Sync {
    fn field_decls() -> Vec<FieldDecl>;

    /// Current value of field `name`, erased.
    fn field_part(&self, name: &str) -> Option<Value>;

    /// Copy of `self` with every field in `array_fields` taken from `parts`.
    fn with_parts(&self, parts: &mut Parts, array_fields: &[&'static str]) -> Result<Self>;
}

fn is_array_type(key: TypeKey) -> bool {
    key == TypeKey::of::<Value>() || is_leaf_type(key) || is_container_type(key)
}

/// Resolves which declared fields are array-bearing.
pub fn classify_fields(type_name: &'static str, decls: &[FieldDecl]) -> Result<Vec<&'static str>> {
    let mut array_fields = Vec::new();
    for decl in decls {
        if let Some(payload) = decl.optional {
            if decl.kind != FieldKind::Skip && is_array_type(payload) {
                return Err(Error::type_error(format!(
                    "field `{}` of `{type_name}` may hold `{}` or nothing; optional arrays \
                     mix arrays with non-array values",
                    decl.name,
                    payload.name()
                )));
            }
        }
        let bearing = match &decl.kind {
            FieldKind::Skip => false,
            FieldKind::Infer => is_array_type(decl.ty),
            FieldKind::Array => {
                if !is_array_type(decl.ty) {
                    return Err(Error::type_error(format!(
                        "field `{}` of `{type_name}` is declared as an array but has type `{}`, \
                         which is neither a leaf array nor a registered container",
                        decl.name,
                        decl.ty.name()
                    )));
                }
                true
            }
            FieldKind::Union(members) => {
                if decl.ty != TypeKey::of::<Value>() {
                    return Err(Error::type_error(format!(
                        "union field `{}` of `{type_name}` must have type `Value`, found `{}`",
                        decl.name,
                        decl.ty.name()
                    )));
                }
                if members.is_empty() {
                    return Err(Error::type_error(format!(
                        "union field `{}` of `{type_name}` has no members",
                        decl.name
                    )));
                }
                if let Some(UnionMember::Type(bad)) = members.iter().find(|member| match member {
                    UnionMember::Array => false,
                    UnionMember::Type(key) => !is_array_type(*key),
                }) {
                    return Err(Error::type_error(format!(
                        "union field `{}` of `{type_name}` mixes arrays with `{}`; every member \
                         must be an array or a registered container",
                        decl.name,
                        bad.name()
                    )));
                }
                true
            }
        };
        if bearing {
            array_fields.push(decl.name);
        }
    }
    if array_fields.is_empty() {
        return Err(Error::value_error(format!(
            "`{type_name}` has no array-bearing fields"
        )));
    }
    Ok(array_fields)
}

/// Registers a [`DataclassContainer`] type.
pub fn register_dataclass<T: DataclassContainer>() -> Result<()> {
    let type_name = std::any::type_name::<T>();
    let array_fields: Arc<[&'static str]> = classify_fields(type_name, &T::field_decls())?.into();
    debug!("dataclass {type_name}: array fields {array_fields:?}");

    let decompose_fields = Arc::clone(&array_fields);
    register_fallible_container::<T, _, _>(
        move |value: &T| {
            decompose_fields
                .iter()
                .map(|&name| {
                    let part = value.field_part(name).ok_or_else(|| {
                        Error::type_error(format!(
                            "`{type_name}` declares array field `{name}` but does not expose it"
                        ))
                    })?;
                    Ok((Key::from(name), part))
                })
                .collect()
        },
        move |template: &T, parts: &mut Parts| template.with_parts(parts, &array_fields),
    )
}

type Getter<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;
type Setter<T> = Arc<dyn Fn(&mut T, Value) -> Result<()> + Send + Sync>;

struct BuilderField<T> {
    decl: FieldDecl,
    get: Getter<T>,
    set: Setter<T>,
}

/// Field-by-field registration for types that cannot use the derive.
///
/// ```ignore
/// ContainerBuilder::<State>::new()
///     .field("u", FieldKind::Infer, |s: &State| &s.u, |s, u| s.u = u)
///     .field("time", FieldKind::Infer, |s: &State| &s.time, |s, t| s.time = t)
///     .register()?;
/// ```
pub struct ContainerBuilder<T> {
    fields: Vec<BuilderField<T>>,
}

impl<T: Any + Clone + Send + Sync> Default for ContainerBuilder<T> {
    fn default() -> Self {
        ContainerBuilder { fields: Vec::new() }
    }
}

impl<T: Any + Clone + Send + Sync> ContainerBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field<F, G, S>(mut self, name: &'static str, kind: FieldKind, get: G, set: S) -> Self
    where
        F: Any + Clone + Send + Sync,
        G: Fn(&T) -> &F + Send + Sync + 'static,
        S: Fn(&mut T, F) + Send + Sync + 'static,
    {
        self.fields.push(BuilderField {
            decl: FieldDecl::new::<F>(name, kind),
            get: Arc::new(move |value: &T| Value::new(get(value).clone())),
            set: Arc::new(move |value: &mut T, part: Value| {
                let typed = part.downcast::<F>().ok_or_else(|| {
                    Error::type_error(format!(
                        "part `{name}` has type `{}`, expected `{}`",
                        part.type_name(),
                        std::any::type_name::<F>()
                    ))
                })?;
                set(value, typed);
                Ok(())
            }),
        });
        self
    }

    /// Validates the declarations and registers `T`.
    pub fn register(self) -> Result<()> {
        let type_name = std::any::type_name::<T>();
        let decls: Vec<FieldDecl> = self.fields.iter().map(|f| f.decl.clone()).collect();
        let array_fields = classify_fields(type_name, &decls)?;
        let fields: Arc<[BuilderField<T>]> = self
            .fields
            .into_iter()
            .filter(|f| array_fields.contains(&f.decl.name))
            .collect();
        debug!("container {type_name}: array fields {array_fields:?}");

        let decompose_fields = Arc::clone(&fields);
        register_container::<T, _, _>(
            move |value: &T| {
                decompose_fields
                    .iter()
                    .map(|f| (Key::from(f.decl.name), (f.get)(value)))
                    .collect()
            },
            move |template: &T, parts: &mut Parts| {
                let mut rebuilt = template.clone();
                for field in fields.iter() {
                    let part = parts.take(field.decl.name)?;
                    (field.set)(&mut rebuilt, part)?;
                }
                Ok(rebuilt)
            },
        )
    }
}
