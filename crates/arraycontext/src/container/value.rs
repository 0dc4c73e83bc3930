//! Type-erased values flowing through the traversal engine.

use std::any::{type_name, Any, TypeId};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::dtype::DType;

/// Exact runtime type of a value; the registry key.
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: Any>() -> Self {
        TypeKey {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Identifies one part of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Index(usize),
    Name(Cow<'static, str>),
}

impl Key {
    pub fn name(name: impl Into<Cow<'static, str>>) -> Self {
        Key::Name(name.into())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&'static str> for Key {
    fn from(name: &'static str) -> Self {
        Key::Name(Cow::Borrowed(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(Cow::Owned(name))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "[{i}]"),
            Key::Name(name) => write!(f, ".{name}"),
        }
    }
}

/// Python-like scalar; neither a leaf nor a container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn to_f64(self) -> f64 {
        match self {
            Scalar::Bool(b) => f64::from(u8::from(b)),
            Scalar::Int(i) => i as f64,
            Scalar::Float(x) => x,
        }
    }

    /// Dtype of the scalar on its own.
    pub fn default_dtype(self) -> DType {
        match self {
            Scalar::Bool(_) => DType::Bool,
            Scalar::Int(_) => DType::I64,
            Scalar::Float(_) => DType::F64,
        }
    }

    /// Weakly typed dtype when combined with an array of dtype `array`: the scalar adopts
    /// the array's dtype unless its kind is higher (bool < int < float).
    pub fn weak_dtype(self, array: DType) -> DType {
        match self {
            Scalar::Bool(_) => array,
            Scalar::Int(_) if array.is_bool() => DType::I64,
            Scalar::Int(_) => array,
            Scalar::Float(_) if array.is_float() => array,
            Scalar::Float(_) => DType::F64,
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        Scalar::Float(f64::from(value))
    }
}

/// Shared handle to a leaf, a container, or a pass-through value.
///
/// Cloning is a reference-count bump. `Value::new` on a `Value` returns it unchanged, so
/// generic code never double-wraps.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    key: TypeKey,
}

impl Value {
    pub fn new<T: Any + Send + Sync>(value: T) -> Value {
        let inner: Arc<dyn Any + Send + Sync> = Arc::new(value);
        match inner.downcast::<Value>() {
            Ok(value) => Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone()),
            Err(inner) => Value {
                inner,
                key: TypeKey::of::<T>(),
            },
        }
    }

    pub fn scalar(value: impl Into<Scalar>) -> Value {
        Value::new(value.into())
    }

    /// Built-in sequence container.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
        Value::new(items.into_iter().collect::<Vec<Value>>())
    }

    /// Built-in mapping container.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect::<BTreeMap<String, Value>>(),
        )
    }

    pub fn type_key(&self) -> TypeKey {
        self.key
    }

    pub fn type_name(&self) -> &'static str {
        self.key.name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.key.id == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Owned copy of the wrapped value; `downcast::<Value>()` returns `self`.
    pub fn downcast<T: Any + Clone>(&self) -> Option<T> {
        if let Some(value) = (self as &dyn Any).downcast_ref::<T>() {
            return Some(value.clone());
        }
        self.inner.downcast_ref::<T>().cloned()
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        self.downcast_ref::<Scalar>().copied()
    }

    /// Returns `true` when both handles share one allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scalar) = self.downcast_ref::<Scalar>() {
            return write!(f, "{scalar:?}");
        }
        if let Some(items) = self.downcast_ref::<Vec<Value>>() {
            return f.debug_list().entries(items).finish();
        }
        if let Some(entries) = self.downcast_ref::<BTreeMap<String, Value>>() {
            return f.debug_map().entries(entries).finish();
        }
        write!(f, "<{}>", self.key.name)
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Value::new(scalar)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::new(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::new(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_a_value_does_not_nest() {
        let inner = Value::scalar(1.5);
        let outer = Value::new(inner.clone());
        assert!(outer.is::<Scalar>());
        assert!(outer.ptr_eq(&inner));
    }

    #[test]
    fn int_scalar_keeps_integer_arrays_integral() {
        assert_eq!(Scalar::Int(2).weak_dtype(DType::I32), DType::I32);
        assert_eq!(Scalar::Float(2.0).weak_dtype(DType::F32), DType::F32);
        assert_eq!(Scalar::Float(2.0).weak_dtype(DType::I32), DType::F64);
    }
}
