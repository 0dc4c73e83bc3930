//! The array context: one backend instance plus the lifecycle operations around it.

use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::backend::{ArrayBackend, Capabilities, ContextId, LeafArray};
use crate::container::{map, Scalar, Value};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::host::HostArray;
use crate::namespace::Namespace;
use crate::ops::UnaryOp;
use crate::tag::{AxisTaggable, Tag, Taggable};

/// Handle to one backend instance.
///
/// Leaves created through a context are bound to it; namespace operations only accept
/// leaves bound to the same context. Cloning forks the backend into an independent
/// context with the same configuration.
pub struct ArrayContext<B: ArrayBackend> {
    backend: B,
    functions: HashMap<&'static str, UnaryOp>,
}

impl<B: ArrayBackend> ArrayContext<B> {
    pub fn new(backend: B) -> Self {
        let functions: HashMap<&'static str, UnaryOp> = backend
            .native_functions()
            .iter()
            .map(|&op| (op.name(), op))
            .collect();
        debug!(
            "created {} array context {} with {} named functions",
            backend.backend_name(),
            backend.context_id(),
            functions.len()
        );
        ArrayContext { backend, functions }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn id(&self) -> ContextId {
        self.backend.context_id()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn permits_inplace_modification(&self) -> bool {
        self.capabilities().permits_inplace_modification
    }

    pub fn permits_advanced_indexing(&self) -> bool {
        self.capabilities().permits_advanced_indexing
    }

    pub fn supports_nonscalar_broadcasting(&self) -> bool {
        self.capabilities().supports_nonscalar_broadcasting
    }

    /// The numeric namespace bound to this context.
    pub fn np(&self) -> Namespace<'_, B> {
        Namespace::new(self)
    }

    pub(crate) fn lookup_function(&self, name: &str) -> Option<UnaryOp> {
        self.functions.get(name).copied()
    }

    /// Names resolvable through [`Namespace::function`], sorted.
    pub fn function_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn empty(&self, shape: &[usize], dtype: DType) -> Result<B::Array> {
        Ok(self.backend.empty(shape, dtype)?)
    }

    pub fn zeros(&self, shape: &[usize], dtype: DType) -> Result<B::Array> {
        Ok(self.backend.zeros(shape, dtype)?)
    }

    pub fn full(&self, shape: &[usize], dtype: DType, value: impl Into<Scalar>) -> Result<B::Array> {
        Ok(self.backend.full(shape, dtype, value.into())?)
    }

    pub fn from_host(&self, host: &HostArray) -> Result<B::Array> {
        Ok(self.backend.from_host(host)?)
    }

    /// Copies a leaf to the host. Accepts leaves bound to this context and frozen leaves.
    pub fn to_host(&self, array: &B::Array) -> Result<HostArray> {
        self.check_accessible(array)?;
        Ok(self.backend.to_host(array)?)
    }

    /// Detaches a leaf from this context. Frozen leaves are returned unchanged.
    pub fn freeze(&self, array: &B::Array) -> Result<B::Array> {
        if array.is_frozen() {
            return Ok(array.clone());
        }
        self.check_bound(array)?;
        Ok(self.backend.freeze(array)?)
    }

    /// Binds a frozen leaf to this context.
    pub fn thaw(&self, array: &B::Array) -> Result<B::Array> {
        match array.context_id() {
            None => Ok(self.backend.thaw(array)?),
            Some(id) if id == self.id() => Ok(array.clone()),
            Some(other) => Err(Error::type_error(format!(
                "cannot thaw an array bound to {other} into {}; freeze it first",
                self.id()
            ))),
        }
    }

    /// Moves every [`HostArray`] leaf of `value` into this context.
    pub fn from_host_value(&self, value: &Value) -> Result<Value> {
        map(
            |leaf| match leaf.downcast_ref::<HostArray>() {
                Some(host) => Ok(Value::new(self.from_host(host)?)),
                None if leaf.as_scalar().is_some() => Ok(leaf.clone()),
                None => Err(self.unexpected_leaf("from_host", leaf)),
            },
            value,
        )
    }

    /// Copies every leaf of `value` to the host.
    pub fn to_host_value(&self, value: &Value) -> Result<Value> {
        self.map_arrays(value, "to_host", |array| {
            Ok(Value::new(self.to_host(array)?))
        })
    }

    pub fn freeze_value(&self, value: &Value) -> Result<Value> {
        self.map_arrays(value, "freeze", |array| Ok(Value::new(self.freeze(array)?)))
    }

    pub fn thaw_value(&self, value: &Value) -> Result<Value> {
        self.map_arrays(value, "thaw", |array| Ok(Value::new(self.thaw(array)?)))
    }

    /// Adds `tags` to every leaf of `value`.
    pub fn tag(&self, value: &Value, tags: impl IntoIterator<Item = Tag>) -> Result<Value> {
        let tags: Vec<Tag> = tags.into_iter().collect();
        self.map_arrays(value, "tag", |array| {
            Ok(Value::new(array.tagged(tags.iter().cloned())))
        })
    }

    /// Adds `tags` to axis `iaxis` of every leaf of `value`.
    pub fn tag_axis(
        &self,
        value: &Value,
        iaxis: usize,
        tags: impl IntoIterator<Item = Tag>,
    ) -> Result<Value> {
        let tags: Vec<Tag> = tags.into_iter().collect();
        self.map_arrays(value, "tag_axis", |array| {
            Ok(Value::new(array.with_tagged_axis(iaxis, tags.iter().cloned())?))
        })
    }

    /// Maps `f` over the backend leaves of `value`; scalars pass through.
    fn map_arrays<F>(&self, value: &Value, op: &'static str, mut f: F) -> Result<Value>
    where
        F: FnMut(&B::Array) -> Result<Value>,
    {
        map(
            |leaf| match leaf.downcast_ref::<B::Array>() {
                Some(array) => f(array),
                None if leaf.as_scalar().is_some() => Ok(leaf.clone()),
                None => Err(self.unexpected_leaf(op, leaf)),
            },
            value,
        )
    }

    fn unexpected_leaf(&self, op: &'static str, leaf: &Value) -> Error {
        Error::type_error(format!(
            "{op}: unexpected leaf of type `{}` for {} context",
            leaf.type_name(),
            self.backend.backend_name()
        ))
    }

    /// Fails unless `array` is bound to this context.
    pub(crate) fn check_bound(&self, array: &B::Array) -> Result<()> {
        match array.context_id() {
            Some(id) if id == self.id() => Ok(()),
            Some(other) => Err(Error::type_error(format!(
                "array is bound to {other}, not to {}",
                self.id()
            ))),
            None => Err(Error::type_error(
                "array is frozen; thaw it before computing with it",
            )),
        }
    }

    fn check_accessible(&self, array: &B::Array) -> Result<()> {
        match array.context_id() {
            Some(id) if id != self.id() => Err(Error::type_error(format!(
                "array is bound to {id}, not to {}",
                self.id()
            ))),
            _ => Ok(()),
        }
    }

    /// Downcasts a leaf to this backend's array type and checks its binding.
    pub(crate) fn bound_leaf<'v>(&self, value: &'v Value) -> Result<&'v B::Array> {
        let array = value.downcast_ref::<B::Array>().ok_or_else(|| {
            Error::type_error(format!(
                "expected a {} array, got `{}`",
                self.backend.backend_name(),
                value.type_name()
            ))
        })?;
        self.check_bound(array)?;
        Ok(array)
    }
}

impl<B: ArrayBackend> Clone for ArrayContext<B> {
    fn clone(&self) -> Self {
        let forked = ArrayContext::new(self.backend.fork());
        debug!("forked context {} into {}", self.id(), forked.id());
        forked
    }
}

impl<B: ArrayBackend> fmt::Debug for ArrayContext<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayContext")
            .field("backend", &self.backend.backend_name())
            .field("id", &self.id())
            .finish()
    }
}
