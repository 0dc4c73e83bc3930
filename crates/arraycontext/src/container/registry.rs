//! Process-wide registry of container and leaf types.
//!
//! Entries are keyed by exact runtime type. The registry is created on first use; at
//! that point it registers, in order, the built-in [`HostArray`] leaf, the built-in
//! `Vec<Value>` and `BTreeMap<String, Value>` containers, and the leaf types every linked
//! backend contributes through [`LEAF_TYPES`]. A backend leaf that collides with a
//! built-in container is logged and ignored. User registrations come after and never
//! replace an existing entry.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, RwLock};

use log::{debug, warn};

use super::value::{Key, TypeKey, Value};
use crate::error::{Error, Result};
use crate::host::HostArray;

/// Leaf types contributed by backend crates at link time.
///
/// ```ignore
/// #[arraycontext::linkme::distributed_slice(arraycontext::container::LEAF_TYPES)]
/// static CPU_ARRAY_LEAF: fn() -> TypeKey = TypeKey::of::<CpuArray>;
/// ```
#[linkme::distributed_slice]
pub static LEAF_TYPES: [fn() -> TypeKey] = [..];

type DecomposeFn = dyn Fn(&Value) -> Result<Vec<(Key, Value)>> + Send + Sync;
type ReconstructFn = dyn Fn(&Value, Parts) -> Result<Value> + Send + Sync;

struct ContainerEntry {
    decompose: Box<DecomposeFn>,
    reconstruct: Box<ReconstructFn>,
}

#[derive(Clone)]
enum Entry {
    Leaf,
    Container(Arc<ContainerEntry>),
}

struct Registry {
    entries: RwLock<HashMap<TypeKey, Entry>>,
}

impl Registry {
    fn bootstrap() -> Self {
        Self::with_backend_leaves(LEAF_TYPES.iter().map(|leaf| leaf()))
    }

    fn with_backend_leaves(leaves: impl IntoIterator<Item = TypeKey>) -> Self {
        let registry = Registry {
            entries: RwLock::new(HashMap::new()),
        };
        let builtins = [
            (TypeKey::of::<HostArray>(), Entry::Leaf),
            (
                TypeKey::of::<Vec<Value>>(),
                Entry::Container(Arc::new(typed_entry(
                    |items: &Vec<Value>| Ok(decompose_list(items)),
                    reconstruct_list,
                ))),
            ),
            (
                TypeKey::of::<BTreeMap<String, Value>>(),
                Entry::Container(Arc::new(typed_entry(
                    |entries: &BTreeMap<String, Value>| Ok(decompose_map(entries)),
                    reconstruct_map,
                ))),
            ),
        ];
        for (key, entry) in builtins {
            if let Err(err) = registry.insert(key, entry) {
                warn!("built-in registration of {key} failed: {err}");
            }
        }
        for key in leaves {
            match registry.insert(key, Entry::Leaf) {
                Ok(()) => debug!("registered backend leaf type {key}"),
                Err(err) => warn!("ignoring backend leaf type {key}: {err}"),
            }
        }
        debug!(
            "container registry initialized with {} entries",
            registry.read().len()
        );
        registry
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TypeKey, Entry>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, key: TypeKey, entry: Entry) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match (entries.get(&key), &entry) {
            (None, _) => {
                entries.insert(key, entry);
                Ok(())
            }
            (Some(Entry::Leaf), Entry::Leaf) => Ok(()),
            (Some(Entry::Leaf), Entry::Container(_)) => Err(Error::registration(
                key.name(),
                "type is registered as a leaf array type",
            )),
            (Some(Entry::Container(_)), Entry::Leaf) => Err(Error::registration(
                key.name(),
                "type is already registered as a container",
            )),
            (Some(Entry::Container(_)), Entry::Container(_)) => Err(Error::registration(
                key.name(),
                "container type is already registered",
            )),
        }
    }

    fn lookup(&self, key: &TypeKey) -> Option<Entry> {
        self.read().get(key).cloned()
    }
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::bootstrap)
}

fn typed_entry<T, D, R>(decompose: D, reconstruct: R) -> ContainerEntry
where
    T: Any + Send + Sync,
    D: Fn(&T) -> Result<Vec<(Key, Value)>> + Send + Sync + 'static,
    R: Fn(&T, &mut Parts) -> Result<T> + Send + Sync + 'static,
{
    ContainerEntry {
        decompose: Box::new(move |value: &Value| {
            let typed = value.downcast_ref::<T>().ok_or_else(|| {
                Error::type_error(format!(
                    "registry entry for `{}` received `{}`",
                    std::any::type_name::<T>(),
                    value.type_name()
                ))
            })?;
            decompose(typed)
        }),
        reconstruct: Box::new(move |template: &Value, mut parts: Parts| {
            let typed = template.downcast_ref::<T>().ok_or_else(|| {
                Error::type_error(format!(
                    "registry entry for `{}` received template `{}`",
                    std::any::type_name::<T>(),
                    template.type_name()
                ))
            })?;
            let rebuilt = reconstruct(typed, &mut parts)?;
            parts.finish()?;
            Ok(Value::new(rebuilt))
        }),
    }
}

/// Registers `T` as an array container.
///
/// `decompose` lists the array-bearing parts of a value under stable, unique keys.
/// `reconstruct` rebuilds a value from a template (supplying every non-array field) and
/// the parts, which may arrive in any order.
pub fn register_container<T, D, R>(decompose: D, reconstruct: R) -> Result<()>
where
    T: Any + Send + Sync,
    D: Fn(&T) -> Vec<(Key, Value)> + Send + Sync + 'static,
    R: Fn(&T, &mut Parts) -> Result<T> + Send + Sync + 'static,
{
    register_fallible_container(move |value: &T| Ok(decompose(value)), reconstruct)
}

/// Like [`register_container`], for decompositions that can fail.
pub(crate) fn register_fallible_container<T, D, R>(decompose: D, reconstruct: R) -> Result<()>
where
    T: Any + Send + Sync,
    D: Fn(&T) -> Result<Vec<(Key, Value)>> + Send + Sync + 'static,
    R: Fn(&T, &mut Parts) -> Result<T> + Send + Sync + 'static,
{
    let key = TypeKey::of::<T>();
    registry().insert(
        key,
        Entry::Container(Arc::new(typed_entry(decompose, reconstruct))),
    )?;
    debug!("registered array container {key}");
    Ok(())
}

/// Registers `T` as a leaf array type. Idempotent for leaf types.
pub fn register_leaf_type<T: Any + Send + Sync>() -> Result<()> {
    let key = TypeKey::of::<T>();
    registry().insert(key, Entry::Leaf)?;
    debug!("registered leaf array type {key}");
    Ok(())
}

pub fn is_container_type(key: TypeKey) -> bool {
    matches!(registry().lookup(&key), Some(Entry::Container(_)))
}

pub fn is_leaf_type(key: TypeKey) -> bool {
    matches!(registry().lookup(&key), Some(Entry::Leaf))
}

pub fn is_container(value: &Value) -> bool {
    is_container_type(value.type_key())
}

pub fn is_leaf(value: &Value) -> bool {
    is_leaf_type(value.type_key())
}

fn container_entry(key: TypeKey) -> Result<Arc<ContainerEntry>> {
    match registry().lookup(&key) {
        Some(Entry::Container(entry)) => Ok(entry),
        _ => Err(Error::NotAContainer {
            type_name: key.name(),
        }),
    }
}

/// Splits a container into its keyed array-bearing parts.
pub fn decompose(value: &Value) -> Result<Vec<(Key, Value)>> {
    let entry = container_entry(value.type_key())?;
    (entry.decompose)(value)
}

/// Rebuilds a container shaped like `template` from `parts`.
///
/// Missing, duplicate or unexpected keys fail with a structure mismatch.
pub fn reconstruct(template: &Value, parts: Vec<(Key, Value)>) -> Result<Value> {
    let entry = container_entry(template.type_key())?;
    let parts = Parts::new(template.type_name(), parts)?;
    (entry.reconstruct)(template, parts)
}

/// Keyed parts handed to a reconstruct function.
#[derive(Debug)]
pub struct Parts {
    type_name: &'static str,
    parts: HashMap<Key, Value>,
}

impl Parts {
    fn new(type_name: &'static str, parts: Vec<(Key, Value)>) -> Result<Self> {
        let mut map = HashMap::with_capacity(parts.len());
        for (key, value) in parts {
            if map.insert(key.clone(), value).is_some() {
                return Err(Error::mismatch(format!(
                    "duplicate key {key} while reconstructing `{type_name}`"
                )));
            }
        }
        Ok(Parts {
            type_name,
            parts: map,
        })
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Removes the part stored under `key`.
    pub fn take(&mut self, key: impl Into<Key>) -> Result<Value> {
        let key = key.into();
        self.parts.remove(&key).ok_or_else(|| {
            Error::mismatch(format!(
                "missing key {key} while reconstructing `{}`",
                self.type_name
            ))
        })
    }

    /// Removes the part under `key` and downcasts it to a concrete field type.
    pub fn take_as<T: Any + Clone>(&mut self, key: impl Into<Key>) -> Result<T> {
        let key = key.into();
        let value = self.take(key.clone())?;
        value.downcast::<T>().ok_or_else(|| {
            Error::type_error(format!(
                "part {key} of `{}` has type `{}`, expected `{}`",
                self.type_name,
                value.type_name(),
                std::any::type_name::<T>()
            ))
        })
    }

    /// Fails if parts were left unused.
    pub fn finish(self) -> Result<()> {
        if self.parts.is_empty() {
            return Ok(());
        }
        let mut extra: Vec<String> = self.parts.keys().map(|k| k.to_string()).collect();
        extra.sort();
        Err(Error::mismatch(format!(
            "unexpected keys {} while reconstructing `{}`",
            extra.join(", "),
            self.type_name
        )))
    }
}

#[allow(clippy::ptr_arg)]
fn decompose_list(items: &Vec<Value>) -> Vec<(Key, Value)> {
    items
        .iter()
        .enumerate()
        .map(|(i, v)| (Key::Index(i), v.clone()))
        .collect()
}

#[allow(clippy::ptr_arg)]
fn reconstruct_list(template: &Vec<Value>, parts: &mut Parts) -> Result<Vec<Value>> {
    (0..template.len()).map(|i| parts.take(i)).collect()
}

fn decompose_map(entries: &BTreeMap<String, Value>) -> Vec<(Key, Value)> {
    entries
        .iter()
        .map(|(k, v)| (Key::from(k.clone()), v.clone()))
        .collect()
}

fn reconstruct_map(
    template: &BTreeMap<String, Value>,
    parts: &mut Parts,
) -> Result<BTreeMap<String, Value>> {
    template
        .keys()
        .map(|k| Ok((k.clone(), parts.take(k.clone())?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BackendLeaf;

    #[test]
    fn backend_leaves_cannot_displace_builtin_containers() {
        let registry = Registry::with_backend_leaves([
            TypeKey::of::<BackendLeaf>(),
            TypeKey::of::<Vec<Value>>(),
            TypeKey::of::<HostArray>(),
        ]);
        assert!(matches!(
            registry.lookup(&TypeKey::of::<Vec<Value>>()),
            Some(Entry::Container(_))
        ));
        assert!(matches!(
            registry.lookup(&TypeKey::of::<BTreeMap<String, Value>>()),
            Some(Entry::Container(_))
        ));
        assert!(matches!(
            registry.lookup(&TypeKey::of::<HostArray>()),
            Some(Entry::Leaf)
        ));
        assert!(matches!(
            registry.lookup(&TypeKey::of::<BackendLeaf>()),
            Some(Entry::Leaf)
        ));
        assert_eq!(registry.read().len(), 4);
    }
}
