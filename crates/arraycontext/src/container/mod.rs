//! The array-container protocol: erased values, the type registry, and the traversal
//! engine that treats nested containers as single arrays.

pub mod dataclass;
pub mod registry;
pub mod traversal;
pub mod value;

pub use dataclass::{
    classify_fields, register_dataclass, ContainerBuilder, DataclassContainer, FieldDecl,
    FieldKind, UnionMember,
};
pub use registry::{
    decompose, is_container, is_container_type, is_leaf, is_leaf_type, reconstruct,
    register_container, register_leaf_type, Parts, LEAF_TYPES,
};
pub use traversal::{
    from_leaves, keyed_map, leaves, map, map_reduce, multimap, multimap_reduce,
};
pub use value::{Key, Scalar, TypeKey, Value};
