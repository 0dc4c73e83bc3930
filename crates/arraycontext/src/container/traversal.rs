//! Recursive traversal of nested containers.
//!
//! Every function here consults the registry at each node: registered containers are
//! decomposed and recursed into, anything else is handed to the caller's function.
//! Containers with no parts are rejected with a `ValueError` because there is nothing
//! to map over and no leaf to reduce.

use std::collections::HashMap;

use log::trace;

use super::registry::{decompose, is_container, reconstruct};
use super::value::{Key, Value};
use crate::error::{Error, Result};

fn nonempty_parts(value: &Value) -> Result<Vec<(Key, Value)>> {
    let parts = decompose(value)?;
    if parts.is_empty() {
        return Err(Error::empty_container(value.type_name()));
    }
    Ok(parts)
}

/// Applies `f` to every leaf, rebuilding each container around the results.
pub fn map<F>(mut f: F, value: &Value) -> Result<Value>
where
    F: FnMut(&Value) -> Result<Value>,
{
    map_rec(&mut f, value)
}

fn map_rec<F>(f: &mut F, value: &Value) -> Result<Value>
where
    F: FnMut(&Value) -> Result<Value>,
{
    if !is_container(value) {
        trace!("map: leaf `{}`", value.type_name());
        return f(value);
    }
    let parts = nonempty_parts(value)?;
    let mut mapped = Vec::with_capacity(parts.len());
    for (key, part) in parts {
        mapped.push((key, map_rec(f, &part)?));
    }
    reconstruct(value, mapped)
}

/// Like [`map`], with the key path from the root passed alongside each leaf.
pub fn keyed_map<F>(mut f: F, value: &Value) -> Result<Value>
where
    F: FnMut(&[Key], &Value) -> Result<Value>,
{
    let mut path = Vec::new();
    keyed_map_rec(&mut f, &mut path, value)
}

fn keyed_map_rec<F>(f: &mut F, path: &mut Vec<Key>, value: &Value) -> Result<Value>
where
    F: FnMut(&[Key], &Value) -> Result<Value>,
{
    if !is_container(value) {
        return f(path, value);
    }
    let parts = nonempty_parts(value)?;
    let mut mapped = Vec::with_capacity(parts.len());
    for (key, part) in parts {
        path.push(key.clone());
        let result = keyed_map_rec(f, path, &part);
        path.pop();
        mapped.push((key, result?));
    }
    reconstruct(value, mapped)
}

/// Lock-step traversal of several arguments.
///
/// The arguments that are containers at the root are walked together; the first of them
/// is the template for the result. At every node they must share the template's runtime
/// type and key set. Other arguments are passed to `f` unchanged at every leaf.
pub fn multimap<F>(mut f: F, args: &[Value]) -> Result<Value>
where
    F: FnMut(&[Value]) -> Result<Value>,
{
    let positions = container_positions(args);
    if positions.is_empty() {
        return f(args);
    }
    multimap_rec(&mut f, args.to_vec(), &positions)
}

fn container_positions(args: &[Value]) -> Vec<usize> {
    args.iter()
        .enumerate()
        .filter(|(_, arg)| is_container(arg))
        .map(|(i, _)| i)
        .collect()
}

fn multimap_rec<F>(f: &mut F, args: Vec<Value>, positions: &[usize]) -> Result<Value>
where
    F: FnMut(&[Value]) -> Result<Value>,
{
    match lockstep_children(&args, positions)? {
        None => f(&args),
        Some(children) => {
            let template = &args[positions[0]];
            let mut mapped = Vec::with_capacity(children.len());
            for (key, child_args) in children {
                mapped.push((key, multimap_rec(f, child_args, positions)?));
            }
            reconstruct(template, mapped)
        }
    }
}

/// Decomposes the container positions of `args` in lock step.
///
/// Returns `None` at the leaf level, otherwise one argument vector per template key.
fn lockstep_children(
    args: &[Value],
    positions: &[usize],
) -> Result<Option<Vec<(Key, Vec<Value>)>>> {
    let template = &args[positions[0]];
    if !is_container(template) {
        if let Some(&p) = positions[1..].iter().find(|&&p| is_container(&args[p])) {
            return Err(Error::mismatch(format!(
                "argument {p} is a `{}` container where argument {} holds a leaf `{}`",
                args[p].type_name(),
                positions[0],
                template.type_name()
            )));
        }
        trace!("multimap: leaf level with {} arguments", args.len());
        return Ok(None);
    }

    let template_parts = nonempty_parts(template)?;
    let mut others: Vec<(usize, HashMap<Key, Value>)> = Vec::with_capacity(positions.len() - 1);
    for &p in &positions[1..] {
        let other = &args[p];
        if other.type_key() != template.type_key() {
            return Err(Error::mismatch(format!(
                "argument {p} has type `{}`, expected `{}`",
                other.type_name(),
                template.type_name()
            )));
        }
        let parts: HashMap<Key, Value> = decompose(other)?.into_iter().collect();
        let same_keys = parts.len() == template_parts.len()
            && template_parts.iter().all(|(key, _)| parts.contains_key(key));
        if !same_keys {
            return Err(Error::mismatch(format!(
                "argument {p} of type `{}` has a different set of keys than argument {}",
                other.type_name(),
                positions[0]
            )));
        }
        others.push((p, parts));
    }

    let mut children = Vec::with_capacity(template_parts.len());
    for (key, part) in template_parts {
        let mut child_args = args.to_vec();
        child_args[positions[0]] = part;
        for (p, parts) in &mut others {
            if let Some(value) = parts.remove(&key) {
                child_args[*p] = value;
            }
        }
        children.push((key, child_args));
    }
    Ok(Some(children))
}

/// Maps `f` over the leaves and folds the results with `reduce`, level by level.
///
/// A container with a single leaf yields `f(leaf)` without calling `reduce`.
pub fn map_reduce<R, F, G>(mut reduce: G, mut f: F, value: &Value) -> Result<R>
where
    F: FnMut(&Value) -> Result<R>,
    G: FnMut(R, R) -> Result<R>,
{
    map_reduce_rec(&mut reduce, &mut f, value)
}

fn map_reduce_rec<R, F, G>(reduce: &mut G, f: &mut F, value: &Value) -> Result<R>
where
    F: FnMut(&Value) -> Result<R>,
    G: FnMut(R, R) -> Result<R>,
{
    if !is_container(value) {
        return f(value);
    }
    let mut acc = None;
    for (_, part) in nonempty_parts(value)? {
        let result = map_reduce_rec(reduce, f, &part)?;
        acc = Some(match acc {
            None => result,
            Some(acc) => reduce(acc, result)?,
        });
    }
    acc.ok_or_else(|| Error::empty_container(value.type_name()))
}

/// Lock-step [`multimap`] followed by a fold with `reduce`.
pub fn multimap_reduce<R, F, G>(mut reduce: G, mut f: F, args: &[Value]) -> Result<R>
where
    F: FnMut(&[Value]) -> Result<R>,
    G: FnMut(R, R) -> Result<R>,
{
    let positions = container_positions(args);
    if positions.is_empty() {
        return f(args);
    }
    multimap_reduce_rec(&mut reduce, &mut f, args.to_vec(), &positions)
}

fn multimap_reduce_rec<R, F, G>(
    reduce: &mut G,
    f: &mut F,
    args: Vec<Value>,
    positions: &[usize],
) -> Result<R>
where
    F: FnMut(&[Value]) -> Result<R>,
    G: FnMut(R, R) -> Result<R>,
{
    let Some(children) = lockstep_children(&args, positions)? else {
        return f(&args);
    };
    let mut acc = None;
    for (_, child_args) in children {
        let result = multimap_reduce_rec(reduce, f, child_args, positions)?;
        acc = Some(match acc {
            None => result,
            Some(acc) => reduce(acc, result)?,
        });
    }
    acc.ok_or_else(|| Error::empty_container(args[positions[0]].type_name()))
}

/// Leaves of `value` in traversal order.
pub fn leaves(value: &Value) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    map_reduce(
        |_: (), _: ()| Ok(()),
        |leaf| {
            out.push(leaf.clone());
            Ok(())
        },
        value,
    )?;
    Ok(out)
}

/// Rebuilds a value shaped like `template` from leaves in traversal order.
pub fn from_leaves(template: &Value, leaves: Vec<Value>) -> Result<Value> {
    let expected = leaves.len();
    let mut iter = leaves.into_iter();
    let mut consumed = 0usize;
    let rebuilt = map(
        |_| {
            consumed += 1;
            iter.next().ok_or_else(|| {
                Error::value_error(format!(
                    "template has more leaves than the {expected} supplied"
                ))
            })
        },
        template,
    )?;
    if consumed != expected {
        return Err(Error::value_error(format!(
            "template has {consumed} leaves, {expected} supplied"
        )));
    }
    Ok(rebuilt)
}
