use std::cell::Cell;

use anyhow::Result;
use arraycontext::container::{
    from_leaves, keyed_map, leaves, map, map_reduce, multimap, multimap_reduce,
    register_container, Key, Parts, Scalar, Value,
};
use arraycontext::Error;

fn number(value: &Value) -> f64 {
    value.as_scalar().map(Scalar::to_f64).unwrap_or(f64::NAN)
}

fn numbers(value: &Value) -> Result<Vec<f64>> {
    Ok(leaves(value)?.iter().map(number).collect())
}

fn nested() -> Value {
    Value::map([
        ("a", Value::scalar(1.0)),
        (
            "b",
            Value::list([Value::scalar(2.0), Value::scalar(3.0)]),
        ),
    ])
}

#[test]
fn map_reduce_folds_every_leaf() -> Result<()> {
    let values = Value::list([Value::scalar(1.0), Value::scalar(2.0), Value::scalar(3.0)]);
    let total = map_reduce(
        |a: f64, b: f64| Ok(a + b),
        |leaf| Ok(number(leaf).powi(2)),
        &values,
    )?;
    assert_eq!(total, 14.0);

    let nested_total = map_reduce(|a: f64, b: f64| Ok(a + b), |leaf| Ok(number(leaf)), &nested())?;
    assert_eq!(nested_total, 6.0);
    Ok(())
}

#[test]
fn single_child_skips_the_reducer() -> Result<()> {
    let calls = Cell::new(0);
    let single = Value::list([Value::list([Value::scalar(5.0)])]);
    let result = map_reduce(
        |a: f64, b: f64| {
            calls.set(calls.get() + 1);
            Ok(a + b)
        },
        |leaf| Ok(number(leaf)),
        &single,
    )?;
    assert_eq!(result, 5.0);
    assert_eq!(calls.get(), 0);
    Ok(())
}

#[test]
fn map_preserves_structure() -> Result<()> {
    let doubled = map(|leaf| Ok(Value::scalar(2.0 * number(leaf))), &nested())?;
    assert!(doubled.is::<std::collections::BTreeMap<String, Value>>());
    assert_eq!(numbers(&doubled)?, vec![2.0, 4.0, 6.0]);

    // A bare leaf is mapped directly.
    let bare = map(|leaf| Ok(Value::scalar(number(leaf) + 1.0)), &Value::scalar(1.0))?;
    assert_eq!(number(&bare), 2.0);
    Ok(())
}

#[test]
fn keyed_map_reports_paths() -> Result<()> {
    let mut seen = Vec::new();
    keyed_map(
        |path, leaf| {
            let rendered: String = path.iter().map(Key::to_string).collect();
            seen.push((rendered, number(leaf)));
            Ok(leaf.clone())
        },
        &nested(),
    )?;
    assert_eq!(
        seen,
        vec![
            (".a".to_string(), 1.0),
            (".b[0]".to_string(), 2.0),
            (".b[1]".to_string(), 3.0),
        ]
    );
    Ok(())
}

#[test]
fn multimap_walks_containers_in_lock_step() -> Result<()> {
    let x = nested();
    let y = map(|leaf| Ok(Value::scalar(10.0 * number(leaf))), &x)?;

    let sum = multimap(
        |args| Ok(Value::scalar(number(&args[0]) + number(&args[1]))),
        &[x.clone(), y.clone()],
    )?;
    assert_eq!(numbers(&sum)?, vec![11.0, 22.0, 33.0]);

    // Non-container arguments are broadcast to every leaf.
    let shifted = multimap(
        |args| Ok(Value::scalar(number(&args[0]) - number(&args[1]))),
        &[Value::scalar(100.0), x.clone()],
    )?;
    assert_eq!(numbers(&shifted)?, vec![99.0, 98.0, 97.0]);

    let dot = multimap_reduce(
        |a: f64, b: f64| Ok(a + b),
        |args| Ok(number(&args[0]) * number(&args[1])),
        &[x, y],
    )?;
    assert_eq!(dot, 10.0 + 40.0 + 90.0);
    Ok(())
}

#[test]
fn multimap_rejects_mismatched_structures() {
    let add = |args: &[Value]| Ok(Value::scalar(number(&args[0]) + number(&args[1])));

    let list = Value::list([Value::scalar(1.0)]);
    let dict = Value::map([("0", Value::scalar(1.0))]);
    let result = multimap(add, &[list.clone(), dict]);
    assert!(matches!(result, Err(Error::StructureMismatch(_))), "{result:?}");

    let longer = Value::list([Value::scalar(1.0), Value::scalar(2.0)]);
    let result = multimap(add, &[list.clone(), longer]);
    assert!(matches!(result, Err(Error::StructureMismatch(_))), "{result:?}");

    let a = Value::map([("u", Value::scalar(1.0))]);
    let b = Value::map([("v", Value::scalar(1.0))]);
    let result = multimap(add, &[a, b]);
    assert!(matches!(result, Err(Error::StructureMismatch(_))), "{result:?}");

    let leaf_vs_container = Value::list([Value::list([Value::scalar(1.0)])]);
    let result = multimap(add, &[list, leaf_vs_container]);
    assert!(matches!(result, Err(Error::StructureMismatch(_))), "{result:?}");
}

#[derive(Clone)]
struct Bag {
    items: Vec<Value>,
}

#[test]
fn empty_containers_are_rejected() -> Result<()> {
    register_container::<Bag, _, _>(
        |bag: &Bag| {
            bag.items
                .iter()
                .cloned()
                .enumerate()
                .map(|(i, v)| (Key::Index(i), v))
                .collect()
        },
        |template: &Bag, parts: &mut Parts| {
            let items = (0..template.items.len())
                .map(|i| parts.take(i))
                .collect::<arraycontext::Result<Vec<_>>>()?;
            Ok(Bag { items })
        },
    )?;
    let empty = Value::new(Bag { items: Vec::new() });

    assert!(matches!(map(|v| Ok(v.clone()), &empty), Err(Error::Value(_))));
    assert!(matches!(
        map_reduce(|a: f64, b: f64| Ok(a + b), |_| Ok(0.0), &empty),
        Err(Error::Value(_))
    ));
    assert!(matches!(leaves(&empty), Err(Error::Value(_))));
    assert!(matches!(
        multimap(|args| Ok(args[0].clone()), &[empty.clone(), empty.clone()]),
        Err(Error::Value(_))
    ));

    let full = Value::new(Bag {
        items: vec![Value::scalar(1.0), Value::list([])],
    });
    assert!(matches!(leaves(&full), Err(Error::Value(_))));

    let ok = Value::new(Bag {
        items: vec![Value::scalar(4.0)],
    });
    assert_eq!(numbers(&ok)?, vec![4.0]);
    Ok(())
}

#[test]
fn from_leaves_rebuilds_in_traversal_order() -> Result<()> {
    let template = nested();
    let rebuilt = from_leaves(
        &template,
        vec![Value::scalar(7.0), Value::scalar(8.0), Value::scalar(9.0)],
    )?;
    assert_eq!(numbers(&rebuilt)?, vec![7.0, 8.0, 9.0]);

    let too_few = from_leaves(&template, vec![Value::scalar(1.0)]);
    assert!(matches!(too_few, Err(Error::Value(_))), "{too_few:?}");
    let too_many = from_leaves(&template, vec![Value::scalar(1.0); 4]);
    assert!(matches!(too_many, Err(Error::Value(_))), "{too_many:?}");
    Ok(())
}
