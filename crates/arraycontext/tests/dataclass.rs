use anyhow::{anyhow, Result};
use arraycontext::container::{
    decompose, is_container_type, leaves, map, register_dataclass, ContainerBuilder,
    DataclassContainer, FieldDecl, FieldKind, Key, Parts, Scalar, TypeKey,
};
use arraycontext::{ArrayContainer, Error, HostArray, Value};

fn number(value: &Value) -> f64 {
    value.as_scalar().map(Scalar::to_f64).unwrap_or(f64::NAN)
}

#[derive(Clone, Debug)]
struct Modal {
    coefficients: HostArray,
    order: u32,
}

#[derive(Clone, ArrayContainer)]
struct Wave {
    u: Value,
    #[container(union(Array, Modal))]
    v: Value,
    #[container(skip)]
    forcing: Value,
    name: String,
}

#[test]
fn derived_records_traverse_their_array_fields() -> Result<()> {
    ContainerBuilder::<Modal>::new()
        .field(
            "coefficients",
            FieldKind::Infer,
            |m: &Modal| &m.coefficients,
            |m, c| m.coefficients = c,
        )
        .field("order", FieldKind::Infer, |m: &Modal| &m.order, |m, o| m.order = o)
        .register()?;
    register_dataclass::<Wave>()?;
    assert!(is_container_type(TypeKey::of::<Wave>()));

    let modal = Modal {
        coefficients: HostArray::from_slice(&[1.0f64, 2.0]),
        order: 3,
    };
    let wave = Value::new(Wave {
        u: Value::scalar(1.0),
        v: Value::new(modal),
        forcing: Value::scalar(9.0),
        name: "pulse".into(),
    });

    let keys: Vec<Key> = decompose(&wave)?.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![Key::from("u"), Key::from("v")]);

    let found = leaves(&wave)?;
    assert_eq!(found.len(), 2);
    assert!(found[1].is::<HostArray>());

    let doubled = map(
        |leaf| {
            if let Some(host) = leaf.downcast_ref::<HostArray>() {
                let values: Vec<f64> = host.to_vec::<f64>().iter().map(|v| 2.0 * v).collect();
                return Ok(Value::new(HostArray::from_vec(host.shape(), values)?));
            }
            Ok(Value::scalar(2.0 * number(leaf)))
        },
        &wave,
    )?;
    let doubled = doubled
        .downcast_ref::<Wave>()
        .ok_or_else(|| anyhow!("map changed the record type"))?;
    assert_eq!(number(&doubled.u), 2.0);
    assert_eq!(number(&doubled.forcing), 9.0);
    assert_eq!(doubled.name, "pulse");
    let modal = doubled
        .v
        .downcast_ref::<Modal>()
        .ok_or_else(|| anyhow!("union field lost its container"))?;
    assert_eq!(modal.coefficients.to_vec::<f64>(), vec![2.0, 4.0]);
    assert_eq!(modal.order, 3);
    Ok(())
}

#[derive(Clone, ArrayContainer)]
struct MixedUnion {
    #[container(union(Array, String))]
    state: Value,
}

#[derive(Clone, ArrayContainer)]
struct MislabelledCount {
    u: Value,
    #[container(array)]
    steps: u32,
}

#[derive(Clone, ArrayContainer)]
struct Settings {
    name: String,
    #[container(skip)]
    scratch: Value,
}

#[test]
fn invalid_declarations_are_rejected() {
    let result = register_dataclass::<MixedUnion>();
    assert!(matches!(result, Err(Error::Type(_))), "{result:?}");

    let result = register_dataclass::<MislabelledCount>();
    assert!(matches!(result, Err(Error::Type(_))), "{result:?}");

    let result = register_dataclass::<Settings>();
    assert!(matches!(result, Err(Error::Value(_))), "{result:?}");
    assert!(!is_container_type(TypeKey::of::<Settings>()));
}

#[derive(Clone, ArrayContainer)]
struct MaybeState {
    u: Value,
    v: Option<Value>,
}

#[derive(Clone, ArrayContainer)]
struct MaybeSnapshot {
    u: Value,
    snapshot: Option<HostArray>,
}

#[derive(Clone, ArrayContainer)]
struct Annotated {
    u: Value,
    note: Option<String>,
    #[container(skip)]
    previous: Option<Value>,
}

#[test]
fn optional_array_fields_are_rejected() -> Result<()> {
    let result = register_dataclass::<MaybeState>();
    assert!(matches!(result, Err(Error::Type(_))), "{result:?}");
    assert!(!is_container_type(TypeKey::of::<MaybeState>()));

    let result = register_dataclass::<MaybeSnapshot>();
    assert!(matches!(result, Err(Error::Type(_))), "{result:?}");

    register_dataclass::<Annotated>()?;
    let annotated = Value::new(Annotated {
        u: Value::scalar(1.0),
        note: Some("initial".into()),
        previous: None,
    });
    let keys: Vec<Key> = decompose(&annotated)?.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![Key::from("u")]);
    Ok(())
}

#[derive(Clone)]
struct Unconstrained {
    state: Value,
}

#[derive(Clone)]
struct Checkpoint {
    u: Value,
    previous: Option<Value>,
}

#[test]
fn builder_rejects_empty_unions_and_optional_arrays() {
    let result = ContainerBuilder::<Unconstrained>::new()
        .field(
            "state",
            FieldKind::Union(Vec::new()),
            |c: &Unconstrained| &c.state,
            |c, s| c.state = s,
        )
        .register();
    assert!(matches!(result, Err(Error::Type(_))), "{result:?}");

    let result = ContainerBuilder::<Checkpoint>::new()
        .field("u", FieldKind::Infer, |c: &Checkpoint| &c.u, |c, u| c.u = u)
        .field(
            "previous",
            FieldKind::Infer,
            |c: &Checkpoint| &c.previous,
            |c, p| c.previous = p,
        )
        .register();
    assert!(matches!(result, Err(Error::Type(_))), "{result:?}");
    assert!(!is_container_type(TypeKey::of::<Checkpoint>()));
}

/// Declares `v` but never hands it out.
#[derive(Clone)]
struct Forgetful {
    u: Value,
    v: Value,
}

impl DataclassContainer for Forgetful {
    fn field_decls() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new::<Value>("u", FieldKind::Infer),
            FieldDecl::new::<Value>("v", FieldKind::Infer),
        ]
    }

    fn field_part(&self, name: &str) -> Option<Value> {
        (name == "u").then(|| self.u.clone())
    }

    fn with_parts(&self, parts: &mut Parts, _: &[&'static str]) -> arraycontext::Result<Self> {
        Ok(Forgetful {
            u: parts.take("u")?,
            v: parts.take("v")?,
        })
    }
}

#[test]
fn missing_declared_fields_fail_at_decomposition() -> Result<()> {
    register_dataclass::<Forgetful>()?;
    let value = Value::new(Forgetful {
        u: Value::scalar(1.0),
        v: Value::scalar(2.0),
    });
    let result = decompose(&value);
    assert!(matches!(result, Err(Error::Type(_))), "{result:?}");
    let result = map(|leaf| Ok(leaf.clone()), &value);
    assert!(matches!(result, Err(Error::Type(_))), "{result:?}");
    Ok(())
}

#[derive(Clone, ArrayContainer)]
struct Cell {
    density: Value,
}

#[derive(Clone, ArrayContainer)]
struct Mesh {
    cell: Cell,
    label: String,
}

#[test]
fn nested_records_need_their_members_registered_first() -> Result<()> {
    // Before `Cell` is known, `Mesh` has nothing to traverse.
    let early = register_dataclass::<Mesh>();
    assert!(matches!(early, Err(Error::Value(_))), "{early:?}");

    register_dataclass::<Cell>()?;
    register_dataclass::<Mesh>()?;

    let mesh = Value::new(Mesh {
        cell: Cell {
            density: Value::scalar(1.5),
        },
        label: "unit square".into(),
    });
    let scaled = map(|leaf| Ok(Value::scalar(number(leaf) * 4.0)), &mesh)?;
    let scaled = scaled
        .downcast_ref::<Mesh>()
        .ok_or_else(|| anyhow!("expected a Mesh"))?;
    assert_eq!(number(&scaled.cell.density), 6.0);
    assert_eq!(scaled.label, "unit square");
    Ok(())
}

#[derive(Clone)]
struct Probe {
    value: Value,
}

#[derive(Clone)]
struct Sample {
    data: HostArray,
}

#[test]
fn builder_registered_fields_are_typed() -> Result<()> {
    ContainerBuilder::<Probe>::new()
        .field("value", FieldKind::Array, |p: &Probe| &p.value, |p, v| p.value = v)
        .register()?;
    let probe = Value::new(Probe {
        value: Value::list([Value::scalar(1.0), Value::scalar(2.0)]),
    });
    let shifted = map(|leaf| Ok(Value::scalar(number(leaf) + 1.0)), &probe)?;
    assert_eq!(
        leaves(&shifted)?.iter().map(number).collect::<Vec<_>>(),
        vec![2.0, 3.0]
    );

    ContainerBuilder::<Sample>::new()
        .field("data", FieldKind::Infer, |s: &Sample| &s.data, |s, d| s.data = d)
        .register()?;
    let sample = Value::new(Sample {
        data: HostArray::from_slice(&[1i64, 2]),
    });
    let result = map(|_| Ok(Value::scalar(0.0)), &sample);
    assert!(matches!(result, Err(Error::Type(_))), "{result:?}");
    Ok(())
}
