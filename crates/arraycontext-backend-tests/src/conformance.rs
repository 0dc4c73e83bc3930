//! Behavior every backend must reproduce through [`ArrayContext`].

use std::sync::OnceLock;

use anyhow::{anyhow, ensure, Result};
use approx::assert_abs_diff_eq;
use arraycontext::container::{leaves, register_dataclass};
use arraycontext::{
    ArrayBackend, ArrayContainer, ArrayContext, AxisTaggable, DType, Error, HostArray, LeafArray,
    MemoryOrder, NormOrd, Scalar, Tag, Taggable, Value,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Record container exercised by the suite.
#[derive(Clone, Debug, ArrayContainer)]
pub struct Fields {
    pub u: Value,
    pub v: Value,
    pub label: String,
    #[container(skip)]
    pub step: u32,
}

fn register_fields() -> Result<()> {
    static REGISTERED: OnceLock<Result<(), String>> = OnceLock::new();
    REGISTERED
        .get_or_init(|| {
            log::debug!("registering conformance record `Fields`");
            register_dataclass::<Fields>().map_err(|err| err.to_string())
        })
        .clone()
        .map_err(|reason| anyhow!("registering Fields failed: {reason}"))
}

fn array<B: ArrayBackend>(ctx: &ArrayContext<B>, shape: &[usize], values: Vec<f64>) -> Result<Value> {
    let host = HostArray::from_vec(shape, values)?;
    Ok(Value::new(ctx.from_host(&host)?))
}

fn leaf<B: ArrayBackend>(value: &Value) -> Result<&B::Array> {
    value
        .downcast_ref::<B::Array>()
        .ok_or_else(|| anyhow!("expected a backend array, got `{}`", value.type_name()))
}

fn host_values<B: ArrayBackend>(ctx: &ArrayContext<B>, value: &Value) -> Result<Vec<f64>> {
    Ok(ctx.to_host(leaf::<B>(value)?)?.to_vec::<f64>())
}

fn truth<B: ArrayBackend>(ctx: &ArrayContext<B>, value: &Value) -> Result<bool> {
    Ok(ctx.to_host(leaf::<B>(value)?)?.item::<bool>()?)
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert_abs_diff_eq!(*a, *e, epsilon = 1e-12);
    }
}

pub fn host_round_trip_through_containers<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let a: Vec<f64> = (0..6).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let b: Vec<f64> = (0..4).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let host = Value::map([
        ("a", Value::new(HostArray::from_vec(&[2, 3], a.clone())?)),
        (
            "b",
            Value::list([
                Value::new(HostArray::from_vec(&[4], b.clone())?),
                Value::scalar(2.5),
            ]),
        ),
    ]);

    let device = ctx.from_host_value(&host)?;
    let device_leaves = leaves(&device)?;
    ensure!(device_leaves[0].is::<B::Array>());
    assert_eq!(leaf::<B>(&device_leaves[0])?.shape(), &[2, 3]);

    let back = leaves(&ctx.to_host_value(&device)?)?;
    assert_eq!(back.len(), 3);
    let first = back[0]
        .downcast_ref::<HostArray>()
        .ok_or_else(|| anyhow!("expected a host array"))?;
    assert_eq!(first.shape(), &[2, 3]);
    assert_close(&first.to_vec::<f64>(), &a);
    let second = back[1]
        .downcast_ref::<HostArray>()
        .ok_or_else(|| anyhow!("expected a host array"))?;
    assert_close(&second.to_vec::<f64>(), &b);
    assert_eq!(back[2].as_scalar().map(Scalar::to_f64), Some(2.5));
    Ok(())
}

pub fn elementwise_ops_over_containers<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let x = Value::list([
        array(ctx, &[3], vec![1.0, 2.0, 3.0])?,
        array(ctx, &[2, 2], vec![1.0, 4.0, 9.0, 16.0])?,
    ]);
    let y = Value::list([
        array(ctx, &[3], vec![10.0, 20.0, 30.0])?,
        array(ctx, &[2, 2], vec![0.5, 0.5, 0.5, 0.5])?,
    ]);

    let sum = leaves(&np.add(&x, &y)?)?;
    assert_close(&host_values(ctx, &sum[0])?, &[11.0, 22.0, 33.0]);
    assert_close(&host_values(ctx, &sum[1])?, &[1.5, 4.5, 9.5, 16.5]);

    let doubled = leaves(&np.multiply(&x, &Value::scalar(2.0))?)?;
    assert_close(&host_values(ctx, &doubled[0])?, &[2.0, 4.0, 6.0]);

    let roots = leaves(&np.sqrt(&x)?)?;
    assert_close(&host_values(ctx, &roots[1])?, &[1.0, 2.0, 3.0, 4.0]);

    let row = array(ctx, &[1, 2], vec![1.0, -1.0])?;
    let broadcast = np.subtract(&leaves(&x)?[1], &row)?;
    assert_close(&host_values(ctx, &broadcast)?, &[0.0, 5.0, 8.0, 17.0]);
    Ok(())
}

pub fn scalars_are_weakly_typed<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let ints = Value::new(ctx.from_host(&HostArray::from_vec(&[3], vec![1i32, 2, 3])?)?);

    let shifted = np.add(&ints, &Value::scalar(1i64))?;
    assert_eq!(leaf::<B>(&shifted)?.dtype(), DType::I32);

    let scaled = np.multiply(&ints, &Value::scalar(0.5))?;
    assert_eq!(leaf::<B>(&scaled)?.dtype(), DType::F64);
    assert_close(&host_values(ctx, &scaled)?, &[0.5, 1.0, 1.5]);

    let both = np.add(&Value::scalar(2i64), &Value::scalar(3i64))?;
    assert_eq!(both.as_scalar().map(Scalar::to_f64), Some(5.0));
    Ok(())
}

pub fn comparisons_use_logical_dtype<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let x = array(ctx, &[4], vec![1.0, 5.0, 3.0, 7.0])?;
    let y = array(ctx, &[4], vec![2.0, 4.0, 3.0, 8.0])?;

    let less = np.less(&x, &y)?;
    assert_eq!(leaf::<B>(&less)?.dtype(), ctx.capabilities().logical_dtype());
    let host = ctx.to_host(leaf::<B>(&less)?)?;
    assert_eq!(host.to_vec::<bool>(), vec![true, false, false, true]);

    let equal = np.equal(&x, &Value::scalar(3.0))?;
    assert_eq!(
        ctx.to_host(leaf::<B>(&equal)?)?.to_vec::<bool>(),
        vec![false, false, true, false]
    );
    Ok(())
}

pub fn where_selects_elementwise<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let x = array(ctx, &[2, 2], vec![1.0, 2.0, 3.0, 4.0])?;
    let mask = np.greater(&x, &Value::scalar(1.5))?;
    let picked = np.r#where(&mask, &x, &Value::scalar(0.0))?;
    assert_close(&host_values(ctx, &picked)?, &[0.0, 2.0, 3.0, 4.0]);
    assert_eq!(leaf::<B>(&picked)?.shape(), &[2, 2]);
    Ok(())
}

pub fn reductions_fold_across_containers<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let x = Value::list([
        array(ctx, &[3], vec![1.0, 2.0, 3.0])?,
        array(ctx, &[2, 2], vec![4.0, 5.0, 6.0, 7.0])?,
    ]);

    assert_close(&host_values(ctx, &np.sum(&x, None)?)?, &[28.0]);
    assert_close(&host_values(ctx, &np.max(&x, None)?)?, &[7.0]);
    assert_close(&host_values(ctx, &np.min(&x, None)?)?, &[1.0]);
    assert!(truth(ctx, &np.any(&np.greater(&x, &Value::scalar(6.5))?)?)?);
    assert!(!truth(ctx, &np.all(&np.greater(&x, &Value::scalar(1.5))?)?)?);

    let grid = array(ctx, &[2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])?;
    let columns = np.sum(&grid, Some(&[0][..]))?;
    assert_eq!(leaf::<B>(&columns)?.shape(), &[3]);
    assert_close(&host_values(ctx, &columns)?, &[3.0, 5.0, 7.0]);
    let rows = np.max(&grid, Some(&[-1][..]))?;
    assert_close(&host_values(ctx, &rows)?, &[2.0, 5.0]);

    let out_of_range = np.sum(&grid, Some(&[2][..]));
    assert!(matches!(out_of_range, Err(Error::Index(_))), "{out_of_range:?}");
    Ok(())
}

pub fn reduction_without_identity_rejects_empty<B: ArrayBackend>(
    ctx: &ArrayContext<B>,
) -> Result<()> {
    let empty = array(ctx, &[0], Vec::new())?;
    let result = ctx.np().max(&empty, None);
    assert!(matches!(result, Err(Error::Value(_))), "{result:?}");

    let total = ctx.np().sum(&empty, None)?;
    assert_close(&host_values(ctx, &total)?, &[0.0]);
    Ok(())
}

pub fn vdot_and_norms<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let x = Value::list([array(ctx, &[2], vec![3.0, -4.0])?]);
    assert_close(&host_values(ctx, &np.vdot(&x, &x)?)?, &[25.0]);
    assert_close(&host_values(ctx, &np.linalg_norm(&x, NormOrd::Two)?)?, &[5.0]);
    assert_close(&host_values(ctx, &np.linalg_norm(&x, NormOrd::Inf)?)?, &[4.0]);

    let split = Value::list([
        array(ctx, &[2], vec![1.0, 2.0])?,
        array(ctx, &[1], vec![-2.0])?,
    ]);
    assert_close(&host_values(ctx, &np.linalg_norm(&split, NormOrd::Two)?)?, &[3.0]);

    let short = array(ctx, &[1], vec![1.0])?;
    let result = np.vdot(&array(ctx, &[2], vec![1.0, 2.0])?, &short);
    assert!(matches!(result, Err(Error::Value(_))), "{result:?}");
    Ok(())
}

pub fn array_equal_semantics<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let a = Value::list([
        array(ctx, &[3], vec![1.0, 2.0, 3.0])?,
        array(ctx, &[2], vec![4.0, 5.0])?,
    ]);
    let b = Value::list([
        array(ctx, &[3], vec![1.0, 2.0, 3.0])?,
        array(ctx, &[2], vec![4.0, 5.0])?,
    ]);
    assert!(np.array_equal_host(&a, &b)?);

    let tagged = ctx.tag(&b, [Tag::new("ignored-by-equality")])?;
    assert!(np.array_equal_host(&a, &tagged)?);

    let changed = Value::list([
        array(ctx, &[3], vec![1.0, 2.0, 3.0])?,
        array(ctx, &[2], vec![4.0, 6.0])?,
    ]);
    assert!(!np.array_equal_host(&a, &changed)?);

    let reshaped = Value::list([
        array(ctx, &[3], vec![1.0, 2.0, 3.0])?,
        array(ctx, &[1, 2], vec![4.0, 5.0])?,
    ]);
    assert!(!np.array_equal_host(&a, &reshaped)?);

    let other_type = Value::map([("0", array(ctx, &[3], vec![1.0, 2.0, 3.0])?)]);
    let sentinel = np.array_equal(&a, &other_type)?;
    assert_eq!(leaf::<B>(&sentinel)?.dtype(), DType::I8);
    assert_eq!(leaf::<B>(&sentinel)?.ndim(), 0);
    assert!(!truth(ctx, &sentinel)?);
    Ok(())
}

pub fn reshape_orders<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let x = array(ctx, &[2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])?;

    let c = np.reshape(&x, &[3, -1], MemoryOrder::C)?;
    assert_eq!(leaf::<B>(&c)?.shape(), &[3, 2]);
    assert_close(&host_values(ctx, &c)?, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

    let f = np.reshape(&x, &[3, 2], MemoryOrder::F)?;
    assert_close(&host_values(ctx, &f)?, &[0.0, 4.0, 3.0, 2.0, 1.0, 5.0]);

    let flat = np.ravel(&x, MemoryOrder::A)?;
    assert_eq!(leaf::<B>(&flat)?.shape(), &[6]);
    assert_close(&host_values(ctx, &flat)?, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

    let bad = np.reshape(&x, &[4, -1], MemoryOrder::C);
    assert!(matches!(bad, Err(Error::Value(_))), "{bad:?}");
    Ok(())
}

pub fn transpose_and_joins<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let x = array(ctx, &[2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])?;

    let t = np.transpose(&x, None)?;
    assert_eq!(leaf::<B>(&t)?.shape(), &[3, 2]);
    assert_close(&host_values(ctx, &t)?, &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);

    let rows = np.concatenate(&[x.clone(), x.clone()], 0)?;
    assert_eq!(leaf::<B>(&rows)?.shape(), &[4, 3]);
    let cols = np.concatenate(&[x.clone(), x.clone()], -1)?;
    assert_eq!(leaf::<B>(&cols)?.shape(), &[2, 6]);
    assert_close(
        &host_values(ctx, &cols)?,
        &[0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 3.0, 4.0, 5.0],
    );

    let stacked = np.stack(&[x.clone(), x.clone()], 0)?;
    assert_eq!(leaf::<B>(&stacked)?.shape(), &[2, 2, 3]);

    let lists = [
        Value::list([array(ctx, &[1], vec![1.0])?]),
        Value::list([array(ctx, &[2], vec![2.0, 3.0])?]),
    ];
    let joined = leaves(&np.concatenate(&lists, 0)?)?;
    assert_close(&host_values(ctx, &joined[0])?, &[1.0, 2.0, 3.0]);

    let empty = np.concatenate(&[], 0);
    assert!(matches!(empty, Err(Error::Value(_))), "{empty:?}");
    Ok(())
}

pub fn broadcast_and_like<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let x = array(ctx, &[3], vec![1.0, 2.0, 3.0])?;

    let wide = np.broadcast_to(&x, &[2, 3])?;
    assert_eq!(leaf::<B>(&wide)?.shape(), &[2, 3]);
    assert_close(&host_values(ctx, &wide)?, &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    let bad = np.broadcast_to(&x, &[2, 2]);
    assert!(bad.is_err());

    let container = Value::list([x.clone(), Value::scalar(4.0)]);
    let zeros = leaves(&np.zeros_like(&container)?)?;
    assert_close(&host_values(ctx, &zeros[0])?, &[0.0, 0.0, 0.0]);
    assert_eq!(leaf::<B>(&zeros[0])?.dtype(), DType::F64);
    assert_eq!(zeros[1].as_scalar().map(Scalar::to_f64), Some(0.0));
    let ones = leaves(&np.ones_like(&container)?)?;
    assert_close(&host_values(ctx, &ones[0])?, &[1.0, 1.0, 1.0]);
    Ok(())
}

pub fn freeze_thaw_round_trip<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let tag = Tag::with_value("role", "velocity");
    let x = ctx.tag(&Value::list([array(ctx, &[2], vec![1.0, 2.0])?]), [tag.clone()])?;
    let y = np.multiply(&x, &Value::scalar(3.0))?;

    let frozen = ctx.freeze_value(&y)?;
    let frozen_leaf = leaves(&frozen)?.remove(0);
    assert!(leaf::<B>(&frozen_leaf)?.is_frozen());
    assert_close(&host_values(ctx, &frozen_leaf)?, &[3.0, 6.0]);

    let computed = np.add(&frozen, &frozen);
    assert!(matches!(computed, Err(Error::Type(_))), "{computed:?}");

    let tagged_frozen = ctx.freeze_value(&x)?;
    assert!(leaf::<B>(&leaves(&tagged_frozen)?[0])?.tags().contains(&tag));

    let thawed = ctx.thaw_value(&tagged_frozen)?;
    let thawed_leaf = leaves(&thawed)?.remove(0);
    assert_eq!(leaf::<B>(&thawed_leaf)?.context_id(), Some(ctx.id()));
    assert!(leaf::<B>(&thawed_leaf)?.tags().contains(&tag));
    assert_close(&host_values(ctx, &np.add(&thawed_leaf, &thawed_leaf)?)?, &[2.0, 4.0]);

    let refrozen = ctx.freeze_value(&tagged_frozen)?;
    assert!(leaf::<B>(&leaves(&refrozen)?[0])?.is_frozen());
    Ok(())
}

pub fn forked_context_rejects_foreign_leaves<B: ArrayBackend>(
    ctx: &ArrayContext<B>,
) -> Result<()> {
    let other = ctx.clone();
    assert_ne!(other.id(), ctx.id());
    assert_eq!(other.backend().backend_name(), ctx.backend().backend_name());
    assert_eq!(other.function_names(), ctx.function_names());

    let x = array(ctx, &[2], vec![1.0, 2.0])?;
    let result = other.np().add(&x, &x);
    assert!(matches!(result, Err(Error::Type(_))), "{result:?}");
    let thawed = other.thaw(leaf::<B>(&x)?);
    assert!(matches!(thawed, Err(Error::Type(_))), "{thawed:?}");
    assert!(other.to_host(leaf::<B>(&x)?).is_err());

    let frozen = ctx.freeze(leaf::<B>(&x)?)?;
    let moved = Value::new(other.thaw(&frozen)?);
    assert_close(&host_values(&other, &other.np().add(&moved, &moved)?)?, &[2.0, 4.0]);
    Ok(())
}

pub fn named_functions_resolve<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let np = ctx.np();
    let names = ctx.function_names();
    ensure!(!names.is_empty());
    for name in &names {
        assert_eq!(np.function(name)?.name(), *name);
    }

    let sin = np.function("sin")?;
    let x = array(ctx, &[2], vec![0.0, std::f64::consts::FRAC_PI_2])?;
    assert_close(&host_values(ctx, &sin.call(&x)?)?, &[0.0, 1.0]);

    let missing = np.function("fft");
    assert!(matches!(missing, Err(Error::Attribute(ref name)) if name == "fft"));
    Ok(())
}

pub fn record_containers_through_namespace<B: ArrayBackend>(
    ctx: &ArrayContext<B>,
) -> Result<()> {
    register_fields()?;
    let np = ctx.np();
    let state = Value::new(Fields {
        u: array(ctx, &[3], vec![1.0, 2.0, 3.0])?,
        v: Value::list([array(ctx, &[2], vec![-1.0, 1.0])?, Value::scalar(0.5)]),
        label: "state".to_string(),
        step: 4,
    });

    let squared = np.multiply(&state, &state)?;
    let fields = squared
        .downcast_ref::<Fields>()
        .ok_or_else(|| anyhow!("multiply lost the record type"))?;
    assert_eq!(fields.label, "state");
    assert_eq!(fields.step, 4);
    assert_close(&host_values(ctx, &fields.u)?, &[1.0, 4.0, 9.0]);
    let v = leaves(&fields.v)?;
    assert_close(&host_values(ctx, &v[0])?, &[1.0, 1.0]);
    assert_eq!(v[1].as_scalar().map(Scalar::to_f64), Some(0.25));

    assert_close(&host_values(ctx, &np.sum(&state, None)?)?, &[6.5]);
    assert!(np.array_equal_host(&state, &state)?);
    Ok(())
}

pub fn axis_tags_survive_freeze<B: ArrayBackend>(ctx: &ArrayContext<B>) -> Result<()> {
    let dof = Tag::new("dof");
    let x = array(ctx, &[2, 3], vec![0.0; 6])?;

    let tagged = ctx.tag_axis(&x, 1, [dof.clone()])?;
    let axes = leaf::<B>(&tagged)?.axes();
    assert!(axes[1].tags().contains(&dof));
    assert!(axes[0].tags().is_empty());
    assert!(leaf::<B>(&x)?.axes()[1].tags().is_empty());

    let frozen = ctx.freeze_value(&tagged)?;
    assert!(leaf::<B>(&frozen)?.axes()[1].tags().contains(&dof));

    let out_of_range = ctx.tag_axis(&x, 2, [dof]);
    assert!(matches!(out_of_range, Err(Error::Index(_))), "{out_of_range:?}");
    Ok(())
}
