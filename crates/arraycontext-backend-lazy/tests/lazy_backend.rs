use anyhow::{anyhow, Result};
use approx::assert_relative_eq;
use arraycontext::ops::BinaryOp;
use arraycontext::{
    ArrayBackend, ArrayContext, DType, Error, HostArray, LeafArray, MemoryOrder, Value,
};
use arraycontext_backend_lazy::{lazy_context, LazyArray, LazyBackend, LazyBackendConfig};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn deferred() -> ArrayContext<LazyBackend> {
    let backend = LazyBackend::with_config(LazyBackendConfig {
        eager: false,
        functions: None,
    })
    .expect("default function table");
    ArrayContext::new(backend)
}

fn array(ctx: &ArrayContext<LazyBackend>, shape: &[usize], values: Vec<f64>) -> Result<Value> {
    Ok(Value::new(ctx.from_host(&HostArray::from_vec(shape, values)?)?))
}

fn lazy_leaf(value: &Value) -> Result<&LazyArray> {
    value
        .downcast_ref::<LazyArray>()
        .ok_or_else(|| anyhow!("expected a lazy array, got `{}`", value.type_name()))
}

#[test]
fn freeze_is_the_evaluation_barrier() -> Result<()> {
    init();
    let ctx = deferred();
    let np = ctx.np();
    let x = array(&ctx, &[3], vec![1.0, 2.0, 3.0])?;

    let y = np.exp(&np.multiply(&x, &Value::scalar(2.0))?)?;
    let total = np.sum(&y, None)?;
    assert!(!lazy_leaf(&total)?.is_evaluated());
    assert_eq!(lazy_leaf(&total)?.shape(), &[] as &[usize]);
    assert_eq!(ctx.backend().stats().evaluations(), 0);

    let frozen = ctx.freeze_value(&total)?;
    assert!(lazy_leaf(&frozen)?.is_evaluated());
    assert_eq!(ctx.backend().stats().flushes(), 1);
    // full(2.0), multiply, exp, sum
    assert_eq!(ctx.backend().stats().evaluations(), 4);

    let host = ctx.to_host(lazy_leaf(&frozen)?)?;
    let expected: f64 = [2.0f64, 4.0, 6.0].iter().map(|v| v.exp()).sum();
    assert_relative_eq!(host.item::<f64>()?, expected, max_relative = 1e-12);
    assert_eq!(ctx.backend().stats().flushes(), 1);
    Ok(())
}

#[test]
fn shared_subexpressions_evaluate_once() -> Result<()> {
    init();
    let ctx = deferred();
    let np = ctx.np();
    let x = array(&ctx, &[2], vec![0.5, 1.5])?;
    let shared = np.sin(&x)?;
    let a = np.add(&shared, &shared)?;
    let b = np.multiply(&shared, &shared)?;

    ctx.to_host(lazy_leaf(&a)?)?;
    assert_eq!(ctx.backend().stats().evaluations(), 2);
    ctx.to_host(lazy_leaf(&b)?)?;
    assert_eq!(ctx.backend().stats().evaluations(), 3);
    assert!(lazy_leaf(&shared)?.is_evaluated());
    Ok(())
}

#[test]
fn eager_mode_evaluates_on_record() -> Result<()> {
    let config: LazyBackendConfig = serde_json::from_str(r#"{"eager": true}"#)?;
    assert!(config.eager);
    assert_eq!(config.functions, None);
    let ctx = ArrayContext::new(LazyBackend::with_config(config)?);
    let x = array(&ctx, &[2], vec![1.0, 4.0])?;

    let root = ctx.np().sqrt(&x)?;
    assert!(lazy_leaf(&root)?.is_evaluated());
    assert_eq!(ctx.backend().stats().evaluations(), 1);
    assert_eq!(
        ctx.to_host(lazy_leaf(&root)?)?.to_vec::<f64>(),
        vec![1.0, 2.0]
    );
    assert_eq!(ctx.backend().stats().flushes(), 0);
    Ok(())
}

fn step_many(ctx: &ArrayContext<LazyBackend>, steps: usize) -> Result<Value> {
    let np = ctx.np();
    let mut u = array(ctx, &[4], vec![0.0; 4])?;
    for _ in 0..steps {
        u = np.add(&u, &Value::scalar(1.0))?;
    }
    Ok(u)
}

#[test]
fn long_time_stepping_chains_flush_and_drop() -> Result<()> {
    init();
    const STEPS: usize = 200_000;

    let ctx = deferred();
    let u = step_many(&ctx, STEPS)?;
    assert!(!lazy_leaf(&u)?.is_evaluated());
    let host = ctx.to_host(lazy_leaf(&u)?)?;
    assert_eq!(host.to_vec::<f64>(), vec![STEPS as f64; 4]);
    assert_eq!(lazy_leaf(&u)?.node().pending(), 0);
    drop(u);

    let unevaluated = step_many(&ctx, STEPS)?;
    drop(unevaluated);

    let eager = ArrayContext::new(LazyBackend::with_config(LazyBackendConfig {
        eager: true,
        functions: None,
    })?);
    let u = step_many(&eager, STEPS)?;
    assert_eq!(
        eager.to_host(lazy_leaf(&u)?)?.to_vec::<f64>(),
        vec![STEPS as f64; 4]
    );
    drop(u);
    Ok(())
}

#[test]
fn truth_values_are_stored_as_int8() -> Result<()> {
    let ctx = lazy_context();
    assert!(!ctx.capabilities().supports_bool);

    let mask = ctx.from_host(&HostArray::from_vec(&[2], vec![true, false])?)?;
    assert_eq!(mask.dtype(), DType::I8);
    assert_eq!(ctx.zeros(&[1], DType::Bool)?.dtype(), DType::I8);

    let x = array(&ctx, &[2], vec![1.0, 2.0])?;
    let cmp = ctx.np().greater(&x, &Value::scalar(1.0))?;
    assert_eq!(lazy_leaf(&cmp)?.dtype(), DType::I8);
    assert_eq!(ctx.to_host(lazy_leaf(&cmp)?)?.to_vec::<i8>(), vec![0, 1]);
    Ok(())
}

#[test]
fn order_k_reads_row_major() -> Result<()> {
    let ctx = deferred();
    let np = ctx.np();
    let x = array(&ctx, &[2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])?;
    let t = np.transpose(&x, None)?;

    let k = np.ravel(&t, MemoryOrder::K)?;
    assert_eq!(
        ctx.to_host(lazy_leaf(&k)?)?.to_vec::<f64>(),
        vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]
    );
    let a = np.ravel(&t, MemoryOrder::A)?;
    assert_eq!(
        ctx.to_host(lazy_leaf(&a)?)?.to_vec::<f64>(),
        vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]
    );
    Ok(())
}

#[test]
fn declared_function_subset_limits_lookup() -> Result<()> {
    let ctx = deferred();
    assert!(ctx.np().function("exp").is_ok());
    assert!(matches!(ctx.np().function("isnan"), Err(Error::Attribute(_))));
    // Direct namespace calls are not limited by the lookup table.
    let x = array(&ctx, &[1], vec![f64::NAN])?;
    let nan = ctx.np().isnan(&x)?;
    assert_eq!(ctx.to_host(lazy_leaf(&nan)?)?.to_vec::<i8>(), vec![1]);
    Ok(())
}

#[test]
fn incompatible_shapes_fail_while_recording() -> Result<()> {
    let ctx = deferred();
    let x = ctx.from_host(&HostArray::from_vec(&[3], vec![1.0, 2.0, 3.0])?)?;
    let y = ctx.from_host(&HostArray::from_vec(&[2], vec![1.0, 2.0])?)?;
    let err = ctx
        .backend()
        .binary(BinaryOp::Add, &x, &y)
        .expect_err("incompatible shapes are refused while recording");
    assert!(err.to_string().contains("broadcast"), "{err}");
    Ok(())
}
