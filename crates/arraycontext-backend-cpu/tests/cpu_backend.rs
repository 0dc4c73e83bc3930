use std::sync::Arc;

use anyhow::{anyhow, Result};
use arraycontext::{
    ArrayBackend, ArrayContext, DType, Error, HostArray, LeafArray, MemoryOrder, Value,
};
use arraycontext_backend_cpu::{
    cpu_context, CountingAllocator, CpuArray, CpuBackend, CpuBackendConfig,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn array(ctx: &ArrayContext<CpuBackend>, shape: &[usize], values: Vec<f64>) -> Result<Value> {
    Ok(Value::new(ctx.from_host(&HostArray::from_vec(shape, values)?)?))
}

fn cpu_leaf(value: &Value) -> Result<&CpuArray> {
    value
        .downcast_ref::<CpuArray>()
        .ok_or_else(|| anyhow!("expected a cpu array, got `{}`", value.type_name()))
}

#[test]
fn config_parses_from_json() -> Result<()> {
    let config: CpuBackendConfig =
        serde_json::from_str(r#"{"supports_bool": false, "functions": ["sin", "exp"]}"#)?;
    assert!(!config.supports_bool);
    assert!(config.supports_nonscalar_broadcasting);

    let ctx = ArrayContext::new(CpuBackend::with_config(config)?);
    assert_eq!(ctx.function_names(), vec!["exp", "sin"]);
    assert_eq!(ctx.capabilities().logical_dtype(), DType::I8);
    assert!(matches!(ctx.np().function("cos"), Err(Error::Attribute(_))));
    Ok(())
}

#[test]
fn unknown_function_names_are_rejected() {
    let config = CpuBackendConfig {
        functions: Some(vec!["sin".into(), "hypot".into()]),
        ..CpuBackendConfig::default()
    };
    assert!(matches!(
        CpuBackend::with_config(config),
        Err(Error::Attribute(name)) if name == "hypot"
    ));
}

#[test]
fn order_k_is_not_implemented() -> Result<()> {
    init();
    let ctx = cpu_context();
    let x = array(&ctx, &[2, 3], vec![0.0; 6])?;
    let err = ctx
        .np()
        .reshape(&x, &[6], MemoryOrder::K)
        .expect_err("order K is refused");
    assert!(err.is_not_implemented(), "{err}");
    Ok(())
}

#[test]
fn ravel_a_follows_actual_contiguity() -> Result<()> {
    init();
    let ctx = cpu_context();
    let np = ctx.np();
    let x = array(&ctx, &[2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])?;

    // A transposed matrix is Fortran-contiguous, so A reads it in F order.
    let t = np.transpose(&x, None)?;
    let layout = ctx.backend().layout(cpu_leaf(&t)?);
    assert!(!layout.c_contiguous && layout.f_contiguous);
    let flat = np.ravel(&t, MemoryOrder::A)?;
    assert_eq!(
        ctx.to_host(cpu_leaf(&flat)?)?.to_vec::<f64>(),
        vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]
    );

    let cube = array(&ctx, &[2, 3, 4], (0..24).map(f64::from).collect())?;
    let scrambled = np.transpose(&cube, Some(&[1, 0, 2][..]))?;
    let result = np.ravel(&scrambled, MemoryOrder::A);
    assert!(matches!(result, Err(Error::Value(_))), "{result:?}");
    Ok(())
}

#[test]
fn scalar_only_broadcasting_refuses_rows() -> Result<()> {
    let ctx = ArrayContext::new(CpuBackend::with_config(CpuBackendConfig {
        supports_nonscalar_broadcasting: false,
        ..CpuBackendConfig::default()
    })?);
    let np = ctx.np();
    let grid = array(&ctx, &[2, 2], vec![1.0, 2.0, 3.0, 4.0])?;
    let row = array(&ctx, &[2], vec![1.0, 1.0])?;
    let one = array(&ctx, &[1], vec![1.0])?;

    let err = np.add(&grid, &row).expect_err("row broadcast is refused");
    assert!(err.is_not_implemented(), "{err}");
    np.add(&grid, &one)?;
    np.add(&grid, &Value::scalar(1.0))?;
    Ok(())
}

#[test]
fn negative_of_bool_is_a_type_error() -> Result<()> {
    let ctx = cpu_context();
    let mask = Value::new(ctx.from_host(&HostArray::from_vec(&[2], vec![true, false])?)?);
    let result = ctx.np().negative(&mask);
    assert!(result.is_err());
    let flipped = ctx.np().logical_not(&mask)?;
    assert_eq!(
        ctx.to_host(cpu_leaf(&flipped)?)?.to_vec::<bool>(),
        vec![false, true]
    );
    Ok(())
}

#[test]
fn forks_share_the_allocator() -> Result<()> {
    init();
    let allocator = Arc::new(CountingAllocator::new());
    let backend = CpuBackend::with_allocator(CpuBackendConfig::default(), allocator.clone())?;
    let ctx = ArrayContext::new(backend);
    let forked = ctx.clone();

    ctx.zeros(&[4], DType::F64)?;
    forked.zeros(&[2], DType::I32)?;
    assert_eq!(allocator.allocations(), 2);
    assert_eq!(allocator.bytes(), 4 * 8 + 2 * 4);
    Ok(())
}

#[test]
fn allocation_budget_is_enforced() -> Result<()> {
    let allocator = Arc::new(CountingAllocator::with_limit(64));
    let ctx = ArrayContext::new(CpuBackend::with_allocator(
        CpuBackendConfig::default(),
        allocator.clone(),
    )?);

    ctx.zeros(&[8], DType::F64)?;
    let err = ctx.zeros(&[1], DType::F64).expect_err("budget exhausted");
    assert!(matches!(err, Error::Backend(_)), "{err}");
    assert_eq!(allocator.allocations(), 1);
    assert_eq!(allocator.bytes(), 64);
    Ok(())
}

#[test]
fn frozen_leaves_detach_from_the_context() -> Result<()> {
    let ctx = cpu_context();
    let x = ctx.full(&[2], DType::F32, 1.5)?;
    assert_eq!(x.context_id(), Some(ctx.id()));
    let frozen = ctx.freeze(&x)?;
    assert!(frozen.is_frozen());
    assert_eq!(frozen.data(), x.data());
    assert_eq!(ctx.thaw(&frozen)?.context_id(), Some(ctx.id()));
    Ok(())
}
