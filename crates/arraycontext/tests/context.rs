use anyhow::{anyhow, Result};
use approx::assert_relative_eq;
use arraycontext::{ArrayContext, DType, Error, HostArray, LeafArray, Value};
use arraycontext_backend_cpu::{cpu_context, CpuArray, CpuBackend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn cpu_leaf(value: &Value) -> Result<&CpuArray> {
    value
        .downcast_ref::<CpuArray>()
        .ok_or_else(|| anyhow!("expected a cpu array, got `{}`", value.type_name()))
}

fn random_host(rng: &mut StdRng, len: usize) -> Result<HostArray> {
    let values: Vec<f64> = (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Ok(HostArray::from_vec(&[len], values)?)
}

#[test]
fn leaves_are_bound_to_their_context() -> Result<()> {
    init();
    let ctx = cpu_context();
    let other: ArrayContext<CpuBackend> = ctx.clone();
    assert_ne!(ctx.id(), other.id());

    let x = Value::new(ctx.from_host(&HostArray::from_slice(&[1.0f64, 2.0]))?);
    let y = Value::new(other.from_host(&HostArray::from_slice(&[3.0f64, 4.0]))?);

    let mixed = ctx.np().add(&x, &y);
    assert!(matches!(mixed, Err(Error::Type(_))), "{mixed:?}");
    assert!(matches!(
        other.to_host(cpu_leaf(&x)?),
        Err(Error::Type(_))
    ));
    assert!(matches!(other.freeze(cpu_leaf(&x)?), Err(Error::Type(_))));
    assert!(matches!(other.thaw(cpu_leaf(&x)?), Err(Error::Type(_))));

    // Freezing detaches, thawing rebinds to whichever context asks.
    let frozen = ctx.freeze(cpu_leaf(&x)?)?;
    assert!(frozen.is_frozen());
    let moved = Value::new(other.thaw(&frozen)?);
    let sum = other.np().add(&moved, &y)?;
    assert_eq!(
        other.to_host(cpu_leaf(&sum)?)?.to_vec::<f64>(),
        vec![4.0, 6.0]
    );

    let frozen_value = Value::new(frozen);
    let result = ctx.np().add(&frozen_value, &x);
    assert!(matches!(result, Err(Error::Type(_))), "{result:?}");
    Ok(())
}

#[test]
fn host_values_move_through_containers() -> Result<()> {
    init();
    let ctx = cpu_context();
    let mut rng = StdRng::seed_from_u64(17);
    let a = random_host(&mut rng, 5)?;
    let b = random_host(&mut rng, 3)?;
    let state = Value::map([
        ("a", Value::new(a.clone())),
        ("rest", Value::list([Value::new(b.clone()), Value::scalar(2)])),
    ]);

    let device = ctx.from_host_value(&state)?;
    let back = ctx.to_host_value(&device)?;
    let leaves = arraycontext::container::leaves(&back)?;
    let first = leaves[0]
        .downcast_ref::<HostArray>()
        .ok_or_else(|| anyhow!("expected a host array"))?;
    for (got, want) in first.to_vec::<f64>().iter().zip(a.to_vec::<f64>()) {
        assert_relative_eq!(*got, want);
    }
    assert_eq!(leaves[1].downcast_ref::<HostArray>(), Some(&b));
    assert_eq!(leaves[2].as_scalar().map(|s| s.to_f64()), Some(2.0));

    let wrong = ctx.from_host_value(&Value::list([Value::new("not an array".to_string())]));
    assert!(matches!(wrong, Err(Error::Type(_))), "{wrong:?}");
    let already_on_device = ctx.from_host_value(&device);
    assert!(matches!(already_on_device, Err(Error::Type(_))));
    Ok(())
}

#[test]
fn named_functions_follow_the_backend_table() -> Result<()> {
    let ctx = cpu_context();
    let names = ctx.function_names();
    assert!(names.windows(2).all(|w| w[0] < w[1]));
    assert!(names.contains(&"sin") && names.contains(&"log10"));

    let x = Value::new(ctx.from_host(&HostArray::from_slice(&[100.0f64]))?);
    let log10 = ctx.np().function("log10")?;
    let result = log10.call(&x)?;
    assert_relative_eq!(ctx.to_host(cpu_leaf(&result)?)?.item::<f64>()?, 2.0);

    let missing = ctx.np().function("no_such_function");
    assert!(matches!(missing, Err(Error::Attribute(ref name)) if name == "no_such_function"));
    Ok(())
}

#[test]
fn construction_respects_dtype_and_shape() -> Result<()> {
    let ctx = cpu_context();
    let x = ctx.full(&[2, 2], DType::I32, 7)?;
    assert_eq!(x.shape(), &[2, 2]);
    assert_eq!(x.dtype(), DType::I32);
    assert_eq!(ctx.to_host(&x)?.to_vec::<i32>(), vec![7; 4]);

    let e = ctx.empty(&[0, 3], DType::F32)?;
    assert_eq!(e.shape(), &[0, 3]);
    assert_eq!(ctx.zeros(&[], DType::F64)?.shape(), &[] as &[usize]);
    assert!(ctx.capabilities().supports_bool);
    assert!(!ctx.permits_inplace_modification());
    Ok(())
}
