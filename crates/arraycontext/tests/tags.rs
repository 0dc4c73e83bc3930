use anyhow::{anyhow, Result};
use arraycontext::{Axis, AxisTaggable, DType, Error, LeafArray, Tag, TagSet, Taggable, Value};
use arraycontext_backend_cpu::{cpu_context, CpuArray};

fn cpu_leaf(value: &Value) -> Result<&CpuArray> {
    value
        .downcast_ref::<CpuArray>()
        .ok_or_else(|| anyhow!("expected a cpu array, got `{}`", value.type_name()))
}

#[test]
fn tagging_a_container_leaves_the_original_untouched() -> Result<()> {
    let ctx = cpu_context();
    let u = ctx.zeros(&[2, 3], DType::F64)?;
    let state = Value::map([("u", Value::new(u)), ("t", Value::scalar(0.5))]);
    let mesh = Tag::with_value("discretization", "dg");

    let tagged = ctx.tag(&state, [mesh.clone()])?;
    let parts = tagged
        .downcast_ref::<std::collections::BTreeMap<String, Value>>()
        .ok_or_else(|| anyhow!("tagging changed the container type"))?;
    assert!(cpu_leaf(&parts["u"])?.tags().contains(&mesh));
    assert_eq!(parts["t"].as_scalar().map(|s| s.to_f64()), Some(0.5));

    let original = state
        .downcast_ref::<std::collections::BTreeMap<String, Value>>()
        .ok_or_else(|| anyhow!("not a map"))?;
    assert!(cpu_leaf(&original["u"])?.tags().is_empty());

    let by_axis = ctx.tag_axis(&state, 1, [Tag::new("dofs")])?;
    let leaf = cpu_leaf(
        &by_axis
            .downcast_ref::<std::collections::BTreeMap<String, Value>>()
            .ok_or_else(|| anyhow!("not a map"))?["u"],
    )?;
    assert!(leaf.axes()[0].tags().is_empty());
    assert!(leaf.axes()[1].tags().contains(&Tag::new("dofs")));

    let result = ctx.tag_axis(&state, 2, [Tag::new("dofs")]);
    assert!(matches!(result, Err(Error::Index(_))), "{result:?}");
    Ok(())
}

#[test]
fn axis_metadata_is_validated() -> Result<()> {
    let ctx = cpu_context();
    let x = ctx.zeros(&[4], DType::F32)?;

    let wrong = x.with_axes(vec![Axis::default(), Axis::default()]);
    assert!(matches!(wrong, Err(Error::Value(_))));

    let elements: TagSet = [Tag::new("elements")].into_iter().collect();
    let renamed = x.with_axes(vec![Axis::new(elements.clone())])?;
    assert_eq!(renamed.axes()[0].tags(), &elements);
    assert_eq!(renamed.shape(), x.shape());

    let combined = x.with_metadata(Some(&[Axis::new(elements.clone())][..]), Tag::new("x").into())?;
    assert!(combined.tags().contains(&Tag::new("x")));
    assert_eq!(combined.axes()[0].tags(), &elements);
    Ok(())
}

#[test]
fn removing_tags_can_verify_presence() -> Result<()> {
    let ctx = cpu_context();
    let x = ctx
        .zeros(&[1], DType::I64)?
        .tagged([Tag::new("a"), Tag::new("b")]);

    let without_a = x.without_tags([Tag::new("a")], true)?;
    assert_eq!(without_a.tags().len(), 1);
    assert!(x.without_tags([Tag::new("missing")], false).is_ok());
    assert!(matches!(
        x.without_tags([Tag::new("missing")], true),
        Err(Error::Value(_))
    ));
    Ok(())
}

#[test]
fn tags_serialize_as_plain_records() -> Result<()> {
    let plain = serde_json::to_value(Tag::new("elements"))?;
    assert_eq!(plain, serde_json::json!({"name": "elements"}));

    let valued: Tag = serde_json::from_str(r#"{"name": "discretization", "value": "dg"}"#)?;
    assert_eq!(valued, Tag::with_value("discretization", "dg"));
    assert_eq!(valued.to_string(), "discretization(dg)");
    Ok(())
}
