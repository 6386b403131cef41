use std::collections::BTreeMap;

use anyhow::Result;
use candle_core::{backprop::GradStore, DType, Device, Module, Tensor};
use candle_nn::{linear, VarBuilder, VarMap};
use grad_norm::{grad_norm, GradNormConfig, GradNormError, GradNormTracker, NamedParameters};

fn train_step(varmap: &VarMap, use_head: bool) -> Result<GradStore> {
    let device = Device::Cpu;
    let vb = VarBuilder::from_varmap(varmap, DType::F32, &device);
    let body = linear(4, 3, vb.pp("body"))?;
    let head = linear(3, 2, vb.pp("head"))?;

    let input = Tensor::new(&[[0.5f32, -1.0, 2.0, 0.25], [1.5, 0.0, -0.5, 1.0]], &device)?;
    let hidden = body.forward(&input)?;
    let loss = if use_head {
        head.forward(&hidden)?.sqr()?.mean_all()?
    } else {
        hidden.sqr()?.mean_all()?
    };
    Ok(loss.backward()?)
}

#[test]
fn reports_every_parameter_of_a_varmap() -> Result<()> {
    let varmap = VarMap::new();
    let grads = train_step(&varmap, true)?;

    let report = grad_norm(&varmap, &grads, 2)?;
    let labels = report.iter().map(|(label, _)| label).collect::<Vec<_>>();
    assert_eq!(
        labels,
        vec![
            "grad_2.0_norm_body.bias",
            "grad_2.0_norm_body.weight",
            "grad_2.0_norm_head.bias",
            "grad_2.0_norm_head.weight",
            "grad_2.0_norm_total",
        ]
    );
    for (_, value) in report.iter() {
        assert!(value >= 0.0);
    }
    Ok(())
}

#[test]
fn two_norm_total_matches_global_gradient_norm() -> Result<()> {
    let varmap = VarMap::new();
    let grads = train_step(&varmap, true)?;

    let mut sum_squares = 0.0f64;
    for (_, tensor) in varmap.named_parameters() {
        if let Some(grad) = grads.get(&tensor) {
            sum_squares += grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let global = sum_squares.sqrt();

    let report = grad_norm(&varmap, &grads, 2.0)?;
    let total = report.total().expect("total entry");
    assert!((total - global).abs() <= 1e-4, "{total} vs {global}");
    Ok(())
}

#[test]
fn unused_parameters_are_left_out() -> Result<()> {
    let varmap = VarMap::new();
    let grads = train_step(&varmap, false)?;

    let report = grad_norm(&varmap, &grads, "inf")?;
    assert_eq!(report.len(), 3);
    assert!(report.parameter("body.weight").is_some());
    assert!(report.parameter("head.weight").is_none());
    assert!(report.parameter("head.bias").is_none());
    Ok(())
}

#[test]
fn repeated_calls_are_identical() -> Result<()> {
    let varmap = VarMap::new();
    let grads = train_step(&varmap, true)?;

    let first = grad_norm(&varmap, &grads, 1.5)?;
    let second = grad_norm(&varmap, &grads, 1.5)?;
    assert_eq!(first, second);

    let as_map: BTreeMap<String, f64> = first.into();
    assert_eq!(as_map.len(), 5);
    assert!(as_map.contains_key("grad_1.5_norm_total"));
    Ok(())
}

#[test]
fn gradients_are_not_modified() -> Result<()> {
    let varmap = VarMap::new();
    let grads = train_step(&varmap, true)?;
    let before = snapshot(&varmap, &grads)?;

    grad_norm(&varmap, &grads, 2)?;
    grad_norm(&varmap, &grads, "inf")?;

    assert_eq!(before, snapshot(&varmap, &grads)?);
    Ok(())
}

#[test]
fn unparseable_order_is_an_error() -> Result<()> {
    let varmap = VarMap::new();
    let grads = train_step(&varmap, true)?;

    let err = grad_norm(&varmap, &grads, "nuclear").unwrap_err();
    assert!(matches!(err, GradNormError::InvalidNormOrder(_)));
    Ok(())
}

#[test]
fn tracker_follows_config() -> Result<()> {
    let varmap = VarMap::new();
    let grads = train_step(&varmap, true)?;
    let config = GradNormConfig {
        log_every_n_steps: 5,
        enable_stdout: false,
        track_history: true,
        ..GradNormConfig::default()
    };
    let mut tracker = GradNormTracker::new(&config)?;

    let mut tracked = Vec::new();
    for step in 0..12 {
        if tracker.track(step, &varmap, &grads)?.is_some() {
            tracked.push(step);
        }
    }
    assert_eq!(tracked, vec![0, 5, 10]);
    assert_eq!(tracker.history().len(), 3);
    Ok(())
}

fn snapshot(varmap: &VarMap, grads: &GradStore) -> Result<Vec<Vec<f32>>> {
    let mut values = Vec::new();
    for (_, tensor) in varmap.named_parameters() {
        if let Some(grad) = grads.get(&tensor) {
            values.push(grad.flatten_all()?.to_vec1::<f32>()?);
        }
    }
    Ok(values)
}
