//! Search, fit and backtest through the public facade with real networks.

use std::sync::Arc;

use candle_core::Device;
use momentum_core::{Architecture, HpValue, HyperParameters, ModelParams, SequenceDataset};
use momentum_models::{AttentionModelBuilder, LstmModelBuilder};
use momentum_tensor::sharpe::diversified_sharpe;
use momentum_tensor::StabilityConfig;
use momentum_training::monitor::portfolio_returns;
use momentum_training::{MomentumNetwork, TimeIndex, TrialStatus, YearRange};
use ndarray::{Array2, Array3};
use tempfile::tempdir;

const STEPS: usize = 10;

/// Instruments share calendar dates; the first feature is yesterday's return.
fn dataset(instruments: usize, first_day: usize) -> SequenceDataset {
    let ret = |i: usize, j: usize| -> f32 {
        let phase = (i * 3 + j + first_day) % 5;
        [0.012, -0.004, 0.007, -0.011, 0.003][phase]
    };
    SequenceDataset::new(
        Array3::from_shape_fn((instruments, STEPS, 2), |(i, j, k)| {
            if k == 0 && j > 0 {
                ret(i, j - 1) * 10.0
            } else {
                (j as f32 / STEPS as f32) - 0.5
            }
        }),
        Array3::from_shape_fn((instruments, STEPS, 1), |(i, j, _)| ret(i, j)),
        Array2::ones((instruments, STEPS)),
        Array2::from_shape_fn((instruments, STEPS), |(i, _)| format!("ASSET{}", i)),
        Array2::from_shape_fn((instruments, STEPS), |(_, j)| {
            format!("2021-03-{:02}", j + first_day + 1)
        }),
    )
    .unwrap()
}

fn params() -> ModelParams {
    ModelParams::default()
        .with_total_time_steps(STEPS)
        .with_input_size(2)
        .with_workers(2)
        .with_num_epochs(3)
        .with_early_stopping_patience(2)
        .with_random_search_iterations(2)
        .with_seed(17)
}

#[test]
fn test_lstm_diversified_search() {
    let train = dataset(6, 0);
    let valid = dataset(4, 10);
    let dir = tempdir().unwrap();
    let params = params().with_diversified_val_sharpe(true);
    let builder = LstmModelBuilder::new(&params).with_device(Device::Cpu);
    let network = MomentumNetwork::new("lstm", dir.path(), params)
        .unwrap()
        .with_builder(Arc::new(builder))
        .with_hp_minibatch_size(vec![4, 8]);

    let (hp, model) = network.hyperparameter_search(&train, &valid).unwrap();
    assert!(hp.contains("batch_size"));
    assert_eq!(hp.get_int("hidden_layer_size").unwrap(), 80);

    let positions = model.predict(valid.inputs(), 2).unwrap();
    assert_eq!(positions.dim(), (4, STEPS, 1));

    let sharpe = network.evaluate(&valid, model.as_ref()).unwrap();
    assert!(!sharpe.is_infinite());

    let layout = network.layout();
    assert!(layout.oracle_path().exists());
    let oracle: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(layout.oracle_path()).unwrap()).unwrap();
    let trials = oracle["trials"].as_array().unwrap();
    assert_eq!(trials.len(), 2);
    assert!(trials.iter().any(|t| t["status"] == "completed"));

    let results = network
        .get_positions(&valid, model.as_ref(), true, YearRange::default())
        .unwrap();
    assert_eq!(results.rows.len(), 4);
    assert!(results.rows.iter().all(|r| [-1, 0, 1].contains(&r.position)));
}

#[test]
fn test_attention_validation_loss_fit() {
    let train = dataset(6, 0);
    let valid = dataset(4, 10);
    let dir = tempdir().unwrap();
    let params = params().with_architecture(Architecture::Transformer);
    let builder = AttentionModelBuilder::new(&params).with_device(Device::Cpu);
    let network = MomentumNetwork::new("attention", dir.path(), params)
        .unwrap()
        .with_builder(Arc::new(builder));

    let hp = HyperParameters::from_values([
        ("no_heads", HpValue::Int(2)),
        ("no_layers", HpValue::Int(1)),
        ("dq", HpValue::Int(8)),
        ("ff_dim", HpValue::Int(8)),
        ("dropout_rate", HpValue::Float(0.1)),
        ("learning_rate", HpValue::Float(1e-3)),
        ("max_gradient_norm", HpValue::Float(1.0)),
        ("batch_size", HpValue::Int(4)),
    ]);
    let model = network
        .fit(&train, &valid, &hp, &dir.path().join("tmp"))
        .unwrap();
    let loss = network.evaluate(&valid, model.as_ref()).unwrap();
    assert!(loss.is_finite());
    assert_eq!(model.hyperparameters(), &hp);
}

#[test]
fn test_trial_records_are_written() {
    let train = dataset(2, 0);
    let dir = tempdir().unwrap();
    let params = params();
    let builder = LstmModelBuilder::new(&params).with_device(Device::Cpu);
    let network = MomentumNetwork::new("ok", dir.path(), params)
        .unwrap()
        .with_builder(Arc::new(builder))
        .with_hp_minibatch_size(vec![2]);

    network.hyperparameter_search(&train, &train).unwrap();
    let record_dir = network.layout().trial_dir("0000");
    let record: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(record_dir.join("trial.json")).unwrap(),
    )
    .unwrap();
    let status: TrialStatus = serde_json::from_value(record["status"].clone()).unwrap();
    assert!(matches!(status, TrialStatus::Completed | TrialStatus::Failed));
}

#[test]
fn test_two_instrument_portfolio_through_time_index() {
    let timestamps = Array2::from_shape_fn((2, 3), |(_, j)| format!("2020-01-0{}", j + 1));
    let index = TimeIndex::from_array(&timestamps);
    let indices = index.map(&timestamps).unwrap();

    let positions = Array3::<f32>::ones((2, 3, 1));
    let returns = Array3::from_shape_vec((2, 3, 1), vec![0.01f32, -0.01, 0.02, 0.02, 0.01, -0.01]).unwrap();
    let series = portfolio_returns(&positions, &returns, &indices, index.len(), None).unwrap();
    for (got, want) in series.iter().zip([0.015, 0.0, 0.005]) {
        assert!((got - want).abs() < 1e-7);
    }

    let stability = StabilityConfig::default();
    let m = 0.02 / 3.0;
    let var = ((0.015f64 - m).powi(2) + m.powi(2) + (0.005 - m).powi(2)) / 3.0;
    let expected = m / (var + 1e-9).sqrt() * 252f64.sqrt();
    let got = diversified_sharpe(&series, &stability);
    assert!((got - expected).abs() / expected < 1e-5);
}
