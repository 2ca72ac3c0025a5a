//! Recurrent position network.
//!
//! Inputs pass through dropout, one LSTM layer, dropout again, and a
//! time-distributed dense head with `tanh` activation. The head kernel is kept
//! inside a max-norm ball of radius 3 after every update.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{LSTMConfig, Linear, Module, VarBuilder, VarMap, LSTM, RNN};

use momentum_core::{grid, HyperParameters, ModelParams, SearchSpace};
use momentum_tensor::StabilityConfig;

use crate::candle_model::{apply_max_norm, dropout, lookup_var, CandleTradingModel, OptimizerSettings, SequenceNetwork};
use crate::model::{ModelBuilder, TradingModel};
use crate::Result;

const HEAD_MAX_NORM: f64 = 3.0;

/// One LSTM layer followed by a dense `tanh` head.
pub struct LstmNetwork {
    lstm: LSTM,
    head: Linear,
    head_weight: Var,
    dropout_rate: f32,
}

impl LstmNetwork {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        output_size: usize,
        dropout_rate: f32,
        varmap: &VarMap,
        vb: VarBuilder,
    ) -> Result<Self> {
        let lstm = candle_nn::lstm(input_size, hidden_size, LSTMConfig::default(), vb.pp("lstm"))?;
        let head = candle_nn::linear(hidden_size, output_size, vb.pp("head"))?;
        let head_weight = lookup_var(varmap, "head.weight")?;
        Ok(Self {
            lstm,
            head,
            head_weight,
            dropout_rate,
        })
    }
}

impl SequenceNetwork for LstmNetwork {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let xs = dropout(xs, self.dropout_rate, train)?;
        let states = self.lstm.seq(&xs)?;
        let hidden = self.lstm.states_to_tensor(&states)?;
        let hidden = dropout(&hidden, self.dropout_rate, train)?;
        self.head.forward(&hidden)?.tanh()
    }

    fn apply_constraints(&self) -> candle_core::Result<()> {
        apply_max_norm(&self.head_weight, HEAD_MAX_NORM)
    }
}

/// Builds [`LstmNetwork`] models from samples of `hidden_layer_size`,
/// `dropout_rate`, `learning_rate` and `max_gradient_norm`.
#[derive(Debug, Clone)]
pub struct LstmModelBuilder {
    input_size: usize,
    output_size: usize,
    force_output_sharpe_length: usize,
    stability: StabilityConfig,
    device: Device,
}

impl LstmModelBuilder {
    pub fn new(params: &ModelParams) -> Self {
        Self {
            input_size: params.input_size,
            output_size: params.output_size,
            force_output_sharpe_length: params.force_output_sharpe_length,
            stability: StabilityConfig::default(),
            device: momentum_tensor::best_device(),
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_stability(mut self, stability: StabilityConfig) -> Self {
        self.stability = stability;
        self
    }
}

impl ModelBuilder for LstmModelBuilder {
    fn name(&self) -> &str {
        "lstm"
    }

    fn search_space(&self) -> Result<SearchSpace> {
        Ok(SearchSpace::new()
            .with_choice("hidden_layer_size", grid::HP_HIDDEN_LAYER_SIZE.iter().copied())?
            .with_choice("dropout_rate", grid::HP_DROPOUT_RATE.iter().copied())?
            .with_choice("learning_rate", grid::HP_LEARNING_RATE.iter().copied())?
            .with_choice("max_gradient_norm", grid::HP_MAX_GRADIENT_NORM.iter().copied())?)
    }

    fn build(&self, hp: &HyperParameters) -> Result<Box<dyn TradingModel>> {
        let hidden_size = hp.get_usize("hidden_layer_size")?;
        let dropout_rate = hp.get_float("dropout_rate")? as f32;
        let settings = OptimizerSettings::from_hyperparameters(hp, self.output_size)?
            .with_force_output_sharpe_length(self.force_output_sharpe_length)
            .with_stability(self.stability);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let network = LstmNetwork::new(
            self.input_size,
            hidden_size,
            self.output_size,
            dropout_rate,
            &varmap,
            vb,
        )?;
        tracing::debug!(hidden_size, dropout_rate, "Built LSTM network");
        let model = CandleTradingModel::new(
            "lstm",
            hp.clone(),
            varmap,
            Box::new(network),
            self.input_size,
            settings,
            self.device.clone(),
        )?;
        Ok(Box::new(model))
    }
}
