//! Architecture to builder dispatch.

use std::sync::Arc;

use momentum_core::{Architecture, ModelParams};
use momentum_tensor::StabilityConfig;

use crate::attention::AttentionModelBuilder;
use crate::lstm::LstmModelBuilder;
use crate::model::ModelBuilder;

/// Returns the builder for `params.architecture`.
pub fn builder_for(params: &ModelParams, stability: StabilityConfig) -> Arc<dyn ModelBuilder> {
    match params.architecture {
        Architecture::Lstm => Arc::new(LstmModelBuilder::new(params).with_stability(stability)),
        Architecture::Transformer => {
            Arc::new(AttentionModelBuilder::new(params).with_stability(stability))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch() {
        let lstm = builder_for(&ModelParams::default(), StabilityConfig::default());
        assert_eq!(lstm.name(), "lstm");
        assert_eq!(lstm.batch_sizes(), vec![64, 128, 256, 512]);

        let params = ModelParams::default()
            .with_architecture(Architecture::Transformer)
            .with_input_size(4);
        let attention = builder_for(&params, StabilityConfig::default());
        assert_eq!(attention.name(), "attention");
        assert_eq!(attention.batch_sizes(), vec![512, 1024]);
        assert!(attention.search_space().unwrap().contains("no_heads"));
    }
}
