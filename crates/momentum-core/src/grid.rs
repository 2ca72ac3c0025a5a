//! Default discrete search grids.
//!
//! The hidden layer grid is pinned to a single width; the wider set
//! `[5, 10, 20, 40, 80, 160]` can be restored by editing [`HP_HIDDEN_LAYER_SIZE`].

/// Hidden units of the recurrent layer.
pub const HP_HIDDEN_LAYER_SIZE: &[i64] = &[80];

/// Dropout applied to recurrent inputs and outputs.
pub const HP_DROPOUT_RATE: &[f64] = &[0.1, 0.3, 0.5];

/// Candidate minibatch sizes.
pub const HP_MINIBATCH_SIZE: &[i64] = &[64, 128, 256, 512];

/// Adam learning rates.
pub const HP_LEARNING_RATE: &[f64] = &[1e-4, 1e-3, 1e-2, 1e-1];

/// Per-variable gradient norm caps.
pub const HP_MAX_GRADIENT_NORM: &[f64] = &[0.01, 1.0, 100.0];

/// Attention heads for the attention variant.
pub const HP_NUM_HEADS: &[i64] = &[2, 4];

/// Encoder depth for the attention variant.
pub const HP_NUM_LAYERS: &[i64] = &[1, 2, 3];

/// Model width for the attention variant.
pub const HP_MODEL_DIM: &[i64] = &[8, 16, 32, 64, 128, 256];

/// Feed-forward width for the attention variant.
pub const HP_FF_DIM: &[i64] = &[8, 16, 32, 64];

/// Minibatch sizes for the attention variant.
pub const HP_ATTENTION_MINIBATCH_SIZE: &[i64] = &[512, 1024];
