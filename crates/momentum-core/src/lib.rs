//! Core types shared by every momentum crate.
//!
//! This crate holds the pieces that carry no numerical machinery of their own:
//!
//! - **Parameters**: [`ModelParams`], the fixed configuration of a run, loaded from JSON.
//! - **Search spaces**: [`SearchSpace`] and [`HyperParameters`], the discrete grid a tuner
//!   samples from and the immutable assignment handed to model builders.
//! - **Datasets**: [`SequenceDataset`] and [`ModelFeatures`], the windowed tensors a model
//!   trains on, with their per-cell identifiers and timestamps.
//! - **Errors**: [`MomentumError`] and the crate-wide [`Result`] alias.
//!
//! # Example
//!
//! ```
//! use momentum_core::{grid, SearchSpace};
//! use rand::SeedableRng;
//!
//! let mut space = SearchSpace::new();
//! space.define_choice("dropout_rate", grid::HP_DROPOUT_RATE.iter().copied()).unwrap();
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let hp = space.sample(&mut rng);
//! assert!(hp.get_float("dropout_rate").is_ok());
//! ```

pub mod dataset;
pub mod error;
pub mod grid;
pub mod hyperparams;
pub mod params;

pub use dataset::{ModelFeatures, SequenceDataset, SequenceDatasetRecord, Unpacked, EMPTY_TIME_LABEL};
pub use error::{MomentumError, Result};
pub use hyperparams::{HpValue, HyperParameters, SearchSpace, BATCH_SIZE};
pub use params::{Architecture, ModelParams};
