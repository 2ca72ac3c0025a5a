//! Windowed sequence datasets.
//!
//! A [`SequenceDataset`] holds one partition as dense arrays indexed by
//! `(sample, time[, channel])`. Identifiers and timestamps are stored per cell;
//! padded cells carry [`EMPTY_TIME_LABEL`] and an active flag of zero.

use std::path::Path;

use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{MomentumError, Result};

/// Timestamp label of padded or missing cells.
pub const EMPTY_TIME_LABEL: &str = "";

/// Borrowed view returned by [`SequenceDataset::unpack`]:
/// `(inputs, labels, active_flags, identifiers, timestamps)`.
pub type Unpacked<'a> = (
    &'a Array3<f32>,
    &'a Array3<f32>,
    &'a Array2<f32>,
    &'a Array2<String>,
    &'a Array2<String>,
);

/// One partition of windowed model inputs with realized returns.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDataset {
    inputs: Array3<f32>,
    labels: Array3<f32>,
    active_flags: Array2<f32>,
    identifiers: Array2<String>,
    timestamps: Array2<String>,
}

impl SequenceDataset {
    /// Builds a dataset after checking that all arrays agree on `(samples, time)`.
    pub fn new(
        inputs: Array3<f32>,
        labels: Array3<f32>,
        active_flags: Array2<f32>,
        identifiers: Array2<String>,
        timestamps: Array2<String>,
    ) -> Result<Self> {
        let (n, t, _) = inputs.dim();
        let (ln, lt, lo) = labels.dim();
        if (ln, lt) != (n, t) || lo == 0 {
            return Err(MomentumError::ShapeMismatch {
                field: "labels",
                expected: vec![n, t, lo.max(1)],
                actual: labels.shape().to_vec(),
            });
        }
        for (field, shape) in [
            ("active_flags", active_flags.shape()),
            ("identifiers", identifiers.shape()),
            ("timestamps", timestamps.shape()),
        ] {
            if shape != [n, t].as_slice() {
                return Err(MomentumError::ShapeMismatch {
                    field,
                    expected: vec![n, t],
                    actual: shape.to_vec(),
                });
            }
        }
        Ok(Self {
            inputs,
            labels,
            active_flags,
            identifiers,
            timestamps,
        })
    }

    /// Returns `(inputs, labels, active_flags, identifiers, timestamps)`.
    pub fn unpack(&self) -> Unpacked<'_> {
        (
            &self.inputs,
            &self.labels,
            &self.active_flags,
            &self.identifiers,
            &self.timestamps,
        )
    }

    pub fn inputs(&self) -> &Array3<f32> {
        &self.inputs
    }

    pub fn labels(&self) -> &Array3<f32> {
        &self.labels
    }

    pub fn active_flags(&self) -> &Array2<f32> {
        &self.active_flags
    }

    pub fn identifiers(&self) -> &Array2<String> {
        &self.identifiers
    }

    pub fn timestamps(&self) -> &Array2<String> {
        &self.timestamps
    }

    pub fn num_samples(&self) -> usize {
        self.inputs.len_of(Axis(0))
    }

    pub fn time_steps(&self) -> usize {
        self.inputs.len_of(Axis(1))
    }

    pub fn input_size(&self) -> usize {
        self.inputs.len_of(Axis(2))
    }

    pub fn output_size(&self) -> usize {
        self.labels.len_of(Axis(2))
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples() == 0
    }

    /// Gathers the given samples, in order, into a new dataset.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            inputs: self.inputs.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
            active_flags: self.active_flags.select(Axis(0), indices),
            identifiers: self.identifiers.select(Axis(0), indices),
            timestamps: self.timestamps.select(Axis(0), indices),
        }
    }
}

/// JSON form of a partition, using nested lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequenceDatasetRecord {
    pub inputs: Vec<Vec<Vec<f32>>>,
    pub labels: Vec<Vec<Vec<f32>>>,
    pub active_flags: Vec<Vec<f32>>,
    pub identifiers: Vec<Vec<String>>,
    pub timestamps: Vec<Vec<String>>,
}

impl TryFrom<SequenceDatasetRecord> for SequenceDataset {
    type Error = MomentumError;

    fn try_from(record: SequenceDatasetRecord) -> Result<Self> {
        SequenceDataset::new(
            nested3("inputs", record.inputs)?,
            nested3("labels", record.labels)?,
            nested2("active_flags", record.active_flags)?,
            nested2("identifiers", record.identifiers)?,
            nested2("timestamps", record.timestamps)?,
        )
    }
}

impl From<&SequenceDataset> for SequenceDatasetRecord {
    fn from(data: &SequenceDataset) -> Self {
        fn rows2<T: Clone>(a: &Array2<T>) -> Vec<Vec<T>> {
            a.outer_iter().map(|r| r.to_vec()).collect()
        }
        fn rows3(a: &Array3<f32>) -> Vec<Vec<Vec<f32>>> {
            a.outer_iter()
                .map(|m| m.outer_iter().map(|r| r.to_vec()).collect())
                .collect()
        }
        Self {
            inputs: rows3(&data.inputs),
            labels: rows3(&data.labels),
            active_flags: rows2(&data.active_flags),
            identifiers: rows2(&data.identifiers),
            timestamps: rows2(&data.timestamps),
        }
    }
}

fn nested2<T: Clone>(field: &'static str, rows: Vec<Vec<T>>) -> Result<Array2<T>> {
    let n = rows.len();
    let t = rows.first().map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(n * t);
    for (i, row) in rows.into_iter().enumerate() {
        if row.len() != t {
            return Err(MomentumError::RaggedArray {
                field,
                message: format!("row {} has {} entries, expected {}", i, row.len(), t),
            });
        }
        flat.extend(row);
    }
    Array2::from_shape_vec((n, t), flat).map_err(|e| MomentumError::RaggedArray {
        field,
        message: e.to_string(),
    })
}

fn nested3(field: &'static str, blocks: Vec<Vec<Vec<f32>>>) -> Result<Array3<f32>> {
    let n = blocks.len();
    let t = blocks.first().map_or(0, Vec::len);
    let c = blocks
        .first()
        .and_then(|b| b.first())
        .map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(n * t * c);
    for (i, block) in blocks.into_iter().enumerate() {
        if block.len() != t {
            return Err(MomentumError::RaggedArray {
                field,
                message: format!("sample {} has {} steps, expected {}", i, block.len(), t),
            });
        }
        for (j, row) in block.into_iter().enumerate() {
            if row.len() != c {
                return Err(MomentumError::RaggedArray {
                    field,
                    message: format!(
                        "sample {} step {} has {} channels, expected {}",
                        i,
                        j,
                        row.len(),
                        c
                    ),
                });
            }
            flat.extend(row);
        }
    }
    Array3::from_shape_vec((n, t, c), flat).map_err(|e| MomentumError::RaggedArray {
        field,
        message: e.to_string(),
    })
}

/// Train, validation and test partitions of one experiment.
#[derive(Debug, Clone)]
pub struct ModelFeatures {
    pub train: SequenceDataset,
    pub valid: SequenceDataset,
    pub test: Option<SequenceDataset>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ModelFeaturesRecord {
    train: SequenceDatasetRecord,
    valid: SequenceDatasetRecord,
    #[serde(default)]
    test: Option<SequenceDatasetRecord>,
}

impl ModelFeatures {
    /// Loads all partitions from a JSON file with `train`, `valid` and optional `test` keys.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MomentumError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let record: ModelFeaturesRecord = serde_json::from_str(&text)?;
        let features = Self {
            train: record.train.try_into()?,
            valid: record.valid.try_into()?,
            test: record.test.map(SequenceDataset::try_from).transpose()?,
        };
        tracing::debug!(
            train = features.train.num_samples(),
            valid = features.valid.num_samples(),
            test = features.test.as_ref().map_or(0, SequenceDataset::num_samples),
            "Loaded model features"
        );
        Ok(features)
    }

    /// Writes all partitions as JSON.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let record = ModelFeaturesRecord {
            train: (&self.train).into(),
            valid: (&self.valid).into(),
            test: self.test.as_ref().map(Into::into),
        };
        let text = serde_json::to_string(&record)?;
        std::fs::write(path, text).map_err(|source| MomentumError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn unpack_train(&self) -> Unpacked<'_> {
        self.train.unpack()
    }

    pub fn unpack_valid(&self) -> Unpacked<'_> {
        self.valid.unpack()
    }

    pub fn unpack_test(&self) -> Option<Unpacked<'_>> {
        self.test.as_ref().map(SequenceDataset::unpack)
    }
}
