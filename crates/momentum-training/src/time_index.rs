//! Dense integer indices for timestamp labels.
//!
//! Labels are sorted lexicographically and deduplicated; the position in that
//! order is the index. The empty label, which marks padded cells, always holds
//! index 0: it sorts first when present and is prepended when absent, so real
//! timestamps start at 1 in every case.

use std::collections::BTreeSet;

use ndarray::Array2;

use momentum_core::EMPTY_TIME_LABEL;

use crate::error::{Result, TrainingError};

/// Sorted label table built from one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeIndex {
    labels: Vec<String>,
}

impl TimeIndex {
    pub fn build<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unique: BTreeSet<&str> = labels.into_iter().collect();
        let mut labels: Vec<String> = unique.into_iter().map(str::to_string).collect();
        if labels.first().map(String::as_str) != Some(EMPTY_TIME_LABEL) {
            labels.insert(0, EMPTY_TIME_LABEL.to_string());
        }
        Self { labels }
    }

    pub fn from_array(timestamps: &Array2<String>) -> Self {
        Self::build(timestamps.iter().map(String::as_str))
    }

    /// Number of indices, the reserved index included.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when only the reserved index exists.
    pub fn is_empty(&self) -> bool {
        self.labels.len() <= 1
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Result<usize> {
        self.labels
            .binary_search_by(|entry| entry.as_str().cmp(label))
            .map_err(|_| TrainingError::UnknownTimeLabel {
                label: label.to_string(),
            })
    }

    /// Maps every label of `timestamps` to its index.
    pub fn map(&self, timestamps: &Array2<String>) -> Result<Array2<usize>> {
        let mut out = Array2::zeros(timestamps.dim());
        for (slot, label) in out.iter_mut().zip(timestamps.iter()) {
            *slot = self.index_of(label)?;
        }
        Ok(out)
    }
}
