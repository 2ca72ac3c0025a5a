//! Array operations used when aggregating validation returns.

use ndarray::{s, Array3, ArrayView3, Axis, Zip};

use crate::{Result, TensorError};

/// Averages `values` grouped by `segment_ids` into `num_segments` buckets.
///
/// Buckets that receive no value average to zero.
pub fn segment_mean(values: &[f64], segment_ids: &[usize], num_segments: usize) -> Result<Vec<f64>> {
    if values.len() != segment_ids.len() {
        return Err(TensorError::ShapeMismatch {
            expected: vec![values.len()],
            got: vec![segment_ids.len()],
        });
    }
    let mut sums = vec![0.0f64; num_segments];
    let mut counts = vec![0usize; num_segments];
    for (&value, &id) in values.iter().zip(segment_ids) {
        if id >= num_segments {
            return Err(TensorError::SegmentOutOfRange { id, num_segments });
        }
        sums[id] += value;
        counts[id] += 1;
    }
    Ok(sums
        .into_iter()
        .zip(counts)
        .map(|(sum, count)| if count == 0 { 0.0 } else { sum / count as f64 })
        .collect())
}

/// Absolute position change along the time axis.
///
/// The first step of every sample has zero turnover; NaN differences become zero.
pub fn turnover(positions: ArrayView3<'_, f32>) -> Array3<f32> {
    let (n, t, c) = positions.dim();
    let mut out = Array3::<f32>::zeros((n, t, c));
    if t > 1 {
        let current = positions.slice(s![.., 1.., ..]);
        let previous = positions.slice(s![.., ..t - 1, ..]);
        Zip::from(out.slice_mut(s![.., 1.., ..]))
            .and(&current)
            .and(&previous)
            .for_each(|o, &cur, &prev| {
                let d = (cur - prev).abs();
                *o = if d.is_nan() { 0.0 } else { d };
            });
    }
    out
}

/// Zeroes the weights of all but the last `keep` steps of every sample.
///
/// `keep == 0` leaves the weights untouched.
pub fn mask_leading_steps(weights: &mut ndarray::Array2<f32>, keep: usize) {
    let t = weights.len_of(Axis(1));
    if keep == 0 || keep >= t {
        return;
    }
    weights.slice_mut(s![.., ..t - keep]).fill(0.0);
}
