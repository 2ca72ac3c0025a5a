//! Bridges between materialized `ndarray` arrays and candle tensors.
//!
//! Models consume candle tensors while the monitor and evaluator aggregate on
//! `ndarray` arrays; every conversion goes through `f32` row-major buffers.

use candle_core::{DType, Device, Tensor};
use ndarray::{Array2, Array3};

use crate::{Result, TensorError};

/// Returns the best available device (GPU if compiled in, otherwise CPU).
pub fn best_device() -> Device {
    #[cfg(feature = "metal")]
    {
        Device::new_metal(0).unwrap_or(Device::Cpu)
    }
    #[cfg(all(feature = "cuda", not(feature = "metal")))]
    {
        Device::new_cuda(0).unwrap_or(Device::Cpu)
    }
    #[cfg(not(any(feature = "metal", feature = "cuda")))]
    {
        Device::Cpu
    }
}

/// Copies a `(batch, time, channel)` array onto `device`.
pub fn array3_to_tensor(array: &Array3<f32>, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = array.iter().copied().collect();
    Ok(Tensor::from_vec(data, array.dim(), device)?)
}

/// Copies a `(batch, time)` array onto `device`.
pub fn array2_to_tensor(array: &Array2<f32>, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = array.iter().copied().collect();
    Ok(Tensor::from_vec(data, array.dim(), device)?)
}

/// Reads a rank-3 tensor back into an `f32` array.
pub fn tensor_to_array3(tensor: &Tensor) -> Result<Array3<f32>> {
    let dims = tensor.dims3()?;
    let data = tensor
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Array3::from_shape_vec(dims, data).map_err(|_| TensorError::ShapeMismatch {
        expected: vec![dims.0, dims.1, dims.2],
        got: tensor.dims().to_vec(),
    })
}

/// Reads a scalar tensor as `f64`.
pub fn scalar_to_f64(tensor: &Tensor) -> Result<f64> {
    Ok(tensor.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}
