//! Device-resident score tensors

#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;

use cudarc::driver::{CudaSlice, CudaStream, DeviceRepr};
use half::f16;

use super::context::CudaContext;
use nbest::dtype::{DType, ScoreElement};
use nbest::tensor::Tensor;
use nbest::Result;

/// Typed device allocation behind a [`CudaTensor`].
pub enum Storage {
    F32(CudaSlice<f32>),
    F16(CudaSlice<f16>),
}

/// Host element types that can be uploaded as scores.
pub trait DeviceScore: ScoreElement + DeviceRepr {
    #[doc(hidden)]
    fn into_storage(slice: CudaSlice<Self>) -> Storage;

    #[doc(hidden)]
    fn download(stream: &Arc<CudaStream>, slice: &CudaSlice<Self>, numel: usize) -> Result<Vec<f32>> {
        let mut host = vec![Self::default(); numel];
        stream.memcpy_dtoh(slice, &mut host)?;
        stream.synchronize()?;
        Ok(host.into_iter().map(ScoreElement::to_f32).collect())
    }
}

impl DeviceScore for f32 {
    fn into_storage(slice: CudaSlice<Self>) -> Storage {
        Storage::F32(slice)
    }
}

impl DeviceScore for f16 {
    fn into_storage(slice: CudaSlice<Self>) -> Storage {
        Storage::F16(slice)
    }
}

/// A score tensor stored on a CUDA GPU.
///
/// The element precision is fixed at upload time and is either `f32` or
/// `f16`. The tensor is read-only once created.
pub struct CudaTensor {
    storage: Storage,
    shape: Vec<usize>,
    stream: Arc<CudaStream>,
}

impl CudaTensor {
    /// Upload host data to the context's device.
    ///
    /// # Errors
    /// Returns an error if GPU memory allocation or copy fails
    pub fn from_slice<T: DeviceScore>(ctx: &CudaContext, shape: &[usize], data: &[T]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "Data length {} doesn't match shape {:?} (numel={})",
            data.len(),
            shape,
            numel
        );

        let stream = Arc::clone(ctx.stream());
        let slice = stream.memcpy_stod(data)?;
        Ok(Self {
            storage: T::into_storage(slice),
            shape: shape.to_vec(),
            stream,
        })
    }

    /// Copy the scores back to the host, widened to `f32`.
    ///
    /// # Errors
    /// Returns an error if the device-to-host copy fails
    pub fn to_vec_f32(&self) -> Result<Vec<f32>> {
        match &self.storage {
            Storage::F32(slice) => f32::download(&self.stream, slice, self.numel()),
            Storage::F16(slice) => f16::download(&self.stream, slice, self.numel()),
        }
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }
}

impl Tensor for CudaTensor {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        match self.storage {
            Storage::F32(_) => DType::F32,
            Storage::F16(_) => DType::F16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbest::DeviceId;

    #[test]
    fn test_upload_f32_roundtrip() {
        let ctx = CudaContext::new(DeviceId(0), 0).expect("Failed to create CUDA context");
        let data = [0.1_f32, 0.9, 0.3, 0.05];
        let t = CudaTensor::from_slice(&ctx, &[1, 1, 1, 4], &data).unwrap();
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.dim(-1), 4);
        assert_eq!(t.to_vec_f32().unwrap(), data.to_vec());
    }

    #[test]
    fn test_upload_f16_widens() {
        let ctx = CudaContext::new(DeviceId(0), 0).expect("Failed to create CUDA context");
        let data: Vec<f16> = [0.5_f32, -2.0, 8.0].iter().map(|&v| f16::from_f32(v)).collect();
        let t = CudaTensor::from_slice(&ctx, &[1, 1, 1, 3], &data).unwrap();
        assert_eq!(t.dtype(), DType::F16);
        assert_eq!(t.size_in_bytes(), 6);
        assert_eq!(t.to_vec_f32().unwrap(), vec![0.5, -2.0, 8.0]);
    }

    #[test]
    #[should_panic(expected = "doesn't match shape")]
    fn test_shape_mismatch_panics() {
        let ctx = CudaContext::new(DeviceId(0), 0).expect("Failed to create CUDA context");
        let _ = CudaTensor::from_slice(&ctx, &[1, 1, 2, 3], &[0.0_f32; 5]);
    }
}
