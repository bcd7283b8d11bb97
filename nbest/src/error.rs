//! Error types for nbest
//!
//! Only device/driver failures and configuration I/O are reported through
//! [`Error`]. Caller-contract violations (bad shapes, oversized requests,
//! unsupported precisions) panic instead, see [`crate::select`].

use thiserror::Error;

/// Result type alias using nbest's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nbest operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("CUDA error: {0}")]
    Cuda(String),

    #[error("cuBLAS error: {0}")]
    CuBlas(String),

    #[error("cuSPARSE error: {0}")]
    CuSparse(String),

    #[error("NVRTC error: {0}")]
    Nvrtc(String),

    #[error("Missing kernel: {0}")]
    MissingKernel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Optional From impls for cudarc error types (enabled by `cuda-interop`)
// ---------------------------------------------------------------------------

#[cfg(feature = "cuda-interop")]
impl From<cudarc::driver::DriverError> for Error {
    fn from(e: cudarc::driver::DriverError) -> Self {
        Self::Cuda(e.to_string())
    }
}

#[cfg(feature = "cuda-interop")]
impl From<cudarc::cublas::result::CublasError> for Error {
    fn from(e: cudarc::cublas::result::CublasError) -> Self {
        Self::CuBlas(format!("{e:?}"))
    }
}

#[cfg(feature = "cuda-interop")]
impl From<cudarc::nvrtc::result::NvrtcError> for Error {
    fn from(e: cudarc::nvrtc::result::NvrtcError) -> Self {
        Self::Nvrtc(format!("{e:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Cuda("out of memory".to_string());
        assert_eq!(err.to_string(), "CUDA error: out of memory");

        let err = Error::MissingKernel("nth_element_stage1_f32".to_string());
        assert_eq!(err.to_string(), "Missing kernel: nth_element_stage1_f32");
    }

    #[test]
    fn test_json_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
    }
}
