mod context;
mod nth_element;
mod tensor;

pub use context::CudaContext;
pub use nth_element::{create_nth_element, NthElementGpu};
pub use tensor::{CudaTensor, DeviceScore};

// Re-export cudarc handle types returned by the context
pub use cudarc::cublas::CudaBlas;
pub use context::SparseHandle;
