//! nbest: batched N-best (top-K) selection for beam-search decoding
//!
//! This crate provides the device-agnostic pieces: score tensor
//! introspection, the selection contract and its fatal precondition checks,
//! scratch sizing, capability flags and configuration. The CUDA
//! implementation lives in `nbest-cuda`.

pub mod backend;
pub mod capability;
pub mod config;
pub mod device;
pub mod dtype;
pub mod error;
pub mod logging;
pub mod select;
pub mod tensor;

#[doc(hidden)]
pub use log as __log;

pub use backend::Backend;
pub use capability::{BackendFlags, Capabilities, ComputeCapability};
pub use config::SelectorConfig;
pub use device::DeviceId;
pub use dtype::{DType, ScoreElement};
pub use error::{Error, Result};
pub use select::{
    check_request, NthElement, ScratchLayout, SelectionShape, TopKRecord, MAX_BLOCKS_PER_BEAM,
    MAX_VOCAB_SIZE,
};
pub use tensor::Tensor;
