//! Device capability flags and their soft feature negotiation.
//!
//! The decoder toggles precision and kernel-path features on the backend of
//! the device it runs on. Features that make sense on GPUs are plain latched
//! booleans; features that only exist for CPU backends are accepted, logged
//! once and ignored. Tensor-core GEMM is the only feature with a hardware
//! precondition and enabling it on older hardware is fatal.

use std::fmt;

use log::Level;
use serde::Deserialize;

use crate::log_once;

/// Minimum compute-capability major version with tensor cores (Volta).
pub const TENSOR_CORE_MIN_MAJOR: i32 = 7;

/// Hardware generation reported by the device, cached at context creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ComputeCapability {
    pub major: i32,
    pub minor: i32,
}

impl ComputeCapability {
    #[must_use]
    pub const fn new(major: i32, minor: i32) -> Self {
        Self { major, minor }
    }

    /// Whether tensor-core matmul kernels can run on this generation
    #[must_use]
    pub const fn supports_tensor_cores(self) -> bool {
        self.major >= TENSOR_CORE_MIN_MAJOR
    }
}

impl fmt::Display for ComputeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sm_{}{}", self.major, self.minor)
    }
}

/// Requested feature toggles, typically read from the decoder configuration.
///
/// All toggles default to off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct BackendFlags {
    /// Narrow-integer (int8) GEMM path
    pub int8: bool,
    /// Precomputed quantization scales
    pub precomputed_alpha: bool,
    /// Fused kernels
    pub fused: bool,
    /// Tensor-core GEMM (requires compute capability 7.0+)
    pub tensor_core_gemm: bool,
    /// Dump quantization multipliers/matrices for debugging
    pub dump_quant_mult: bool,
}

/// Capability state owned by a device context.
///
/// Getters report what is actually in effect; setters for features this
/// device class does not implement are no-ops.
#[derive(Debug, Clone)]
pub struct Capabilities {
    compute: ComputeCapability,
    int8: bool,
    precomputed_alpha: bool,
    fused: bool,
    tensor_core_gemm: bool,
    dump_quant_mult: bool,
}

impl Capabilities {
    /// Fresh state with every feature off.
    #[must_use]
    pub fn new(compute: ComputeCapability) -> Self {
        Self {
            compute,
            int8: false,
            precomputed_alpha: false,
            fused: false,
            tensor_core_gemm: false,
            dump_quant_mult: false,
        }
    }

    /// Cached compute capability of the device
    #[must_use]
    pub fn compute_capability(&self) -> ComputeCapability {
        self.compute
    }

    /// Apply every toggle of `flags` through the regular setters.
    ///
    /// # Panics
    /// Panics if `flags.tensor_core_gemm` is set on a device below compute
    /// capability 7.
    pub fn apply(&mut self, flags: &BackendFlags) {
        self.set_int8(flags.int8);
        self.set_precomputed_alpha(flags.precomputed_alpha);
        self.set_fused(flags.fused);
        self.set_tensor_core_gemm(flags.tensor_core_gemm);
        self.set_dump_quant_mult(flags.dump_quant_mult);
    }

    /// Snapshot of the toggles currently in effect.
    #[must_use]
    pub fn flags(&self) -> BackendFlags {
        BackendFlags {
            int8: self.int8,
            precomputed_alpha: self.precomputed_alpha,
            fused: self.fused,
            tensor_core_gemm: self.tensor_core_gemm,
            dump_quant_mult: self.dump_quant_mult,
        }
    }

    pub fn set_int8(&mut self, enable: bool) {
        self.int8 = enable;
    }

    #[must_use]
    pub fn is_int8(&self) -> bool {
        self.int8
    }

    pub fn set_precomputed_alpha(&mut self, enable: bool) {
        self.precomputed_alpha = enable;
    }

    #[must_use]
    pub fn is_precomputed_alpha(&self) -> bool {
        self.precomputed_alpha
    }

    pub fn set_fused(&mut self, enable: bool) {
        self.fused = enable;
    }

    #[must_use]
    pub fn is_fused(&self) -> bool {
        self.fused
    }

    pub fn set_dump_quant_mult(&mut self, enable: bool) {
        self.dump_quant_mult = enable;
    }

    #[must_use]
    pub fn dump_quant_mult(&self) -> bool {
        self.dump_quant_mult
    }

    /// Enable tensor-core GEMM. Passing `false` leaves the flag untouched.
    ///
    /// # Panics
    /// Panics if `enable` is true and the cached compute capability major
    /// version is below 7.
    pub fn set_tensor_core_gemm(&mut self, enable: bool) {
        if enable {
            assert!(
                self.compute.supports_tensor_cores(),
                "Compute capability {} below {TENSOR_CORE_MIN_MAJOR} do not support tensor cores",
                self.compute.major
            );
            self.tensor_core_gemm = true;
        }
    }

    #[must_use]
    pub fn use_tensor_core_gemm(&self) -> bool {
        self.tensor_core_gemm
    }

    // ---- CPU-only features: accepted, logged once, ignored ----
    // The receivers keep these callable like the real toggles.

    #[allow(clippy::unused_self)]
    pub fn set_int16(&mut self, enable: bool) {
        log_once!(Level::Info, "set_int16() not supported for GPU_{enable}");
    }

    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn is_int16(&self) -> bool {
        false
    }

    #[allow(clippy::unused_self)]
    pub fn set_shifted(&mut self, enable: bool) {
        log_once!(Level::Info, "set_shifted() not supported for GPU_{enable}");
    }

    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn is_shifted(&self) -> bool {
        false
    }

    #[allow(clippy::unused_self)]
    pub fn set_shifted_all(&mut self, enable: bool) {
        log_once!(Level::Info, "set_shifted_all() not supported for GPU_{enable}");
    }

    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn is_shifted_all(&self) -> bool {
        false
    }

    #[allow(clippy::unused_self)]
    pub fn set_legacy_batched_gemm(&mut self, enable: bool) {
        log_once!(
            Level::Info,
            "set_legacy_batched_gemm() not supported for GPU_{enable}"
        );
    }

    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn is_legacy_batched_gemm(&self) -> bool {
        false
    }
}
