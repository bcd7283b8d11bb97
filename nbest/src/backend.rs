//! Device backend trait.
//!
//! A backend owns one accelerator device's resources and its capability
//! state. The decoder queries and toggles features through
//! [`Backend::capabilities`] / [`Backend::capabilities_mut`]; selectors only
//! need the [`DeviceId`] the backend is bound to.
//!
//! # Design notes
//!
//! - **Device binding is per call.** Which device a thread targets is ambient
//!   driver state shared by every component, so each backend operation
//!   rebinds its own device first via [`Backend::set_device`].
//! - **Capability state is plain data.** Hardware-gated setters live on
//!   [`Capabilities`] so they can be exercised without a device.

use crate::capability::{BackendFlags, Capabilities, ComputeCapability};
use crate::device::DeviceId;
use crate::Result;

/// A compute backend bound to a single device.
pub trait Backend {
    /// Device this backend owns resources on.
    fn device_id(&self) -> DeviceId;

    /// Seed the backend was created with.
    fn seed(&self) -> u64;

    /// Bind the calling thread to this backend's device.
    ///
    /// # Errors
    /// Returns an error if the driver rejects the binding.
    fn set_device(&self) -> Result<()>;

    /// Block until all work queued by this thread on the device is done.
    ///
    /// # Errors
    /// Returns an error if synchronization fails.
    fn synchronize(&self) -> Result<()>;

    /// Current capability state.
    fn capabilities(&self) -> &Capabilities;

    /// Mutable capability state for feature toggles.
    fn capabilities_mut(&mut self) -> &mut Capabilities;

    /// Cached compute capability of the device.
    fn compute_capability(&self) -> ComputeCapability {
        self.capabilities().compute_capability()
    }

    /// Apply configured feature toggles.
    ///
    /// # Panics
    /// Panics if tensor-core GEMM is requested on hardware without tensor
    /// cores.
    fn apply_flags(&mut self, flags: &BackendFlags) {
        self.capabilities_mut().apply(flags);
    }
}
