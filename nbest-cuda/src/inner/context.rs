//! CUDA device context
//!
//! Owns everything the decoder needs from one device besides the selector's
//! scratch: lazily created cuBLAS/cuSPARSE handles bound to the device's default
//! stream, the cached compute capability, the capability flags and two
//! device-resident scalar constants (`1.0` and `0.0`) used as
//! `alpha`/`beta` by pointer-mode GEMM calls.

#![allow(clippy::missing_panics_doc)]

use std::sync::{Arc, Mutex};

use cudarc::cublas::CudaBlas;
use cudarc::cusparse::sys as cusparse_sys;
use cudarc::driver::sys::CUdevice_attribute;
use cudarc::driver::{CudaContext as DriverContext, CudaSlice, CudaStream};
use log::debug;

use nbest::{Backend, Capabilities, ComputeCapability, DeviceId, Error, Result, SelectorConfig};

/// cuSPARSE handle bound to a stream, destroyed on drop.
pub struct SparseHandle {
    handle: cusparse_sys::cusparseHandle_t,
    /// Keeps the bound stream (and its context) alive as long as the handle.
    _stream: Arc<CudaStream>,
}

// The raw handle is only used through `&self` by callers that serialise
// access per context.
unsafe impl Send for SparseHandle {}
unsafe impl Sync for SparseHandle {}

impl SparseHandle {
    fn new(stream: Arc<CudaStream>) -> Result<Self> {
        let mut handle: cusparse_sys::cusparseHandle_t = std::ptr::null_mut();
        check_sparse(unsafe { cusparse_sys::cusparseCreate(&mut handle) })?;
        let sparse = Self {
            handle,
            _stream: Arc::clone(&stream),
        };
        check_sparse(unsafe { cusparse_sys::cusparseSetStream(handle, stream.cu_stream() as _) })?;
        Ok(sparse)
    }

    /// Raw handle for cuSPARSE calls.
    #[must_use]
    pub fn handle(&self) -> cusparse_sys::cusparseHandle_t {
        self.handle
    }
}

impl Drop for SparseHandle {
    fn drop(&mut self) {
        // Nothing useful can be done with a failed destroy.
        let _ = unsafe { cusparse_sys::cusparseDestroy(self.handle) };
    }
}

fn check_sparse(status: cusparse_sys::cusparseStatus_t) -> Result<()> {
    if status == cusparse_sys::cusparseStatus_t::CUSPARSE_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(Error::CuSparse(format!("{status:?}")))
    }
}

/// Manages one CUDA device and the library handles used on it.
///
/// Handles are created on first use: most contexts never run sparse kernels,
/// and creating cuBLAS/cuSPARSE handles costs device memory and startup time.
/// Once created, a handle lives until the context is dropped.
///
/// Every operation rebinds this context's device to the calling thread
/// first, since the driver's current device is shared by all components.
pub struct CudaContext {
    device_id: DeviceId,
    seed: u64,
    ctx: Arc<DriverContext>,
    /// Device default stream; math handles are bound to it.
    stream: Arc<CudaStream>,
    blas: Mutex<Option<Arc<CudaBlas>>>,
    sparse: Mutex<Option<Arc<SparseHandle>>>,
    one: CudaSlice<f32>,
    zero: CudaSlice<f32>,
    capabilities: Capabilities,
}

impl CudaContext {
    /// Create a context for `device_id`.
    ///
    /// # Errors
    /// Returns an error if the device cannot be opened, its compute
    /// capability cannot be queried, or the scalar constants cannot be
    /// allocated.
    pub fn new(device_id: DeviceId, seed: u64) -> Result<Self> {
        let ctx = DriverContext::new(device_id.ordinal())?;
        ctx.bind_to_thread()?;

        let major =
            ctx.attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?;
        let minor =
            ctx.attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?;
        let compute = ComputeCapability::new(major, minor);

        let stream = ctx.default_stream();
        let one = stream.memcpy_stod(&[1.0_f32])?;
        let zero = stream.memcpy_stod(&[0.0_f32])?;
        stream.synchronize()?;

        debug!("CUDA context on {device_id}: compute capability {compute}");

        Ok(Self {
            device_id,
            seed,
            ctx,
            stream,
            blas: Mutex::new(None),
            sparse: Mutex::new(None),
            one,
            zero,
            capabilities: Capabilities::new(compute),
        })
    }

    /// Create a context for the configured device and apply the configured
    /// backend flags.
    ///
    /// # Errors
    /// Returns an error if the context cannot be created (see
    /// [`CudaContext::new`]).
    ///
    /// # Panics
    /// Panics if the flags request tensor-core GEMM on hardware below
    /// compute capability 7.0.
    pub fn from_config(config: &SelectorConfig) -> Result<Self> {
        let mut ctx = Self::new(config.device, config.seed)?;
        ctx.apply_flags(&config.backend);
        Ok(ctx)
    }

    /// Underlying driver context
    #[must_use]
    pub fn driver(&self) -> &Arc<DriverContext> {
        &self.ctx
    }

    /// Default stream all work of this context is issued on
    #[must_use]
    pub fn stream(&self) -> &Arc<CudaStream> {
        &self.stream
    }

    /// cuBLAS handle, created and bound to the default stream on first
    /// call.
    ///
    /// # Errors
    /// Returns an error if binding the device or creating the handle fails.
    pub fn blas(&self) -> Result<Arc<CudaBlas>> {
        let mut slot = self.blas.lock().unwrap();
        if let Some(blas) = slot.as_ref() {
            return Ok(Arc::clone(blas));
        }
        self.set_device()?;
        let blas = Arc::new(CudaBlas::new(Arc::clone(&self.stream))?);
        debug!("Created cuBLAS handle on {}", self.device_id);
        *slot = Some(Arc::clone(&blas));
        Ok(blas)
    }

    /// cuSPARSE handle, created and bound to the default stream on first
    /// call.
    ///
    /// # Errors
    /// Returns an error if binding the device or creating the handle fails.
    pub fn sparse(&self) -> Result<Arc<SparseHandle>> {
        let mut slot = self.sparse.lock().unwrap();
        if let Some(sparse) = slot.as_ref() {
            return Ok(Arc::clone(sparse));
        }
        self.set_device()?;
        let sparse = Arc::new(SparseHandle::new(Arc::clone(&self.stream))?);
        debug!("Created cuSPARSE handle on {}", self.device_id);
        *slot = Some(Arc::clone(&sparse));
        Ok(sparse)
    }

    /// Device-resident `1.0`
    #[must_use]
    pub fn one_device(&self) -> &CudaSlice<f32> {
        &self.one
    }

    /// Device-resident `0.0`
    #[must_use]
    pub fn zero_device(&self) -> &CudaSlice<f32> {
        &self.zero
    }
}

impl Backend for CudaContext {
    fn device_id(&self) -> DeviceId {
        self.device_id
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn set_device(&self) -> Result<()> {
        self.ctx.bind_to_thread()?;
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        self.stream.synchronize()?;
        Ok(())
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn capabilities_mut(&mut self) -> &mut Capabilities {
        &mut self.capabilities
    }
}

impl Drop for CudaContext {
    fn drop(&mut self) {
        let _ = self.ctx.bind_to_thread();
        if let Ok(slot) = self.sparse.get_mut() {
            slot.take();
        }
        if let Ok(slot) = self.blas.get_mut() {
            slot.take();
        }
        // `one` and `zero` are freed when the fields drop.
    }
}
