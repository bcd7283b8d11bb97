//! Two-stage N-best selection on the GPU
//!
//! Stage 1 splits every beam row of the score tensor across up to
//! [`MAX_BLOCKS_PER_BEAM`] blocks, each of which keeps its own `n` best
//! candidates. Stage 2 merges the per-block candidates of every batch entry
//! into the final `n` records. Per-row work after the first pass is bounded by
//! `blocks * n`, so a vocabulary-sized row is never sorted.

#![allow(clippy::cast_possible_truncation, clippy::missing_panics_doc)]

use std::sync::Arc;

use cudarc::driver::{
    CudaContext as DriverContext, CudaFunction, CudaSlice, CudaStream, LaunchConfig,
    PinnedHostSlice, PushKernelArg,
};
use cudarc::nvrtc::Ptx;
use log::debug;

use super::tensor::{CudaTensor, Storage};
use nbest::select::{
    append_records, check_request, ScratchLayout, SelectionShape, TopKRecord, BLOCK_SIZE,
    MAX_BLOCKS_PER_BEAM,
};
use nbest::{DeviceId, Error, NthElement, Result, SelectorConfig};

const PTX: &str = include_str!(concat!(env!("OUT_DIR"), "/kernels/nth_element.ptx"));

const STAGE1_F32: &str = "nth_element_stage1_f32";
const STAGE1_F16: &str = "nth_element_stage1_f16";
const STAGE2: &str = "nth_element_stage2";

/// Batched top-N selector with scratch buffers sized for a fixed maximum
/// batch and beam configuration.
///
/// All four buffers are allocated once in [`NthElementGpu::new`] and released
/// when the selector is dropped; selection never allocates. One selector must
/// not be driven from several threads at once: the scratch buffers are
/// shared by consecutive calls.
pub struct NthElementGpu {
    device_id: DeviceId,
    ctx: Arc<DriverContext>,
    stream: Arc<CudaStream>,
    stage1_f32: CudaFunction,
    stage1_f16: CudaFunction,
    stage2: CudaFunction,
    layout: ScratchLayout,
    temp_keys: CudaSlice<u32>,
    temp_values: CudaSlice<f32>,
    results: CudaSlice<TopKRecord>,
    host_results: PinnedHostSlice<TopKRecord>,
}

impl NthElementGpu {
    /// Create a selector on `device_id` for up to `max_beam_size` beams and
    /// `max_batch_size` batch entries.
    ///
    /// # Errors
    /// Returns an error if the device cannot be opened, the kernels cannot be
    /// loaded or the scratch buffers cannot be allocated. Callers running a
    /// decoder treat this as fatal.
    pub fn new(max_beam_size: usize, max_batch_size: usize, device_id: DeviceId) -> Result<Self> {
        let layout = ScratchLayout::new(max_beam_size, max_batch_size);

        let ctx = DriverContext::new(device_id.ordinal())?;
        ctx.bind_to_thread()?;
        let stream = ctx.default_stream();

        let module = ctx.load_module(Ptx::from_src(PTX))?;
        let load = |name: &str| {
            module
                .load_function(name)
                .map_err(|e| Error::MissingKernel(format!("{name}: {e}")))
        };
        let stage1_f32 = load(STAGE1_F32)?;
        let stage1_f16 = load(STAGE1_F16)?;
        let stage2 = load(STAGE2)?;

        let temp_elements = layout.temp_elements();
        let result_records = layout.result_records();
        let temp_keys = stream.alloc_zeros::<u32>(temp_elements)?;
        let temp_values = stream.alloc_zeros::<f32>(temp_elements)?;
        let results = stream.alloc_zeros::<TopKRecord>(result_records)?;
        let host_results = unsafe { ctx.alloc_pinned::<TopKRecord>(result_records)? };

        debug!(
            "N-best scratch on {device_id}: {temp_elements} temp entries, {result_records} result records \
             (max beam {max_beam_size}, max batch {max_batch_size})"
        );

        Ok(Self {
            device_id,
            ctx,
            stream,
            stage1_f32,
            stage1_f16,
            stage2,
            layout,
            temp_keys,
            temp_values,
            results,
            host_results,
        })
    }

    /// Create a selector sized and placed according to `config`.
    ///
    /// # Errors
    /// See [`NthElementGpu::new`].
    pub fn from_config(config: &SelectorConfig) -> Result<Self> {
        let layout = config.layout();
        Self::new(layout.max_beam_size, layout.max_batch_size, config.device)
    }

    /// Device the scratch buffers live on
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Capacity the selector was built for
    #[must_use]
    pub fn layout(&self) -> ScratchLayout {
        self.layout
    }

    /// Select the `n` best candidates of every batch entry of `scores` and
    /// append their keys and values to the output containers.
    ///
    /// Blocks until the results are on the host.
    ///
    /// # Panics
    /// Panics on caller-contract violations (see [`check_request`]) or if the
    /// reduction yields a wrong number of results.
    ///
    /// # Errors
    /// Returns an error if binding the device, a kernel launch or the
    /// device-to-host copy fails.
    pub fn get_n_best(
        &mut self,
        scores: &CudaTensor,
        n: usize,
        out_costs: &mut Vec<f32>,
        out_keys: &mut Vec<u32>,
        is_first: bool,
    ) -> Result<()> {
        self.ctx.bind_to_thread()?;
        let shape = check_request(scores, n, is_first, &self.layout);
        if shape.is_empty() {
            // A zero-sized grid is rejected by the driver.
            return Ok(());
        }

        self.launch_stage1(scores, &shape)?;
        self.launch_stage2(&shape)?;

        let count = shape.result_count();
        let host = self.host_results.as_mut_slice()?;
        self.stream
            .memcpy_dtoh(&self.results.slice(0..count), &mut host[..count])?;
        self.stream.synchronize()?;

        append_records(&host[..count], &shape, out_costs, out_keys);
        Ok(())
    }

    fn launch_stage1(&mut self, scores: &CudaTensor, shape: &SelectionShape) -> Result<()> {
        let vocab = shape.vocab as u32;
        let input_beams = shape.input_beams as u32;
        let blocks_per_beam = shape.blocks_per_beam as u32;
        let k = shape.n as u32;
        debug_assert!(shape.blocks_per_beam <= MAX_BLOCKS_PER_BEAM);

        let cfg = LaunchConfig {
            grid_dim: (blocks_per_beam, input_beams, shape.batch as u32),
            block_dim: (BLOCK_SIZE as u32, 1, 1),
            shared_mem_bytes: 0,
        };

        let func = match scores.storage() {
            Storage::F32(_) => &self.stage1_f32,
            Storage::F16(_) => &self.stage1_f16,
        };
        let mut builder = self.stream.launch_builder(func);
        match scores.storage() {
            Storage::F32(data) => builder.arg(data),
            Storage::F16(data) => builder.arg(data),
        };
        builder
            .arg(&mut self.temp_keys)
            .arg(&mut self.temp_values)
            .arg(&vocab)
            .arg(&input_beams)
            .arg(&blocks_per_beam)
            .arg(&k);
        unsafe { builder.launch(cfg) }?;
        Ok(())
    }

    fn launch_stage2(&mut self, shape: &SelectionShape) -> Result<()> {
        let candidates_per_batch =
            (shape.input_beams * shape.blocks_per_beam * shape.n) as u32;
        let n = shape.n as u32;

        let cfg = LaunchConfig {
            grid_dim: (shape.batch as u32, 1, 1),
            block_dim: (BLOCK_SIZE as u32, 1, 1),
            shared_mem_bytes: 0,
        };

        let mut builder = self.stream.launch_builder(&self.stage2);
        builder
            .arg(&self.temp_keys)
            .arg(&self.temp_values)
            .arg(&mut self.results)
            .arg(&candidates_per_batch)
            .arg(&n);
        unsafe { builder.launch(cfg) }?;
        Ok(())
    }
}

impl NthElement<CudaTensor> for NthElementGpu {
    fn get_n_best(
        &mut self,
        scores: &CudaTensor,
        n: usize,
        out_costs: &mut Vec<f32>,
        out_keys: &mut Vec<u32>,
        is_first: bool,
    ) -> Result<()> {
        NthElementGpu::get_n_best(self, scores, n, out_costs, out_keys, is_first)
    }
}

impl Drop for NthElementGpu {
    fn drop(&mut self) {
        // Scratch buffers free themselves when the fields drop; only the
        // binding is needed, and its failure is not actionable here.
        let _ = self.ctx.bind_to_thread();
    }
}

/// Build a selector for the decoder loop.
///
/// The decoder only sees the single-operation [`NthElement`] interface; the
/// boxed selector owns its scratch state.
///
/// # Panics
/// Panics if the device cannot be opened, the kernels cannot be loaded or
/// the scratch buffers cannot be allocated. Scratch is sized once for the
/// whole run, so there is no smaller configuration to fall back to.
#[must_use]
pub fn create_nth_element(
    beam_size: usize,
    batch_size: usize,
    device_id: DeviceId,
) -> Box<dyn NthElement<CudaTensor>> {
    match NthElementGpu::new(beam_size, batch_size, device_id) {
        Ok(selector) => Box::new(selector),
        Err(e) => panic!(
            "Failed to create N-best selector on {device_id} \
             (beam size {beam_size}, batch size {batch_size}): {e}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CudaContext;

    fn upload(ctx: &CudaContext, shape: &[usize], data: &[f32]) -> CudaTensor {
        CudaTensor::from_slice(ctx, shape, data).unwrap()
    }

    #[test]
    fn test_first_step_two_batches() {
        let ctx = CudaContext::new(DeviceId(0), 0).expect("Failed to create CUDA context");
        let mut selector = NthElementGpu::new(3, 2, DeviceId(0)).unwrap();

        let data = [
            0.1, 0.9, 0.3, 0.05, 0.4, // batch 0
            0.2, 0.2, 0.8, 0.1, 0.6, // batch 1
        ];
        let scores = upload(&ctx, &[2, 1, 1, 5], &data);

        let mut costs = Vec::new();
        let mut keys = Vec::new();
        selector
            .get_n_best(&scores, 3, &mut costs, &mut keys, true)
            .unwrap();

        assert_eq!(keys.len(), 6);
        assert_eq!(&keys[..3], &[1, 4, 2]);
        // 0.2 appears at words 0 and 1; the lower key wins.
        assert_eq!(&keys[3..], &[2, 4, 0]);
        assert_eq!(costs, vec![0.9, 0.4, 0.3, 0.8, 0.6, 0.2]);
    }

    #[test]
    fn test_appends_to_existing_output() {
        let ctx = CudaContext::new(DeviceId(0), 0).expect("Failed to create CUDA context");
        let mut selector = NthElementGpu::new(2, 1, DeviceId(0)).unwrap();
        let scores = upload(&ctx, &[1, 1, 1, 4], &[3.0, 1.0, 4.0, 1.5]);

        let mut costs = vec![-1.0];
        let mut keys = vec![7];
        selector
            .get_n_best(&scores, 2, &mut costs, &mut keys, true)
            .unwrap();
        assert_eq!(keys, vec![7, 2, 0]);
        assert_eq!(costs, vec![-1.0, 4.0, 3.0]);
    }

    #[test]
    fn test_keys_span_input_beams() {
        let ctx = CudaContext::new(DeviceId(0), 0).expect("Failed to create CUDA context");
        let mut selector = NthElementGpu::new(2, 1, DeviceId(0)).unwrap();
        // beam 0: [0.1, 0.2, 0.3], beam 1: [0.9, 0.0, 0.5]
        let scores = upload(&ctx, &[1, 1, 2, 3], &[0.1, 0.2, 0.3, 0.9, 0.0, 0.5]);

        let mut costs = Vec::new();
        let mut keys = Vec::new();
        selector
            .get_n_best(&scores, 2, &mut costs, &mut keys, false)
            .unwrap();
        assert_eq!(keys, vec![3, 5]);
        assert_eq!(costs, vec![0.9, 0.5]);
    }

    #[test]
    fn test_ties_prefer_lower_key() {
        let ctx = CudaContext::new(DeviceId(0), 0).expect("Failed to create CUDA context");
        let mut selector = NthElementGpu::new(3, 1, DeviceId(0)).unwrap();
        let scores = upload(&ctx, &[1, 1, 1, 5], &[0.5, 0.7, 0.5, 0.7, 0.5]);

        let mut costs = Vec::new();
        let mut keys = Vec::new();
        selector
            .get_n_best(&scores, 3, &mut costs, &mut keys, true)
            .unwrap();
        assert_eq!(keys, vec![1, 3, 0]);
    }

    #[test]
    #[should_panic(expected = "Size mismatch")]
    fn test_first_step_rejects_multiple_beams() {
        let ctx = CudaContext::new(DeviceId(0), 0).expect("Failed to create CUDA context");
        let mut selector = NthElementGpu::new(2, 1, DeviceId(0)).unwrap();
        let scores = upload(&ctx, &[1, 1, 2, 3], &[0.0; 6]);
        let _ = selector.get_n_best(&scores, 2, &mut Vec::new(), &mut Vec::new(), true);
    }

    #[test]
    fn test_from_config_uses_configured_capacity() {
        let config = SelectorConfig::from_json(r#"{"max_beam_size": 4, "max_batch_size": 3}"#).unwrap();
        let selector = NthElementGpu::from_config(&config).unwrap();
        assert_eq!(selector.layout(), ScratchLayout::new(4, 3));
        assert_eq!(selector.device_id(), DeviceId(0));
    }

    #[test]
    #[should_panic(expected = "Failed to create N-best selector on gpu0 (beam size 1000, batch size 100000)")]
    fn test_factory_scratch_exhaustion_is_fatal() {
        // Roughly 20 TB of stage-1 scratch: no device can hold it.
        let _ = create_nth_element(1000, 100_000, DeviceId(0));
    }

    #[test]
    fn test_factory_returns_working_selector() {
        let ctx = CudaContext::new(DeviceId(0), 0).expect("Failed to create CUDA context");
        let mut selector = create_nth_element(1, 1, DeviceId(0));
        let scores = upload(&ctx, &[1, 1, 1, 3], &[0.2, 0.7, 0.1]);

        let mut costs = Vec::new();
        let mut keys = Vec::new();
        selector
            .get_n_best(&scores, 1, &mut costs, &mut keys, true)
            .unwrap();
        assert_eq!(keys, vec![1]);
        assert_eq!(costs, vec![0.7]);
    }
}
