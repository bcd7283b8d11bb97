//! N-best selection contract shared by all backends.
//!
//! A selector receives a score tensor of shape
//! `[batch, 1, input_beams, vocab]` and returns, per batch entry, the `n`
//! highest-scoring `(key, value)` pairs over the entry's flattened
//! `input_beams * vocab` candidates, ordered by value descending (ties: lower
//! key first). Keys are relative to the batch entry: `beam * vocab + word`.
//!
//! Contract violations are caller bugs and panic; nothing here returns a
//! recoverable error for them.

#![allow(clippy::module_name_repetitions)]

use crate::tensor::Tensor;
use crate::Result;

/// Hard ceiling on the vocabulary dimension.
pub const MAX_VOCAB_SIZE: usize = 500_000;

/// Upper bound on stage-1 reduction blocks assigned to one beam row.
pub const MAX_BLOCKS_PER_BEAM: usize = 50;

/// Threads per reduction block. Must match `BLOCK_SIZE` in the kernels.
pub const BLOCK_SIZE: usize = 512;

/// One selected candidate: position inside the batch entry and its score.
///
/// `#[repr(C)]` so the device kernels can write it directly.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TopKRecord {
    pub index: u32,
    pub value: f32,
}

#[cfg(feature = "cuda-interop")]
unsafe impl cudarc::driver::DeviceRepr for TopKRecord {}

#[cfg(feature = "cuda-interop")]
unsafe impl cudarc::driver::ValidAsZeroBits for TopKRecord {}

/// Scratch sizing fixed at selector construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchLayout {
    pub max_beam_size: usize,
    pub max_batch_size: usize,
}

impl ScratchLayout {
    /// # Panics
    /// Panics if either maximum is zero.
    #[must_use]
    pub fn new(max_beam_size: usize, max_batch_size: usize) -> Self {
        assert!(max_beam_size > 0, "max_beam_size must be at least 1");
        assert!(max_batch_size > 0, "max_batch_size must be at least 1");
        Self {
            max_beam_size,
            max_batch_size,
        }
    }

    /// Entries in each of the stage-1 index and value buffers:
    /// every (batch, input beam, block) triple keeps up to `max_beam_size`
    /// candidates.
    #[must_use]
    pub fn temp_elements(&self) -> usize {
        self.max_batch_size * self.max_beam_size * self.max_beam_size * MAX_BLOCKS_PER_BEAM
    }

    /// Records in the device result buffer and its pinned host mirror.
    #[must_use]
    pub fn result_records(&self) -> usize {
        self.max_batch_size * self.max_beam_size
    }
}

/// Number of stage-1 blocks that split one beam row of `vocab` entries.
#[must_use]
pub fn blocks_per_beam(vocab: usize) -> usize {
    vocab.div_ceil(BLOCK_SIZE).clamp(1, MAX_BLOCKS_PER_BEAM)
}

/// Validated dimensions of one selection call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionShape {
    pub batch: usize,
    pub input_beams: usize,
    pub vocab: usize,
    pub n: usize,
    pub blocks_per_beam: usize,
}

impl SelectionShape {
    /// Candidates per batch entry (`input_beams * vocab`)
    #[must_use]
    pub fn row_len(&self) -> usize {
        self.input_beams * self.vocab
    }

    /// Records produced by the call (`batch * n`)
    #[must_use]
    pub fn result_count(&self) -> usize {
        self.batch * self.n
    }

    /// True when the call selects nothing (an empty batch)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.result_count() == 0
    }

    /// Stage-1 scratch entries touched by the call
    #[must_use]
    pub fn temp_used(&self) -> usize {
        self.batch * self.input_beams * self.blocks_per_beam * self.n
    }
}

/// Check a selection request against the selector's capacity.
///
/// # Panics
/// Panics on any caller-contract violation: a score tensor that is not
/// `[batch, 1, input_beams, vocab]`, an unsupported element precision, an
/// input beam count other than 1 on the first step or other than `n`
/// afterwards, a vocabulary above [`MAX_VOCAB_SIZE`], a batch above the
/// configured maximum, a beam size above the configured maximum, or `n`
/// outside `1..=input_beams * vocab`.
pub fn check_request<T: Tensor + ?Sized>(
    scores: &T,
    n: usize,
    is_first: bool,
    layout: &ScratchLayout,
) -> SelectionShape {
    assert!(
        scores.ndim() == 4,
        "N-best selection expects a 4D score tensor, got shape {:?}",
        scores.shape()
    );
    let dtype = scores.dtype();
    assert!(
        dtype.is_score_precision(),
        "Unsupported element type {dtype} for N-best selection"
    );

    let vocab = scores.dim(-1);
    let input_beams = scores.dim(-2);
    let batch = scores.dim(-4);
    assert!(
        scores.dim(-3) == 1,
        "N-best selection expects shape [batch, 1, beams, vocab], got {:?}",
        scores.shape()
    );

    let expected_beams = if is_first { 1 } else { n };
    assert!(
        input_beams == expected_beams,
        "Size mismatch: input beam count {input_beams} != {expected_beams} (n={n}, is_first={is_first})"
    );
    assert!(
        vocab <= MAX_VOCAB_SIZE,
        "Vocabulary size {vocab} exceeds MAX_VOCAB_SIZE of {MAX_VOCAB_SIZE}"
    );
    assert!(
        batch <= layout.max_batch_size,
        "Batch size {batch} exceeds the configured maximum of {}",
        layout.max_batch_size
    );
    let beam = n.max(input_beams);
    assert!(
        beam <= layout.max_beam_size,
        "Beam size {beam} exceeds the configured maximum of {}",
        layout.max_beam_size
    );
    assert!(n > 0, "Cannot select the 0 best candidates");
    assert!(
        n <= input_beams * vocab,
        "Cannot select {n} candidates from {} per batch entry",
        input_beams * vocab
    );

    SelectionShape {
        batch,
        input_beams,
        vocab,
        n,
        blocks_per_beam: blocks_per_beam(vocab),
    }
}

/// Append `records` to the caller's output containers, preserving order.
///
/// # Panics
/// Panics if `records` does not hold exactly `shape.result_count()` entries,
/// or if a record's key lies outside its batch entry (the reduction's
/// padding key included). Either means the reduction itself is broken.
pub fn append_records(
    records: &[TopKRecord],
    shape: &SelectionShape,
    out_costs: &mut Vec<f32>,
    out_keys: &mut Vec<u32>,
) {
    let expected = shape.result_count();
    let row_len = shape.row_len();
    if let Some(bad) = records.iter().find(|r| r.index as usize >= row_len) {
        panic!(
            "N-best selection produced key {} outside the {row_len} candidates of a batch entry",
            bad.index
        );
    }

    let keys_before = out_keys.len();
    let costs_before = out_costs.len();

    out_keys.extend(records.iter().map(|r| r.index));
    out_costs.extend(records.iter().map(|r| r.value));

    let appended = out_keys.len() - keys_before;
    assert!(
        appended == expected && out_costs.len() - costs_before == expected,
        "N-best selection produced {appended} results, expected {expected}"
    );
}

/// The single operation a decoder loop needs from a selector.
///
/// Implementations own their scratch state and are driven serially by one
/// decoding loop; they are `Send` so the loop may live on any thread.
pub trait NthElement<T: Tensor>: Send {
    /// Append the `n` best `(key, value)` pairs of every batch entry of
    /// `scores` to `out_keys` / `out_costs`.
    ///
    /// `is_first` marks the first decoding step, where every batch entry has
    /// a single input beam.
    ///
    /// # Panics
    /// Panics on caller-contract violations (see [`check_request`]) and if
    /// the reduction does not yield exactly `batch * n` results.
    ///
    /// # Errors
    /// Returns an error if a device launch or transfer fails.
    fn get_n_best(
        &mut self,
        scores: &T,
        n: usize,
        out_costs: &mut Vec<f32>,
        out_keys: &mut Vec<u32>,
        is_first: bool,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    struct FakeScores {
        shape: Vec<usize>,
        dtype: DType,
    }

    impl Tensor for FakeScores {
        fn shape(&self) -> &[usize] {
            &self.shape
        }

        fn dtype(&self) -> DType {
            self.dtype
        }
    }

    fn scores(batch: usize, beams: usize, vocab: usize) -> FakeScores {
        FakeScores {
            shape: vec![batch, 1, beams, vocab],
            dtype: DType::F32,
        }
    }

    fn layout() -> ScratchLayout {
        ScratchLayout::new(5, 4)
    }

    #[test]
    fn test_scratch_sizing() {
        let layout = ScratchLayout::new(6, 8);
        assert_eq!(layout.temp_elements(), 8 * 6 * 6 * MAX_BLOCKS_PER_BEAM);
        assert_eq!(layout.result_records(), 48);
    }

    #[test]
    fn test_blocks_per_beam() {
        assert_eq!(blocks_per_beam(1), 1);
        assert_eq!(blocks_per_beam(BLOCK_SIZE), 1);
        assert_eq!(blocks_per_beam(BLOCK_SIZE + 1), 2);
        assert_eq!(blocks_per_beam(32_000), 50);
        assert_eq!(blocks_per_beam(MAX_VOCAB_SIZE), MAX_BLOCKS_PER_BEAM);
    }

    #[test]
    fn test_first_step_shape() {
        let shape = check_request(&scores(2, 1, 5), 3, true, &layout());
        assert_eq!(
            shape,
            SelectionShape {
                batch: 2,
                input_beams: 1,
                vocab: 5,
                n: 3,
                blocks_per_beam: 1,
            }
        );
        assert_eq!(shape.row_len(), 5);
        assert_eq!(shape.result_count(), 6);
        assert_eq!(shape.temp_used(), 6);
    }

    #[test]
    fn test_temp_usage_fits_layout_at_capacity() {
        let layout = layout();
        let shape = check_request(&scores(4, 5, MAX_VOCAB_SIZE), 5, false, &layout);
        assert!(shape.temp_used() <= layout.temp_elements());
        assert!(shape.result_count() <= layout.result_records());
    }

    #[test]
    #[should_panic(expected = "Size mismatch")]
    fn test_first_step_requires_single_beam() {
        let _ = check_request(&scores(2, 3, 100), 3, true, &layout());
    }

    #[test]
    #[should_panic(expected = "Size mismatch")]
    fn test_later_step_requires_n_beams() {
        let _ = check_request(&scores(2, 2, 100), 3, false, &layout());
    }

    #[test]
    fn test_vocab_at_ceiling_accepted() {
        let shape = check_request(&scores(1, 1, MAX_VOCAB_SIZE), 1, true, &layout());
        assert_eq!(shape.vocab, MAX_VOCAB_SIZE);
    }

    #[test]
    #[should_panic(expected = "exceeds MAX_VOCAB_SIZE")]
    fn test_vocab_above_ceiling_is_fatal() {
        let _ = check_request(&scores(1, 1, MAX_VOCAB_SIZE + 1), 1, true, &layout());
    }

    #[test]
    #[should_panic(expected = "Batch size 5 exceeds")]
    fn test_batch_above_max_is_fatal() {
        let _ = check_request(&scores(5, 1, 100), 2, true, &layout());
    }

    #[test]
    fn test_beam_at_max_accepted() {
        let shape = check_request(&scores(4, 5, 100), 5, false, &layout());
        assert_eq!(shape.n, 5);
    }

    #[test]
    #[should_panic(expected = "Beam size 6 exceeds")]
    fn test_beam_above_max_is_fatal() {
        let _ = check_request(&scores(1, 1, 100), 6, true, &layout());
    }

    #[test]
    #[should_panic(expected = "Unsupported element type bfloat16")]
    fn test_unsupported_precision_is_fatal() {
        let t = FakeScores {
            shape: vec![1, 1, 1, 10],
            dtype: DType::BF16,
        };
        let _ = check_request(&t, 1, true, &layout());
    }

    #[test]
    #[should_panic(expected = "expects a 4D score tensor")]
    fn test_rank_must_be_four() {
        let t = FakeScores {
            shape: vec![1, 10],
            dtype: DType::F32,
        };
        let _ = check_request(&t, 1, true, &layout());
    }

    #[test]
    #[should_panic(expected = "Cannot select 4 candidates from 3")]
    fn test_n_above_candidate_count_is_fatal() {
        let _ = check_request(&scores(1, 1, 3), 4, true, &layout());
    }

    fn two_of_five() -> SelectionShape {
        SelectionShape {
            batch: 1,
            input_beams: 1,
            vocab: 5,
            n: 2,
            blocks_per_beam: 1,
        }
    }

    #[test]
    fn test_append_records_preserves_order() {
        let records = [
            TopKRecord {
                index: 1,
                value: 0.9,
            },
            TopKRecord {
                index: 4,
                value: 0.4,
            },
        ];
        let mut costs = vec![-1.0];
        let mut keys = vec![99];
        append_records(&records, &two_of_five(), &mut costs, &mut keys);
        assert_eq!(keys, vec![99, 1, 4]);
        assert_eq!(costs, vec![-1.0, 0.9, 0.4]);
    }

    #[test]
    #[should_panic(expected = "produced 1 results, expected 2")]
    fn test_append_records_count_mismatch_is_fatal() {
        let records = [TopKRecord::default()];
        append_records(&records, &two_of_five(), &mut Vec::new(), &mut Vec::new());
    }

    #[test]
    #[should_panic(expected = "produced key 4294967295 outside the 5 candidates")]
    fn test_append_records_padding_key_is_fatal() {
        let records = [
            TopKRecord {
                index: 3,
                value: 0.5,
            },
            TopKRecord {
                index: u32::MAX,
                value: f32::NEG_INFINITY,
            },
        ];
        append_records(&records, &two_of_five(), &mut Vec::new(), &mut Vec::new());
    }

    #[test]
    #[should_panic(expected = "produced key 5 outside the 5 candidates")]
    fn test_append_records_key_past_row_is_fatal() {
        let records = [
            TopKRecord {
                index: 5,
                value: 0.5,
            },
            TopKRecord {
                index: 0,
                value: 0.1,
            },
        ];
        append_records(&records, &two_of_five(), &mut Vec::new(), &mut Vec::new());
    }

    #[test]
    fn test_empty_batch_selects_nothing() {
        let shape = check_request(&scores(0, 1, 5), 3, true, &layout());
        assert_eq!(shape.batch, 0);
        assert!(shape.is_empty());
        assert_eq!(shape.temp_used(), 0);

        let mut costs = vec![1.0];
        let mut keys = vec![2];
        append_records(&[], &shape, &mut costs, &mut keys);
        assert_eq!(keys, vec![2]);
        assert_eq!(costs, vec![1.0]);
    }
}
