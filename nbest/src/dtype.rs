//! Element precisions of score tensors

use std::fmt;

/// Element type of a tensor buffer.
///
/// Only [`DType::F32`] and [`DType::F16`] are valid score precisions for
/// N-best selection; the others exist so that a misrouted tensor is reported
/// by name instead of being reinterpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point (the wide score precision)
    F32,
    /// 16-bit IEEE floating point (the narrow score precision)
    F16,
    /// Brain floating point (16-bit)
    BF16,
    /// 32-bit unsigned integer
    U32,
}

impl DType {
    /// Size of one element in bytes
    #[must_use]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F32 | Self::U32 => 4,
            Self::F16 | Self::BF16 => 2,
        }
    }

    /// Whether a score tensor of this precision can be fed to the selector.
    #[must_use]
    pub const fn is_score_precision(self) -> bool {
        matches!(self, Self::F32 | Self::F16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32 => write!(f, "float32"),
            Self::F16 => write!(f, "float16"),
            Self::BF16 => write!(f, "bfloat16"),
            Self::U32 => write!(f, "uint32"),
        }
    }
}

/// Host element types that can back a score tensor.
pub trait ScoreElement: Copy + Default + Send + Sync + 'static {
    /// The corresponding `DType` tag
    const DTYPE: DType;

    /// Widen to the f32 used for all result values.
    fn to_f32(self) -> f32;
}

impl ScoreElement for f32 {
    const DTYPE: DType = DType::F32;

    fn to_f32(self) -> f32 {
        self
    }
}

impl ScoreElement for half::f16 {
    const DTYPE: DType = DType::F16;

    fn to_f32(self) -> f32 {
        half::f16::to_f32(self)
    }
}
