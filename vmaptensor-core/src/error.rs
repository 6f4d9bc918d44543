use thiserror::Error;

use crate::VMAP_MAX_TENSOR_DIMS;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("cannot wrap a tensor that is already batched")]
    AlreadyWrapped,

    #[error("vmap only supports tensors of dimensionality up to {max}; got a tensor with dim {rank}")]
    RankExceeded { rank: usize, max: usize },

    #[error("dimension out of range (expected to be in range of {}, but got {dim})", dim_range(.rank))]
    DimOutOfRange { dim: isize, rank: usize },

    #[error("{op} is not supported on a batched tensor")]
    NotSupported { op: &'static str },

    #[error("batch dims must be sorted by strictly increasing level; got level {level} after level {previous}")]
    LevelsNotIncreasing { previous: i64, level: i64 },

    #[error("batch dim {dim} is out of bounds for a tensor with dim {rank}")]
    BatchDimOutOfBounds { dim: usize, rank: usize },

    #[error("dimension {dim} appears more than once in the batch dims")]
    DuplicateBatchDim { dim: usize },

    #[error("shape {shape:?} requires {expected} elements, but got {got}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },

    #[error("{perm:?} is not a permutation of the dims of a tensor with dim {rank}")]
    InvalidPermutation { perm: Vec<usize>, rank: usize },

    #[error("index {index:?} is out of bounds for a tensor of sizes {sizes:?}")]
    IndexOutOfBounds { index: Vec<usize>, sizes: Vec<usize> },

    #[error("view with sizes {sizes:?}, strides {strides:?} and storage offset {storage_offset} reaches past a storage of {len} elements")]
    StorageOutOfBounds {
        sizes: Vec<usize>,
        strides: Vec<usize>,
        storage_offset: usize,
        len: usize,
    },
}

fn dim_range(rank: &usize) -> String {
    if *rank == 0 {
        "[], the tensor has no dimensions".to_string()
    } else {
        format!("[-{rank}, {}]", rank - 1)
    }
}

impl Error {
    pub(crate) fn rank_exceeded(rank: usize) -> Self {
        Self::RankExceeded {
            rank,
            max: VMAP_MAX_TENSOR_DIMS,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
