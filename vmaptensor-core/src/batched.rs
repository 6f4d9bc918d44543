//! Batched tensors: a value with some of its dims hidden while a vectorizing
//! map is in effect.
//!
//! A [`BatchDim`] is a `(level, dim)` pair. `dim` indexes a dim of the
//! underlying value and `level` identifies the vmap that introduced it, outer
//! vmaps having smaller levels. Batch dims are private: in
//!
//! ```text
//! bt = make_batched(ones(2, 3, 5, 7), [(lvl=1, dim=0), (lvl=2, dim=1)])
//! ```
//!
//! dims 0 and 1 are batch dims, `bt.sizes()` is `[5, 7]`, and a reduction over
//! public dim 0 is a reduction over dim 2 of the underlying value.

use std::{any::Any, fmt, sync::Arc};

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::{
    tensor::{maybe_wrap_dim, sealed},
    CpuStorage, DType, DispatchKey, DispatchKeySet, Error, MemoryFormat, Result, Tensor,
    TensorImpl,
};

/// Largest underlying rank a batched tensor may have.
pub const VMAP_MAX_TENSOR_DIMS: usize = 64;

/// Number of batch dims stored inline before spilling to the heap. Few
/// programs nest more than five vmaps.
pub const BATCH_DIMS_STACK_SIZE: usize = 5;

/// A hidden dim of a batched tensor: dim `dim` of the underlying value,
/// introduced by the vmap at `level`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BatchDim {
    level: i64,
    dim: usize,
}

impl BatchDim {
    pub fn new(level: i64, dim: usize) -> Self {
        Self { level, dim }
    }

    pub fn level(&self) -> i64 {
        self.level
    }

    /// Index of this dim in the underlying value.
    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl fmt::Display for BatchDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(lvl={}, dim={})", self.level, self.dim)
    }
}

/// Batch dims sorted by increasing level, inline up to [`BATCH_DIMS_STACK_SIZE`].
pub type BatchDims = SmallVec<[BatchDim; BATCH_DIMS_STACK_SIZE]>;

/// Marks which dims of an underlying value are batch dims. Bit `i` set means
/// dim `i` is a batch dim.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchDimBitset(u64);

impl BatchDimBitset {
    pub fn set(&mut self, dim: usize) -> Result<()> {
        if dim >= VMAP_MAX_TENSOR_DIMS {
            return Err(Error::BatchDimOutOfBounds {
                dim,
                rank: VMAP_MAX_TENSOR_DIMS,
            });
        }
        self.0 |= 1 << dim;
        Ok(())
    }

    pub fn is_set(&self, dim: usize) -> bool {
        dim < VMAP_MAX_TENSOR_DIMS && (self.0 >> dim) & 1 == 1
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Position of the `n`th (0-indexed) cleared bit.
    pub fn nth_unset(&self, n: usize) -> Option<usize> {
        let mut free = !self.0;
        for _ in 0..n {
            if free == 0 {
                return None;
            }
            // Drop the lowest cleared bit.
            free &= free - 1;
        }
        (free != 0).then(|| free.trailing_zeros() as usize)
    }
}

impl fmt::Debug for BatchDimBitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries((0..VMAP_MAX_TENSOR_DIMS).filter(|d| self.is_set(*d)))
            .finish()
    }
}

pub fn create_batch_dim_bitset(bdims: &[BatchDim]) -> Result<BatchDimBitset> {
    let mut is_bdim = BatchDimBitset::default();
    for bdim in bdims {
        is_bdim.set(bdim.dim)?;
    }
    Ok(is_bdim)
}

/// Levels strictly increasing, dims in bounds and distinct.
/// `rank` must not exceed [`VMAP_MAX_TENSOR_DIMS`].
fn check_batch_dims(bdims: &[BatchDim], rank: usize) -> Result<()> {
    let mut previous: Option<i64> = None;
    let mut seen = BatchDimBitset::default();
    for bdim in bdims {
        if let Some(previous) = previous.filter(|&p| bdim.level <= p) {
            return Err(Error::LevelsNotIncreasing {
                previous,
                level: bdim.level,
            });
        }
        if bdim.dim >= rank {
            return Err(Error::BatchDimOutOfBounds {
                dim: bdim.dim,
                rank,
            });
        }
        if seen.is_set(bdim.dim) {
            return Err(Error::DuplicateBatchDim { dim: bdim.dim });
        }
        seen.set(bdim.dim)?;
        previous = Some(bdim.level);
    }
    Ok(())
}

/// A tensor whose batch dims are hidden from its public shape.
///
/// Holds the underlying value and its [`BatchDims`], sorted by increasing
/// level. Immutable once built: adding a batch dim produces a new wrapper.
#[derive(Clone, Debug)]
pub struct BatchedTensorImpl<T: DType> {
    value: Tensor<T>,
    bdims: BatchDims,
    sizes: Vec<usize>,
}

impl<T: DType> BatchedTensorImpl<T> {
    pub fn new(value: Tensor<T>, bdims: impl IntoIterator<Item = BatchDim>) -> Result<Self> {
        if is_batched(&value) {
            return Err(Error::AlreadyWrapped);
        }
        let rank = value.dim();
        if rank > VMAP_MAX_TENSOR_DIMS {
            return Err(Error::rank_exceeded(rank));
        }
        let bdims: BatchDims = bdims.into_iter().collect();
        check_batch_dims(&bdims, rank)?;

        let is_bdim = create_batch_dim_bitset(&bdims)?;
        let sizes = value
            .sizes()
            .iter()
            .enumerate()
            .filter(|(d, _)| !is_bdim.is_set(*d))
            .map(|(_, &n)| n)
            .collect();
        trace!(rank, ?bdims, "batched tensor created");
        Ok(Self {
            value,
            bdims,
            sizes,
        })
    }

    /// The batch dims, sorted by increasing level.
    pub fn bdims(&self) -> &[BatchDim] {
        &self.bdims
    }

    pub fn value(&self) -> &Tensor<T> {
        &self.value
    }

    pub fn into_value(self) -> Tensor<T> {
        self.value
    }

    pub fn into_parts(self) -> (Tensor<T>, BatchDims) {
        (self.value, self.bdims)
    }

    /// Rank of the value with the batch dims removed.
    pub fn public_rank(&self) -> usize {
        self.sizes.len()
    }

    /// Given a public dim index, return the index of that dim in [`Self::value`].
    ///
    /// With `wrap_dim`, negative indices count back from the public rank.
    /// For example, with
    ///
    /// ```text
    /// bt = make_batched(ones(2, 3, 5, 7), [(lvl=1, dim=0), (lvl=2, dim=2)])
    /// ```
    ///
    /// `bt.actual_dim(0)` is 1, `bt.actual_dim(1)` is 3 and `bt.actual_dim(2)`
    /// is an error.
    pub fn actual_dim(&self, dim: isize, wrap_dim: bool) -> Result<usize> {
        let public_rank = self.public_rank();
        let out_of_range = Error::DimOutOfRange {
            dim,
            rank: public_rank,
        };
        let public_dim = if wrap_dim {
            maybe_wrap_dim(dim, public_rank)?
        } else if dim >= 0 && (dim as usize) < public_rank {
            dim as usize
        } else {
            return Err(out_of_range);
        };
        // Public dim `d` is the `d`th cleared bit: with bdims at 1 and 4,
        // public dim 3 lives at underlying dim 5.
        create_batch_dim_bitset(&self.bdims)?
            .nth_unset(public_dim)
            .ok_or(out_of_range)
    }

    /// Hide one more dim of the same underlying value. `dim` indexes the
    /// underlying value and must not already be hidden; `level` must exceed
    /// every existing level.
    pub fn add_hidden_dim(self, level: i64, dim: usize) -> Result<Self> {
        let (value, mut bdims) = self.into_parts();
        bdims.push(BatchDim::new(level, dim));
        Self::new(value, bdims)
    }
}

fn refuse<R>(op: &'static str) -> Result<R> {
    debug!(op, "structural query refused on batched tensor");
    Err(Error::NotSupported { op })
}

impl<T: DType> sealed::Sealed for BatchedTensorImpl<T> {}

impl<T: DType> TensorImpl<T> for BatchedTensorImpl<T> {
    fn key_set(&self) -> DispatchKeySet {
        DispatchKeySet::from(DispatchKey::Batched)
    }

    fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    fn is_contiguous(&self, _memory_format: MemoryFormat) -> Result<bool> {
        refuse("is_contiguous")
    }

    fn strides(&self) -> Result<&[usize]> {
        refuse("strides")
    }

    fn stride(&self, _d: isize) -> Result<usize> {
        refuse("stride")
    }

    fn set_size(&mut self, _dim: isize, _new_size: usize) -> Result<()> {
        refuse("set_size")
    }

    fn set_stride(&mut self, _dim: isize, _new_stride: usize) -> Result<()> {
        refuse("set_stride")
    }

    fn set_storage_offset(&mut self, _storage_offset: usize) -> Result<()> {
        refuse("set_storage_offset")
    }

    fn has_storage(&self) -> Result<bool> {
        refuse("has_storage")
    }

    fn storage(&self) -> Result<&Arc<CpuStorage<T>>> {
        refuse("storage")
    }

    fn storage_offset(&self) -> Result<usize> {
        refuse("storage_offset")
    }

    fn clone_box(&self) -> Box<dyn TensorImpl<T>> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

pub fn is_batched<T: DType>(tensor: &Tensor<T>) -> bool {
    tensor.key_set().has(DispatchKey::Batched)
}

/// The batched implementation behind `tensor`, if there is one.
pub fn maybe_get_batched<T: DType>(tensor: &Tensor<T>) -> Option<&BatchedTensorImpl<T>> {
    if !is_batched(tensor) {
        return None;
    }
    tensor.tensor_impl().as_any().downcast_ref()
}

/// Reinterpret the implementation behind `tensor` as batched without checking.
/// Prefer [`maybe_get_batched`].
///
/// # Safety
/// `is_batched(tensor)` must hold.
pub unsafe fn unsafe_get_batched<T: DType>(tensor: &Tensor<T>) -> &BatchedTensorImpl<T> {
    debug_assert!(is_batched(tensor));
    let imp: *const _ = tensor.tensor_impl();
    // SAFETY: only `BatchedTensorImpl` carries the `Batched` key, and the
    // trait is sealed.
    unsafe { &*imp.cast::<BatchedTensorImpl<T>>() }
}

/// Wrap `tensor`, hiding the dims named by `bdims`.
pub fn make_batched<T: DType>(
    tensor: Tensor<T>,
    bdims: impl IntoIterator<Item = BatchDim>,
) -> Result<Tensor<T>> {
    Ok(Tensor::from_impl(BatchedTensorImpl::new(tensor, bdims)?))
}

/// Hide public dim `dim` of `tensor` at `level`. A tensor that is already
/// batched keeps its batch dims and gains one more.
pub fn add_batch_dim<T: DType>(tensor: Tensor<T>, level: i64, dim: isize) -> Result<Tensor<T>> {
    trace!(level, dim, "adding batch dim");
    match tensor.into_batched() {
        Ok(batched) => {
            let actual = batched.actual_dim(dim, true)?;
            Ok(Tensor::from_impl(batched.add_hidden_dim(level, actual)?))
        }
        Err(plain) => {
            let dim = maybe_wrap_dim(dim, plain.dim())?;
            make_batched(plain, [BatchDim::new(level, dim)])
        }
    }
}

/// Expose the batch dim at `level` as public dim `out_dim` once its vmap
/// exits.
///
/// A tensor with no batch dim at `level` did not vary over that vmap, so it
/// gains a broadcast dim of `batch_size` instead. Batch dims of other levels
/// stay hidden; with none left the plain value is returned.
pub fn remove_batch_dim<T: DType>(
    tensor: Tensor<T>,
    level: i64,
    batch_size: usize,
    out_dim: isize,
) -> Result<Tensor<T>> {
    trace!(level, batch_size, out_dim, "removing batch dim");
    let (value, mut bdims) = match tensor.into_batched() {
        Ok(batched) => batched.into_parts(),
        Err(plain) => (plain, BatchDims::new()),
    };
    let public_rank = value.dim() - bdims.len();
    let out_dim = maybe_wrap_dim(out_dim, public_rank + 1)?;

    let found = bdims.iter().position(|b| b.level == level);
    let (value, exposed) = match found {
        Some(i) => {
            let exposed = bdims.remove(i).dim;
            (value, exposed)
        }
        None => {
            let end = value.dim();
            (value.broadcast_axis(end, batch_size)?, end)
        }
    };

    // Move `exposed` in front of the `out_dim`th dim that remains public.
    let is_bdim = create_batch_dim_bitset(&bdims)?;
    let mut order: SmallVec<[usize; 8]> = (0..value.dim()).filter(|&d| d != exposed).collect();
    let at = order
        .iter()
        .enumerate()
        .filter(|&(_, &d)| !is_bdim.is_set(d))
        .nth(out_dim)
        .map_or(order.len(), |(i, _)| i);
    order.insert(at, exposed);

    let value = value.permute(&order)?;
    let mut new_position = vec![0; order.len()];
    for (i, &d) in order.iter().enumerate() {
        new_position[d] = i;
    }
    let bdims: BatchDims = bdims
        .iter()
        .map(|b| BatchDim::new(b.level, new_position[b.dim]))
        .collect();
    if bdims.is_empty() {
        Ok(value)
    } else {
        make_batched(value, bdims)
    }
}
