use std::{any::Any, fmt::Debug, sync::Arc};

use crate::{
    batched::BatchedTensorImpl, CpuStorage, DType, DispatchKeySet, Error, Result,
};

pub mod dense;

pub use dense::DenseTensorImpl;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Memory layouts a tensor can be checked against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryFormat {
    #[default]
    Contiguous,
    /// NHWC ordering of a rank 4 tensor.
    ChannelsLast,
    /// NDHWC ordering of a rank 5 tensor.
    ChannelsLast3d,
}

/// The structural surface every tensor implementation answers.
///
/// Dense tensors answer every query from their own metadata. A batched tensor
/// answers the shape queries for its public dims and refuses the rest with
/// [`Error::NotSupported`].
///
/// This trait is sealed; [`DenseTensorImpl`] and [`BatchedTensorImpl`] are the
/// only implementors.
pub trait TensorImpl<T: DType>: sealed::Sealed + Debug + Send + Sync {
    fn key_set(&self) -> DispatchKeySet;

    fn sizes(&self) -> &[usize];

    fn dim(&self) -> usize {
        self.sizes().len()
    }

    fn numel(&self) -> usize {
        self.sizes().iter().product()
    }

    fn is_contiguous(&self, memory_format: MemoryFormat) -> Result<bool>;

    fn strides(&self) -> Result<&[usize]>;

    fn stride(&self, d: isize) -> Result<usize>;

    fn set_size(&mut self, dim: isize, new_size: usize) -> Result<()>;

    fn set_stride(&mut self, dim: isize, new_stride: usize) -> Result<()>;

    fn set_storage_offset(&mut self, storage_offset: usize) -> Result<()>;

    fn has_storage(&self) -> Result<bool>;

    fn storage(&self) -> Result<&Arc<CpuStorage<T>>>;

    fn storage_offset(&self) -> Result<usize>;

    #[doc(hidden)]
    fn clone_box(&self) -> Box<dyn TensorImpl<T>>;

    #[doc(hidden)]
    fn as_any(&self) -> &dyn Any;

    #[doc(hidden)]
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// An owned tensor value. Either dense, or batched over a dense value.
#[derive(Debug)]
pub struct Tensor<T: DType> {
    imp: Box<dyn TensorImpl<T>>,
}

impl<T: DType> Clone for Tensor<T> {
    fn clone(&self) -> Self {
        Self {
            imp: self.imp.clone_box(),
        }
    }
}

impl<T: DType> From<DenseTensorImpl<T>> for Tensor<T> {
    fn from(value: DenseTensorImpl<T>) -> Self {
        Self::from_impl(value)
    }
}

impl<T: DType> Tensor<T> {
    pub(crate) fn from_impl<I: TensorImpl<T> + 'static>(imp: I) -> Self {
        Self { imp: Box::new(imp) }
    }

    /// Borrow the implementation behind this handle.
    pub(crate) fn tensor_impl(&self) -> &dyn TensorImpl<T> {
        &*self.imp
    }

    pub fn key_set(&self) -> DispatchKeySet {
        self.imp.key_set()
    }

    pub fn dim(&self) -> usize {
        self.imp.dim()
    }

    pub fn sizes(&self) -> &[usize] {
        self.imp.sizes()
    }

    pub fn size(&self, d: isize) -> Result<usize> {
        let d = maybe_wrap_dim(d, self.dim())?;
        Ok(self.sizes()[d])
    }

    pub fn numel(&self) -> usize {
        self.imp.numel()
    }

    pub fn is_contiguous(&self, memory_format: MemoryFormat) -> Result<bool> {
        self.imp.is_contiguous(memory_format)
    }

    pub fn strides(&self) -> Result<&[usize]> {
        self.imp.strides()
    }

    pub fn stride(&self, d: isize) -> Result<usize> {
        self.imp.stride(d)
    }

    pub fn set_size(&mut self, dim: isize, new_size: usize) -> Result<()> {
        self.imp.set_size(dim, new_size)
    }

    pub fn set_stride(&mut self, dim: isize, new_stride: usize) -> Result<()> {
        self.imp.set_stride(dim, new_stride)
    }

    pub fn set_storage_offset(&mut self, storage_offset: usize) -> Result<()> {
        self.imp.set_storage_offset(storage_offset)
    }

    pub fn has_storage(&self) -> Result<bool> {
        self.imp.has_storage()
    }

    pub fn storage(&self) -> Result<&Arc<CpuStorage<T>>> {
        self.imp.storage()
    }

    pub fn storage_offset(&self) -> Result<usize> {
        self.imp.storage_offset()
    }

    /// The dense implementation, if this tensor is not batched.
    pub fn as_dense(&self) -> Option<&DenseTensorImpl<T>> {
        self.imp.as_any().downcast_ref()
    }

    /// Take the batched implementation out of this handle, or hand the tensor
    /// back unchanged if it is not batched.
    pub fn into_batched(self) -> std::result::Result<BatchedTensorImpl<T>, Self> {
        if !self.imp.as_any().is::<BatchedTensorImpl<T>>() {
            return Err(self);
        }
        match self.imp.into_any().downcast::<BatchedTensorImpl<T>>() {
            Ok(batched) => Ok(*batched),
            Err(_) => unreachable!("implementation type was checked above"),
        }
    }

    /// Reorder the dims of a dense tensor. Dim `i` of the result is dim
    /// `perm[i]` of `self`. Storage is shared.
    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        Ok(self.dense_or_refuse("permute")?.permute(perm)?.into())
    }

    /// Insert a new dim of `size` at `position` that repeats the existing data
    /// (stride 0). Storage is shared.
    pub fn broadcast_axis(&self, position: usize, size: usize) -> Result<Self> {
        Ok(self
            .dense_or_refuse("broadcast_axis")?
            .broadcast_axis(position, size)?
            .into())
    }

    /// Read one element of a dense tensor.
    pub fn get(&self, index: &[usize]) -> Result<T> {
        self.dense_or_refuse("get")?.get(index)
    }

    /// Copy the elements of a dense tensor out in row-major order.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        Ok(self.dense_or_refuse("to_vec")?.to_vec())
    }

    fn dense_or_refuse(&self, op: &'static str) -> Result<&DenseTensorImpl<T>> {
        self.as_dense().ok_or(Error::NotSupported { op })
    }
}

impl<T: DType> Tensor<T> {
    pub fn from_vec(data: Vec<T>, sizes: &[usize]) -> Result<Self> {
        Ok(DenseTensorImpl::from_vec(data, sizes)?.into())
    }

    /// Create a tensor filled with some value.
    pub fn full(sizes: &[usize], v: T) -> Self {
        DenseTensorImpl::full(sizes, v).into()
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(sizes: &[usize]) -> Self {
        Self::full(sizes, T::ZERO)
    }

    /// Create a tensor filled with ones.
    pub fn ones(sizes: &[usize]) -> Self {
        Self::full(sizes, T::ONE)
    }

    /// A vector of `n` elements starting at `start` and advancing by `step`.
    pub fn arange(n: usize, start: T, step: T) -> Self {
        DenseTensorImpl::arange(n, start, step).into()
    }
}

impl<T: DType> Tensor<T>
where
    rand::distr::StandardUniform: rand::distr::Distribution<T>,
{
    /// A tensor of samples from the standard uniform distribution of `T`.
    pub fn rand(sizes: &[usize]) -> Self {
        DenseTensorImpl::rand(sizes).into()
    }
}

impl<T: DType> Tensor<T>
where
    rand_distr::StandardNormal: rand::distr::Distribution<T>,
{
    /// A tensor of samples from the standard normal distribution.
    pub fn randn(sizes: &[usize]) -> Self {
        DenseTensorImpl::randn(sizes).into()
    }
}

/// Normalize a possibly negative dim index against `rank`.
pub fn maybe_wrap_dim(dim: isize, rank: usize) -> Result<usize> {
    let wrapped = if dim < 0 { dim + rank as isize } else { dim };
    if wrapped < 0 || wrapped as usize >= rank {
        return Err(Error::DimOutOfRange { dim, rank });
    }
    Ok(wrapped as usize)
}

pub(crate) fn is_contiguous_strides(strides: &[usize], shape: &[usize]) -> bool {
    is_strided_in_order(strides, shape, &contiguous_strides(shape))
}

// Size-1 dims may carry any stride, and an empty tensor is contiguous in
// every format.
fn is_strided_in_order(strides: &[usize], shape: &[usize], expected: &[usize]) -> bool {
    if shape.contains(&0) {
        return true;
    }
    shape
        .iter()
        .zip(strides)
        .zip(expected)
        .all(|((&n, &s), &e)| n == 1 || s == e)
}

pub(crate) fn is_channels_last_strides(strides: &[usize], shape: &[usize]) -> bool {
    let order: &[usize] = match shape.len() {
        4 => &[1, 3, 2, 0],
        5 => &[1, 4, 3, 2, 0],
        _ => return false,
    };
    is_strided_in_order(strides, shape, &strides_for_order(shape, order))
}

/// Compute default (contiguous) strides for a tensor of given shape.
pub(crate) fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut acc = 1;
    // Iterate dims in reverse to accumulate products
    for dim in shape.iter().rev() {
        strides.push(acc);
        acc *= *dim;
    }
    strides.reverse();
    strides
}

/// Strides for a dense layout whose dims are laid out innermost first in `order`.
fn strides_for_order(shape: &[usize], order: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut acc = 1;
    for &d in order {
        strides[d] = acc;
        acc *= shape[d];
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_negative_dims() {
        assert_eq!(maybe_wrap_dim(-1, 3), Ok(2));
        assert_eq!(maybe_wrap_dim(-3, 3), Ok(0));
        assert_eq!(maybe_wrap_dim(2, 3), Ok(2));
        assert_eq!(
            maybe_wrap_dim(3, 3),
            Err(Error::DimOutOfRange { dim: 3, rank: 3 })
        );
        assert_eq!(
            maybe_wrap_dim(-4, 3),
            Err(Error::DimOutOfRange { dim: -4, rank: 3 })
        );
        assert!(maybe_wrap_dim(0, 0).is_err());
    }

    #[test]
    fn channels_last_layout() {
        let shape = [2, 3, 4, 5];
        let nhwc = strides_for_order(&shape, &[1, 3, 2, 0]);
        assert_eq!(nhwc, vec![60, 1, 15, 3]);
        assert!(is_channels_last_strides(&nhwc, &shape));
        assert!(!is_contiguous_strides(&nhwc, &shape));
        assert!(is_contiguous_strides(&contiguous_strides(&shape), &shape));
    }

    #[test]
    fn unit_dims_ignore_stride() {
        assert!(is_contiguous_strides(&[99, 1], &[1, 4]));
        assert!(is_contiguous_strides(&[0, 0], &[0, 4]));
    }
}
