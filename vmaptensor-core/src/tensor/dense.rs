use std::{any::Any, sync::Arc};

use rand::Rng;

use super::{
    contiguous_strides, is_channels_last_strides, is_contiguous_strides, maybe_wrap_dim, sealed,
    MemoryFormat, TensorImpl,
};
use crate::{CpuStorage, DType, DispatchKey, DispatchKeySet, Error, Result};

/// A strided view over a [`CpuStorage`] buffer.
#[derive(Clone, Debug)]
pub struct DenseTensorImpl<T: DType> {
    storage: Arc<CpuStorage<T>>,
    sizes: Vec<usize>,
    strides: Vec<usize>,
    storage_offset: usize,
}

impl<T: DType> DenseTensorImpl<T> {
    /// Create a contiguous tensor from row-major data.
    pub fn from_vec(data: Vec<T>, sizes: &[usize]) -> Result<Self> {
        let expected: usize = sizes.iter().product();
        if data.len() != expected {
            return Err(Error::ShapeMismatch {
                shape: sizes.to_vec(),
                expected,
                got: data.len(),
            });
        }
        Ok(Self::from_contiguous(data, sizes))
    }

    fn from_contiguous(data: Vec<T>, sizes: &[usize]) -> Self {
        Self {
            storage: Arc::new(CpuStorage::new(data)),
            sizes: sizes.to_vec(),
            strides: contiguous_strides(sizes),
            storage_offset: 0,
        }
    }

    pub fn full(sizes: &[usize], v: T) -> Self {
        let n = sizes.iter().product();
        Self::from_contiguous(vec![v; n], sizes)
    }

    pub fn arange(n: usize, start: T, step: T) -> Self {
        let data = (0..n).map(|i| T::offset(i, start, step)).collect();
        Self::from_contiguous(data, &[n])
    }

    pub fn rand(sizes: &[usize]) -> Self
    where
        rand::distr::StandardUniform: rand::distr::Distribution<T>,
    {
        let n = sizes.iter().product();
        let mut rng = rand::rng();
        let data = (0..n).map(|_| rng.random::<T>()).collect();
        Self::from_contiguous(data, sizes)
    }

    pub fn randn(sizes: &[usize]) -> Self
    where
        rand_distr::StandardNormal: rand::distr::Distribution<T>,
    {
        let n = sizes.iter().product();
        let mut rng = rand::rng();
        let data = (0..n)
            .map(|_| rng.sample::<T, _>(rand_distr::StandardNormal))
            .collect();
        Self::from_contiguous(data, sizes)
    }

    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        let rank = self.sizes.len();
        let mut seen = vec![false; rank];
        let valid = perm.len() == rank
            && perm
                .iter()
                .all(|&d| d < rank && !std::mem::replace(&mut seen[d], true));
        if !valid {
            return Err(Error::InvalidPermutation {
                perm: perm.to_vec(),
                rank,
            });
        }
        Ok(Self {
            storage: self.storage.clone(),
            sizes: perm.iter().map(|&d| self.sizes[d]).collect(),
            strides: perm.iter().map(|&d| self.strides[d]).collect(),
            storage_offset: self.storage_offset,
        })
    }

    /// Insert a dim of `size` at `position` (`0..=dim()`) with stride 0.
    pub fn broadcast_axis(&self, position: usize, size: usize) -> Result<Self> {
        let rank = self.sizes.len();
        if position > rank {
            return Err(Error::DimOutOfRange {
                dim: position as isize,
                rank: rank + 1,
            });
        }
        let mut out = self.clone();
        out.sizes.insert(position, size);
        out.strides.insert(position, 0);
        Ok(out)
    }

    pub fn get(&self, index: &[usize]) -> Result<T> {
        let in_bounds =
            index.len() == self.sizes.len() && index.iter().zip(&self.sizes).all(|(i, n)| i < n);
        if !in_bounds {
            return Err(Error::IndexOutOfBounds {
                index: index.to_vec(),
                sizes: self.sizes.clone(),
            });
        }
        Ok(self.storage.0[self.offset_of(index)])
    }

    pub fn to_vec(&self) -> Vec<T> {
        let n = self.sizes.iter().product();
        let mut out = Vec::with_capacity(n);
        let mut index = vec![0usize; self.sizes.len()];
        for _ in 0..n {
            out.push(self.storage.0[self.offset_of(&index)]);
            // Odometer increment, last dim fastest.
            for d in (0..index.len()).rev() {
                index[d] += 1;
                if index[d] < self.sizes[d] {
                    break;
                }
                index[d] = 0;
            }
        }
        out
    }

    /// Every element the view addresses must lie inside its storage.
    fn check_in_storage(
        &self,
        sizes: &[usize],
        strides: &[usize],
        storage_offset: usize,
    ) -> Result<()> {
        let len = self.storage.len();
        // An empty view addresses nothing.
        let fits = sizes.contains(&0)
            || sizes
                .iter()
                .zip(strides)
                .try_fold(storage_offset, |last, (&n, &s)| {
                    (n - 1).checked_mul(s).and_then(|step| last.checked_add(step))
                })
                .is_some_and(|last| last < len);
        if fits {
            Ok(())
        } else {
            Err(Error::StorageOutOfBounds {
                sizes: sizes.to_vec(),
                strides: strides.to_vec(),
                storage_offset,
                len,
            })
        }
    }

    fn offset_of(&self, index: &[usize]) -> usize {
        self.storage_offset
            + index
                .iter()
                .zip(&self.strides)
                .map(|(i, s)| i * s)
                .sum::<usize>()
    }
}

impl<T: DType> sealed::Sealed for DenseTensorImpl<T> {}

impl<T: DType> TensorImpl<T> for DenseTensorImpl<T> {
    fn key_set(&self) -> DispatchKeySet {
        DispatchKeySet::from(DispatchKey::Cpu)
    }

    fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    fn is_contiguous(&self, memory_format: MemoryFormat) -> Result<bool> {
        Ok(match memory_format {
            MemoryFormat::Contiguous => is_contiguous_strides(&self.strides, &self.sizes),
            MemoryFormat::ChannelsLast => {
                self.sizes.len() == 4 && is_channels_last_strides(&self.strides, &self.sizes)
            }
            MemoryFormat::ChannelsLast3d => {
                self.sizes.len() == 5 && is_channels_last_strides(&self.strides, &self.sizes)
            }
        })
    }

    fn strides(&self) -> Result<&[usize]> {
        Ok(&self.strides)
    }

    fn stride(&self, d: isize) -> Result<usize> {
        let d = maybe_wrap_dim(d, self.sizes.len())?;
        Ok(self.strides[d])
    }

    fn set_size(&mut self, dim: isize, new_size: usize) -> Result<()> {
        let dim = maybe_wrap_dim(dim, self.sizes.len())?;
        let mut sizes = self.sizes.clone();
        sizes[dim] = new_size;
        self.check_in_storage(&sizes, &self.strides, self.storage_offset)?;
        self.sizes = sizes;
        Ok(())
    }

    fn set_stride(&mut self, dim: isize, new_stride: usize) -> Result<()> {
        let dim = maybe_wrap_dim(dim, self.sizes.len())?;
        let mut strides = self.strides.clone();
        strides[dim] = new_stride;
        self.check_in_storage(&self.sizes, &strides, self.storage_offset)?;
        self.strides = strides;
        Ok(())
    }

    fn set_storage_offset(&mut self, storage_offset: usize) -> Result<()> {
        self.check_in_storage(&self.sizes, &self.strides, storage_offset)?;
        self.storage_offset = storage_offset;
        Ok(())
    }

    fn has_storage(&self) -> Result<bool> {
        Ok(true)
    }

    fn storage(&self) -> Result<&Arc<CpuStorage<T>>> {
        Ok(&self.storage)
    }

    fn storage_offset(&self) -> Result<usize> {
        Ok(self.storage_offset)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permute_rejects_repeats() {
        let t = DenseTensorImpl::full(&[2, 3], 0f32);
        assert!(matches!(
            t.permute(&[0, 0]),
            Err(Error::InvalidPermutation { .. })
        ));
        assert!(matches!(
            t.permute(&[1]),
            Err(Error::InvalidPermutation { .. })
        ));
        assert!(t.permute(&[1, 0]).is_ok());
    }

    #[test]
    fn storage_check_allows_empty_views() {
        let t = DenseTensorImpl::full(&[2, 3], 0u8);
        assert!(t.check_in_storage(&[0, 100], &[100, 1], 50).is_ok());
        assert!(t.check_in_storage(&[2, 3], &[3, 1], 0).is_ok());
        assert!(t.check_in_storage(&[2, 3], &[3, 1], 1).is_err());
        assert!(t.check_in_storage(&[2, 2], &[usize::MAX, 1], 0).is_err());
    }

    #[test]
    fn arange_steps() {
        let t = DenseTensorImpl::<i64>::arange(4, 3, 2);
        assert_eq!(t.to_vec(), vec![3, 5, 7, 9]);
    }
}
