use crate::DType;

/// Flat element buffer backing dense tensors. Views share it through an `Arc`.
#[derive(Clone, Debug, PartialEq)]
pub struct CpuStorage<T: DType>(pub(crate) Vec<T>);

impl<T: DType> CpuStorage<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self(data)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }
}
