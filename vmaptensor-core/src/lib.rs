//! Batched tensors for vectorizing maps.
//!
//! A vmap runs a function over one or more extra "batch" dims of its inputs.
//! Inside the vmap those inputs are [`BatchedTensorImpl`]s: the batch dims are
//! hidden, so generic tensor code sees only the public shape, and code that
//! must reach the real data translates public dims with
//! [`BatchedTensorImpl::actual_dim`].
//!
//! ```
//! use vmaptensor_core::{make_batched, maybe_get_batched, BatchDim, Tensor};
//!
//! let x = Tensor::<f32>::zeros(&[2, 3, 5, 7]);
//! let bt = make_batched(x, [BatchDim::new(1, 0), BatchDim::new(2, 1)]).unwrap();
//! assert_eq!(bt.sizes(), &[5, 7]);
//! assert_eq!(maybe_get_batched(&bt).unwrap().actual_dim(0, true), Ok(2));
//! ```

mod batched;
mod cpu_storage;
mod dispatch;
mod dtype;
mod error;
mod tensor;

pub use batched::{
    add_batch_dim, create_batch_dim_bitset, is_batched, make_batched, maybe_get_batched,
    remove_batch_dim, unsafe_get_batched, BatchDim, BatchDimBitset, BatchDims, BatchedTensorImpl,
    BATCH_DIMS_STACK_SIZE, VMAP_MAX_TENSOR_DIMS,
};
pub use cpu_storage::CpuStorage;
pub use dispatch::{DispatchKey, DispatchKeySet};
pub use dtype::DType;
pub use error::{Error, Result};
pub use tensor::{maybe_wrap_dim, DenseTensorImpl, MemoryFormat, Tensor, TensorImpl};
