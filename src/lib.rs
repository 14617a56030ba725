//! ndloop is a small engine for iterating over N-dimensional strided images,
//! sequentially or across a pool of worker threads.
//!
//! Images describe their memory layout through signed per-axis strides; loops
//! traverse in the order that moves forward through the primary image's
//! memory, whatever the layout, so the same functor runs cache-friendly over
//! row-major, column-major or reversed data. Multiple images can be
//! co-iterated in lock-step, each following its own layout.
//!
//! The main entry points are [`Loop`] for single-threaded traversal and
//! [`ThreadedLoop`] for multi-threaded traversal. Threaded execution splits
//! the iteration space into disjoint chunks, so functors may write to shared
//! image storage without locks.
//!
//! ```
//! use ndloop::{ArrayImage, FunctorError, ThreadedLoop};
//!
//! // Threshold one image into another, using all cores.
//! let src = ArrayImage::from_vec(&[64, 64], (0..64 * 64).collect()).unwrap();
//! let dst = ArrayImage::<i32>::zeros(&[64, 64]);
//!
//! ThreadedLoop::all()
//!     .run(
//!         &|set: &mut (ArrayImage<i32>, ArrayImage<i32>)| -> Result<(), FunctorError> {
//!             let value = if set.0.value() > 2048 { 1 } else { 0 };
//!             set.1.set_value(value);
//!             Ok(())
//!         },
//!         &(src, dst.clone()),
//!     )
//!     .unwrap();
//!
//! assert_eq!(dst.to_vec().iter().sum::<i32>(), 64 * 64 - 2049);
//! ```

mod axes;
mod cursor;
mod errors;
mod functor;
mod image;
mod loops;
mod partition;
mod progress;
mod storage;
mod threaded;

pub use axes::{resolve_axes, stride_order, AxisOrder, AxisSelection};
pub use cursor::{AxisRange, Cursor};
pub use errors::{
    ConcurrencyError, DimensionError, DimensionMismatchError, FunctorError, ImageError, LoopError,
};
pub use functor::{RowFunctor, VoxelFunctor};
pub use image::{ArrayImage, ImageLike, ImageSet};
pub use loops::{InnerLoop, Loop, LoopIndices};
pub use partition::TaskChunk;
pub use progress::Progress;
pub use storage::SharedStorage;
pub use threaded::{ThreadConfig, ThreadedLoop};

/// Convenience imports for the common case of looping over images.
pub mod prelude {
    pub use super::{
        ArrayImage, ImageLike, ImageSet, Loop, RowFunctor, ThreadConfig, ThreadedLoop, VoxelFunctor,
    };
}
