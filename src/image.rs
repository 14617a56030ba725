//! The image interface consumed by the loop engine, and a concrete
//! strided in-memory image.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::errors::{DimensionError, DimensionMismatchError, ImageError, LoopError};
use crate::storage::SharedStorage;

/// Minimal capability set the loop engine requires of an image.
///
/// An image-like object exposes its dimensions, signed strides and a mutable
/// per-axis index. The engine is agnostic to the element type; functors
/// access values through whatever interface the concrete image provides
/// (eg. [`ArrayImage::value`]).
///
/// Implementations keep the invariant `0 <= index(axis) < size(axis)` for
/// every axis; the engine never moves an index out of bounds.
pub trait ImageLike {
    /// Number of dimensions.
    fn ndim(&self) -> usize;

    /// Size along `axis`.
    fn size(&self, axis: usize) -> usize;

    /// Signed stride along `axis`: the sign gives the direction in which
    /// incrementing the index moves through memory, the absolute value the
    /// relative rate.
    fn stride(&self, axis: usize) -> isize;

    /// Current position along `axis`.
    fn index(&self, axis: usize) -> usize;

    /// Set the position along `axis`.
    fn set_index(&mut self, axis: usize, index: usize);

    /// Move the position along `axis` by `delta`.
    fn move_index(&mut self, axis: usize, delta: isize);
}

/// One or more images advanced in lock-step by a loop.
///
/// The first image of the set is the *primary* image: its strides decide the
/// traversal order and its sizes are the reference for the co-iteration size
/// check. Implemented for tuples of one to four [`ImageLike`] values.
pub trait ImageSet {
    /// Number of dimensions of the primary image.
    fn ndim(&self) -> usize;

    /// Size of the primary image along `axis`.
    fn size(&self, axis: usize) -> usize;

    /// Stride of the primary image along `axis`.
    fn stride(&self, axis: usize) -> isize;

    /// Set the position of every image in the set along `axis`.
    fn set_index(&mut self, axis: usize, index: usize);

    /// Move the position of every image in the set along `axis`.
    fn move_index(&mut self, axis: usize, delta: isize);

    /// Check that every image agrees with the primary image's size along
    /// every driven axis.
    ///
    /// Performed once per loop bind, never per element.
    fn check_compatible(&self, axes: &[usize]) -> Result<(), LoopError>;
}

macro_rules! impl_image_set {
    ($($img:ident => $idx:tt),+) => {
        impl<$($img: ImageLike),+> ImageSet for ($($img,)+) {
            fn ndim(&self) -> usize {
                self.0.ndim()
            }

            fn size(&self, axis: usize) -> usize {
                self.0.size(axis)
            }

            fn stride(&self, axis: usize) -> isize {
                self.0.stride(axis)
            }

            fn set_index(&mut self, axis: usize, index: usize) {
                $( self.$idx.set_index(axis, index); )+
            }

            fn move_index(&mut self, axis: usize, delta: isize) {
                $( self.$idx.move_index(axis, delta); )+
            }

            fn check_compatible(&self, axes: &[usize]) -> Result<(), LoopError> {
                for &axis in axes {
                    let expected = if axis < self.0.ndim() {
                        self.0.size(axis)
                    } else {
                        return Err(DimensionError::AxisOutOfBounds {
                            axis,
                            ndim: self.0.ndim(),
                        }
                        .into());
                    };
                    $(
                        if axis >= self.$idx.ndim() {
                            return Err(DimensionError::AxisOutOfBounds {
                                axis,
                                ndim: self.$idx.ndim(),
                            }
                            .into());
                        }
                        let actual = self.$idx.size(axis);
                        if actual != expected {
                            return Err(DimensionMismatchError {
                                axis,
                                expected,
                                actual,
                            }
                            .into());
                        }
                    )+
                }
                Ok(())
            }
        }
    };
}

impl_image_set!(A => 0);
impl_image_set!(A => 0, B => 1);
impl_image_set!(A => 0, B => 1, C => 2);
impl_image_set!(A => 0, B => 1, C => 2, D => 3);

/// Return true if a layout's distinct indices may map to the same storage
/// offset.
///
/// Determining this exactly for arbitrary strides is hard, so the check is
/// conservative: after sorting axes by increasing absolute stride, each
/// axis's stride must step over the maximum offset reachable by the faster
/// axes. Axes of size <= 1 contribute no offsets and are skipped.
fn may_have_internal_overlap(shape: &[usize], strides: &[isize]) -> bool {
    if shape.iter().any(|&size| size == 0) {
        return false;
    }

    let mut stride_shape: SmallVec<[(usize, usize); 6]> = strides
        .iter()
        .zip(shape.iter())
        .filter(|(_, &size)| size > 1)
        .map(|(&stride, &size)| (stride.unsigned_abs(), size))
        .collect();
    stride_shape.sort_unstable();

    let mut max_offset = 0;
    for (stride, size) in stride_shape {
        if stride <= max_offset {
            return true;
        }
        max_offset += (size - 1) * stride;
    }
    false
}

/// An N-dimensional strided image over shared element storage.
///
/// The storage is reference-counted: cloning an `ArrayImage` is cheap and
/// yields a new handle over the *same* elements with its own independent
/// position. This is the per-worker handle the threading engine hands to
/// each thread.
///
/// Negative strides are supported; the image keeps a base offset so that the
/// all-zeros index of such a layout still maps into the buffer.
pub struct ArrayImage<T> {
    storage: Arc<SharedStorage<T>>,
    shape: SmallVec<[usize; 6]>,
    strides: SmallVec<[isize; 6]>,
    pos: SmallVec<[usize; 6]>,

    /// Storage offset of the current position. Kept in sync incrementally so
    /// per-step position updates are O(1).
    offset: isize,

    /// Storage offset of the all-zeros index.
    base: isize,
}

impl<T> Clone for ArrayImage<T> {
    fn clone(&self) -> ArrayImage<T> {
        ArrayImage {
            storage: Arc::clone(&self.storage),
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            pos: self.pos.clone(),
            offset: self.offset,
            base: self.base,
        }
    }
}

/// Strides of a contiguous row-major layout.
///
/// Sizes are floored at one so that shapes with a zero-sized axis still get
/// a monotone layout.
fn contiguous_strides(shape: &[usize]) -> SmallVec<[isize; 6]> {
    let mut strides: SmallVec<[isize; 6]> = SmallVec::with_capacity(shape.len());
    for i in 0..shape.len() {
        strides.push(shape[i + 1..].iter().map(|&size| size.max(1)).product::<usize>() as isize);
    }
    strides
}

impl<T: Copy> ArrayImage<T> {
    /// Create a contiguous row-major image filled with the default element.
    pub fn zeros(shape: &[usize]) -> ArrayImage<T>
    where
        T: Default,
    {
        let len = shape.iter().product();
        ArrayImage::from_vec(shape, vec![T::default(); len])
            .expect("contiguous layout is always valid")
    }

    /// Create a contiguous row-major image from existing data.
    ///
    /// The data length must exactly match the product of the shape.
    pub fn from_vec(shape: &[usize], data: Vec<T>) -> Result<ArrayImage<T>, ImageError> {
        if data.len() != shape.iter().product::<usize>() {
            return Err(ImageError::StorageLengthMismatch);
        }
        ArrayImage::from_vec_with_strides(shape, &contiguous_strides(shape), data)
    }

    /// Create an image with an explicit memory layout.
    ///
    /// Validates that the layout does not alias itself: among axes of size
    /// greater than one, strides must be non-zero and pairwise distinct in
    /// absolute value, the farthest reachable offset must fit in `data`, and
    /// a conservative overlap check must pass.
    pub fn from_vec_with_strides(
        shape: &[usize],
        strides: &[isize],
        data: Vec<T>,
    ) -> Result<ArrayImage<T>, ImageError> {
        if strides.len() != shape.len() {
            return Err(ImageError::StrideCountMismatch);
        }
        // An empty image addresses no storage, so its layout cannot alias or
        // run out of bounds; only non-empty shapes need validation.
        let empty = shape.iter().any(|&size| size == 0);
        if !empty {
            for (axis, (&stride, &size)) in strides.iter().zip(shape.iter()).enumerate() {
                if size <= 1 {
                    continue;
                }
                if stride == 0 {
                    return Err(ImageError::ZeroStride(axis));
                }
                let rank = stride.unsigned_abs();
                for (&other, &other_size) in strides[..axis].iter().zip(shape[..axis].iter()) {
                    if other_size > 1 && other.unsigned_abs() == rank {
                        return Err(ImageError::DuplicateStrideRank(rank));
                    }
                }
            }
            if may_have_internal_overlap(shape, strides) {
                return Err(ImageError::MayOverlap);
            }
        }

        let base: isize = if empty {
            0
        } else {
            strides
                .iter()
                .zip(shape.iter())
                .filter(|(&stride, _)| stride < 0)
                .map(|(&stride, &size)| (size as isize - 1) * -stride)
                .sum()
        };
        if !empty {
            let max_offset: isize = base
                + strides
                    .iter()
                    .zip(shape.iter())
                    .filter(|(&stride, _)| stride > 0)
                    .map(|(&stride, &size)| (size as isize - 1) * stride)
                    .sum::<isize>();
            if max_offset as usize >= data.len() {
                return Err(ImageError::StorageTooShort);
            }
        }

        Ok(ArrayImage {
            storage: Arc::new(SharedStorage::from_vec(data)),
            shape: SmallVec::from_slice(shape),
            strides: SmallVec::from_slice(strides),
            pos: SmallVec::from_elem(0, shape.len()),
            offset: base,
            base,
        })
    }

    /// Read the element at the current position.
    pub fn value(&self) -> T {
        // Safety: the offset of an in-bounds position is within the storage
        // (checked at construction), and the scheduler's disjoint-chunk
        // contract rules out a concurrent writer of this element.
        unsafe { self.storage.get(self.offset as usize) }
    }

    /// Write the element at the current position.
    pub fn set_value(&mut self, value: T) {
        // Safety: as for `value`; concurrent access to this element is ruled
        // out by the disjointness of the index ranges assigned to workers.
        unsafe { self.storage.set(self.offset as usize, value) }
    }

    /// Copy the underlying buffer out in storage order.
    ///
    /// Callers must not invoke this while a threaded loop over the image is
    /// running; `run()` blocks until all workers have joined, so this is only
    /// a concern for hand-rolled threading.
    pub fn to_vec(&self) -> Vec<T> {
        // Safety: see above.
        unsafe { self.storage.to_vec() }
    }
}

impl<T> ArrayImage<T> {
    /// Total number of elements addressed by the image.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sizes of each dimension.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Signed strides of each dimension, in elements.
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }
}

impl<T> ImageLike for ArrayImage<T> {
    fn ndim(&self) -> usize {
        self.shape.len()
    }

    fn size(&self, axis: usize) -> usize {
        self.shape[axis]
    }

    fn stride(&self, axis: usize) -> isize {
        self.strides[axis]
    }

    fn index(&self, axis: usize) -> usize {
        self.pos[axis]
    }

    fn set_index(&mut self, axis: usize, index: usize) {
        debug_assert!(index < self.shape[axis]);
        let delta = index as isize - self.pos[axis] as isize;
        self.pos[axis] = index;
        self.offset += delta * self.strides[axis];
    }

    fn move_index(&mut self, axis: usize, delta: isize) {
        let index = self.pos[axis] as isize + delta;
        debug_assert!(index >= 0 && (index as usize) < self.shape[axis]);
        self.pos[axis] = index as usize;
        self.offset += delta * self.strides[axis];
    }
}
