//! Sequential loop over one or more co-iterated images.

use std::iter::FusedIterator;
use std::ops::Range;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::axes::{resolve_axes, stride_order, AxisOrder, AxisSelection};
use crate::cursor::{AxisRange, Cursor};
use crate::errors::{DimensionError, FunctorError, LoopError};
use crate::image::{ImageLike, ImageSet};
use crate::progress::Progress;

/// Driven axes bound to a concrete image set: traversal order (fastest
/// first) plus the full bounds of each ordered axis.
pub(crate) struct BoundAxes {
    pub order: AxisOrder,
    pub ranges: SmallVec<[AxisRange; 6]>,
}

/// Resolve and order a selection against an image set.
///
/// The traversal order is the primary image's stride order; axes whose
/// primary stride is negative are driven in reverse so that the traversal
/// still moves forward through memory. Size validation across the set
/// happens here, once, before any element is visited.
pub(crate) fn bind_axes<S: ImageSet>(
    selection: &AxisSelection,
    images: &S,
) -> Result<BoundAxes, LoopError> {
    let axes = resolve_axes(selection, images.ndim())?;
    images.check_compatible(&axes)?;
    let order = stride_order(&axes, |axis| images.stride(axis));
    let ranges = order
        .iter()
        .map(|&axis| AxisRange {
            start: 0,
            end: images.size(axis),
            reverse: images.stride(axis) < 0,
        })
        .collect();
    Ok(BoundAxes { order, ranges })
}

/// A single-threaded loop over a set of axes.
///
/// The loop advances every bound image in lock-step, in an order chosen to
/// respect the primary (first) image's stride order for cache locality. The
/// same `Loop` can be bound and run any number of times.
///
/// ```
/// use ndloop::{ArrayImage, Loop};
///
/// let image = ArrayImage::<u32>::zeros(&[4, 5]);
/// let mut sum = 0u32;
/// Loop::all()
///     .run(&mut (image.clone(),), |set| {
///         sum += set.0.value();
///         Ok(())
///     })
///     .unwrap();
/// assert_eq!(sum, 0);
/// ```
#[derive(Clone)]
pub struct Loop {
    selection: AxisSelection,
    progress: Option<Arc<Progress>>,
}

impl Loop {
    /// Loop over every dimension of the primary image.
    pub fn all() -> Loop {
        Loop {
            selection: AxisSelection::All,
            progress: None,
        }
    }

    /// Loop over a contiguous range of axis numbers.
    ///
    /// An empty range yields an empty traversal: the body is never invoked
    /// and `run` succeeds.
    pub fn over(axes: Range<usize>) -> Loop {
        Loop {
            selection: AxisSelection::Range(axes),
            progress: None,
        }
    }

    /// Loop over an explicit list of axes.
    pub fn axes(axes: &[usize]) -> Loop {
        Loop {
            selection: AxisSelection::Axes(AxisOrder::from_slice(axes)),
            progress: None,
        }
    }

    /// Attach a progress message.
    ///
    /// The loop then counts completed sweeps of the fastest axis into a
    /// shared [`Progress`], obtainable via [`progress`](Loop::progress).
    pub fn with_message(mut self, message: impl Into<String>) -> Loop {
        self.progress = Some(Arc::new(Progress::new(message.into())));
        self
    }

    /// Handle on the progress state, if a message was attached.
    pub fn progress(&self) -> Option<Arc<Progress>> {
        self.progress.clone()
    }

    pub(crate) fn selection(&self) -> &AxisSelection {
        &self.selection
    }

    /// Bind the loop to `images` and invoke `f` at every position.
    ///
    /// Construction failures (invalid axes, mismatched sizes) are reported
    /// before the first invocation. The first error returned by `f` stops
    /// the traversal and is relayed as [`LoopError::Functor`].
    pub fn run<S, F>(&self, images: &mut S, mut f: F) -> Result<(), LoopError>
    where
        S: ImageSet,
        F: FnMut(&mut S) -> Result<(), FunctorError>,
    {
        if self.selection.is_empty_range() {
            // Still bounds-checked: an empty range past the image's rank is
            // an error, not an empty traversal.
            resolve_axes(&self.selection, images.ndim())?;
            if let Some(progress) = &self.progress {
                progress.start(0);
                progress.finish();
            }
            return Ok(());
        }

        let bound = bind_axes(&self.selection, images)?;
        let sweep_len = bound.ranges.first().map(|r| r.len()).unwrap_or(1);
        let mut cursor = Cursor::new(bound.order, bound.ranges);

        if let Some(progress) = &self.progress {
            let total = if sweep_len == 0 {
                0
            } else {
                (cursor.steps() / sweep_len) as u64
            };
            progress.start(total);
        }

        cursor.reset_images(images);
        let mut sweep_pos = 0;
        let result = loop {
            if cursor.at_end() {
                break Ok(());
            }
            if let Err(err) = f(images) {
                break Err(LoopError::Functor(err));
            }
            sweep_pos += 1;
            if sweep_pos == sweep_len {
                sweep_pos = 0;
                if let Some(progress) = &self.progress {
                    progress.tick();
                }
            }
            cursor.advance_images(images);
        };
        if let Some(progress) = &self.progress {
            progress.finish();
        }
        result
    }

    /// Return a generator over the index tuples this loop would visit on
    /// `image`.
    ///
    /// Tuples list the driven axes in ascending axis-number order. The
    /// generator is single-pass; calling `indices` again restarts from the
    /// beginning with an identical sequence.
    pub fn indices<I: ImageLike>(&self, image: &I) -> Result<LoopIndices, DimensionError> {
        if self.selection.is_empty_range() {
            resolve_axes(&self.selection, image.ndim())?;
            return Ok(LoopIndices {
                cursor: Cursor::new(AxisOrder::new(), SmallVec::new()),
                slots: SmallVec::new(),
                remaining: 0,
            });
        }

        let axes = resolve_axes(&self.selection, image.ndim())?;
        let order = stride_order(&axes, |axis| image.stride(axis));
        let ranges: SmallVec<[AxisRange; 6]> = order
            .iter()
            .map(|&axis| AxisRange {
                start: 0,
                end: image.size(axis),
                reverse: image.stride(axis) < 0,
            })
            .collect();

        // Map each output slot (ascending axis number) to its place in the
        // traversal order.
        let mut pairs: SmallVec<[(usize, usize); 6]> = order
            .iter()
            .enumerate()
            .map(|(traversal_idx, &axis)| (axis, traversal_idx))
            .collect();
        pairs.sort_unstable();
        let slots = pairs.into_iter().map(|(_, traversal_idx)| traversal_idx).collect();

        let cursor = Cursor::new(order, ranges);
        Ok(LoopIndices {
            remaining: cursor.steps(),
            cursor,
            slots,
        })
    }
}

/// Lazy generator over the index tuples of a [`Loop`], detached from any
/// image data.
pub struct LoopIndices {
    cursor: Cursor,
    slots: SmallVec<[usize; 6]>,
    remaining: usize,
}

impl Iterator for LoopIndices {
    type Item = SmallVec<[usize; 6]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let item = self
            .slots
            .iter()
            .map(|&traversal_idx| self.cursor.position(traversal_idx))
            .collect();
        self.cursor.advance();
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for LoopIndices {}
impl FusedIterator for LoopIndices {}

/// The inner axes of a threaded loop, looped over by a row functor itself.
///
/// Handed to [`RowFunctor::process_row`](crate::RowFunctor::process_row) at
/// every outer position; the functor drives it over the images to visit the
/// row's elements in the primary image's stride order.
pub struct InnerLoop {
    axes: AxisOrder,
    ranges: SmallVec<[AxisRange; 6]>,
}

impl InnerLoop {
    pub(crate) fn new(axes: AxisOrder, ranges: SmallVec<[AxisRange; 6]>) -> InnerLoop {
        InnerLoop { axes, ranges }
    }

    /// The inner axes, fastest-varying first.
    pub fn axes(&self) -> &[usize] {
        &self.axes
    }

    /// Number of positions one sweep over the inner axes visits.
    pub fn steps(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).product()
    }

    /// Sweep the inner axes of `images`, invoking `f` at each position.
    pub fn run<S, F>(&self, images: &mut S, mut f: F) -> Result<(), FunctorError>
    where
        S: ImageSet,
        F: FnMut(&mut S) -> Result<(), FunctorError>,
    {
        let mut cursor = Cursor::new(self.axes.clone(), self.ranges.clone());
        cursor.reset_images(images);
        while !cursor.at_end() {
            f(images)?;
            cursor.advance_images(images);
        }
        Ok(())
    }
}
