//! Traversal cursor over a set of axis ranges.
//!
//! The cursor is the one place in the crate that implements the "odometer"
//! carry logic for multi-axis index incrementing. Everything else (sequential
//! loops, per-chunk worker iteration, inner row loops) drives a [`Cursor`].

use smallvec::{smallvec, SmallVec};

use crate::axes::AxisOrder;
use crate::image::ImageSet;

/// Half-open bounds for one driven axis.
///
/// `reverse` indicates the axis is traversed from `end - 1` down to `start`,
/// used for axes whose stride in the primary image is negative so that the
/// traversal still moves forward through memory.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisRange {
    pub start: usize,
    pub end: usize,
    pub reverse: bool,
}

impl AxisRange {
    /// Bounds covering `start..end` in ascending index order.
    pub fn forward(start: usize, end: usize) -> AxisRange {
        AxisRange {
            start,
            end,
            reverse: false,
        }
    }

    /// Bounds covering `start..end` in descending index order.
    pub fn backward(start: usize, end: usize) -> AxisRange {
        AxisRange {
            start,
            end,
            reverse: true,
        }
    }

    /// Number of positions in the range.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// The index the traversal starts from. Meaningless if the range is empty.
    fn first(&self) -> usize {
        if self.reverse {
            self.end - 1
        } else {
            self.start
        }
    }
}

/// How one axis of the position changes during an odometer step.
enum PositionChange {
    /// Step by one position in the traversal direction.
    Move(isize),

    /// Jump back to an absolute index (a carry reset).
    Set(usize),
}

/// A lightweight traversal cursor holding a multi-index position and per-axis
/// bounds, with no attachment to any data.
///
/// `axes` lists the driven axes fastest-varying first; `ranges` holds the
/// bounds for each, in the same order. A cursor over zero axes yields exactly
/// one position (the "scalar" case); a cursor with any empty range yields
/// none.
#[derive(Clone, Debug)]
pub struct Cursor {
    axes: AxisOrder,
    ranges: SmallVec<[AxisRange; 6]>,
    pos: SmallVec<[usize; 6]>,
    done: bool,
}

impl Cursor {
    /// Create a cursor in its start state.
    ///
    /// Panics if `axes` and `ranges` have different lengths.
    pub fn new(axes: AxisOrder, ranges: SmallVec<[AxisRange; 6]>) -> Cursor {
        assert!(axes.len() == ranges.len());
        let mut cursor = Cursor {
            pos: smallvec![0; ranges.len()],
            done: false,
            axes,
            ranges,
        };
        cursor.reset();
        cursor
    }

    /// Axes driven by this cursor, fastest-varying first.
    pub fn axes(&self) -> &[usize] {
        &self.axes
    }

    /// Current position along the `i`-th driven axis (traversal order).
    pub fn position(&self, i: usize) -> usize {
        self.pos[i]
    }

    /// Total number of positions a full traversal visits.
    pub fn steps(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).product()
    }

    /// Return the cursor to its start state.
    pub fn reset(&mut self) {
        self.reset_with(|_, _| {});
    }

    /// Reset the cursor, mirroring the start position into `images`.
    pub fn reset_images<S: ImageSet>(&mut self, images: &mut S) {
        self.reset_with(|axis, change| match change {
            PositionChange::Set(index) => images.set_index(axis, index),
            PositionChange::Move(delta) => images.move_index(axis, delta),
        });
    }

    /// Advance by one position, carrying into slower axes on overflow.
    ///
    /// Returns `false` once the slowest axis overflows and the traversal is
    /// complete. O(1) amortized, O(axes) when several axes roll over at once.
    pub fn advance(&mut self) -> bool {
        self.advance_with(|_, _| {})
    }

    /// Advance the cursor, mirroring every position change into `images`.
    pub fn advance_images<S: ImageSet>(&mut self, images: &mut S) -> bool {
        self.advance_with(|axis, change| match change {
            PositionChange::Set(index) => images.set_index(axis, index),
            PositionChange::Move(delta) => images.move_index(axis, delta),
        })
    }

    /// True once the traversal is exhausted (or if it was empty to begin
    /// with).
    pub fn at_end(&self) -> bool {
        self.done
    }

    fn reset_with(&mut self, mut apply: impl FnMut(usize, PositionChange)) {
        self.done = self.ranges.iter().any(|r| r.is_empty());
        if self.done {
            return;
        }
        for i in 0..self.axes.len() {
            self.pos[i] = self.ranges[i].first();
            apply(self.axes[i], PositionChange::Set(self.pos[i]));
        }
    }

    fn advance_with(&mut self, mut apply: impl FnMut(usize, PositionChange)) -> bool {
        if self.done {
            return false;
        }
        for i in 0..self.axes.len() {
            let range = self.ranges[i];
            let axis = self.axes[i];
            if range.reverse {
                if self.pos[i] > range.start {
                    self.pos[i] -= 1;
                    apply(axis, PositionChange::Move(-1));
                    return true;
                }
            } else if self.pos[i] + 1 < range.end {
                self.pos[i] += 1;
                apply(axis, PositionChange::Move(1));
                return true;
            }
            // Carry: this axis wraps to its start, continue with the next
            // slower axis.
            self.pos[i] = range.first();
            apply(axis, PositionChange::Set(self.pos[i]));
        }
        self.done = true;
        false
    }
}
