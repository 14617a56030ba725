//! Axis selection and stride-order computation.
//!
//! Strides are signed: the sign gives the direction in which incrementing the
//! index moves through memory, and the absolute value gives the relative rate
//! at which it moves. The axis with the smallest absolute stride is the
//! fastest-varying in memory, and traversing axes in ascending absolute
//! stride maximizes locality regardless of how the image is stored.

use std::ops::Range;

use smallvec::SmallVec;

use crate::errors::DimensionError;

/// Ordered list of axis indices. Inline storage covers typical image ranks
/// (x, y, z, volume plus a couple of spares).
pub type AxisOrder = SmallVec<[usize; 6]>;

/// The set of axes a loop drives, before binding to a concrete image.
#[derive(Clone, Debug, PartialEq)]
pub enum AxisSelection {
    /// Every dimension of the primary image.
    All,

    /// A contiguous range of axis numbers.
    Range(Range<usize>),

    /// An explicit list of axis numbers.
    Axes(AxisOrder),
}

impl AxisSelection {
    /// True for a `Range` selection with `start == end`.
    ///
    /// An empty range is a valid degenerate case (eg. an empty ROI) that
    /// yields an empty traversal, unlike an empty image rank which yields a
    /// single "scalar" step.
    pub(crate) fn is_empty_range(&self) -> bool {
        matches!(self, AxisSelection::Range(r) if r.start == r.end)
    }
}

/// Resolve an axis selection against an image with `ndim` dimensions.
///
/// The result lists axes in axis-number order; traversal order is decided
/// separately by [`stride_order`].
pub fn resolve_axes(selection: &AxisSelection, ndim: usize) -> Result<AxisOrder, DimensionError> {
    match selection {
        AxisSelection::All => Ok((0..ndim).collect()),
        AxisSelection::Range(range) => {
            if range.start > range.end || range.end > ndim {
                return Err(DimensionError::InvalidRange {
                    start: range.start,
                    end: range.end,
                    ndim,
                });
            }
            Ok(range.clone().collect())
        }
        AxisSelection::Axes(axes) => {
            for (i, &axis) in axes.iter().enumerate() {
                if axis >= ndim {
                    return Err(DimensionError::AxisOutOfBounds { axis, ndim });
                }
                if axes[..i].contains(&axis) {
                    return Err(DimensionError::DuplicateAxis(axis));
                }
            }
            Ok(axes.clone())
        }
    }
}

/// Sort `axes` from fastest- to slowest-varying in memory.
///
/// Axes are ordered by ascending absolute stride, with ties broken by
/// ascending axis number so that the result is deterministic. This is a pure
/// function of its inputs.
pub fn stride_order(axes: &[usize], stride_of: impl Fn(usize) -> isize) -> AxisOrder {
    let mut order: AxisOrder = axes.iter().copied().collect();
    order.sort_unstable_by_key(|&axis| (stride_of(axis).unsigned_abs(), axis));
    order
}

#[cfg(test)]
mod tests {
    use super::{resolve_axes, stride_order, AxisOrder, AxisSelection};
    use crate::errors::DimensionError;

    #[test]
    fn test_stride_order() {
        struct Case<'a> {
            axes: &'a [usize],
            strides: &'a [isize],
            expected: &'a [usize],
        }

        let cases = [
            // Row-major 3D: last axis fastest.
            Case {
                axes: &[0, 1, 2],
                strides: &[20, 5, 1],
                expected: &[2, 1, 0],
            },
            // Column-major 3D: first axis fastest.
            Case {
                axes: &[0, 1, 2],
                strides: &[1, 4, 20],
                expected: &[0, 1, 2],
            },
            // Sign is ignored when ranking.
            Case {
                axes: &[0, 1, 2],
                strides: &[-20, 5, -1],
                expected: &[2, 1, 0],
            },
            // Subset of axes.
            Case {
                axes: &[1, 3],
                strides: &[1, 40, 4, 10],
                expected: &[3, 1],
            },
            // Tie on absolute stride breaks by axis number.
            Case {
                axes: &[2, 0],
                strides: &[4, 1, -4],
                expected: &[0, 2],
            },
        ];

        for case in cases {
            let order = stride_order(case.axes, |axis| case.strides[axis]);
            assert_eq!(order.as_slice(), case.expected);
        }
    }

    #[test]
    fn test_stride_order_deterministic() {
        let strides: &[isize] = &[3, -3, 1, 7];
        let axes = [0, 1, 2, 3];
        let first = stride_order(&axes, |axis| strides[axis]);
        let second = stride_order(&axes, |axis| strides[axis]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_axes() {
        let all = resolve_axes(&AxisSelection::All, 3).unwrap();
        assert_eq!(all.as_slice(), &[0, 1, 2]);

        let scalar = resolve_axes(&AxisSelection::All, 0).unwrap();
        assert!(scalar.is_empty());

        let range = resolve_axes(&AxisSelection::Range(1..3), 4).unwrap();
        assert_eq!(range.as_slice(), &[1, 2]);

        let list = AxisSelection::Axes(AxisOrder::from_slice(&[2, 0]));
        let explicit = resolve_axes(&list, 3).unwrap();
        assert_eq!(explicit.as_slice(), &[2, 0]);
    }

    #[test]
    fn test_resolve_axes_errors() {
        let result = resolve_axes(&AxisSelection::Range(2..1), 4);
        assert_eq!(
            result,
            Err(DimensionError::InvalidRange {
                start: 2,
                end: 1,
                ndim: 4
            })
        );

        let result = resolve_axes(&AxisSelection::Range(0..5), 4);
        assert_eq!(
            result,
            Err(DimensionError::InvalidRange {
                start: 0,
                end: 5,
                ndim: 4
            })
        );

        let list = AxisSelection::Axes(AxisOrder::from_slice(&[0, 3]));
        let result = resolve_axes(&list, 3);
        assert_eq!(result, Err(DimensionError::AxisOutOfBounds { axis: 3, ndim: 3 }));

        let list = AxisSelection::Axes(AxisOrder::from_slice(&[1, 1]));
        let result = resolve_axes(&list, 3);
        assert_eq!(result, Err(DimensionError::DuplicateAxis(1)));
    }
}
