//! Error types reported by loop construction and execution.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Opaque error raised by a user-supplied functor during traversal.
///
/// The engine does not interpret the payload; it captures the first failure
/// reported by any worker and relays it from `run()`.
pub type FunctorError = Box<dyn Error + Send + Sync>;

/// Error if co-iterated images disagree in size along a driven axis.
///
/// Detected once when a loop binds to a set of images, never inside the hot
/// traversal loop.
#[derive(Debug, PartialEq)]
pub struct DimensionMismatchError {
    /// The offending axis.
    pub axis: usize,

    /// Size of the primary image along `axis`.
    pub expected: usize,

    /// Size of the mismatched image along `axis`.
    pub actual: usize,
}

impl Display for DimensionMismatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "size mismatch along axis {}: expected {}, found {}",
            self.axis, self.expected, self.actual
        )
    }
}

impl Error for DimensionMismatchError {}

/// Error in a loop operation if an axis specification is degenerate or
/// invalid.
#[derive(Clone, Debug, PartialEq)]
pub enum DimensionError {
    /// A requested axis is not a dimension of the image.
    AxisOutOfBounds { axis: usize, ndim: usize },

    /// An axis range is inverted or extends past the image dimensions.
    InvalidRange {
        start: usize,
        end: usize,
        ndim: usize,
    },

    /// An explicit axis list names the same axis twice.
    DuplicateAxis(usize),

    /// More inner axes were reserved for the functor than the loop drives.
    TooManyInnerAxes { inner: usize, axes: usize },
}

impl Display for DimensionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DimensionError::AxisOutOfBounds { axis, ndim } => {
                write!(f, "axis {} is out of bounds for {} dimensions", axis, ndim)
            }
            DimensionError::InvalidRange { start, end, ndim } => {
                write!(
                    f,
                    "axis range {}..{} is invalid for {} dimensions",
                    start, end, ndim
                )
            }
            DimensionError::DuplicateAxis(axis) => {
                write!(f, "axis {} is listed more than once", axis)
            }
            DimensionError::TooManyInnerAxes { inner, axes } => {
                write!(
                    f,
                    "{} inner axes requested but the loop drives only {} axes",
                    inner, axes
                )
            }
        }
    }
}

impl Error for DimensionError {}

/// Errors that can occur when constructing an image from existing data.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageError {
    /// The number of strides does not match the number of dimensions.
    StrideCountMismatch,

    /// An axis has a stride of zero, which would alias the physical layout.
    ZeroStride(usize),

    /// Two axes have the same absolute stride, which would alias the
    /// physical layout.
    DuplicateStrideRank(usize),

    /// Some indices will map to offsets beyond the end of the storage.
    StorageTooShort,

    /// The storage length was expected to exactly match the product of the
    /// shape, and it did not.
    StorageLengthMismatch,

    /// Some indices may map to the same offset within the storage.
    MayOverlap,
}

impl Display for ImageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::StrideCountMismatch => write!(f, "stride count does not match dim count"),
            ImageError::ZeroStride(axis) => write!(f, "axis {} has a zero stride", axis),
            ImageError::DuplicateStrideRank(rank) => {
                write!(f, "two axes share the absolute stride {}", rank)
            }
            ImageError::StorageTooShort => write!(f, "data too short"),
            ImageError::StorageLengthMismatch => write!(f, "data length mismatch"),
            ImageError::MayOverlap => write!(f, "layout may have internal overlap"),
        }
    }
}

impl Error for ImageError {}

/// Error if the worker thread pool could not be set up.
///
/// This is fatal: no further chunks are dispatched once it occurs.
#[derive(Debug)]
pub struct ConcurrencyError(pub String);

impl Display for ConcurrencyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "thread pool error: {}", self.0)
    }
}

impl Error for ConcurrencyError {}

/// Umbrella error returned by [`Loop::run`](crate::Loop::run) and
/// [`ThreadedLoop::run`](crate::ThreadedLoop::run).
///
/// Construction-time failures (`Dimension`, `DimensionMismatch`) are reported
/// before any thread is spawned or any element visited. `Functor` carries the
/// first failure reported by any worker; `Concurrency` reports thread-pool
/// bookkeeping failures.
#[derive(Debug)]
pub enum LoopError {
    Dimension(DimensionError),
    DimensionMismatch(DimensionMismatchError),
    Functor(FunctorError),
    Concurrency(ConcurrencyError),
}

impl Display for LoopError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopError::Dimension(err) => write!(f, "{}", err),
            LoopError::DimensionMismatch(err) => write!(f, "{}", err),
            LoopError::Functor(err) => write!(f, "functor error: {}", err),
            LoopError::Concurrency(err) => write!(f, "{}", err),
        }
    }
}

impl Error for LoopError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoopError::Dimension(err) => Some(err),
            LoopError::DimensionMismatch(err) => Some(err),
            LoopError::Functor(err) => Some(err.as_ref()),
            LoopError::Concurrency(err) => Some(err),
        }
    }
}

impl From<DimensionError> for LoopError {
    fn from(err: DimensionError) -> LoopError {
        LoopError::Dimension(err)
    }
}

impl From<DimensionMismatchError> for LoopError {
    fn from(err: DimensionMismatchError) -> LoopError {
        LoopError::DimensionMismatch(err)
    }
}

impl From<ConcurrencyError> for LoopError {
    fn from(err: ConcurrencyError) -> LoopError {
        LoopError::Concurrency(err)
    }
}
