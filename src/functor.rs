//! The callable contract between the threading engine and user code.
//!
//! Functors may carry mutable scratch state (accumulators, work buffers)
//! that is not thread safe. The engine therefore never shares a functor
//! between threads: each worker operates on a private instance obtained from
//! the caller's prototype via [`clone_for_worker`](VoxelFunctor::clone_for_worker),
//! and the prototype itself is never invoked.

use crate::errors::FunctorError;
use crate::image::ImageSet;
use crate::loops::InnerLoop;

/// A functor invoked once per innermost position.
///
/// Implemented for any `FnMut(&mut S) -> Result<(), FunctorError>` closure
/// that is `Clone + Send`; implement the trait directly to make per-worker
/// construction of scratch state explicit.
pub trait VoxelFunctor<S: ImageSet>: Send {
    /// Process the element at the images' current position.
    fn process(&mut self, images: &mut S) -> Result<(), FunctorError>;

    /// Create the private instance used by one worker thread.
    ///
    /// Called once per worker, before any chunk is dispatched. Scratch
    /// buffers allocated here are owned by that worker for the whole run.
    fn clone_for_worker(&self) -> Self
    where
        Self: Sized;
}

impl<S, F> VoxelFunctor<S> for F
where
    S: ImageSet,
    F: FnMut(&mut S) -> Result<(), FunctorError> + Clone + Send,
{
    fn process(&mut self, images: &mut S) -> Result<(), FunctorError> {
        self(images)
    }

    fn clone_for_worker(&self) -> F {
        self.clone()
    }
}

/// A functor invoked once per outer position, looping over the inner axes
/// itself.
///
/// This is the "whole row" shape used by vector operations: the engine
/// positions the images at the start of a row and hands over an
/// [`InnerLoop`] covering the reserved inner axes.
pub trait RowFunctor<S: ImageSet>: Send {
    /// Process one row, driving `inner` over `images` as needed.
    fn process_row(&mut self, inner: &InnerLoop, images: &mut S) -> Result<(), FunctorError>;

    /// Create the private instance used by one worker thread.
    fn clone_for_worker(&self) -> Self
    where
        Self: Sized;
}

impl<S, F> RowFunctor<S> for F
where
    S: ImageSet,
    F: FnMut(&InnerLoop, &mut S) -> Result<(), FunctorError> + Clone + Send,
{
    fn process_row(&mut self, inner: &InnerLoop, images: &mut S) -> Result<(), FunctorError> {
        self(inner, images)
    }

    fn clone_for_worker(&self) -> F {
        self.clone()
    }
}
