//! Multi-threaded loop scheduler.
//!
//! A [`ThreadedLoop`] spans a set of axes of a primary image, reserves some
//! of the fastest-varying axes for the functor's own inner loop, partitions
//! the rest into disjoint chunks and feeds those chunks to a pool of worker
//! threads. No element is ever visited by two workers: correctness of
//! concurrent writes rests entirely on the disjointness of chunk index
//! ranges, not on locking image data.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use smallvec::SmallVec;

use crate::axes::{resolve_axes, AxisOrder, AxisSelection};
use crate::cursor::Cursor;
use crate::errors::{ConcurrencyError, DimensionError, FunctorError, LoopError};
use crate::functor::{RowFunctor, VoxelFunctor};
use crate::image::ImageSet;
use crate::loops::{bind_axes, InnerLoop};
use crate::partition::{partition, TaskChunk};
use crate::progress::Progress;

/// Worker thread count configuration.
///
/// The default resolves to the number of physical cores; an explicit count
/// overrides it. There is no ambient global setting: every scheduler carries
/// its own configuration.
#[derive(Clone, Debug, Default)]
pub struct ThreadConfig {
    num_threads: Option<usize>,
}

impl ThreadConfig {
    /// Use exactly `num_threads` workers (clamped to at least 1).
    pub fn with_threads(num_threads: usize) -> ThreadConfig {
        ThreadConfig {
            num_threads: Some(num_threads.max(1)),
        }
    }

    /// Force single-threaded execution, useful for deterministic debugging.
    pub fn serial() -> ThreadConfig {
        ThreadConfig::with_threads(1)
    }

    /// The worker count this configuration resolves to.
    pub fn effective_threads(&self) -> usize {
        self.num_threads
            .unwrap_or_else(|| num_cpus::get_physical())
            .max(1)
    }
}

/// A multi-threaded loop over a set of axes of one or more co-iterated
/// images.
///
/// `run` blocks until every worker has finished, then reports the first
/// failure any worker encountered (if any). Each worker operates on its own
/// clone of the image handles and on a private functor instance; the
/// caller's prototype functor is never invoked.
///
/// ```
/// use ndloop::{ArrayImage, FunctorError, ImageLike, ThreadConfig, ThreadedLoop};
///
/// let image = ArrayImage::<u32>::zeros(&[16, 16, 16]);
/// ThreadedLoop::all()
///     .with_config(ThreadConfig::with_threads(4))
///     .run(
///         &|set: &mut (ArrayImage<u32>,)| -> Result<(), FunctorError> {
///             let index_sum = set.0.index(0) + set.0.index(1) + set.0.index(2);
///             set.0.set_value(index_sum as u32);
///             Ok(())
///         },
///         &(image.clone(),),
///     )
///     .unwrap();
/// assert_eq!(image.to_vec()[0], 0);
/// ```
#[derive(Clone)]
pub struct ThreadedLoop {
    selection: AxisSelection,
    inner_axis_count: usize,
    config: ThreadConfig,
    progress: Option<Arc<Progress>>,
}

impl ThreadedLoop {
    /// Span every dimension of the primary image.
    pub fn all() -> ThreadedLoop {
        ThreadedLoop::with_selection(AxisSelection::All)
    }

    /// Span a contiguous range of axis numbers.
    pub fn over(axes: Range<usize>) -> ThreadedLoop {
        ThreadedLoop::with_selection(AxisSelection::Range(axes))
    }

    /// Span an explicit list of axes.
    pub fn axes(axes: &[usize]) -> ThreadedLoop {
        ThreadedLoop::with_selection(AxisSelection::Axes(AxisOrder::from_slice(axes)))
    }

    fn with_selection(selection: AxisSelection) -> ThreadedLoop {
        ThreadedLoop {
            selection,
            inner_axis_count: 0,
            config: ThreadConfig::default(),
            progress: None,
        }
    }

    /// Reserve the `count` fastest-varying axes for the functor's own inner
    /// loop, excluding them from thread partitioning.
    ///
    /// Each thread then processes whole inner "rows". Reserving more axes
    /// than the loop drives fails at `run` with a
    /// [`DimensionError`](crate::errors::DimensionError).
    pub fn inner_axes(mut self, count: usize) -> ThreadedLoop {
        self.inner_axis_count = count;
        self
    }

    /// Set the worker thread configuration.
    pub fn with_config(mut self, config: ThreadConfig) -> ThreadedLoop {
        self.config = config;
        self
    }

    /// Attach a progress message; progress then advances once per completed
    /// chunk.
    pub fn with_message(mut self, message: impl Into<String>) -> ThreadedLoop {
        self.progress = Some(Arc::new(Progress::new(message.into())));
        self
    }

    /// Handle on the progress state, if a message was attached.
    pub fn progress(&self) -> Option<Arc<Progress>> {
        self.progress.clone()
    }

    /// Run a per-voxel functor over `images`.
    ///
    /// The engine loops over any reserved inner axes itself, invoking the
    /// functor once per innermost position.
    pub fn run<S, F>(&self, functor: &F, images: &S) -> Result<(), LoopError>
    where
        S: ImageSet + Clone + Send,
        F: VoxelFunctor<S>,
    {
        self.dispatch(
            images,
            || functor.clone_for_worker(),
            |worker: &mut F, inner: &InnerLoop, images: &mut S| {
                inner.run(images, |images| worker.process(images))
            },
        )
    }

    /// Run a row functor over `images`.
    ///
    /// The functor is invoked once per outer position and drives the
    /// [`InnerLoop`] over the reserved inner axes itself.
    pub fn run_rows<S, F>(&self, functor: &F, images: &S) -> Result<(), LoopError>
    where
        S: ImageSet + Clone + Send,
        F: RowFunctor<S>,
    {
        self.dispatch(
            images,
            || functor.clone_for_worker(),
            |worker: &mut F, inner: &InnerLoop, images: &mut S| worker.process_row(inner, images),
        )
    }

    fn dispatch<S, W, Step>(
        &self,
        images: &S,
        make_worker: impl Fn() -> W,
        step: Step,
    ) -> Result<(), LoopError>
    where
        S: ImageSet + Clone + Send,
        W: Send,
        Step: Fn(&mut W, &InnerLoop, &mut S) -> Result<(), FunctorError> + Sync,
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
        if self.inner_axis_count > bound.order.len() {
            return Err(DimensionError::TooManyInnerAxes {
                inner: self.inner_axis_count,
                axes: bound.order.len(),
            }
            .into());
        }

        let inner = InnerLoop::new(
            bound.order[..self.inner_axis_count].iter().copied().collect(),
            SmallVec::from_slice(&bound.ranges[..self.inner_axis_count]),
        );
        let outer_axes: AxisOrder = bound.order[self.inner_axis_count..].iter().copied().collect();

        let num_threads = self.config.effective_threads();
        let chunks = partition(&bound.ranges[self.inner_axis_count..], num_threads);

        if let Some(progress) = &self.progress {
            progress.start(chunks.len() as u64);
        }

        let result = if chunks.is_empty() {
            Ok(())
        } else if num_threads == 1 || chunks.len() == 1 {
            // Single-threaded fallback: run on the calling thread, still via
            // a worker instance so prototype semantics are uniform.
            self.run_serial(&chunks, &outer_axes, &inner, make_worker, &step, images)
        } else {
            self.run_parallel(num_threads, &chunks, &outer_axes, &inner, make_worker, &step, images)
        };

        if let Some(progress) = &self.progress {
            progress.finish();
        }
        result
    }

    fn run_serial<S, W, Step>(
        &self,
        chunks: &[TaskChunk],
        outer_axes: &AxisOrder,
        inner: &InnerLoop,
        make_worker: impl Fn() -> W,
        step: &Step,
        images: &S,
    ) -> Result<(), LoopError>
    where
        S: ImageSet + Clone,
        Step: Fn(&mut W, &InnerLoop, &mut S) -> Result<(), FunctorError>,
    {
        let mut worker = make_worker();
        let mut worker_images = images.clone();
        for chunk in chunks {
            process_chunk(chunk, outer_axes, inner, step, &mut worker, &mut worker_images)
                .map_err(LoopError::Functor)?;
            if let Some(progress) = &self.progress {
                progress.tick();
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn run_parallel<S, W, Step>(
        &self,
        num_threads: usize,
        chunks: &[TaskChunk],
        outer_axes: &AxisOrder,
        inner: &InnerLoop,
        make_worker: impl Fn() -> W,
        step: &Step,
        images: &S,
    ) -> Result<(), LoopError>
    where
        S: ImageSet + Clone + Send,
        W: Send,
        Step: Fn(&mut W, &InnerLoop, &mut S) -> Result<(), FunctorError> + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("ndloop-{}", index))
            .build()
            .map_err(|err| ConcurrencyError(err.to_string()))?;

        let first_error: OnceLock<LoopError> = OnceLock::new();
        let next_chunk = AtomicUsize::new(0);

        // Per-worker state is constructed up front, on the calling thread:
        // the functor prototype is cloned once per worker and each worker
        // gets its own image handles over the shared storage.
        let worker_count = num_threads.min(chunks.len());
        let mut workers: Vec<(W, S)> = (0..worker_count)
            .map(|_| (make_worker(), images.clone()))
            .collect();

        {
            let first_error = &first_error;
            let next_chunk = &next_chunk;
            let progress = self.progress.as_deref();
            pool.scope(move |scope| {
                for (mut worker, mut worker_images) in workers.drain(..) {
                    scope.spawn(move |_| loop {
                        // Stop pulling new chunks once any worker has
                        // failed; chunks already in flight complete
                        // naturally.
                        if first_error.get().is_some() {
                            break;
                        }
                        let index = next_chunk.fetch_add(1, Ordering::SeqCst);
                        if index >= chunks.len() {
                            break;
                        }
                        match process_chunk(
                            &chunks[index],
                            outer_axes,
                            inner,
                            step,
                            &mut worker,
                            &mut worker_images,
                        ) {
                            Ok(()) => {
                                if let Some(progress) = progress {
                                    progress.tick();
                                }
                            }
                            Err(err) => {
                                // First failure wins; later failures from
                                // other workers are dropped.
                                let _ = first_error.set(LoopError::Functor(err));
                                break;
                            }
                        }
                    });
                }
            });
        }

        match first_error.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Iterate one chunk's outer positions, invoking `step` at each.
fn process_chunk<S, W, Step>(
    chunk: &TaskChunk,
    outer_axes: &AxisOrder,
    inner: &InnerLoop,
    step: &Step,
    worker: &mut W,
    images: &mut S,
) -> Result<(), FunctorError>
where
    S: ImageSet,
    Step: Fn(&mut W, &InnerLoop, &mut S) -> Result<(), FunctorError>,
{
    let mut outer = Cursor::new(outer_axes.clone(), SmallVec::from_slice(chunk.ranges()));
    outer.reset_images(images);
    while !outer.at_end() {
        step(worker, inner, images)?;
        outer.advance_images(images);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{ThreadConfig, ThreadedLoop};
    use crate::errors::{FunctorError, LoopError};
    use crate::image::{ArrayImage, ImageLike};
    use crate::loops::InnerLoop;

    /// Functor writing each element's linear index for a (4, 5, 6)
    /// column-major image.
    fn fill_linear(
        set: &mut (ArrayImage<u32>,),
    ) -> Result<(), FunctorError> {
        let (x, y, z) = (set.0.index(0), set.0.index(1), set.0.index(2));
        set.0.set_value((x + 4 * y + 20 * z) as u32);
        Ok(())
    }

    fn column_major_image() -> ArrayImage<u32> {
        ArrayImage::from_vec_with_strides(&[4, 5, 6], &[1, 4, 20], vec![0u32; 120]).unwrap()
    }

    #[test]
    fn test_serial_fill_is_storage_order() {
        let image = column_major_image();
        ThreadedLoop::all()
            .with_config(ThreadConfig::serial())
            .run(&fill_linear, &(image.clone(),))
            .unwrap();
        assert_eq!(image.to_vec(), (0..120).collect::<Vec<u32>>());
    }

    #[test]
    fn test_parallel_matches_serial() {
        let reference = column_major_image();
        ThreadedLoop::all()
            .with_config(ThreadConfig::serial())
            .run(&fill_linear, &(reference.clone(),))
            .unwrap();

        for num_threads in [1, 2, 4, 8] {
            let image = column_major_image();
            ThreadedLoop::all()
                .with_config(ThreadConfig::with_threads(num_threads))
                .run(&fill_linear, &(image.clone(),))
                .unwrap();
            assert_eq!(
                image.to_vec(),
                reference.to_vec(),
                "{} threads",
                num_threads
            );
        }
    }

    #[test]
    fn test_first_error_propagates_once() {
        for num_threads in [1, 2, 4, 8] {
            let image = ArrayImage::<u8>::zeros(&[4, 5, 6]);
            let raised = Arc::new(AtomicUsize::new(0));
            let raised_in_functor = raised.clone();

            let functor = move |set: &mut (ArrayImage<u8>,)| -> Result<(), FunctorError> {
                if set.0.index(0) == 1 && set.0.index(1) == 2 && set.0.index(2) == 3 {
                    raised_in_functor.fetch_add(1, Ordering::SeqCst);
                    Err("bad voxel".into())
                } else {
                    Ok(())
                }
            };

            let result = ThreadedLoop::all()
                .with_config(ThreadConfig::with_threads(num_threads))
                .run(&functor, &(image,));

            match result {
                Err(LoopError::Functor(err)) => assert_eq!(err.to_string(), "bad voxel"),
                other => panic!("expected functor error, got {:?}", other.err()),
            }
            assert_eq!(raised.load(Ordering::SeqCst), 1, "{} threads", num_threads);
        }
    }

    #[test]
    fn test_degenerate_shapes() {
        // A zero-sized axis: zero invocations, successful run.
        let empty = ArrayImage::<u8>::zeros(&[3, 0, 2]);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_functor = calls.clone();
        ThreadedLoop::all()
            .with_config(ThreadConfig::with_threads(4))
            .run(
                &move |_: &mut (ArrayImage<u8>,)| -> Result<(), FunctorError> {
                    calls_in_functor.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                &(empty,),
            )
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // All axes of size one: exactly one invocation.
        let single = ArrayImage::<u8>::zeros(&[1, 1, 1]);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_functor = calls.clone();
        ThreadedLoop::all()
            .with_config(ThreadConfig::with_threads(4))
            .run(
                &move |_: &mut (ArrayImage<u8>,)| -> Result<(), FunctorError> {
                    calls_in_functor.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                &(single,),
            )
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Empty axis range: nothing to do.
        let image = ArrayImage::<u8>::zeros(&[2, 2]);
        let result = ThreadedLoop::over(1..1).run(
            &|_: &mut (ArrayImage<u8>,)| -> Result<(), FunctorError> {
                panic!("must not be invoked")
            },
            &(image,),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_multi_image_copy_between_layouts() {
        let src = ArrayImage::from_vec(&[8, 6], (0..48).collect::<Vec<i64>>()).unwrap();
        let dst = ArrayImage::from_vec_with_strides(&[8, 6], &[1, 8], vec![0i64; 48]).unwrap();

        ThreadedLoop::all()
            .with_config(ThreadConfig::with_threads(4))
            .run(
                &|set: &mut (ArrayImage<i64>, ArrayImage<i64>)| -> Result<(), FunctorError> {
                    let value = set.0.value();
                    set.1.set_value(value);
                    Ok(())
                },
                &(src, dst.clone()),
            )
            .unwrap();

        // dst offset = x + 8 * y, src value = 6 * x + y.
        let expected: Vec<i64> = (0..48).map(|i| (i % 8) * 6 + i / 8).collect();
        assert_eq!(dst.to_vec(), expected);
    }

    #[test]
    fn test_run_rows_sums_inner_axis() {
        let src = ArrayImage::from_vec(&[3, 4], (0..12).collect::<Vec<i32>>()).unwrap();
        let dst = ArrayImage::<i32>::zeros(&[3, 4]);

        let row_sum = |inner: &InnerLoop,
                       set: &mut (ArrayImage<i32>, ArrayImage<i32>)|
         -> Result<(), FunctorError> {
            let mut sum = 0;
            inner.run(set, |set| {
                sum += set.0.value();
                Ok(())
            })?;
            inner.run(set, |set| {
                set.1.set_value(sum);
                Ok(())
            })
        };

        ThreadedLoop::all()
            .inner_axes(1)
            .with_config(ThreadConfig::with_threads(2))
            .run_rows(&row_sum, &(src, dst.clone()))
            .unwrap();

        let expected: Vec<i32> = (0..3)
            .flat_map(|row| {
                let sum = (0..4).map(|col| row * 4 + col).sum::<i32>();
                vec![sum; 4]
            })
            .collect();
        assert_eq!(dst.to_vec(), expected);
    }

    #[test]
    fn test_out_of_bounds_empty_range_is_error() {
        let image = ArrayImage::<u8>::zeros(&[2, 2]);
        let result = ThreadedLoop::over(7..7).run(
            &|_: &mut (ArrayImage<u8>,)| -> Result<(), FunctorError> { Ok(()) },
            &(image,),
        );
        assert!(matches!(result, Err(LoopError::Dimension(_))));
    }

    #[test]
    fn test_too_many_inner_axes() {
        let image = ArrayImage::<u8>::zeros(&[2, 2]);
        let result = ThreadedLoop::all().inner_axes(3).run(
            &|_: &mut (ArrayImage<u8>,)| -> Result<(), FunctorError> { Ok(()) },
            &(image,),
        );
        assert!(matches!(result, Err(LoopError::Dimension(_))));
    }

    #[test]
    fn test_progress_counts_chunks() {
        let image = ArrayImage::<u8>::zeros(&[6, 4]);
        let looper = ThreadedLoop::all()
            .with_config(ThreadConfig::with_threads(2))
            .with_message("processing");
        let progress = looper.progress().unwrap();

        looper
            .run(
                &|_: &mut (ArrayImage<u8>,)| -> Result<(), FunctorError> { Ok(()) },
                &(image,),
            )
            .unwrap();

        // Row-major (6, 4): the slowest outer axis has size 6, which splits
        // into one chunk per slice for 2 threads.
        assert_eq!(progress.total(), 6);
        assert_eq!(progress.count(), 6);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_effective_threads() {
        assert_eq!(ThreadConfig::with_threads(0).effective_threads(), 1);
        assert_eq!(ThreadConfig::with_threads(3).effective_threads(), 3);
        assert_eq!(ThreadConfig::serial().effective_threads(), 1);
        assert!(ThreadConfig::default().effective_threads() >= 1);
    }

    #[test]
    fn test_worker_scratch_state_is_private() {
        // A functor with per-worker scratch: counts elements into a local
        // buffer sized at clone time, then publishes via an atomic.
        struct Counter {
            local: usize,
            total: Arc<AtomicUsize>,
        }

        impl crate::functor::VoxelFunctor<(ArrayImage<u8>,)> for Counter {
            fn process(&mut self, _images: &mut (ArrayImage<u8>,)) -> Result<(), FunctorError> {
                self.local += 1;
                self.total.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            fn clone_for_worker(&self) -> Counter {
                Counter {
                    local: 0,
                    total: self.total.clone(),
                }
            }
        }

        let total = Arc::new(AtomicUsize::new(0));
        let prototype = Counter {
            local: 0,
            total: total.clone(),
        };

        let image = ArrayImage::<u8>::zeros(&[5, 7]);
        ThreadedLoop::all()
            .with_config(ThreadConfig::with_threads(4))
            .run(&prototype, &(image,))
            .unwrap();

        assert_eq!(total.load(Ordering::SeqCst), 35);
        // The prototype was never invoked.
        assert_eq!(prototype.local, 0);
    }
}
