//! Partitioning of the outer iteration space into per-thread work chunks.

use smallvec::SmallVec;

use crate::cursor::AxisRange;

/// Target number of chunks per worker thread.
///
/// More chunks than threads keeps workers busy when chunk costs are uneven,
/// while capping the count bounds scheduling overhead.
const CHUNKS_PER_THREAD: usize = 4;

/// A disjoint sub-range of the outer iteration space, processed by exactly
/// one worker.
///
/// `ranges` holds the bounds for each outer axis in traversal order (fastest
/// first); only the slowest axis is ever split, so all other entries cover
/// their axis in full. The union of all chunks of a partition covers every
/// outer position exactly once.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskChunk {
    pub(crate) ranges: SmallVec<[AxisRange; 6]>,
}

impl TaskChunk {
    /// Bounds of this chunk along each outer axis, in traversal order.
    pub fn ranges(&self) -> &[AxisRange] {
        &self.ranges
    }
}

/// Split the outer iteration space into an ordered queue of chunks.
///
/// `outer` lists the full bounds of each outer axis in traversal order.
/// Chunks divide the slowest (last) axis; the split is coalesced so the chunk
/// count stays near `num_threads * CHUNKS_PER_THREAD`, and never drops below
/// the thread count unless the axis itself is smaller.
///
/// With no outer axes at all, a single chunk covering the (empty) outer space
/// is returned, so the caller degenerates to serial execution over the inner
/// axes. If the slowest outer axis has size zero there is nothing to
/// iterate and no chunks are produced.
///
/// Chunks are produced in the traversal order of the slowest axis, so chunks
/// handed out early are contiguous in memory for the primary image.
pub(crate) fn partition(outer: &[AxisRange], num_threads: usize) -> Vec<TaskChunk> {
    let Some(slowest) = outer.last() else {
        return vec![TaskChunk {
            ranges: SmallVec::new(),
        }];
    };

    let len = slowest.len();
    if len == 0 {
        return Vec::new();
    }

    let target = len.min(num_threads.max(1) * CHUNKS_PER_THREAD);
    let chunk_len = len.div_ceil(target);

    let mut chunks = Vec::with_capacity(target);
    let mut start = slowest.start;
    while start < slowest.end {
        let end = (start + chunk_len).min(slowest.end);
        let mut ranges: SmallVec<[AxisRange; 6]> = SmallVec::from_slice(&outer[..outer.len() - 1]);
        ranges.push(AxisRange {
            start,
            end,
            reverse: slowest.reverse,
        });
        chunks.push(TaskChunk { ranges });
        start = end;
    }

    // For a reversed slowest axis, traversal runs from high indices to low,
    // so hand the high chunks out first.
    if slowest.reverse {
        chunks.reverse();
    }
    chunks
}
