//! Chunked parallel-for and reduction over event indices.
//!
//! Both the histogram fill and the NLL event term are embarrassingly
//! parallel across events, but floating-point summation is not associative,
//! so reproducibility requires a fixed fold order. The scheme here is the
//! same on every backend: the index range is split into fixed-size
//! contiguous chunks, each chunk is folded sequentially in index order, and
//! the per-chunk results are merged strictly in chunk-index order. Only the
//! chunk evaluations themselves run in parallel, so sequential and rayon
//! runs produce bit-identical results.

use rayon::prelude::*;
use std::ops::Range;

/// Default number of events per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Execution backend for per-event work within a single walk step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Evaluate chunks one after another on the calling thread.
    Sequential,
    /// Evaluate chunks on the rayon thread pool.
    #[default]
    Rayon,
}

fn chunk_ranges(n: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..n)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(n))
        .collect()
}

impl Backend {
    /// Apply `f` to each chunk of `0..n`, returning results in chunk order.
    pub fn map_chunks<A, F>(&self, n: usize, chunk_size: usize, f: F) -> Vec<A>
    where
        A: Send,
        F: Fn(Range<usize>) -> A + Sync + Send,
    {
        let ranges = chunk_ranges(n, chunk_size);
        match self {
            Backend::Sequential => ranges.into_iter().map(f).collect(),
            Backend::Rayon => ranges.into_par_iter().map(f).collect(),
        }
    }

    /// Two-stage reduction: per-chunk partial sums, then an in-order fold
    /// of the partials into one total.
    pub fn sum_chunks<F>(&self, n: usize, chunk_size: usize, f: F) -> f64
    where
        F: Fn(Range<usize>) -> f64 + Sync + Send,
    {
        self.map_chunks(n, chunk_size, f).into_iter().sum()
    }
}
