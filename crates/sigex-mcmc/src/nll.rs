//! Negative log-likelihood evaluation.
//!
//! The extended-likelihood NLL for a parameter vector `v` is
//!
//! ```text
//! NLL = sum_j v[j]                                    (expected events)
//!     + 1/2 * sum_{k: sigma_k > 0} (v[k] - mu_k)^2 / sigma_k^2
//!     - sum_i ln( sum_j v[j] * lut[i, j] )            (data term)
//! ```
//!
//! with `j` running over signals and `i` over dataset events. The data term
//! is computed in three passes so the same algorithm runs unchanged on a
//! sequential or a data-parallel backend: per-chunk partial sums, an
//! in-order reduction of the partials, then the closed-form normalization
//! and constraint terms.

use ndarray::ArrayView2;

use sigex_core::exec::{Backend, DEFAULT_CHUNK_SIZE};

/// Evaluates the NLL for a fixed constraint layout.
///
/// Holds the Gaussian constraint centers and widths for the full parameter
/// vector (signal normalizations first, then systematic slots); a width of
/// zero marks an unconstrained parameter. Evaluation never mutates the
/// lookup table.
pub struct NllEvaluator {
    means: Vec<f64>,
    sigmas: Vec<f64>,
    nsignals: usize,
    backend: Backend,
    chunk_size: usize,
}

impl NllEvaluator {
    /// Create an evaluator for `nsignals` signals followed by systematic
    /// slots. `means` and `sigmas` must cover the full parameter vector.
    pub fn new(nsignals: usize, means: Vec<f64>, sigmas: Vec<f64>, backend: Backend) -> Self {
        debug_assert_eq!(means.len(), sigmas.len());
        debug_assert!(nsignals <= means.len());
        Self {
            means,
            sigmas,
            nsignals,
            backend,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Total number of parameters covered by the constraint layout.
    pub fn nparameters(&self) -> usize {
        self.means.len()
    }

    /// Evaluate the NLL at `params` against a lookup table of per-event,
    /// per-signal densities.
    ///
    /// `params` must cover the full constraint layout, i.e. hold
    /// [`nparameters`](Self::nparameters) entries; a shorter slice panics.
    ///
    /// If every signal predicts zero density for some event, the data term
    /// diverges and the result is `+inf` (a guaranteed rejection), never a
    /// panic.
    pub fn evaluate(&self, lut: ArrayView2<'_, f32>, params: &[f64]) -> f64 {
        debug_assert_eq!(params.len(), self.means.len());
        let nevents = lut.nrows();
        let nsignals = self.nsignals;
        let norms = &params[..nsignals];

        // Pass 1 + 2: chunked partial sums of the event term, folded in
        // chunk order for reproducibility.
        let event_term = self.backend.sum_chunks(nevents, self.chunk_size, |range| {
            let mut partial = 0.0;
            for i in range {
                let row = lut.row(i);
                let mut total = 0.0;
                for (n, &p) in norms.iter().zip(row.iter()) {
                    total += n * p as f64;
                }
                // ln(0) = -inf propagates to NLL = +inf below
                partial += total.ln();
            }
            partial
        });

        // Pass 3: normalization and Gaussian constraints.
        let expected: f64 = norms.iter().sum();
        let mut constraints = 0.0;
        for ((&v, &mu), &sigma) in params
            .iter()
            .zip(self.means.iter())
            .zip(self.sigmas.iter())
        {
            if sigma > 0.0 {
                let pull = (v - mu) / sigma;
                constraints += 0.5 * pull * pull;
            }
        }

        expected + constraints - event_term
    }
}
