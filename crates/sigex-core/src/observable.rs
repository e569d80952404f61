use serde::{Deserialize, Serialize};

use crate::errors::{SigexError, SigexResult};

/// A binned observable dimension of the fit.
///
/// Describes one column of the sample matrix: its histogram binning, the
/// range of values considered in-range, and an optional exclusion window.
/// Events falling inside the exclusion windows of *all* observables that
/// declare one are dropped before PDF construction (union semantics; see
/// [`crate::pdf::apply_exclusions`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observable {
    /// String identifier, used to label fit results
    pub name: String,

    /// Column index into the sample matrix
    pub field: usize,

    /// Lower edge of the fit range
    pub lower: f64,

    /// Upper edge of the fit range
    pub upper: f64,

    /// Number of histogram bins between `lower` and `upper`
    pub bins: usize,

    /// Optional `(lo, hi)` window excluded from PDF construction
    pub exclude: Option<(f64, f64)>,
}

impl Observable {
    /// Create a new observable, validating the binning.
    pub fn new(
        name: impl Into<String>,
        field: usize,
        lower: f64,
        upper: f64,
        bins: usize,
    ) -> SigexResult<Self> {
        let name = name.into();
        if !(lower < upper) {
            return Err(SigexError::Config(format!(
                "observable '{}' has invalid range [{}, {}]",
                name, lower, upper
            )));
        }
        if bins == 0 {
            return Err(SigexError::Config(format!(
                "observable '{}' must have at least one bin",
                name
            )));
        }
        Ok(Self {
            name,
            field,
            lower,
            upper,
            bins,
            exclude: None,
        })
    }

    /// Attach an exclusion window to this observable.
    pub fn with_exclusion(mut self, lo: f64, hi: f64) -> SigexResult<Self> {
        if !(lo <= hi) {
            return Err(SigexError::Config(format!(
                "observable '{}' has invalid exclusion window [{}, {}]",
                self.name, lo, hi
            )));
        }
        self.exclude = Some((lo, hi));
        Ok(self)
    }

    /// Width of one histogram bin.
    pub fn bin_width(&self) -> f64 {
        (self.upper - self.lower) / self.bins as f64
    }

    /// Whether a value falls inside the fit range `[lower, upper)`.
    pub fn in_range(&self, x: f64) -> bool {
        x >= self.lower && x < self.upper
    }

    /// Whether a value falls inside the exclusion window, if any.
    pub fn in_exclusion(&self, x: f64) -> bool {
        match self.exclude {
            Some((lo, hi)) => x >= lo && x <= hi,
            None => false,
        }
    }

    /// Bin index for a value, or `None` if out of range.
    pub fn bin_index(&self, x: f64) -> Option<usize> {
        if !self.in_range(x) {
            return None;
        }
        let idx = ((x - self.lower) / self.bin_width()) as usize;
        // Guard against x just below upper rounding into bins
        Some(idx.min(self.bins - 1))
    }
}
