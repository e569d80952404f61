use ndarray::Array2;

use crate::errors::{SigexError, SigexResult};
use crate::observable::Observable;
use crate::pdf::{apply_exclusions, HistogramPdf};
use crate::systematic::Systematic;

/// A fit signal: metadata, expectation and its owned histogram PDF.
///
/// Constructed once before the walk and read-only afterwards. The
/// efficiency (and hence `nexpected`) is computed a single time with every
/// systematic at its mean and is *not* re-derived as the walk moves the
/// systematic parameters. This is an approximation carried over from the
/// original treatment; its error grows with the distance of the posterior
/// from the systematic means.
pub struct Signal {
    /// String identifier
    pub name: String,

    /// Source/category tag for rate bookkeeping
    pub source: String,

    /// Expected in-range event count (scaled by `efficiency`)
    pub nexpected: f64,

    /// Fractional Gaussian rate constraint (0 = unconstrained)
    pub sigma: f64,

    /// Exclude this signal's normalization from the random walk
    pub fixed: bool,

    /// Fraction of raw MC events surviving exclusions and range cuts
    pub efficiency: f64,

    /// Total weighted count of raw MC events
    pub n_mc: u64,

    /// Weighted count of MC events inside the observable ranges, at the
    /// systematic means
    pub nevents: u64,

    /// The histogram PDF built from this signal's samples
    pub pdf: HistogramPdf,

    /// Global systematic-parameter slots this signal's PDF reads
    pub par_slots: Vec<usize>,
}

impl Signal {
    /// Build a signal from its Monte Carlo samples.
    ///
    /// `nexpected` follows the original convention: a negative value is a
    /// per-MC-event scale factor and becomes `-nexpected * n_mc`. Exclusion
    /// windows are applied to the samples before the PDF is built. All
    /// shared `systematics` are wired into the PDF with sequential global
    /// parameter slots, so every signal constructed from the same list
    /// reads the identical slots.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        nexpected: f64,
        sigma: f64,
        fixed: bool,
        samples: Array2<f32>,
        weights: Vec<u32>,
        observables: &[Observable],
        systematics: &[Systematic],
    ) -> SigexResult<Self> {
        let name = name.into();
        let source = source.into();

        let n_mc: u64 = weights.iter().map(|&w| w as u64).sum();
        if n_mc == 0 {
            return Err(SigexError::Config(format!(
                "signal '{}' has no weighted MC events",
                name
            )));
        }

        let mut nexpected = nexpected;
        if nexpected < 0.0 {
            nexpected *= -(n_mc as f64);
        }

        let (samples, weights) = apply_exclusions(&samples, &weights, observables)?;
        let mut pdf = HistogramPdf::new(samples, weights, observables.to_vec())?;

        let mut slot = 0;
        let mut means = Vec::new();
        for syst in systematics {
            let slots: Vec<usize> = (slot..slot + syst.npars()).collect();
            pdf.add_systematic(syst, &slots)?;
            means.extend_from_slice(&syst.means);
            slot += syst.npars();
        }
        let par_slots = pdf.par_slots();

        // Efficiency is evaluated once, with all systematics at their means.
        let empty = Array2::<f32>::zeros((0, pdf.nfields()));
        let (_, nevents) = pdf.evaluate(&means, empty.view())?;
        let efficiency = nevents as f64 / n_mc as f64;
        nexpected *= efficiency;

        log::info!(
            "signal '{}': {}/{} events remain, total efficiency {:.1}%",
            name,
            nevents,
            n_mc,
            100.0 * efficiency
        );

        Ok(Self {
            name,
            source,
            nexpected,
            sigma,
            fixed,
            efficiency,
            n_mc,
            nevents,
            pdf,
            par_slots,
        })
    }

    /// Absolute width of the Gaussian rate constraint, or 0 when the rate
    /// is unconstrained. `sigma` is fractional and does not scale with the
    /// efficiency correction.
    pub fn constraint_sigma(&self) -> f64 {
        self.sigma * self.nexpected
    }
}
