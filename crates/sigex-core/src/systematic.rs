use serde::{Deserialize, Serialize};

use crate::errors::{SigexError, SigexResult};

/// The closed set of coordinate transforms a systematic can apply.
///
/// Each kind maps an event coordinate `x` (and, for resolution scaling, the
/// paired truth-field value `t`) to a transformed coordinate before the
/// event is binned. With `poly(x) = sum_k p[k] * x^k` over this
/// systematic's parameter-slot values:
///
/// - `Shift`: `x' = x + poly(x)`
/// - `Scale`: `x' = x * poly(x)`
/// - `ResolutionScale`: `x' = t + (x - t) * poly(x)`
///
/// A single parameter gives the familiar `x + p0`, `x * p0` and
/// `t + (x - t) * p0` forms; additional parameters give polynomial
/// coordinate dependence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystematicKind {
    Shift,
    Scale,
    ResolutionScale,
}

/// A nuisance parameter distorting event coordinates before binning.
///
/// The means and sigmas double as the Gaussian constraint in the NLL and as
/// the random-walk step scale for the corresponding parameters. One
/// `Systematic` is shared by every signal that applies it: parameter slots
/// are assigned once, walking the shared systematic list in order, so all
/// signals read the identical slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Systematic {
    /// String identifier, used to label fit results
    pub name: String,

    /// Kind of coordinate transform
    pub kind: SystematicKind,

    /// Column index of the affected field in the sample matrix
    pub field: usize,

    /// Column index of the paired truth field (resolution scaling only)
    pub truth_field: Option<usize>,

    /// Central value for each parameter
    pub means: Vec<f64>,

    /// Gaussian constraint width for each parameter (0 = unconstrained)
    pub sigmas: Vec<f64>,

    /// Exclude these parameters from the random walk
    pub fixed: bool,
}

impl Systematic {
    /// An additive shift of one field: `x' = x + p0`.
    pub fn shift(name: impl Into<String>, field: usize, mean: f64, sigma: f64) -> Self {
        Self {
            name: name.into(),
            kind: SystematicKind::Shift,
            field,
            truth_field: None,
            means: vec![mean],
            sigmas: vec![sigma],
            fixed: false,
        }
    }

    /// A multiplicative scale of one field: `x' = x * p0`.
    pub fn scale(name: impl Into<String>, field: usize, mean: f64, sigma: f64) -> Self {
        Self {
            name: name.into(),
            kind: SystematicKind::Scale,
            field,
            truth_field: None,
            means: vec![mean],
            sigmas: vec![sigma],
            fixed: false,
        }
    }

    /// A resolution rescale of `field` about the value of `truth_field`:
    /// `x' = t + (x - t) * p0`.
    pub fn resolution_scale(
        name: impl Into<String>,
        field: usize,
        truth_field: usize,
        mean: f64,
        sigma: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind: SystematicKind::ResolutionScale,
            field,
            truth_field: Some(truth_field),
            means: vec![mean],
            sigmas: vec![sigma],
            fixed: false,
        }
    }

    /// Replace the single mean/sigma with a polynomial parameter set.
    pub fn with_polynomial(mut self, means: Vec<f64>, sigmas: Vec<f64>) -> Self {
        self.means = means;
        self.sigmas = sigmas;
        self
    }

    /// Mark this systematic's parameters as fixed during the walk.
    pub fn fix(mut self) -> Self {
        self.fixed = true;
        self
    }

    /// Number of parameter slots this systematic owns.
    pub fn npars(&self) -> usize {
        self.means.len()
    }

    /// Validate the parameter layout.
    pub fn validate(&self) -> SigexResult<()> {
        if self.means.is_empty() {
            return Err(SigexError::Config(format!(
                "systematic '{}' has no parameters",
                self.name
            )));
        }
        if self.means.len() != self.sigmas.len() {
            return Err(SigexError::MismatchedSystematicParameters {
                name: self.name.clone(),
                nmeans: self.means.len(),
                nsigmas: self.sigmas.len(),
            });
        }
        if self.kind == SystematicKind::ResolutionScale && self.truth_field.is_none() {
            return Err(SigexError::Config(format!(
                "resolution systematic '{}' has no truth field",
                self.name
            )));
        }
        if !self.means.iter().chain(self.sigmas.iter()).all(|v| v.is_finite()) {
            return Err(SigexError::Config(format!(
                "systematic '{}' has non-finite means or sigmas",
                self.name
            )));
        }
        Ok(())
    }
}
