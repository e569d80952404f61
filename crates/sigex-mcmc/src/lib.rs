//! Metropolis MCMC likelihood sampling over binned signal PDFs.
//!
//! The [`MetropolisSampler`] walks the joint space of signal rates and
//! systematic parameters, evaluating an extended negative log-likelihood
//! against a dataset at every step and collecting accepted samples into a
//! [`Chain`] for downstream inference.

pub mod chain;
pub mod error;
pub mod nll;
pub mod sampler;

pub use chain::Chain;
pub use error::{McmcError, Result};
pub use nll::NllEvaluator;
pub use sampler::{acceptance_probability, MetropolisSampler, ProgressInfo, RunConfig};
