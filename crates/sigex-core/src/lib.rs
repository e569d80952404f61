//! Core building blocks for signal extraction fits.
//!
//! A fit is configured from per-signal Monte Carlo sample matrices, a list
//! of [`Observable`](observable::Observable) binnings and a list of
//! [`Systematic`](systematic::Systematic) detector distortions. Each
//! [`Signal`](signal::Signal) owns a
//! [`HistogramPdf`](pdf::HistogramPdf) that turns its samples into a
//! normalized N-dimensional histogram, re-binned on demand at any point in
//! systematic-parameter space.

pub mod errors;
pub mod exec;
pub mod observable;
pub mod pdf;
pub mod signal;
pub mod systematic;

pub use errors::{SigexError, SigexResult};
pub use exec::Backend;
pub use observable::Observable;
pub use pdf::HistogramPdf;
pub use signal::Signal;
pub use systematic::{Systematic, SystematicKind};
