use thiserror::Error;

/// Error type for invalid fit configurations.
///
/// All variants are fatal: they are raised while the fit is being set up,
/// before any random walk starts.
#[derive(Error, Debug)]
pub enum SigexError {
    #[error("{0}")]
    Config(String),
    #[error("sample matrix has {nfields} fields, but {what} references field {field}")]
    FieldOutOfBounds {
        what: String,
        field: usize,
        nfields: usize,
    },
    #[error("sample matrix has {nevents} events but {nweights} weights")]
    MismatchedWeights { nevents: usize, nweights: usize },
    #[error("systematic '{name}' declares {nmeans} means but {nsigmas} sigmas")]
    MismatchedSystematicParameters {
        name: String,
        nmeans: usize,
        nsigmas: usize,
    },
}

/// Convenience type for `Result<T, SigexError>`.
pub type SigexResult<T> = Result<T, SigexError>;
