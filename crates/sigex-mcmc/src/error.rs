use thiserror::Error;

/// Error type for sampler setup and execution.
#[derive(Error, Debug)]
pub enum McmcError {
    /// Invalid fit configuration detected while building the sampler
    #[error(transparent)]
    Config(#[from] sigex_core::SigexError),

    /// Invalid sampler argument or incompatible chain operation
    #[error("{0}")]
    InvalidParameter(String),

    /// Failure during the random walk itself
    #[error("{0}")]
    Sampling(String),
}

/// Convenience type for `Result<T, McmcError>`.
pub type Result<T> = std::result::Result<T, McmcError>;
