//! Exit-side error type. Wraps [`halftunnel_core::HtError`] for the
//! failures the orchestrator surfaces on its own (config, I/O).

use halftunnel_core::HtError;

#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error(transparent)]
    Core(#[from] HtError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ExitError>;
