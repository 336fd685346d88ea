//! Entry-side error type. Wraps [`halftunnel_core::HtError`] with the
//! SOCKS5 front-end failures named in §7 (`AuthFailed`, `BadRequest`).

use halftunnel_core::HtError;

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error(transparent)]
    Core(#[from] HtError),

    #[error("SOCKS5 authentication failed")]
    AuthFailed,

    #[error("bad SOCKS5 request: {0}")]
    BadRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, EntryError>;
