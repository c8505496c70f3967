use thiserror::Error;

/// Error taxonomy for the core. Richer diagnostics are logged (see
/// `crate::log`) rather than threaded through these variants, callers get
/// enough to decide what to do next, not a full trace.
#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("session setup failed: {0}")]
    SessionSetup(String),

    #[error("fork failed: {0}")]
    Fork(#[source] std::io::Error),

    #[error("privilege drop failed: {0}")]
    PrivilegeDrop(String),

    #[error("exec failed: {0}")]
    Exec(#[source] std::io::Error),

    #[error("tty setup failed: {0}")]
    Tty(String),

    #[error("no such user: {0}")]
    UnknownUser(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("pam error: {0}")]
    Pam(String),
}

pub type Result<T> = std::result::Result<T, Error>;
