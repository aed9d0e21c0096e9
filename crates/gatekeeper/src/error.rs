use thiserror::Error;

pub type Result<T> = std::result::Result<T, GateError>;

#[derive(Debug, Error)]
pub enum GateError {
    /// Name fails the lexical rules before any namespace check.
    #[error("invalid name")]
    BadName,

    #[error("name already exists")]
    NameExists,

    /// Another connection holds a creation reservation on the name.
    #[error("name is already being created")]
    NameCreating,

    #[error("record not found")]
    NotFound,

    #[error("wrong password")]
    BadCredential,

    #[error("credential error: {0}")]
    Credential(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
