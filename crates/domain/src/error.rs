/// Shared error type used across all Omnia eval-worker crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("session service: {0}")]
    SessionService(String),

    #[error("stream broker: {0}")]
    Broker(String),

    #[error("pack {pack}: {message}")]
    Pack { pack: String, message: String },

    #[error("eval {eval_id}: {message}")]
    Eval { eval_id: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a pack error for the given `namespace/pack` key.
    pub fn pack(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Pack {
            pack: key.into(),
            message: message.into(),
        }
    }

    /// Build a per-eval error (missing param, unknown type, bad regex).
    pub fn eval(eval_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Eval {
            eval_id: eval_id.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
