use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid event stream config: {0}")]
    InvalidConfig(String),

    /// A side-effect handler failed; the entry stays pending.
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

impl From<lmsbridge_core::Error> for Error {
    fn from(err: lmsbridge_core::Error) -> Self {
        Self::Handler(err.to_string())
    }
}
