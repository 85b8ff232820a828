use thiserror::Error;

/// Every way a batch invocation can fail. Any of these aborts the whole batch.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed invocation event: {0}")]
    InvalidEvent(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has the wrong type, expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("preprocessor input is missing key `{0}`")]
    MissingKey(String),

    #[error("model and preprocessor are not loaded (test run)")]
    ModelNotLoaded,

    #[error("model returned no output for a single-row batch")]
    EmptyPrediction,

    #[error("model error: {0}")]
    Model(String),

    #[error("artifact `{0}` not found")]
    ArtifactNotFound(String),

    #[error("artifact `{key}`: {message}")]
    Artifact { key: String, message: String },

    #[error("stream `{stream}`: {message}")]
    Stream { stream: String, message: String },

    #[error("publish to stream `{stream}` failed: {message}")]
    Publish { stream: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
