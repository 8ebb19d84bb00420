use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrieveError>;

#[derive(Error, Debug)]
pub enum RetrieveError {
    #[error("backend error: {0}")]
    Backend(#[from] auditctx_backend::BackendError),

    #[error("classifier returned malformed output: {0}")]
    MalformedClassifier(String),

    #[error("passage {0} has no text available")]
    MissingText(String),
}
