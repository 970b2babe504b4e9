#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid job graph: {0}")]
    InvalidGraph(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
