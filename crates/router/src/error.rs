#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("trigger not found: {0}")]
    NotFound(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("dispatch error: {0}")]
    Dispatch(String),
}

impl RouterError {
    /// Only configuration problems are allowed to stop startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
