use thiserror::Error;

/// Errors surfaced by the intake core and its collaborators
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Provider catalog error: {0}")]
    Catalog(String),

    #[error("Collaborator call failed: {0}")]
    Collaborator(String),

    #[error("Hint extraction failed: {0}")]
    Hint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
