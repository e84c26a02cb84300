use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),
}

impl AppError {
    /// Not-found and validation outcomes are shown as warnings; everything
    /// else is an upstream fault.
    pub fn is_warning(&self) -> bool {
        matches!(self, AppError::NotFound(_) | AppError::Validation(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;
