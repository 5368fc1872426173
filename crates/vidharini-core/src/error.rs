use thiserror::Error;

#[derive(Error, Debug)]
pub enum VidharaError {
    #[error("LLM API error: {0}")]
    LlmApi(String),

    #[error("Document extraction error: {0}")]
    Extraction(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Timed out after {0} attempts")]
    Timeout(u32),

    #[error("Background task error: {0}")]
    Join(String),
}
