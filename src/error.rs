use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("encoder failed: {0}")]
    Encode(String),

    #[error("expected output was not produced: {0}")]
    MissingOutput(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("font error: {0}")]
    Font(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
