use thiserror::Error;

/// Everything that can abort one unit of work (a page, a document or a project).
///
/// Validation outcomes, unknown file kinds and unparseable oracle replies are not
/// errors; they travel as ordinary values.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    #[error("unsupported file: {0}")]
    UnsupportedFile(String),

    #[error("pdf error: {0}")]
    Pdf(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("oracle request failed: {0}")]
    Oracle(String),

    #[error("{provider} does not support {mode}")]
    OracleUnsupported {
        provider: &'static str,
        mode: &'static str,
    },

    #[error("project store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Download(e.to_string())
    }
}

impl From<lopdf::Error> for PipelineError {
    fn from(e: lopdf::Error) -> Self {
        PipelineError::Pdf(e.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Store(e.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(e: toml::de::Error) -> Self {
        PipelineError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
