use thiserror::Error;

/// Failure taxonomy for a collector run. Decoding and schema problems name
/// the offending file so the override tables can be corrected; configuration
/// problems surface before any network I/O.
#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("{filename}: invalid bytes for encoding {encoding}")]
    Decoding { filename: String, encoding: String },

    #[error("{filename} row {row}: {reason}")]
    Schema {
        filename: String,
        row: usize,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unexpected API response: {0}")]
    Api(String),
}

pub type Result<T> = std::result::Result<T, ScraperError>;
