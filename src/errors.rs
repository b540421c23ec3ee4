use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    /// The model answered, but the answer did not satisfy the declared schema.
    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    /// The provider refused in a way retrying cannot fix (bad key, forbidden model).
    #[error("Non-retryable model failure: {0}")]
    NonRetryable(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Matching error: {0}")]
    Matching(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Detection interrupted")]
    Interrupted,
}

impl LocatorError {
    /// Fatal errors escape vote fan-outs; everything else counts as an empty vote.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LocatorError::Interrupted | LocatorError::NonRetryable(_))
    }
}

impl serde::Serialize for LocatorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type LocatorResult<T> = Result<T, LocatorError>;
