use thiserror::Error;

pub type Result<T> = std::result::Result<T, GradNormError>;

#[derive(Error, Debug)]
pub enum GradNormError {
    #[error("invalid norm order: {0}")]
    InvalidNormOrder(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigFormat(String),

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

impl GradNormError {
    pub fn invalid_norm_order(value: impl std::fmt::Display) -> Self {
        Self::InvalidNormOrder(value.to_string())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl From<toml::de::Error> for GradNormError {
    fn from(value: toml::de::Error) -> Self {
        GradNormError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for GradNormError {
    fn from(value: serde_json::Error) -> Self {
        GradNormError::ConfigFormat(value.to_string())
    }
}
