use thiserror::Error;

/// Typed error for nbo-engine library operations.
///
/// The scoring core never returns this; it only surfaces from configuration,
/// event-file reading, cache persistence and the external collaborator traits.
#[derive(Debug, Error)]
pub enum NboError {
    /// Parsing errors (event rows, cache files, oracle responses)
    #[error("parse error: {0}")]
    Parse(String),
    /// Configuration errors (invalid weights, unreadable config)
    #[error("config error: {0}")]
    Config(String),
    /// External generative oracle errors (rule generation, explanations)
    #[error("oracle error: {0}")]
    Oracle(String),
    /// Trained regressor errors
    #[error("model error: {0}")]
    Model(String),
    /// IO errors (file read/write)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for NboError {
    fn from(err: serde_json::Error) -> Self {
        NboError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for NboError {
    fn from(err: toml::de::Error) -> Self {
        NboError::Config(err.to_string())
    }
}
