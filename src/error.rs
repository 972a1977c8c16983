use std::path::PathBuf;

/// The input could not be parsed as well-formed XML, or nothing usable was
/// left of it after sanitization. No output is produced for such input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed markup at byte {position}: {reason}")]
pub struct MalformedMarkupError {
    pub position: u64,
    pub reason: String,
}

impl MalformedMarkupError {
    pub fn new(position: u64, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

/// A whitelist document could not be turned into a policy.
#[derive(Debug, thiserror::Error)]
pub enum PolicyLoadError {
    #[error("whitelist is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("whitelist has an unexpected shape: {0}")]
    Shape(String),

    #[error("invalid value pattern for `{attribute}`: {source}")]
    Pattern {
        attribute: String,
        #[source]
        source: regex::Error,
    },
}

/// Deployment settings could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Crate-level error used by the host layer and the CLI.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Malformed(#[from] MalformedMarkupError),

    #[error(transparent)]
    Policy(#[from] PolicyLoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
