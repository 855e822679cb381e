use std::path::PathBuf;

/// Errors that can abort a Strata operation.
///
/// Only configuration and backend-access failures are represented here.
/// Per-item anomalies (an unparseable hunk, a line blame cannot resolve, a
/// file in an unsupported language) degrade to absent data instead.
///
/// # Examples
///
/// ```
/// use strata_core::StrataError;
///
/// let err = StrataError::Config("single cannot be combined with since".into());
/// assert!(err.to_string().contains("single cannot be combined"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StrataError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Conflicting or invalid mining configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(help("check the range selectors and filters passed to the miner"))]
    Config(String),

    /// Backend (git) access failure.
    #[error("git error: {0}")]
    Git(String),

    /// A remote repository could not be cloned into the scratch directory.
    #[error("failed to clone {url}: {message}")]
    Clone {
        /// Remote URL that was requested.
        url: String,
        /// Backend error message.
        message: String,
    },

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl StrataError {
    /// Whether this error came from the configuration layer rather than the backend.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_core::StrataError;
    ///
    /// assert!(StrataError::Config("x".into()).is_config());
    /// assert!(!StrataError::Git("x".into()).is_config());
    /// ```
    pub fn is_config(&self) -> bool {
        matches!(self, StrataError::Config(_) | StrataError::Toml(_))
    }
}
