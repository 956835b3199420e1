//! Error types for shared state

/// Result type for state operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for state operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pattern failed to compile
    #[error("Failed to instantiate '{pattern}' regexp.")]
    Regex {
        /// Pattern text
        pattern: String,
        /// Compiler diagnostic
        message: String,
    },

    /// Unknown variable scope
    #[error("Invalid variable scope: {0}")]
    InvalidScope(String),
}
