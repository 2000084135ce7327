//! Error types for recavc

use thiserror::Error;

/// Result type alias for recavc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for recavc
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input (unopenable or unusable input file)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed archive
    #[error("Archive error: {0}")]
    Archive(String),

    /// Surrogate marker / coded block mismatch during decompression
    #[error("Surrogate error: {0}")]
    Surrogate(String),

    /// Arithmetic coder misconfiguration or invariant violation
    #[error("Coder error: {0}")]
    Coder(String),

    /// Parser drove the hooks in an unexpected order
    #[error("Parser error: {0}")]
    Parser(String),

    /// Round-trip verification failed
    #[error("Roundtrip mismatch: {0}")]
    Roundtrip(String),
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create an archive error
    pub fn archive<S: Into<String>>(msg: S) -> Self {
        Error::Archive(msg.into())
    }

    /// Create a surrogate error
    pub fn surrogate<S: Into<String>>(msg: S) -> Self {
        Error::Surrogate(msg.into())
    }

    /// Create a coder error
    pub fn coder<S: Into<String>>(msg: S) -> Self {
        Error::Coder(msg.into())
    }

    /// Create a parser error
    pub fn parser<S: Into<String>>(msg: S) -> Self {
        Error::Parser(msg.into())
    }
}
