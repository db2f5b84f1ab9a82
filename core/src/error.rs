//! Error types for the request pipeline.
//!
//! # Design
//! Every failure belongs to one `ErrorKind` so callers and tests can assert
//! on the category, not just on presence. Configuration and validation errors
//! are raised before any network I/O. Transport and I/O errors carry their
//! source behind an `Arc`, which keeps `Error` cheap to clone: the same value
//! is stored on the response record and returned to the caller.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected from the options alone, before any I/O.
    Configuration,
    /// The target URL could not be normalized or parsed.
    Validation,
    /// Opaque failure reported by the transport.
    Transport,
    /// A redirect response broke the configured policy.
    Policy,
    /// Reading, writing, compressing or decompressing a body failed.
    Io,
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("file path must be specified when writing the response to a file")]
    MissingFilePath,

    #[error("file path should not be provided when writing the response to a buffer: {0}")]
    UnexpectedFilePath(PathBuf),

    #[error("custom compression selected but no {0} hook provided")]
    MissingCompressionHook(&'static str),

    #[error("unsupported compression type: {0}")]
    UnsupportedEncoding(String),

    #[error("unsupported payload type: {0}")]
    UnsupportedPayload(String),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("form encoding failed: {0}")]
    FormEncoding(String),

    #[error("invalid URL format: missing // after scheme in {0:?}")]
    MissingSchemeSeparator(String),

    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("file does not exist: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("transport error: {0}")]
    Transport(#[source] Arc<dyn std::error::Error + Send + Sync>),

    #[error("redirect response {status} has no Location header")]
    MissingLocation { status: u16 },

    #[error("invalid redirect location {location:?}: {source}")]
    InvalidLocation {
        location: String,
        #[source]
        source: url::ParseError,
    },

    #[error("maximum redirects exceeded: limit is {limit}")]
    TooManyRedirects { limit: u32 },

    #[error("payload cannot be replayed for redirect to {0}: the stream was already consumed")]
    PayloadNotReplayable(String),

    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingFilePath
            | Error::UnexpectedFilePath(_)
            | Error::MissingCompressionHook(_)
            | Error::UnsupportedPayload(_)
            | Error::InvalidHeader { .. }
            | Error::FormEncoding(_) => ErrorKind::Configuration,
            Error::MissingSchemeSeparator(_) | Error::InvalidUrl { .. } => ErrorKind::Validation,
            Error::Transport(_) => ErrorKind::Transport,
            Error::MissingLocation { .. }
            | Error::InvalidLocation { .. }
            | Error::TooManyRedirects { .. } => ErrorKind::Policy,
            Error::UnsupportedEncoding(_)
            | Error::FileNotFound(_)
            | Error::PayloadNotReplayable(_)
            | Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Wrap an opaque transport failure.
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Transport(Arc::new(err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_limit_message_names_the_limit() {
        let err = Error::TooManyRedirects { limit: 5 };
        assert_eq!(err.to_string(), "maximum redirects exceeded: limit is 5");
        assert_eq!(err.kind(), ErrorKind::Policy);
    }

    #[test]
    fn sink_errors_are_configuration_errors() {
        assert_eq!(Error::MissingFilePath.kind(), ErrorKind::Configuration);
        let err = Error::UnexpectedFilePath(PathBuf::from("out.bin"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("out.bin"));
    }

    #[test]
    fn io_errors_convert_and_clone() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed").into();
        let copy = err.clone();
        assert_eq!(copy.kind(), ErrorKind::Io);
        assert!(copy.to_string().contains("pipe closed"));
    }

    #[test]
    fn unsupported_encoding_names_the_encoding() {
        let err = Error::UnsupportedEncoding("zstd".to_string());
        assert_eq!(err.to_string(), "unsupported compression type: zstd");
    }
}
