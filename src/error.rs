//! Unified error type.

use std::path::PathBuf;

/// The error type returned by httpsvr's fallible operations.
///
/// Application-level errors (404, 500, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: a bad listen address, a port that cannot be
/// bound, unreadable TLS material or configuration files.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid listen address `{0}`")]
    InvalidAddress(String),

    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid route `{path}`: {source}")]
    Route {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("tls: {0}")]
    Tls(String),

    #[error("config {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
}
