use thiserror::Error;

/// Errors a request can end in.
///
/// None of these are fatal; the client stays usable and the caller decides
/// whether to retry. The `Display` strings are what master-server and
/// update-check callers show to the user, so they stay descriptive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// The server spec did not resolve to any address.
    #[error("Could not resolve server address {0}!")]
    Resolve(String),
    /// `query` was called before `set_server`.
    #[error("No server address set")]
    NotConfigured,
    /// The connection attempt could not be started.
    #[error("Could not start connection")]
    Connect,
    /// The serialized request could not be handed to the transport.
    #[error("Unable to send HTTP request")]
    Send,
    /// The status line did not parse as `HTTP/<major>.<minor> <code> <reason>`.
    #[error("Invalid status line!")]
    InvalidStatusLine,
    /// The server answered with an HTTP major version other than 1.
    #[error("Unsupported HTTP version: {major}.{minor}!")]
    UnsupportedVersion { major: u32, minor: u32 },
    /// The server answered with a non-200 status code.
    #[error("HTTP server responded {code}: {reason}")]
    Status { code: u16, reason: String },
    /// No parseable `Content-Length` header. Chunked responses end up here.
    #[error("Invalid server response: Content-Length is missing!")]
    MissingContentLength,
    /// The gzip body failed to decompress or exceeded the output cap.
    #[error("Could not decompress data!")]
    Decompress,
    /// The per-request liveness deadline elapsed.
    #[error("Request timeout")]
    Timeout,
    /// The connection dropped before a complete response was parsed.
    #[error("Unexpected disconnect: {0}")]
    Disconnect(String),
    /// The request was cancelled, either explicitly or by a new query.
    #[error("{0}")]
    Cancelled(String),
}
