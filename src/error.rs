use thiserror::Error;

/// Errors surfaced by the wire codec, origin client, and connection handler.
///
/// Every variant here is handled inside the per-connection task: logged and
/// the connection is dropped. None of these propagate out of `handle_connection`.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed HTTP message: {0}")]
    Parse(String),

    #[error("failed to dial {0}: {1}")]
    Dial(String, std::io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request has no usable host authority")]
    MissingHost,
}
