//! Origin client: dials a TCP connection to an origin host, writes a
//! request, and reads back a response. One dial per fetch - no connection
//! pooling or reuse.

use crate::error::ProxyError;
use crate::wire::{HeaderMap, Request, Response};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for an origin fetch: method, HTTP version, and request headers.
pub struct FetchOptions {
    pub method: String,
    pub http_version: String,
    pub headers: HeaderMap,
}

/// Fetches `url` from its origin: parse -> dial -> inject Host -> write ->
/// read -> return. The connection is closed when `stream` drops at the end
/// of this function.
pub async fn fetch(
    url: &str,
    target_path: &str,
    mut options: FetchOptions,
) -> Result<Response, ProxyError> {
    let parsed = url::Url::parse(url)?;
    let host = parsed.host_str().ok_or(ProxyError::MissingHost)?.to_string();
    if host.is_empty() {
        return Err(ProxyError::MissingHost);
    }
    let port = parsed.port().unwrap_or(80);

    let mut stream = timeout(DIAL_TIMEOUT, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| {
            ProxyError::Dial(
                format!("{host}:{port}"),
                std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"),
            )
        })?
        .map_err(|e| ProxyError::Dial(format!("{host}:{port}"), e))?;

    if !options.headers.contains("Host") {
        options.headers.insert("Host", host.clone());
    }

    let path = if target_path.is_empty() {
        "/".to_string()
    } else {
        target_path.to_string()
    };

    let request = Request {
        method: options.method,
        target: path,
        version: options.http_version,
        headers: options.headers,
        body: bytes::Bytes::new(),
        absolute_form_authority: None,
    };

    stream.write_all(&request.to_bytes()).await?;
    Response::read_from(&mut stream).await
}
