//! HTTP/1.1 wire codec: parsing and serialization of request and response
//! messages on a byte stream, per RFC 7230 subset described in the proxy's
//! design (§4.1).

pub mod headers;
pub mod request;
pub mod response;

pub use headers::HeaderMap;
pub use request::Request;
pub use response::Response;

use crate::error::ProxyError;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads from `stream` into `buf` until the header block (`\r\n\r\n`) is
/// fully buffered. Returns the byte offset of the end of the header block
/// (start of any body bytes already buffered).
///
/// `Ok(None)` indicates a clean EOF before a single byte was read (the
/// connection closed without sending anything - not an error).
pub(crate) async fn fill_until_headers_complete<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut BytesMut,
) -> Result<Option<usize>, ProxyError> {
    let mut read_any = false;
    loop {
        if let Some(pos) = find_header_end(buf) {
            return Ok(Some(pos));
        }
        let mut chunk = [0u8; 8192];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if read_any {
                return Err(ProxyError::Parse(
                    "connection closed before headers completed".into(),
                ));
            }
            return Ok(None);
        }
        read_any = true;
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}
