use super::headers::HeaderMap;
use super::fill_until_headers_complete;
use crate::error::ProxyError;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// An HTTP/1.1 request message.
///
/// `target` is always origin-form (a path, optionally with a query string)
/// by the time parsing completes: absolute-form request-targets
/// (`http://host/path`) are normalized down to `path` per RFC 7230 §5.3.2,
/// since that's what both the cache key and the outbound request to the
/// origin need.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// The authority (`host[:port]`) carried by an absolute-form
    /// request-target, kept around for the case where the `Host` header is
    /// absent. `None` for origin-form and CONNECT-form targets.
    pub absolute_form_authority: Option<String>,
}

impl Request {
    /// Reads and parses one request off `stream`. Returns `Ok(None)` on a
    /// clean EOF before any bytes arrived (not an error - just an idle
    /// connection closing).
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut R,
    ) -> Result<Option<Self>, ProxyError> {
        let mut buf = BytesMut::with_capacity(8192);
        let header_end = match fill_until_headers_complete(stream, &mut buf).await? {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let mut raw_headers = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Request::new(&mut raw_headers);
        let status = parsed
            .parse(&buf[..header_end])
            .map_err(|e| ProxyError::Parse(format!("request line/headers: {e}")))?;
        if status.is_partial() {
            return Err(ProxyError::Parse(
                "incomplete request after header boundary".into(),
            ));
        }

        let method = parsed
            .method
            .ok_or_else(|| ProxyError::Parse("missing method".into()))?
            .to_string();
        let raw_target = parsed
            .path
            .ok_or_else(|| ProxyError::Parse("missing request-target".into()))?
            .to_string();
        let version = match parsed.version {
            Some(1) => "HTTP/1.1".to_string(),
            Some(0) => "HTTP/1.0".to_string(),
            _ => return Err(ProxyError::Parse("unsupported HTTP version".into())),
        };

        let mut headers = HeaderMap::new();
        for h in parsed.headers.iter() {
            headers.insert(h.name, String::from_utf8_lossy(h.value).into_owned());
        }

        let (target, absolute_form_authority) = derive_target(&method, &raw_target)?;

        let mut body = buf.split_off(header_end);
        if let Some(len) = headers.content_length() {
            while body.len() < len {
                let mut chunk = [0u8; 8192];
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(ProxyError::Parse("EOF before body complete".into()));
                }
                body.extend_from_slice(&chunk[..n]);
            }
            body.truncate(len);
        } else {
            body.clear();
        }

        Ok(Some(Request {
            method,
            target,
            version,
            headers,
            body: body.freeze(),
            absolute_form_authority,
        }))
    }

    /// Serializes the request line, headers, and body verbatim.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.method, self.target, self.version).as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out.freeze()
    }
}

/// Derives the origin-form target and, for absolute-form requests, the
/// authority it carried. CONNECT's request-target is itself an authority
/// (`host:port`, not a URL) and passes through unchanged; origin-form
/// targets (already starting with `/`) likewise pass through unchanged. An
/// absolute-form target (`http://host/path?q`) is normalized down to
/// origin-form (`/path?q`) per RFC 7230 §5.3.2, with its authority kept
/// alongside for the case where the `Host` header is missing.
fn derive_target(
    method: &str,
    raw_target: &str,
) -> Result<(String, Option<String>), ProxyError> {
    if method.eq_ignore_ascii_case("CONNECT") || raw_target.starts_with('/') {
        return Ok((raw_target.to_string(), None));
    }
    let url = url::Url::parse(raw_target)?;
    let host = url.host_str().ok_or(ProxyError::MissingHost)?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let mut path = url.path().to_string();
    if path.is_empty() {
        path = "/".to_string();
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    Ok((path, Some(authority)))
}
