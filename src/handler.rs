//! Per-connection state machine: parse -> classify -> (block | tunnel |
//! fetch+cache) -> reply.

use crate::blocklist::BlockList;
use crate::cache::{CacheKey, ResponseCache};
use crate::error::ProxyError;
use crate::metrics::MetricsRegistry;
use crate::origin::{self, FetchOptions};
use crate::wire::{HeaderMap, Request, Response};
use bytes::Bytes;
use std::time::{Duration, Instant, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

const TUNNEL_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Drives one client connection end to end. All errors are handled here:
/// logged, then the connection is dropped. Nothing propagates to the caller.
pub async fn handle_connection(
    mut stream: TcpStream,
    cache: ResponseCache,
    blocklist: BlockList,
    metrics: MetricsRegistry,
) {
    let start = Instant::now();

    let request = match Request::read_from(&mut stream).await {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse request");
            return;
        }
    };

    let host = match resolve_host(&request) {
        Some(host) => host,
        None => {
            tracing::warn!("request carries no usable host authority");
            return;
        }
    };

    if blocklist.contains(&host).await {
        if let Err(e) = respond_blocked(&mut stream, &host, &request.version).await {
            tracing::warn!(error = %e, "failed to write blocked response");
        } else {
            tracing::warn!(host = %host, "block");
        }
        return;
    }

    if request.method.eq_ignore_ascii_case("CONNECT") {
        tracing::info!(
            method = %request.method,
            host = %host,
            http_version = %request.version,
            "https request"
        );
        if let Err(e) = tunnel(stream, &host).await {
            tracing::warn!(error = %e, host = %host, "tunnel failed");
        }
        return;
    }

    if let Err(e) = handle_fetch(stream, request, host, cache, metrics, start).await {
        tracing::warn!(error = %e, "fetch failed");
    }
}

/// Resolves the host authority used for the block-list check, the cache
/// key, and the origin dial: the `Host` header takes priority; an
/// absolute-form request-target's authority is the fallback for requests
/// that omit `Host`; a CONNECT target is itself an authority.
fn resolve_host(request: &Request) -> Option<String> {
    if let Some(host) = request.headers.get("Host") {
        return Some(host.to_string());
    }
    if let Some(authority) = &request.absolute_form_authority {
        return Some(authority.clone());
    }
    if request.method.eq_ignore_ascii_case("CONNECT") {
        return Some(request.target.clone());
    }
    None
}

async fn respond_blocked(
    stream: &mut TcpStream,
    host: &str,
    version: &str,
) -> Result<(), ProxyError> {
    let body = format!("Blocked \"{host}\" by proxy\n");
    let mut headers = HeaderMap::new();
    headers.insert("Content-Length", body.len().to_string());
    let response = Response {
        version: version.to_string(),
        status: 403,
        reason: "Forbidden".to_string(),
        headers,
        body: Bytes::from(body),
    };
    stream.write_all(&response.to_bytes()).await?;
    Ok(())
}

/// Splits a `host[:port]` authority, defaulting to `default_port` when no
/// port is present.
fn split_authority(authority: &str, default_port: u16) -> (String, u16) {
    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (authority.to_string(), default_port),
        },
        None => (authority.to_string(), default_port),
    }
}

async fn tunnel(mut client: TcpStream, host_authority: &str) -> Result<(), ProxyError> {
    let (host, port) = split_authority(host_authority, 443);

    let origin = timeout(TUNNEL_DIAL_TIMEOUT, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| {
            ProxyError::Dial(
                format!("{host}:{port}"),
                std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"),
            )
        })?
        .map_err(|e| ProxyError::Dial(format!("{host}:{port}"), e))?;

    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;

    let (mut client_read, mut client_write) = client.into_split();
    let (mut origin_read, mut origin_write) = origin.into_split();

    let server_to_client = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut origin_read, &mut client_write).await;
    });
    let _ = tokio::io::copy(&mut client_read, &mut origin_write).await;
    server_to_client.abort();

    Ok(())
}

async fn handle_fetch(
    mut client: TcpStream,
    request: Request,
    host: String,
    cache: ResponseCache,
    metrics: MetricsRegistry,
    start: Instant,
) -> Result<(), ProxyError> {
    let key = CacheKey::new(host.clone(), request.target.clone());
    let full_url = format!("http://{host}{}", request.target);

    let cached_entry = cache.lookup(&key).await;
    let (written_len, is_cached) = match cached_entry {
        Some(entry) if !entry.is_stale() => {
            client.write_all(&entry.response_bytes).await?;
            let elapsed = start.elapsed();
            // A pure hit fetches nothing from the origin this request, so
            // the full stored bandwidth counts as saved.
            metrics
                .record_hit(
                    &full_url,
                    entry.uncached_response_time,
                    elapsed,
                    entry.uncached_bandwidth,
                    0,
                )
                .await;
            (entry.response_bytes.len(), true)
        }
        Some(entry) => {
            let mut headers = request.headers.clone();
            headers.insert(
                "If-Modified-Since",
                httpdate::fmt_http_date(SystemTime::now()),
            );
            let fetch_start = Instant::now();
            let response = origin::fetch(
                &full_url,
                &request.target,
                FetchOptions {
                    method: request.method.clone(),
                    http_version: request.version.clone(),
                    headers,
                },
            )
            .await?;
            let fetch_elapsed = fetch_start.elapsed();

            if response.status == 304 {
                client.write_all(&entry.response_bytes).await?;
                cache.reset_timer(&key, &response.headers.cache_control()).await;
                let elapsed = start.elapsed();
                // The 304 carries no representation body, so the resource's
                // bytes were not re-fetched from the origin this request.
                metrics
                    .record_hit(
                        &full_url,
                        entry.uncached_response_time,
                        elapsed,
                        entry.uncached_bandwidth,
                        0,
                    )
                    .await;
                (entry.response_bytes.len(), true)
            } else {
                let bytes = response.to_bytes();
                client.write_all(&bytes).await?;
                cache.insert(key, &response, fetch_elapsed).await;
                (bytes.len(), false)
            }
        }
        None => {
            let fetch_start = Instant::now();
            let response = origin::fetch(
                &full_url,
                &request.target,
                FetchOptions {
                    method: request.method.clone(),
                    http_version: request.version.clone(),
                    headers: request.headers.clone(),
                },
            )
            .await?;
            let fetch_elapsed = fetch_start.elapsed();
            let bytes = response.to_bytes();
            client.write_all(&bytes).await?;
            cache.insert(key, &response, fetch_elapsed).await;
            (bytes.len(), false)
        }
    };

    let duration = start.elapsed();
    tracing::info!(
        method = %request.method,
        url = %full_url,
        http_version = %request.version,
        bandwidth = written_len,
        duration_ms = duration.as_secs_f64() * 1000.0,
        cached = is_cached,
        "http response"
    );

    Ok(())
}
