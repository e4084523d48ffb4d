use forward_proxy::{handle_connection, BlockList, MetricsRegistry, ResponseCache};
use std::env;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

fn parse_port(args: &[String]) -> Result<u16, String> {
    let prog = args.first().map(String::as_str).unwrap_or("proxy");
    let Some(raw) = args.get(1) else {
        return Err(format!("usage: {prog} <port number>"));
    };
    if args.len() > 2 {
        return Err(format!("usage: {prog} <port number>"));
    }
    raw.parse::<u16>()
        .map_err(|_| format!("error: {raw} is not a valid port number"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let port = match parse_port(&args) {
        Ok(port) => port,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let listener = match TcpListener::bind(format!("0.0.0.0:{port}")).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };
    info!(port, "listening");

    let cache = ResponseCache::new();
    let blocklist = BlockList::new();
    let metrics = MetricsRegistry::new();
    let active_connections = Arc::new(AtomicUsize::new(0));

    let repl_handle = tokio::runtime::Handle::current();
    let repl_blocklist = blocklist.clone();
    let repl_metrics = metrics.clone();
    tokio::task::spawn_blocking(move || {
        forward_proxy::commandline::run(repl_handle, repl_blocklist, repl_metrics);
    });

    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return ExitCode::FAILURE;
        }
    };
    let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
    {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            return ExitCode::FAILURE;
        }
    };

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, initiating graceful shutdown");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, initiating graceful shutdown");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let current = active_connections.fetch_add(1, Ordering::Relaxed) + 1;
                        debug!(%addr, active = current, "accepted connection");

                        let cache = cache.clone();
                        let blocklist = blocklist.clone();
                        let metrics = metrics.clone();
                        let active_connections = active_connections.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, cache, blocklist, metrics).await;
                            let remaining = active_connections.fetch_sub(1, Ordering::Relaxed) - 1;
                            debug!(active = remaining, "connection closed");
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                    }
                }
            }
        }
    }

    info!(
        active = active_connections.load(Ordering::Relaxed),
        "waiting for in-flight connections to close"
    );
    while active_connections.load(Ordering::Relaxed) > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    info!("all connections closed, shutting down");

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_port_prints_usage() {
        let args = vec!["proxy".to_string()];
        assert_eq!(parse_port(&args), Err("usage: proxy <port number>".to_string()));
    }

    #[test]
    fn too_many_args_prints_usage() {
        let args = vec!["proxy".to_string(), "8080".to_string(), "extra".to_string()];
        assert_eq!(parse_port(&args), Err("usage: proxy <port number>".to_string()));
    }

    #[test]
    fn invalid_port_reports_value() {
        let args = vec!["proxy".to_string(), "notaport".to_string()];
        assert_eq!(
            parse_port(&args),
            Err("error: notaport is not a valid port number".to_string())
        );
    }

    #[test]
    fn valid_port_parses() {
        let args = vec!["proxy".to_string(), "8080".to_string()];
        assert_eq!(parse_port(&args), Ok(8080));
    }

    #[test]
    fn out_of_range_port_reports_value() {
        let args = vec!["proxy".to_string(), "70000".to_string()];
        assert_eq!(
            parse_port(&args),
            Err("error: 70000 is not a valid port number".to_string())
        );
    }
}
