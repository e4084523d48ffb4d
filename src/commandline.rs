//! Operator command loop: a blocking stdin REPL that mutates the block list
//! and prints metrics. Spawned with `tokio::task::spawn_blocking` so its
//! blocking `stdin` reads never occupy the single-threaded runtime's only
//! worker.

use crate::blocklist::BlockList;
use crate::metrics::MetricsRegistry;
use std::io::{self, BufRead, Write};
use tokio::runtime::Handle;

/// Runs the REPL to completion (stdin EOF). Intended to be driven via
/// `tokio::task::spawn_blocking(move || commandline::run(handle, blocklist, metrics))`.
pub fn run(runtime: Handle, blocklist: BlockList, metrics: MetricsRegistry) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let Some(output) = dispatch(&runtime, &blocklist, &metrics, &line) else {
            continue;
        };
        let _ = writeln!(stdout, "{output}");
        let _ = stdout.flush();
    }
}

fn dispatch(
    runtime: &Handle,
    blocklist: &BlockList,
    metrics: &MetricsRegistry,
    line: &str,
) -> Option<String> {
    let mut parts = line.trim().split_whitespace();
    let command = parts.next()?;
    let rest: Vec<&str> = parts.collect();

    match command {
        "block" => match rest.as_slice() {
            [host] => Some(runtime.block_on(async {
                if blocklist.insert(host).await {
                    format!("block: blocked \"{host}\"")
                } else {
                    format!("block: website \"{host}\" already blocked")
                }
            })),
            _ => Some("usage: block <host>".to_string()),
        },
        "unblock" => match rest.as_slice() {
            [host] => Some(runtime.block_on(async {
                if blocklist.remove(host).await {
                    format!("unblock: unblocked \"{host}\"")
                } else {
                    format!("unblock: website \"{host}\" not blocked")
                }
            })),
            _ => Some("usage: unblock <host>".to_string()),
        },
        "metrics" => {
            if rest.is_empty() {
                Some(runtime.block_on(metrics.snapshot()))
            } else {
                Some("usage: metrics".to_string())
            }
        }
        "clear" => {
            if rest.is_empty() {
                Some("\x1B[2J\x1B[1;1H".to_string())
            } else {
                Some("usage: clear".to_string())
            }
        }
        other => Some(format!("proxy: \"{other}\": command not found")),
    }
}
