//! Process shell for the RPL engine: flag parsing, logging setup, wiring the
//! engine up to a stub per-interface receiver and a stdin/stdout CLI, and
//! Ctrl-C-driven shutdown.
//!
//! Grounded on `homeroute/src/main.rs`'s overall shape (logging init, a
//! supervised task per long-running service, `tokio::signal::ctrl_c`
//! shutdown) — everything specific to DNS/DHCP/proxy/ACME is gone, since
//! this process has exactly one thing to supervise: the engine's own
//! message loop, plus one receive task per interface.

mod supervisor;

use anyhow::{bail, Context};
use rpl_engine::{CliRequest, Engine, EngineConfig, Frame, InMemoryAddressAdapter, NoopLinkAdapter, NoopLinkSender};
use std::net::Ipv6Addr;
use supervisor::{spawn_supervised, ServicePriority};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

struct Args {
    ifaces: Vec<String>,
    is_root: bool,
    dodag_ids: Vec<Ipv6Addr>,
    prefixes: Vec<Ipv6Addr>,
    verbosity: u8,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut ifaces = Vec::new();
    let mut is_root = false;
    let mut dodag_ids = Vec::new();
    let mut prefixes = Vec::new();
    let mut verbosity = 0u8;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-i" => {
                let iface = args.next().context("-i requires an interface name")?;
                ifaces.push(iface);
            }
            "-d" => {
                let value = args.next().context("-d requires a dodagID")?;
                let dodag_id: Ipv6Addr = value.parse().with_context(|| format!("invalid dodagID {value:?}"))?;
                dodag_ids.push(dodag_id);
            }
            "-p" => {
                let value = args.next().context("-p requires a prefix")?;
                let prefix: Ipv6Addr = value.parse().with_context(|| format!("invalid prefix {value:?}"))?;
                prefixes.push(prefix);
            }
            "-R" => is_root = true,
            "-v" => verbosity = verbosity.saturating_add(1),
            other => bail!("unrecognized argument: {other}"),
        }
    }

    if is_root && dodag_ids.is_empty() {
        bail!("-R (root) requires at least one -d dodagID to announce");
    }
    if ifaces.is_empty() {
        bail!("at least one -i interface is required");
    }

    Ok(Args { ifaces, is_root, dodag_ids, prefixes, verbosity })
}

fn init_logging(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "info,rpld=debug",
        1 => "debug,rpld=debug",
        _ => "trace,rpld=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.parse().unwrap()))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    init_logging(args.verbosity);

    info!("rpld starting (root={}, ifaces={:?})", args.is_root, args.ifaces);

    let config = EngineConfig {
        ifaces: args.ifaces.clone(),
        is_root: args.is_root,
        dodag_ids: args.dodag_ids,
        prefixes: args.prefixes,
    };

    let mut engine = Engine::new(config, Box::new(InMemoryAddressAdapter::new()), Box::new(NoopLinkAdapter), Box::new(NoopLinkSender));

    let (wire_tx, wire_rx) = mpsc::channel::<Frame>(256);
    let (cli_tx, cli_rx) = mpsc::channel::<CliRequest>(16);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    // One supervised receive task per interface. Raw ICMPv6 socket I/O is
    // an external collaborator out of this daemon's scope, so each task is
    // a stub occupying the slot a real receive loop would fill; it never
    // completes, so it never restarts.
    for iface in &args.ifaces {
        let iface = iface.clone();
        let wire_tx = wire_tx.clone();
        spawn_supervised("iface-recv", ServicePriority::Critical, move || {
            let iface = iface.clone();
            let wire_tx = wire_tx.clone();
            async move {
                let _ = (&iface, &wire_tx);
                std::future::pending::<()>().await;
                Ok(())
            }
        });
    }
    drop(wire_tx);

    tokio::spawn(run_cli(cli_tx));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl-C, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    engine.run(wire_rx, cli_rx, shutdown_rx).await;

    info!("rpld stopped");
    Ok(())
}

/// Reads commands from stdin, one per line, and prints the engine's
/// formatted response to stdout. Grounded on `cli.py`'s request/response
/// round trip over a socket, here just a channel into the engine task.
async fn run_cli(cli_tx: mpsc::Sender<CliRequest>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "error reading CLI input");
                break;
            }
        };
        let command = line.trim().to_string();
        if command.is_empty() {
            continue;
        }

        let (respond_to, response) = oneshot::channel();
        if cli_tx.send(CliRequest { command, respond_to }).await.is_err() {
            break;
        }

        match response.await {
            Ok(text) => {
                let _ = stdout.write_all(text.as_bytes()).await;
                let _ = stdout.write_all(b"\n").await;
                let _ = stdout.flush().await;
            }
            Err(_) => break,
        }
    }
}
