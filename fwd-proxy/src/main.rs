//! Thin wiring binary for the forwarding core: constructs a `Forwarder`
//! from a fixed set of collaborators and drives one forward per
//! invocation, printing the terminal status (or error) to stdout.
//!
//! Everything interesting — ACL evaluation, peer selection, TLS, the
//! per-protocol fetcher — is an external collaborator the core only
//! depends on through a trait (SPEC_FULL §11); this binary supplies the
//! simplest implementation of each that still exercises a real socket.

mod collaborators;

use anyhow::{bail, Context, Result};
use clap::Parser;
use collaborators::{AllowAllAcl, DirectOnlySelector, LineFetcher, LoggingEntry, PlaintextOnlyTls, TcpConnector};
use fwd_core::request::{HierarchyNote, Method, Protocol, Request, RequestFlags};
use fwd_core::{ForwardConfig, Forwarder};
use fwd_metrics::ReplyCodes;
use fwd_pool::ConnPool;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Forwards a single plaintext HTTP GET through the request-forwarding
/// core and prints the status line it receives.
#[derive(Parser, Debug)]
struct Args {
    /// Origin host to forward the request to.
    host: String,

    /// Origin port.
    #[arg(default_value_t = 80)]
    port: u16,

    /// Per-attempt connect timeout, in seconds.
    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = ForwardConfig::new();
    config.connect_timeout = Duration::from_secs(args.connect_timeout_secs);

    let forwarder = Arc::new(Forwarder::new(
        Arc::new(AllowAllAcl),
        Arc::new(DirectOnlySelector),
        Arc::new(TcpConnector),
        Arc::new(PlaintextOnlyTls),
        Arc::new(LineFetcher),
        ConnPool::new(),
        Arc::new(ReplyCodes::new()),
        config,
    ));

    tokio::spawn({
        let forwarder = Arc::clone(&forwarder);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received ctrl-c, refusing any further forwards");
                forwarder.begin_shutdown();
            }
        }
    });

    let request = Request {
        client_addr: Some(IpAddr::from([127, 0, 0, 1])),
        local_addr: IpAddr::from([127, 0, 0, 1]),
        local_port: 3128,
        protocol: Protocol::Http,
        host: args.host.clone(),
        port: args.port,
        method: Method::Get,
        headers: Vec::new(),
        flags: RequestFlags::PROXY_KEEPALIVE,
        hier_note: HierarchyNote::default(),
        has_body: false,
    };

    let entry = LoggingEntry::new();
    let handle = forwarder
        .start(0, entry.clone(), request)
        .ok_or_else(|| anyhow::anyhow!("forwarding was denied or the proxy is shutting down"))?;
    handle.await.context("forwarding task panicked")?;

    match entry.outcome() {
        Some(status) => {
            println!("GET {}:{} -> {status}", args.host, args.port);
            Ok(())
        }
        None => bail!("forwarding failed: {}", entry.error().unwrap_or_default()),
    }
}
