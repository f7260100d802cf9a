//! Minimal, production-shaped collaborator implementations wiring
//! `fwd-core`'s traits to real sockets for this binary. A real deployment
//! replaces every one of these with its own ACL evaluator, peer-selection
//! policy, TLS library, and per-protocol fetchers — the core depends on
//! none of them directly (SPEC_FULL §11).

use async_trait::async_trait;
use fwd_core::candidate::{CandidateList, FwdServer, HierarchyCode};
use fwd_core::collab::{
    Connection, ConnectFailure, ConnectFailureKind, Connector, FetchOutcome, Fetcher, PeerSelector, TlsConnector,
    TlsSession,
};
use fwd_core::entry::{EntryFlags, StoreEntry, StoreStatus};
use fwd_core::error::FwdError;
use fwd_core::outgoing::{AclEngine, OutgoingAddress};
use fwd_core::request::{AclContext, Protocol, Request};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

/// Allows every request; a real deployment supplies its own `miss_access`
/// configuration and rule evaluator.
pub struct AllowAllAcl;

impl AclEngine for AllowAllAcl {
    fn matches(&self, _acl_name: &str, _ctx: &AclContext) -> bool {
        false
    }

    fn miss_access(&self, _names: &[String], _ctx: &AclContext) -> bool {
        true
    }
}

/// Always routes straight to the request's own origin; no peer
/// configuration is wired up in this binary.
pub struct DirectOnlySelector;

#[async_trait]
impl PeerSelector for DirectOnlySelector {
    async fn select(&self, _request: &Request) -> Option<CandidateList> {
        Some(CandidateList::new([FwdServer::direct(HierarchyCode::Direct)]))
    }
}

/// Plain DNS-then-connect TCP dialer. The pool itself lives in `fwd-core`;
/// this only ever opens fresh sockets.
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
        _src: OutgoingAddress,
    ) -> Result<TcpStream, ConnectFailure> {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Err(_) => Err(ConnectFailure {
                kind: ConnectFailureKind::Timeout,
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            }),
            Ok(Err(err)) => Err(ConnectFailure {
                kind: classify_connect_err(&err),
                source: err,
            }),
            Ok(Ok(stream)) => Ok(stream),
        }
    }
}

/// EMFILE/ENFILE (errno 24/23): the process or system ran out of file
/// descriptors before a socket could even be opened, not a failure
/// reaching the remote peer or resolving its name.
fn classify_connect_err(err: &io::Error) -> ConnectFailureKind {
    match err.kind() {
        io::ErrorKind::NotFound => ConnectFailureKind::Dns,
        _ if matches!(err.raw_os_error(), Some(23) | Some(24)) => ConnectFailureKind::SocketAlloc,
        _ => ConnectFailureKind::Other,
    }
}

/// TLS termination is explicitly out of scope for the forwarding core
/// itself (spec Non-goals); this stub always fails so an `https://`
/// origin surfaces a clear connect error instead of silently downgrading.
pub struct PlaintextOnlyTls;

#[async_trait]
impl TlsConnector for PlaintextOnlyTls {
    async fn handshake(
        &self,
        _stream: TcpStream,
        sni: &str,
        _cached_session: Option<TlsSession>,
    ) -> Result<(Connection, TlsSession, bool), FwdError> {
        Err(FwdError::TlsFail {
            host: sni.to_string(),
            port: 0,
            source: io::Error::new(io::ErrorKind::Unsupported, "no TLS library wired into this binary"),
        })
    }
}

/// A bare-bones HTTP/1.1 fetcher: writes a GET, reads the status line,
/// and discards the rest of the response. The real per-protocol fetchers
/// (HTTP, FTP, Gopher, WAIS, WHOIS) are out of scope for the forwarding
/// core (§6); this exists only to drive the wiring end to end.
pub struct LineFetcher;

#[async_trait]
impl Fetcher for LineFetcher {
    async fn fetch(
        &self,
        _protocol: Protocol,
        conn: Connection,
        request: Arc<Request>,
        _entry: Arc<dyn StoreEntry>,
    ) -> FetchOutcome {
        let stream = match conn {
            Connection::Plain(stream) => stream,
            Connection::Tls(_) => {
                return FetchOutcome::Closed {
                    error: Some(FwdError::UnsupportedProtocol),
                }
            }
        };

        let mut stream = stream;
        let req_line = format!("GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", request.host);
        if let Err(source) = stream.write_all(req_line.as_bytes()).await {
            return FetchOutcome::Closed {
                error: Some(FwdError::ConnectFail {
                    host: request.host.clone(),
                    port: request.port,
                    source,
                }),
            };
        }

        let mut reader = BufReader::new(stream);
        let mut status_line = String::new();
        match reader.read_line(&mut status_line).await {
            Ok(0) => FetchOutcome::Closed { error: None },
            Ok(_) => match parse_status(&status_line) {
                Some(status) => FetchOutcome::Completed { status },
                None => FetchOutcome::Closed {
                    error: Some(FwdError::ConnectFail {
                        host: request.host.clone(),
                        port: request.port,
                        source: io::Error::new(io::ErrorKind::InvalidData, "malformed status line"),
                    }),
                },
            },
            Err(source) => FetchOutcome::Closed {
                error: Some(FwdError::ConnectFail {
                    host: request.host.clone(),
                    port: request.port,
                    source,
                }),
            },
        }
    }
}

fn parse_status(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}

#[derive(Debug, Default)]
struct LoggingEntryState {
    status: StoreStatus,
    empty: bool,
    flags: EntryFlags,
    reply_status: Option<u16>,
    error: Option<String>,
}

/// Reports the terminal outcome to the caller as the core drives it to
/// completion. A real deployment's store entry instead holds cached
/// response bytes for other clients waiting on the same URL.
pub struct LoggingEntry {
    state: Mutex<LoggingEntryState>,
}

impl LoggingEntry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LoggingEntryState {
                empty: true,
                ..Default::default()
            }),
        })
    }

    pub fn outcome(&self) -> Option<u16> {
        self.state.lock().expect("entry poisoned").reply_status
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().expect("entry poisoned").error.clone()
    }
}

#[async_trait]
impl StoreEntry for LoggingEntry {
    fn store_status(&self) -> StoreStatus {
        self.state.lock().expect("entry poisoned").status
    }

    fn is_empty(&self) -> bool {
        self.state.lock().expect("entry poisoned").empty
    }

    fn reply_status(&self) -> Option<u16> {
        self.state.lock().expect("entry poisoned").reply_status
    }

    fn flags(&self) -> EntryFlags {
        self.state.lock().expect("entry poisoned").flags
    }

    fn set_flag(&self, flag: EntryFlags) {
        self.state.lock().expect("entry poisoned").flags.insert(flag);
    }

    fn clear_flag(&self, flag: EntryFlags) {
        self.state.lock().expect("entry poisoned").flags.remove(flag);
    }

    fn attach_reply(&self, status: u16) {
        let mut state = self.state.lock().expect("entry poisoned");
        state.empty = false;
        state.reply_status = Some(status);
    }

    async fn complete(&self) {
        let mut state = self.state.lock().expect("entry poisoned");
        state.status = StoreStatus::Ok;
        tracing::info!(status = ?state.reply_status, "forward completed");
    }

    fn reset(&self) {
        let mut state = self.state.lock().expect("entry poisoned");
        state.empty = true;
        state.status = StoreStatus::Pending;
        state.reply_status = None;
    }

    fn append_error(&self, err: &FwdError) {
        let mut state = self.state.lock().expect("entry poisoned");
        state.empty = false;
        state.status = StoreStatus::Aborted;
        state.error = Some(err.to_string());
        tracing::warn!(error = %err, "forward failed");
    }

    fn register_abort(&self, _tx: oneshot::Sender<()>) {
        // This binary only aborts a forward via process shutdown, driven
        // through `Forwarder::begin_shutdown` rather than a per-request
        // external signal, so there is nothing to hold onto here.
    }

    fn release(&self) {}
}
