//! External collaborator contracts (§6 / SPEC_FULL §11).
//!
//! The core depends only on these traits — never on a concrete ACL, DNS,
//! TLS, store, or fetcher implementation. Test doubles live in
//! [`crate::test_support`].

use crate::candidate::CandidateList;
use crate::entry::StoreEntry;
use crate::error::FwdError;
use crate::outgoing::OutgoingAddress;
use crate::request::Request;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Eventually invokes `select`; `None` means peer selection produced no
/// candidates at all.
#[async_trait]
pub trait PeerSelector: Send + Sync {
    async fn select(&self, request: &Request) -> Option<CandidateList>;

    /// Feeds connect outcomes back into peer liveness tracking; selection
    /// itself stays out of scope, but the signal that drives it does not.
    fn note_connect_failed(&self, _peer: &crate::peer::Peer) {}
    fn note_connect_succeeded(&self, _peer: &crate::peer::Peer) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectFailureKind {
    Dns,
    /// The connector's own timeout budget (the `timeout` argument to
    /// `connect`) elapsed before DNS resolution or the TCP handshake
    /// completed.
    Timeout,
    /// The local socket itself could never be opened (fd/memory
    /// exhaustion), as opposed to a failure reaching the remote peer.
    /// Maps to `FwdError::SocketAllocFail` (500, terminal) rather than
    /// the retriable `ConnectFail` (503).
    SocketAlloc,
    Other,
}

#[derive(Debug)]
pub struct ConnectFailure {
    pub kind: ConnectFailureKind,
    pub source: io::Error,
}

/// DNS resolution plus non-blocking TCP connect, reported as exactly one
/// outcome (mirrors `commConnectStart`'s single-invocation contract).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
        src: OutgoingAddress,
    ) -> Result<TcpStream, ConnectFailure>;
}

/// Opaque session-resumption token, cached per peer and replayed on the
/// next handshake to the same peer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsSession(pub Vec<u8>);

/// A connection ready for protocol dispatch, either plaintext or having
/// completed a TLS handshake.
pub enum Connection {
    Plain(TcpStream),
    Tls(Box<dyn AsyncStream>),
}

pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

#[async_trait]
pub trait TlsConnector: Send + Sync {
    /// Drives the handshake to completion, restoring `cached_session` if
    /// given. Returns the wrapped stream, the (possibly new) session to
    /// cache, and whether the cached session was actually reused.
    async fn handshake(
        &self,
        stream: TcpStream,
        sni: &str,
        cached_session: Option<TlsSession>,
    ) -> Result<(Connection, TlsSession, bool), FwdError>;
}

/// What a fetcher's run produced: either it drove the entry to
/// completion (there is a reply status to evaluate for re-forwarding) or
/// the connection ended before any reply was committed.
pub enum FetchOutcome {
    Completed { status: u16 },
    Closed { error: Option<FwdError> },
}

/// Takes ownership of a connection for the duration of one protocol
/// fetch; eventually resolves with a [`FetchOutcome`] corresponding to
/// the original `FwdState::complete()` / socket-close handoff.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        protocol: crate::request::Protocol,
        conn: Connection,
        request: Arc<Request>,
        entry: Arc<dyn StoreEntry>,
    ) -> FetchOutcome;
}

#[derive(Clone, Debug)]
pub struct ErrorState {
    pub status: u16,
    pub code: &'static str,
    pub message: String,
}

pub trait ErrorPages: Send + Sync {
    fn error_con(&self, err: &FwdError, request: &Request) -> ErrorState;
    fn append_entry(&self, entry: &dyn StoreEntry, err: ErrorState);
}
