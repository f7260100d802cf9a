//! Scripted mock collaborators for exercising the forwarding core without
//! real sockets, an ACL engine, or a TLS library. Mirrors the shape of
//! `linkerd/cache/src/lib.rs`'s `test_util` module: small, purpose-built
//! doubles rather than a general mocking framework.

use crate::candidate::CandidateList;
use crate::collab::{
    Connection, ConnectFailure, ConnectFailureKind, Connector, FetchOutcome, Fetcher, PeerSelector,
    TlsConnector, TlsSession,
};
use crate::entry::{EntryFlags, StoreEntry, StoreStatus};
use crate::error::FwdError;
use crate::outgoing::{AclEngine, OutgoingAddress};
use crate::request::{AclContext, Request};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

/// Allows every `matches` lookup and the `miss_access` check.
#[derive(Default)]
pub struct PermissiveAcl;

impl AclEngine for PermissiveAcl {
    fn matches(&self, _acl_name: &str, _ctx: &AclContext) -> bool {
        false
    }

    fn miss_access(&self, _names: &[String], _ctx: &AclContext) -> bool {
        true
    }
}

/// Denies every `miss_access` check regardless of the configured list.
#[derive(Default)]
pub struct DenyAllAcl;

impl AclEngine for DenyAllAcl {
    fn matches(&self, _acl_name: &str, _ctx: &AclContext) -> bool {
        false
    }

    fn miss_access(&self, _names: &[String], _ctx: &AclContext) -> bool {
        false
    }
}

/// Returns one fixed candidate list, once.
pub struct FixedSelector(Mutex<Option<CandidateList>>);

impl FixedSelector {
    pub fn new(candidates: CandidateList) -> Self {
        Self(Mutex::new(Some(candidates)))
    }

    pub fn none() -> Self {
        Self(Mutex::new(None))
    }
}

#[async_trait]
impl PeerSelector for FixedSelector {
    async fn select(&self, _request: &Request) -> Option<CandidateList> {
        self.0.lock().expect("selector poisoned").take()
    }
}

/// One scripted outcome for [`ScriptedConnector`].
pub enum ConnectStep {
    Ok,
    Dns,
    Timeout,
    SocketAlloc,
    Other,
}

/// Replays a fixed sequence of connect outcomes, one per call; panics if
/// called more times than scripted. `Ok` opens a loopback pair and hands
/// back the client half so dispatch has a real, readable/writable stream.
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<ConnectStep>>,
}

impl ScriptedConnector {
    pub fn new(steps: impl IntoIterator<Item = ConnectStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        _timeout: Duration,
        _src: OutgoingAddress,
    ) -> Result<TcpStream, ConnectFailure> {
        let step = self
            .steps
            .lock()
            .expect("connector poisoned")
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedConnector exhausted for {host}:{port}"));

        match step {
            ConnectStep::Ok => Ok(loopback_pair().await),
            ConnectStep::Dns => Err(ConnectFailure {
                kind: ConnectFailureKind::Dns,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "name not found"),
            }),
            ConnectStep::Timeout => Err(ConnectFailure {
                kind: ConnectFailureKind::Timeout,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            }),
            ConnectStep::SocketAlloc => Err(ConnectFailure {
                kind: ConnectFailureKind::SocketAlloc,
                source: std::io::Error::new(std::io::ErrorKind::Other, "too many open files"),
            }),
            ConnectStep::Other => Err(ConnectFailure {
                kind: ConnectFailureKind::Other,
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            }),
        }
    }
}

async fn loopback_pair() -> TcpStream {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("local addr");
    let accept = tokio::spawn(async move { listener.accept().await.expect("accept").0 });
    let client = TcpStream::connect(addr).await.expect("connect loopback");
    let _server_side = accept.await.expect("accept task");
    client
}

/// Always succeeds without ever reporting a reused session, unless
/// constructed with `always_fail`.
pub struct StubTls {
    fail: bool,
}

impl StubTls {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn always_fail() -> Self {
        Self { fail: true }
    }
}

impl Default for StubTls {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TlsConnector for StubTls {
    async fn handshake(
        &self,
        stream: TcpStream,
        _sni: &str,
        _cached_session: Option<TlsSession>,
    ) -> Result<(Connection, TlsSession, bool), FwdError> {
        if self.fail {
            return Err(FwdError::TlsFail {
                host: String::new(),
                port: 0,
                source: std::io::Error::new(std::io::ErrorKind::Other, "handshake failed"),
            });
        }
        Ok((Connection::Plain(stream), TlsSession(vec![1]), false))
    }
}

/// One scripted fetch outcome for [`ScriptedFetcher`].
pub enum FetchStep {
    Status(u16),
    ClosedWithError(FwdError),
    ClosedCleanly,
}

pub struct ScriptedFetcher {
    steps: Mutex<VecDeque<FetchStep>>,
}

impl ScriptedFetcher {
    pub fn new(steps: impl IntoIterator<Item = FetchStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        _protocol: crate::request::Protocol,
        conn: Connection,
        _request: Arc<Request>,
        _entry: Arc<dyn StoreEntry>,
    ) -> FetchOutcome {
        drop(conn);
        match self
            .steps
            .lock()
            .expect("fetcher poisoned")
            .pop_front()
            .expect("ScriptedFetcher exhausted")
        {
            FetchStep::Status(status) => FetchOutcome::Completed { status },
            FetchStep::ClosedWithError(err) => FetchOutcome::Closed { error: Some(err) },
            FetchStep::ClosedCleanly => FetchOutcome::Closed { error: None },
        }
    }
}

#[derive(Debug, Default)]
struct MockEntryState {
    status: StoreStatus,
    empty: bool,
    flags: EntryFlags,
    released: bool,
    errors: Vec<String>,
    completions: u32,
    reply_status: Option<u16>,
}

/// In-memory [`StoreEntry`] double. Starts empty and pending; tests
/// inspect `released()`/`flags()`/`error_count()` after a forward runs.
pub struct MockEntry {
    state: Mutex<MockEntryState>,
}

impl MockEntry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockEntryState {
                empty: true,
                ..Default::default()
            }),
        })
    }

    pub fn released(&self) -> bool {
        self.state.lock().expect("entry poisoned").released
    }

    pub fn error_count(&self) -> usize {
        self.state.lock().expect("entry poisoned").errors.len()
    }

    pub fn completions(&self) -> u32 {
        self.state.lock().expect("entry poisoned").completions
    }
}

#[async_trait]
impl StoreEntry for MockEntry {
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
        state.empty = false;
        state.status = StoreStatus::Ok;
        state.completions += 1;
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
        state.errors.push(err.to_string());
    }

    fn register_abort(&self, _tx: oneshot::Sender<()>) {
        // Tests that exercise the abort path hold their own sender; the
        // default mock has nothing external to notify.
    }

    fn release(&self) {
        self.state.lock().expect("entry poisoned").released = true;
    }
}
