//! The forwarding state machine (§4.1–§4.4) and its entry-point router.
//!
//! `Forwarder` bundles the external collaborators and is the crate's
//! public entry point (`start`); `FwdState` owns one request's worth of
//! candidate/connect/dispatch/retry bookkeeping for the lifetime of a
//! single spawned task.

use crate::candidate::{CandidateList, FwdServer};
use crate::collab::{Connection, ConnectFailureKind, Connector, Fetcher, FetchOutcome, PeerSelector, TlsConnector};
use crate::config::ForwardConfig;
use crate::entry::{EntryFlags, StoreEntry, StoreStatus};
use crate::error::FwdError;
use crate::outgoing::{AclEngine, OutgoingResolver};
use crate::peer::Peer;
use crate::request::{Protocol, Request};
use fwd_metrics::ReplyCodes;
use fwd_pool::{ConnPool, PoolKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// The collaborator bundle a deployment wires up once at startup and
/// shares across every forwarded request.
pub struct Forwarder {
    pub acl: Arc<dyn AclEngine>,
    pub peer_selector: Arc<dyn PeerSelector>,
    pub connector: Arc<dyn Connector>,
    pub tls: Arc<dyn TlsConnector>,
    pub fetcher: Arc<dyn Fetcher>,
    pub pool: ConnPool,
    pub reply_codes: Arc<ReplyCodes>,
    pub config: ForwardConfig,
    shutting_down: Arc<AtomicBool>,
}

impl Forwarder {
    pub fn new(
        acl: Arc<dyn AclEngine>,
        peer_selector: Arc<dyn PeerSelector>,
        connector: Arc<dyn Connector>,
        tls: Arc<dyn TlsConnector>,
        fetcher: Arc<dyn Fetcher>,
        pool: ConnPool,
        reply_codes: Arc<ReplyCodes>,
        config: ForwardConfig,
    ) -> Self {
        Self {
            acl,
            peer_selector,
            connector,
            tls,
            fetcher,
            pool,
            reply_codes,
            config,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// The entry point for client-side code to start forwarding a
    /// transaction (§4.1). Returns `None` when forwarding was terminated
    /// synchronously (denied, shutting down) without ever constructing a
    /// state machine; `Some` carries the handle of the spawned task that
    /// will eventually drive `entry` to completion.
    #[tracing::instrument(skip_all, fields(client_fd, host = %request.host, method = ?request.method))]
    pub fn start(
        self: &Arc<Self>,
        client_fd: i32,
        entry: Arc<dyn StoreEntry>,
        request: Request,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let is_pseudo = request.protocol.is_pseudo();

        if !is_pseudo {
            if let Some(ctx) = request.acl_context() {
                if !self.acl.miss_access(&self.config.miss_access, &ctx) {
                    debug!("forwarding denied by miss_access");
                    entry.append_error(&FwdError::AccessDenied);
                    return None;
                }
            }
        }

        if self.shutting_down() {
            warn!("forwarding request while shutting down");
            entry.append_error(&FwdError::ShuttingDown);
            return None;
        }

        if is_pseudo {
            // Internal / cache-manager / URN requests terminate here; the
            // modules that serve them are not part of the forwarding core
            // (§6) and are expected to have already written a reply to
            // `entry` through their own path.
            return None;
        }

        let (abort_tx, abort_rx) = oneshot::channel();
        entry.register_abort(abort_tx);
        // I3: FWD_HDR_WAIT holds from construction until completed() clears
        // it (headers committed) or an error is appended in its place.
        entry.set_flag(EntryFlags::FWD_HDR_WAIT);

        let state = FwdState {
            fwd: Arc::clone(self),
            entry,
            request,
            client_fd,
            candidates: CandidateList::default(),
            err: None,
            start: Instant::now(),
            n_tries: 0,
            origin_tries: 0,
            dont_retry: false,
            forward_completed: false,
            abort_rx,
        };

        Some(tokio::spawn(state.start_selecting()))
    }
}

enum AttemptOutcome {
    TransportFailure,
    Completed { status: u16 },
}

/// Decrements a peer's open-connection counter exactly once, regardless
/// of which path (success, failure, or task cancellation on abort) ends
/// the attempt that incremented it. Constructed only for fresh connects
/// to a peer; a `None` peer makes every operation a no-op.
struct PeerOpenGuard(Option<Arc<Peer>>);

impl PeerOpenGuard {
    fn engage(peer: Option<Arc<Peer>>) -> Self {
        if let Some(p) = &peer {
            p.stats.note_open();
        }
        Self(peer)
    }
}

impl Drop for PeerOpenGuard {
    fn drop(&mut self) {
        if let Some(p) = self.0.take() {
            p.stats.note_closed();
        }
    }
}

/// One request's worth of candidate selection, connect/TLS/dispatch, and
/// retry bookkeeping. Lives for the duration of the spawned task that
/// owns it; the task polling this future *is* the "self" refcount the
/// original kept alive across callback boundaries (§10.4).
struct FwdState {
    fwd: Arc<Forwarder>,
    entry: Arc<dyn StoreEntry>,
    request: Request,
    #[allow(dead_code)]
    client_fd: i32,
    candidates: CandidateList,
    err: Option<FwdError>,
    start: Instant,
    n_tries: u32,
    origin_tries: u32,
    dont_retry: bool,
    forward_completed: bool,
    abort_rx: oneshot::Receiver<()>,
}

impl FwdState {
    /// Submits to peer selection, then proceeds exactly as
    /// `startComplete` would on its callback.
    async fn start_selecting(mut self) {
        match self.fwd.peer_selector.select(&self.request).await {
            Some(candidates) if !candidates.is_empty() => {
                self.candidates = candidates;
                self.run().await;
            }
            _ => {
                self.fail(FwdError::CannotForward);
                self.completed().await;
            }
        }
    }

    async fn run(&mut self) {
        loop {
            if self.candidates.is_empty() {
                self.fail(FwdError::CannotForward);
                break;
            }

            let outcome = tokio::select! {
                biased;
                _ = &mut self.abort_rx => {
                    self.handle_abort();
                    break;
                }
                outcome = self.attempt() => outcome,
            };

            match outcome {
                AttemptOutcome::TransportFailure => {
                    let elapsed = self.start.elapsed();
                    let retry_ok = crate::retry::check_retry(
                        &self.fwd.config.retry,
                        self.fwd.shutting_down(),
                        self.entry.store_status(),
                        self.entry.is_empty(),
                        self.n_tries,
                        self.origin_tries,
                        elapsed,
                        self.dont_retry,
                        self.request.body_sent(),
                    );

                    if retry_ok {
                        let delay = self.candidates.advance_after_transport_failure(
                            self.fwd.config.origin_retry_delay,
                            self.fwd.config.candidate_retry_delay,
                        );
                        let mut aborted = false;
                        tokio::select! {
                            biased;
                            _ = &mut self.abort_rx => {
                                aborted = true;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        if aborted {
                            self.handle_abort();
                            break;
                        }
                        continue;
                    }

                    if self.fwd.shutting_down() && self.err.is_none() {
                        self.err = Some(FwdError::ShuttingDown);
                    }
                    break;
                }
                AttemptOutcome::Completed { status } => {
                    self.fwd.reply_codes.log_reply_status(self.n_tries, status);

                    let reforward_ok = crate::retry::reforward(
                        crate::retry::ReforwardCheck {
                            cfg: &self.fwd.config.retry,
                            flags: self.entry.flags(),
                            n_tries: self.n_tries,
                            origin_tries: self.origin_tries,
                            body_sent: self.request.body_sent(),
                            status,
                        },
                        &mut self.candidates,
                    );

                    if reforward_ok {
                        self.entry.reset();
                        continue;
                    }
                    break;
                }
            }
        }

        self.completed().await;
    }

    /// One connect-through-dispatch cycle against the current head
    /// candidate (§4.1's `connectStart` through `dispatch`).
    async fn attempt(&mut self) -> AttemptOutcome {
        let head = self
            .candidates
            .head()
            .cloned()
            .expect("attempt requires a non-empty candidate list");
        self.annotate_hierarchy(&head);

        let (host, port, domain, ctimeout) = self.target_params(&head);
        let key = PoolKey::new(host.clone(), port, domain);

        if let Some(stream) = self.fwd.pool.pop(&key) {
            if crate::retry::check_retriable(self.request.method, self.request.has_body) {
                self.n_tries += 1;
                if head.is_direct() {
                    self.origin_tries += 1;
                }
                debug!(host = %host, port, "reusing pooled connection");
                return self.dispatch(Connection::Plain(stream), head.peer.clone()).await;
            }
            debug!(host = %host, port, "discarding pooled connection, request not retriable");
            drop(stream);
        }

        let forward_deadline = self.fwd.config.retry.forward_timeout;
        let remaining = forward_deadline
            .saturating_sub(self.start.elapsed())
            .max(Duration::from_secs(5));
        let effective_timeout = ctimeout.min(remaining);

        let outgoing = {
            let resolver = OutgoingResolver {
                addr_rules: &self.fwd.config.outgoing_addr,
                tos_rules: &self.fwd.config.outgoing_tos,
            };
            match self.request.acl_context() {
                Some(ctx) => resolver.resolve(self.fwd.acl.as_ref(), &ctx),
                None => Default::default(),
            }
        };

        // §4.2 connectStart: both conn_open and n_tries account for the
        // attempt from the moment we try to open it, even if the connect
        // itself fails.
        let open_guard = PeerOpenGuard::engage(head.peer.clone());
        self.n_tries += 1;
        if head.is_direct() {
            self.origin_tries += 1;
        }

        let connected = self
            .fwd
            .connector
            .connect(&host, port, effective_timeout, outgoing)
            .await;

        let stream = match connected {
            Err(failure) => {
                drop(open_guard);
                if let Some(peer) = &head.peer {
                    self.fwd.peer_selector.note_connect_failed(peer);
                }
                match failure.kind {
                    ConnectFailureKind::Dns => {
                        if head.is_direct() {
                            self.dont_retry = true;
                        }
                        debug!(host = %host, "dns resolution failed");
                        self.err = Some(FwdError::DnsFail {
                            host: host.clone(),
                            source: failure.source,
                        });
                    }
                    ConnectFailureKind::Timeout => {
                        if self.entry.is_empty() {
                            self.err = Some(FwdError::ConnectTimeout { host: host.clone(), port });
                        }
                    }
                    ConnectFailureKind::SocketAlloc => {
                        // Terminal regardless of remaining retry budget:
                        // an exhausted local fd/memory limit will not
                        // clear by trying the next candidate.
                        self.dont_retry = true;
                        self.err = Some(FwdError::SocketAllocFail { source: failure.source });
                    }
                    ConnectFailureKind::Other => {
                        self.err = Some(FwdError::ConnectFail {
                            host: host.clone(),
                            port,
                            source: failure.source,
                        });
                    }
                }
                return AttemptOutcome::TransportFailure;
            }
            Ok(stream) => stream,
        };

        if let Some(peer) = &head.peer {
            self.fwd.peer_selector.note_connect_succeeded(peer);
        }

        let wants_tls = head.peer.as_ref().map(|p| p.use_ssl).unwrap_or(false)
            || (head.peer.is_none() && self.request.protocol.wants_tls());

        let conn = if wants_tls {
            let sni = head
                .peer
                .as_ref()
                .map(|p| p.sni(&self.request.host))
                .unwrap_or_else(|| self.request.host.clone());
            let cached = head.peer.as_ref().and_then(|p| p.cached_session());

            match self.fwd.tls.handshake(stream, &sni, cached).await {
                Ok((conn, session, reused)) => {
                    if let Some(peer) = &head.peer {
                        if !reused {
                            peer.store_session(session);
                        }
                    }
                    conn
                }
                Err(err) => {
                    drop(open_guard);
                    if let Some(peer) = &head.peer {
                        self.fwd.peer_selector.note_connect_failed(peer);
                    }
                    self.err = Some(err);
                    return AttemptOutcome::TransportFailure;
                }
            }
        } else {
            Connection::Plain(stream)
        };

        // `open_guard` stays alive for the rest of this attempt, including
        // across the fetch handoff below: it is dropped (and the peer's
        // conn_open decremented) whichever way `dispatch` resolves, or if
        // the whole attempt is cancelled by an in-flight abort.
        self.dispatch(conn, head.peer.clone()).await
    }

    /// §4.2 `dispatch`: hands the connection to the per-protocol fetcher.
    async fn dispatch(&mut self, conn: Connection, peer: Option<Arc<Peer>>) -> AttemptOutcome {
        self.entry.set_flag(EntryFlags::DISPATCHED);

        if self.request.protocol == Protocol::Unsupported {
            warn!("cannot retrieve: unsupported protocol");
            self.request.disable_keepalive();
            self.dont_retry = true;
            self.err = Some(FwdError::UnsupportedProtocol);
            drop(conn);
            return AttemptOutcome::TransportFailure;
        }

        if let Some(p) = &peer {
            p.stats.note_fetch();
        }

        if self.request.has_body {
            self.request.mark_body_sent();
        }

        let outcome = self
            .fwd
            .fetcher
            .fetch(
                self.request.protocol,
                conn,
                Arc::new(self.request.clone()),
                Arc::clone(&self.entry),
            )
            .await;

        match outcome {
            FetchOutcome::Completed { status } => {
                self.entry.attach_reply(status);
                AttemptOutcome::Completed { status }
            }
            FetchOutcome::Closed { error } => {
                if let Some(err) = error {
                    self.err = Some(err);
                }
                AttemptOutcome::TransportFailure
            }
        }
    }

    fn handle_abort(&mut self) {
        debug!("forward aborted externally");
        self.fail(FwdError::ShuttingDown);
    }

    fn fail(&mut self, err: FwdError) {
        warn!(error = %err, "forwarding attempt failed");
        self.err = Some(err);
    }

    /// Idempotent terminal bookkeeping (§4.2 `completed`). Safe to call
    /// more than once; the second call is a no-op save for a log line.
    async fn completed(&mut self) {
        if self.forward_completed {
            warn!("completed() called on an already-completed forward");
            return;
        }
        self.forward_completed = true;

        if self.entry.store_status() == StoreStatus::Pending {
            if self.entry.is_empty() {
                let err = self
                    .err
                    .take()
                    .expect("a pending, empty entry must carry a terminal error");
                self.entry.append_error(&err);
            } else {
                self.entry.clear_flag(EntryFlags::FWD_HDR_WAIT);
                self.entry.complete().await;
            }
        }

        self.entry.release();
    }

    fn target_params(&self, head: &FwdServer) -> (String, u16, Option<String>, Duration) {
        if let Some(peer) = &head.peer {
            let ctimeout = peer.connect_timeout.unwrap_or(self.fwd.config.connect_timeout);
            let domain = peer.originserver.then(|| self.request.host.clone());
            (peer.host.clone(), peer.port, domain, ctimeout)
        } else {
            (
                self.request.host.clone(),
                self.request.port,
                None,
                self.fwd.config.connect_timeout,
            )
        }
    }

    fn annotate_hierarchy(&mut self, head: &FwdServer) {
        let (host, _, _, _) = self.target_params(head);
        self.request.hier_note.code = Some(format!("{:?}", head.hierarchy_code));
        self.request.hier_note.host = Some(host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{CandidateList, FwdServer, HierarchyCode};
    use crate::config::ForwardConfig;
    use crate::peer::Peer;
    use crate::request::{HierarchyNote, Method, Protocol, Request, RequestFlags};
    use crate::test_support::{
        ConnectStep, FetchStep, FixedSelector, MockEntry, PermissiveAcl, ScriptedConnector, ScriptedFetcher, StubTls,
    };
    use fwd_metrics::ReplyCodes;
    use fwd_pool::{ConnPool, PoolKey};
    use std::net::{IpAddr, Ipv4Addr};

    fn request(host: &str, port: u16) -> Request {
        Request {
            client_addr: Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            local_addr: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            local_port: 3128,
            protocol: Protocol::Http,
            host: host.to_string(),
            port,
            method: Method::Get,
            headers: Vec::new(),
            flags: RequestFlags::empty(),
            hier_note: HierarchyNote::default(),
            has_body: false,
        }
    }

    fn forwarder(connector: Arc<ScriptedConnector>, fetcher: Arc<ScriptedFetcher>) -> Arc<Forwarder> {
        Arc::new(Forwarder::new(
            Arc::new(PermissiveAcl),
            Arc::new(FixedSelector::none()),
            connector,
            Arc::new(StubTls::new()),
            fetcher,
            ConnPool::new(),
            Arc::new(ReplyCodes::new()),
            ForwardConfig::new(),
        ))
    }

    /// R1: `completed()` is idempotent — a second call after the entry has
    /// already been driven to completion does not re-append an error or
    /// double-count the completion.
    #[tokio::test]
    async fn completed_is_idempotent() {
        let fwd = forwarder(
            Arc::new(ScriptedConnector::new([])),
            Arc::new(ScriptedFetcher::new([])),
        );
        let entry = MockEntry::new();
        let (_abort_tx, abort_rx) = oneshot::channel();

        let mut state = FwdState {
            fwd,
            entry: entry.clone(),
            request: request("origin.example.com", 80),
            client_fd: 7,
            candidates: CandidateList::default(),
            err: Some(FwdError::CannotForward),
            start: Instant::now(),
            n_tries: 0,
            origin_tries: 0,
            dont_retry: false,
            forward_completed: false,
            abort_rx,
        };

        state.completed().await;
        state.completed().await;

        assert_eq!(entry.error_count(), 1);
        assert_eq!(entry.completions(), 0);
    }

    /// R2: reusing a pooled connection never touches the peer's
    /// `conn_open` counter — that accounting is scoped to fresh connects
    /// guarded by `PeerOpenGuard`, so a pooled hit can never double-count
    /// or leak an open slot.
    #[tokio::test]
    async fn pooled_reuse_does_not_touch_conn_open() {
        let p = Arc::new(Peer {
            name: "p".to_string(),
            host: "p.example.com".to_string(),
            port: 3128,
            connect_timeout: None,
            login_domain: None,
            use_ssl: false,
            ssl_domain: None,
            originserver: false,
            stats: Default::default(),
            ssl_session: Default::default(),
        });

        let fwd = forwarder(
            Arc::new(ScriptedConnector::new([ConnectStep::Ok])),
            Arc::new(ScriptedFetcher::new([FetchStep::Status(200)])),
        );

        let (listener_host, listener_port) = ("127.0.0.1", 0u16);
        let listener = tokio::net::TcpListener::bind((listener_host, listener_port))
            .await
            .expect("bind loopback listener");
        let addr = listener.local_addr().expect("local addr");
        let accept = tokio::spawn(async move { listener.accept().await.expect("accept").0 });
        let client = tokio::net::TcpStream::connect(addr).await.expect("connect loopback");
        let _server_side = accept.await.expect("accept task");

        let key = PoolKey::new(p.host.clone(), p.port, None);
        fwd.pool.push(key, client);

        let selector_candidates = CandidateList::new([FwdServer::via_peer(p.clone(), HierarchyCode::ParentHit)]);
        let entry = MockEntry::new();
        let (_abort_tx, abort_rx) = oneshot::channel();

        let mut state = FwdState {
            fwd,
            entry: entry.clone(),
            request: request("ignored.example.com", 80),
            client_fd: 7,
            candidates: selector_candidates,
            err: None,
            start: Instant::now(),
            n_tries: 0,
            origin_tries: 0,
            dont_retry: false,
            forward_completed: false,
            abort_rx,
        };

        state.run().await;

        assert_eq!(entry.completions(), 1);
        assert_eq!(p.stats.open_count(), 0);
    }
}
