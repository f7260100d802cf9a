//! Peer (neighbor cache / authenticated origin-server) model.

use crate::collab::TlsSession;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Counters owned by the peer but mutated by the core under the
/// documented accounting rules (I5: `conn_open` tracks exactly the
/// core-owned sockets currently open to this peer).
#[derive(Debug, Default)]
pub struct PeerStats {
    pub conn_open: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl PeerStats {
    pub fn note_open(&self) {
        self.conn_open.fetch_add(1, Ordering::SeqCst);
    }

    pub fn note_closed(&self) {
        self.conn_open.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn note_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.conn_open.load(Ordering::SeqCst)
    }
}

/// A neighbor cache or an origin acting through an authenticated
/// peer relationship, distinguished from a plain "direct" candidate by
/// having a `Peer` at all.
#[derive(Debug)]
pub struct Peer {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub connect_timeout: Option<Duration>,
    pub login_domain: Option<String>,
    pub use_ssl: bool,
    pub ssl_domain: Option<String>,
    /// When true, this peer is queried as an authenticated origin-server
    /// stand-in for the request's own host, which changes the pool key's
    /// `domain` component to the request host (§4.6).
    pub originserver: bool,
    pub stats: PeerStats,
    /// Session-resumption token from the last successful handshake to
    /// this peer, replayed on the next one. Replaced whenever a handshake
    /// completes without reusing it (a fresh session supersedes the
    /// cached one); left untouched on a resumed handshake.
    pub ssl_session: Mutex<Option<TlsSession>>,
}

impl Peer {
    pub fn sni(&self, request_host: &str) -> String {
        self.ssl_domain
            .clone()
            .unwrap_or_else(|| if self.host.is_empty() { request_host.to_string() } else { self.host.clone() })
    }

    pub fn cached_session(&self) -> Option<TlsSession> {
        self.ssl_session.lock().expect("peer poisoned").clone()
    }

    pub fn store_session(&self, session: TlsSession) {
        *self.ssl_session.lock().expect("peer poisoned") = Some(session);
    }
}
