//! Pooled connection cache for idle upstream sockets.
//!
//! Keyed by `(host, port, domain)`, where `domain` distinguishes a plain
//! origin fetch (`None`) from a fetch routed through a peer acting as an
//! authenticated origin-server proxy for some request host (`Some(host)`).
//! `pop` performs no liveness validation: a popped connection may already
//! be dead, and callers must be prepared to reconnect. `push` registers a
//! background watcher that evicts the connection from the pool if the
//! peer closes it while it sits idle, mirroring the close-callback the
//! original pconn pool registers on every pooled fd.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// How often the idle-close watcher polls a pooled connection. A pure
/// `readable().await` would need to hold the pool's mutex guard across
/// the await to reach the socket, which is both `!Send` (the guard) and
/// a self-deadlock (every other `pop`/`push` blocks on it); polling with
/// a non-blocking probe between sleeps never holds the guard across an
/// await point.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub domain: Option<String>,
}

impl PoolKey {
    pub fn new(host: impl Into<String>, port: u16, domain: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            domain,
        }
    }
}

/// A monotonically increasing handle distinguishing pooled connections
/// for the same key, so a watcher task knows which slot to evict without
/// holding a reference into the `Vec`.
type SlotId = u64;

struct Slot {
    id: SlotId,
    stream: TcpStream,
}

#[derive(Default)]
struct Inner {
    idle: HashMap<PoolKey, Vec<Slot>>,
    next_id: SlotId,
}

/// Keyed store of idle upstream TCP sockets.
#[derive(Clone, Default)]
pub struct ConnPool {
    inner: Arc<Mutex<Inner>>,
}

impl ConnPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves an idle connection into the pool under `key`. Spawns a
    /// watcher that removes the connection if the peer closes it (or the
    /// connection otherwise becomes readable, which for an idle connection
    /// only happens on EOF or an unsolicited byte — either way it is no
    /// longer safe to hand out).
    pub fn push(&self, key: PoolKey, stream: TcpStream) {
        let id = {
            let mut inner = self.inner.lock().expect("pool poisoned");
            let id = inner.next_id;
            inner.next_id += 1;
            inner.idle.entry(key.clone()).or_default().push(Slot { id, stream });
            id
        };

        let watch_inner = self.inner.clone();
        let watch_key = key;
        tokio::spawn(async move {
            let mut probe = [0u8; 1];
            loop {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;

                // Non-blocking: a probe read never needs to wait on the
                // socket, so the guard never has to be held across an
                // await and every other pool operation stays unblocked.
                let dead = {
                    let inner = watch_inner.lock().expect("pool poisoned");
                    let slot = match inner
                        .idle
                        .get(&watch_key)
                        .and_then(|slots| slots.iter().find(|s| s.id == id))
                    {
                        Some(slot) => slot,
                        None => return,
                    };
                    match slot.stream.try_read(&mut probe) {
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => false,
                        // Ok(0) is EOF, Ok(n > 0) is unsolicited data, and
                        // any other error all mean the connection is no
                        // longer safe to hand out.
                        _ => true,
                    }
                };

                if dead {
                    let mut inner = watch_inner.lock().expect("pool poisoned");
                    if let Some(slots) = inner.idle.get_mut(&watch_key) {
                        slots.retain(|s| s.id != id);
                        if slots.is_empty() {
                            inner.idle.remove(&watch_key);
                        }
                    }
                    debug!(host = %watch_key.host, port = watch_key.port, "pooled connection closed by peer");
                    return;
                }
            }
        });
    }

    /// Returns an idle connection for `key`, or `None` if the pool holds
    /// none. No validation is performed on the returned connection.
    pub fn pop(&self, key: &PoolKey) -> Option<TcpStream> {
        let mut inner = self.inner.lock().expect("pool poisoned");
        let slots = inner.idle.get_mut(key)?;
        let slot = slots.pop();
        if slots.is_empty() {
            inner.idle.remove(key);
        }
        slot.map(|s| s.stream)
    }

    /// Number of idle connections currently pooled for `key`; used by
    /// tests to assert pool state without popping.
    pub fn idle_count(&self, key: &PoolKey) -> usize {
        self.inner
            .lock()
            .expect("pool poisoned")
            .idle
            .get(key)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PoolKey {
        PoolKey::new("origin.example.com", 80, None)
    }

    #[tokio::test]
    async fn pop_on_empty_pool_returns_none() {
        let pool = ConnPool::new();
        assert!(pool.pop(&key()).is_none());
    }

    #[tokio::test]
    async fn push_then_pop_round_trips() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let client = TcpStream::connect(addr).await.unwrap();
        let _server_side = accept.await.unwrap();

        let pool = ConnPool::new();
        pool.push(key(), client);
        assert_eq!(pool.idle_count(&key()), 1);

        let popped = pool.pop(&key());
        assert!(popped.is_some());
        assert_eq!(pool.idle_count(&key()), 0);
    }

    #[tokio::test]
    async fn distinct_domains_are_distinct_keys() {
        let a = PoolKey::new("peer.example.com", 3128, None);
        let b = PoolKey::new("peer.example.com", 3128, Some("origin.example.com".into()));
        assert_ne!(a, b);

        let pool = ConnPool::new();
        assert!(pool.pop(&a).is_none());
        assert!(pool.pop(&b).is_none());
    }
}
