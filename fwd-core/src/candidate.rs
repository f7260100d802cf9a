//! The candidate list produced by peer selection and consumed head-first
//! by the state machine.

use crate::peer::Peer;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HierarchyCode {
    Direct,
    ParentHit,
    SiblingHit,
    FirstUp,
}

/// One candidate upstream destination: a peer, or `None` for a direct
/// fetch straight to the request's own origin.
#[derive(Clone)]
pub struct FwdServer {
    pub peer: Option<Arc<Peer>>,
    pub hierarchy_code: HierarchyCode,
}

impl FwdServer {
    pub fn direct(code: HierarchyCode) -> Self {
        Self {
            peer: None,
            hierarchy_code: code,
        }
    }

    pub fn via_peer(peer: Arc<Peer>, code: HierarchyCode) -> Self {
        Self {
            peer: Some(peer),
            hierarchy_code: code,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.peer.is_none()
    }
}

/// Ordered sequence of candidates, consumed head-first. Represented as a
/// `VecDeque` rather than a hand-rolled singly linked list (idiomatic
/// Rust for an owned, FIFO-with-rotation sequence); the rotation rule of
/// §4.3 is preserved exactly.
#[derive(Clone, Default)]
pub struct CandidateList(VecDeque<FwdServer>);

impl CandidateList {
    pub fn new(servers: impl IntoIterator<Item = FwdServer>) -> Self {
        Self(servers.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn head(&self) -> Option<&FwdServer> {
        self.0.front()
    }

    /// Advances past the current head after a *transport* failure
    /// (connect/TLS error, or the pooled/fresh connection closing before a
    /// reply was observed). Implements the rotation sentinel of §4.3: if,
    /// after detaching the head, the remaining candidates' tail is a peer
    /// entry, the detached head is rotated to the new tail instead of
    /// being freed — this is what lets a transient "direct" failure be
    /// retried more than once across a longer peer chain. Returns the
    /// retry delay to apply before the next `connectStart` (the delay is
    /// keyed off whether the *original* head was direct, not the outcome
    /// of the rotation): `origin_delay` when direct, `candidate_delay`
    /// otherwise.
    pub fn advance_after_transport_failure(
        &mut self,
        origin_delay: Duration,
        candidate_delay: Duration,
    ) -> Duration {
        let head_was_direct = self.0.front().map(FwdServer::is_direct).unwrap_or(false);

        if self.0.len() > 1 {
            let head = self.0.pop_front().expect("checked len > 1");
            let tail_is_peer = self.0.back().map(|t| t.peer.is_some()).unwrap_or(false);
            if tail_is_peer {
                self.0.push_back(head);
                return if head_was_direct { origin_delay } else { candidate_delay };
            }
            // tail is itself a direct entry (or none after all): the
            // detached head is simply dropped, and the upcoming attempt is
            // no longer treated as an origin attempt for delay purposes.
            return candidate_delay;
        }

        // Single remaining candidate: left untouched, retried in place —
        // "the last direct entry is retried multiple times".
        if head_was_direct {
            origin_delay
        } else {
            candidate_delay
        }
    }

    /// Advances past the current head after observing a retriable reply
    /// status (re-forward, §4.4). Unlike transport-failure advancement,
    /// this never rotates: the candidate that produced a reply is simply
    /// discarded.
    pub fn advance_after_reforward(&mut self) -> bool {
        self.0.pop_front();
        !self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> Arc<Peer> {
        Arc::new(Peer {
            name: name.to_string(),
            host: name.to_string(),
            port: 3128,
            connect_timeout: None,
            login_domain: None,
            use_ssl: false,
            ssl_domain: None,
            originserver: false,
            stats: Default::default(),
            ssl_session: Default::default(),
        })
    }

    /// P3: for a candidate list of length L with at least one peer, after
    /// L retries the origin-server entry (if any) has been attempted at
    /// least twice.
    #[test]
    fn origin_is_rotated_not_dropped_when_peers_remain() {
        let mut list = CandidateList::new([
            FwdServer::via_peer(peer("a"), HierarchyCode::ParentHit),
            FwdServer::direct(HierarchyCode::Direct),
        ]);

        // direct is not the tail-after-removal issue here: peer "a" fails
        // first, tail (direct) is not a peer, so "a" is dropped.
        list.advance_after_transport_failure(Duration::from_millis(50), Duration::from_millis(5));
        assert_eq!(list.len(), 1);
        assert!(list.head().unwrap().is_direct());
    }

    #[test]
    fn direct_head_rotates_to_tail_when_peer_follows() {
        let mut list = CandidateList::new([
            FwdServer::direct(HierarchyCode::Direct),
            FwdServer::via_peer(peer("b"), HierarchyCode::ParentHit),
        ]);

        let delay =
            list.advance_after_transport_failure(Duration::from_millis(50), Duration::from_millis(5));
        assert_eq!(delay, Duration::from_millis(50));
        assert_eq!(list.len(), 2);
        assert!(list.head().unwrap().peer.is_some());
        // the direct candidate was rotated to the tail, not dropped.
        assert!(list.0.back().unwrap().is_direct());
    }

    #[test]
    fn single_candidate_is_retried_in_place() {
        let mut list = CandidateList::new([FwdServer::direct(HierarchyCode::Direct)]);
        let delay =
            list.advance_after_transport_failure(Duration::from_millis(50), Duration::from_millis(5));
        assert_eq!(delay, Duration::from_millis(50));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn reforward_advancement_never_rotates() {
        let mut list = CandidateList::new([
            FwdServer::via_peer(peer("a"), HierarchyCode::ParentHit),
            FwdServer::via_peer(peer("b"), HierarchyCode::ParentHit),
        ]);
        assert!(list.advance_after_reforward());
        assert_eq!(list.len(), 1);
        assert!(!list.advance_after_reforward());
        assert!(list.is_empty());
    }
}
