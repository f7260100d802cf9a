//! §8 scenario 3: DNS failure against a direct origin is terminal.

mod common;

use common::*;
use fwd_core::candidate::{CandidateList, FwdServer, HierarchyCode};
use fwd_core::test_support::{ConnectStep, FixedSelector, MockEntry, ScriptedConnector, ScriptedFetcher, StubTls};
use std::sync::Arc;

#[tokio::test]
async fn dns_failure_on_direct_candidate_is_not_retried() {
    let selector = Arc::new(FixedSelector::new(CandidateList::new([FwdServer::direct(
        HierarchyCode::Direct,
    )])));
    let connector = Arc::new(ScriptedConnector::new([ConnectStep::Dns]));
    // No fetch ever happens; dispatch is never reached.
    let fetcher = Arc::new(ScriptedFetcher::new([]));

    let forwarder = build_forwarder(
        permissive_acl(),
        selector,
        connector,
        Arc::new(StubTls::new()),
        fetcher,
        fast_config(),
    );

    let entry = MockEntry::new();
    let handle = forwarder
        .start(7, entry.clone(), get_request("nonexistent.example.invalid", 80))
        .expect("forwarding should proceed");
    handle.await.expect("forward task panicked");

    assert_eq!(entry.completions(), 0);
    assert_eq!(entry.error_count(), 1);
    assert!(entry.released());
}
