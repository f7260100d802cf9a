//! §8 scenario 1: happy direct GET.

mod common;

use common::*;
use fwd_core::candidate::{CandidateList, FwdServer, HierarchyCode};
use fwd_core::test_support::{ConnectStep, FetchStep, FixedSelector, MockEntry, ScriptedConnector, ScriptedFetcher, StubTls};
use std::sync::Arc;

#[tokio::test]
async fn happy_direct_get_completes_with_200() {
    let selector = Arc::new(FixedSelector::new(CandidateList::new([FwdServer::direct(
        HierarchyCode::Direct,
    )])));
    let connector = Arc::new(ScriptedConnector::new([ConnectStep::Ok]));
    let fetcher = Arc::new(ScriptedFetcher::new([FetchStep::Status(200)]));

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
        .start(7, entry.clone(), get_request("origin.example.com", 80))
        .expect("forwarding should proceed");
    handle.await.expect("forward task panicked");

    assert_eq!(entry.completions(), 1);
    assert_eq!(entry.error_count(), 0);
    assert!(entry.released());
    assert_eq!(forwarder.reply_codes.count(200, 1), 1);
}
