//! §8 scenario 6: a 502 from the first candidate is re-forwarded to the
//! next, which succeeds.

mod common;

use common::*;
use fwd_core::candidate::{CandidateList, FwdServer, HierarchyCode};
use fwd_core::peer::Peer;
use fwd_core::test_support::{ConnectStep, FetchStep, FixedSelector, MockEntry, ScriptedConnector, ScriptedFetcher, StubTls};
use std::sync::Arc;

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

#[tokio::test]
async fn bad_gateway_from_first_candidate_reforwards_to_the_second() {
    let a = peer("a");
    let b = peer("b");

    let selector = Arc::new(FixedSelector::new(CandidateList::new([
        FwdServer::via_peer(a, HierarchyCode::ParentHit),
        FwdServer::via_peer(b, HierarchyCode::ParentHit),
    ])));
    let connector = Arc::new(ScriptedConnector::new([ConnectStep::Ok, ConnectStep::Ok]));
    let fetcher = Arc::new(ScriptedFetcher::new([FetchStep::Status(502), FetchStep::Status(200)]));

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
    assert_eq!(forwarder.reply_codes.count(502, 1), 1);
    assert_eq!(forwarder.reply_codes.count(200, 2), 1);
}
