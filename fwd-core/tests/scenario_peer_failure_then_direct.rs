//! §8 scenario 2: peer TCP failure then direct success.

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
async fn peer_failure_falls_back_to_direct() {
    let p = peer("parent.example.com");

    let selector = Arc::new(FixedSelector::new(CandidateList::new([
        FwdServer::via_peer(p.clone(), HierarchyCode::ParentHit),
        FwdServer::direct(HierarchyCode::Direct),
    ])));
    let connector = Arc::new(ScriptedConnector::new([ConnectStep::Other, ConnectStep::Ok]));
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
    assert_eq!(p.stats.open_count(), 0);
}
