//! §8 scenario 5: a POST whose body has already been sent is never retried,
//! even though the transport failure itself would otherwise be retriable.

mod common;

use common::*;
use fwd_core::candidate::{CandidateList, FwdServer, HierarchyCode};
use fwd_core::peer::Peer;
use fwd_core::test_support::{ConnectStep, FetchStep, FixedSelector, MockEntry, ScriptedConnector, ScriptedFetcher, StubTls};
use fwd_core::FwdError;
use std::io;
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
async fn body_already_sent_suppresses_retry_to_the_next_candidate() {
    let selector = Arc::new(FixedSelector::new(CandidateList::new([
        FwdServer::via_peer(peer("p"), HierarchyCode::ParentHit),
        FwdServer::via_peer(peer("q"), HierarchyCode::ParentHit),
    ])));
    let connector = Arc::new(ScriptedConnector::new([ConnectStep::Ok]));
    let fetcher = Arc::new(ScriptedFetcher::new([FetchStep::ClosedWithError(FwdError::ConnectFail {
        host: "p".to_string(),
        port: 3128,
        source: io::Error::new(io::ErrorKind::BrokenPipe, "connection reset mid-body"),
    })]));

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
        .start(7, entry.clone(), post_request_with_body("origin.example.com", 80))
        .expect("forwarding should proceed");
    handle.await.expect("forward task panicked");

    assert_eq!(entry.completions(), 0);
    assert_eq!(entry.error_count(), 1);
    assert!(entry.released());
}
