//! Shared request/forwarder builders for the scenario tests (§8).

use fwd_core::request::{HierarchyNote, Method, Protocol, Request, RequestFlags};
use fwd_core::state::Forwarder;
use fwd_core::test_support::{DenyAllAcl, PermissiveAcl};
use fwd_core::ForwardConfig;
use fwd_metrics::ReplyCodes;
use fwd_pool::ConnPool;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

pub fn get_request(host: &str, port: u16) -> Request {
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

pub fn post_request_with_body(host: &str, port: u16) -> Request {
    Request {
        method: Method::Post,
        has_body: true,
        ..get_request(host, port)
    }
}

#[allow(dead_code)]
pub fn fast_config() -> ForwardConfig {
    let mut cfg = ForwardConfig::new();
    cfg.origin_retry_delay = std::time::Duration::from_millis(2);
    cfg.candidate_retry_delay = std::time::Duration::from_millis(1);
    cfg
}

pub fn build_forwarder(
    acl: Arc<dyn fwd_core::outgoing::AclEngine>,
    selector: Arc<dyn fwd_core::collab::PeerSelector>,
    connector: Arc<dyn fwd_core::collab::Connector>,
    tls: Arc<dyn fwd_core::collab::TlsConnector>,
    fetcher: Arc<dyn fwd_core::collab::Fetcher>,
    config: ForwardConfig,
) -> Arc<Forwarder> {
    Arc::new(Forwarder::new(
        acl,
        selector,
        connector,
        tls,
        fetcher,
        ConnPool::new(),
        Arc::new(ReplyCodes::new()),
        config,
    ))
}

#[allow(dead_code)]
pub fn permissive_acl() -> Arc<dyn fwd_core::outgoing::AclEngine> {
    Arc::new(PermissiveAcl)
}

#[allow(dead_code)]
pub fn deny_all_acl() -> Arc<dyn fwd_core::outgoing::AclEngine> {
    Arc::new(DenyAllAcl)
}
