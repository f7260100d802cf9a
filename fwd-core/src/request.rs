//! Request-side data model: method, protocol tag, and the flags that gate
//! retry eligibility.

use bitflags::bitflags;
use std::net::IpAddr;

/// The RFC safe+idempotent method set plus the common unsafe methods a
/// forward proxy still has to route (POST is notably absent from the
/// retriable set: `checkRetriable` only allows it when no body is
/// attached, and [`Request::has_body`] is checked separately).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Put,
    Delete,
    Options,
    Trace,
    Post,
    Connect,
    Other,
}

impl Method {
    /// The safe+idempotent set `checkRetriable` allows regardless of body
    /// state (a body still rules retry out separately).
    pub fn is_idempotent(self) -> bool {
        matches!(
            self,
            Method::Get
                | Method::Head
                | Method::Put
                | Method::Delete
                | Method::Options
                | Method::Trace
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
    Ftp,
    Gopher,
    Wais,
    Whois,
    Internal,
    CacheObject,
    Urn,
    Unsupported,
}

impl Protocol {
    pub fn is_pseudo(self) -> bool {
        matches!(self, Protocol::Internal | Protocol::CacheObject | Protocol::Urn)
    }

    pub fn wants_tls(self) -> bool {
        matches!(self, Protocol::Https)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RequestFlags: u8 {
        /// Full or partial request body has already been sent upstream;
        /// once set, `checkRetry` never returns true again.
        const BODY_SENT      = 0b0000_0001;
        /// Client asked to keep the proxy connection alive; cleared when
        /// an unsupported-protocol error is recorded.
        const PROXY_KEEPALIVE = 0b0000_0010;
    }
}

/// Records which upstream was tried, for logging only — never read by
/// any retry/reforward decision.
#[derive(Clone, Debug, Default)]
pub struct HierarchyNote {
    pub code: Option<String>,
    pub host: Option<String>,
}

/// The address context the ACL engine evaluates `miss_access` and the
/// outgoing-address/TOS lists against.
#[derive(Clone, Debug)]
pub struct AclContext {
    pub src_addr: IpAddr,
    pub my_addr: IpAddr,
    pub my_port: u16,
}

#[derive(Clone, Debug)]
pub struct Request {
    pub client_addr: Option<IpAddr>,
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub flags: RequestFlags,
    pub hier_note: HierarchyNote,
    /// Non-empty ⇒ body present ⇒ `checkRetriable` rejects pooled reuse
    /// and `checkRetry`/`I6` cap attempts at one.
    pub has_body: bool,
}

impl Request {
    pub fn body_sent(&self) -> bool {
        self.flags.contains(RequestFlags::BODY_SENT)
    }

    pub fn mark_body_sent(&mut self) {
        self.flags.insert(RequestFlags::BODY_SENT);
    }

    pub fn disable_keepalive(&mut self) {
        self.flags.remove(RequestFlags::PROXY_KEEPALIVE);
    }

    pub fn acl_context(&self) -> Option<AclContext> {
        self.client_addr.map(|src_addr| AclContext {
            src_addr,
            my_addr: self.local_addr,
            my_port: self.local_port,
        })
    }
}
