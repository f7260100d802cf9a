//! Outgoing source-address and TOS resolution (§4.5).
//!
//! Walks configured ACL-to-value lists; the first matching rule supplies
//! the value, with a fixed fallback if nothing matches.

use crate::request::AclContext;
use std::net::{IpAddr, Ipv4Addr};

/// One entry of an ACL-to-value list: an opaque ACL name (the ACL
/// engine owns rule evaluation; the core only threads the name through)
/// paired with the value to use when it matches.
#[derive(Clone, Debug)]
pub struct AclRule<T> {
    pub acl_name: String,
    pub value: T,
}

/// The ACL engine contract consumed for both `miss_access` and the
/// outgoing-address/TOS lists: pure evaluation over a supplied context.
pub trait AclEngine: Send + Sync {
    fn matches(&self, acl_name: &str, ctx: &AclContext) -> bool;

    /// Full allow/deny verdict for the `miss_access` list (§4.1 step 1).
    /// Unlike `matches`, which reports a single named rule for the
    /// first-match address/TOS resolvers, this evaluates the engine's own
    /// allow/deny precedence across the whole named list.
    fn miss_access(&self, names: &[String], ctx: &AclContext) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutgoingAddress {
    pub ip: IpAddr,
    pub tos: u8,
}

impl Default for OutgoingAddress {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tos: 0,
        }
    }
}

pub struct OutgoingResolver<'a> {
    pub addr_rules: &'a [AclRule<IpAddr>],
    pub tos_rules: &'a [AclRule<u8>],
}

impl<'a> OutgoingResolver<'a> {
    /// Returns the source IP and TOS byte to use for a connect, from the
    /// first matching rule in each list, falling back to `INADDR_ANY`/`0`.
    pub fn resolve(&self, acl: &dyn AclEngine, ctx: &AclContext) -> OutgoingAddress {
        let ip = self
            .addr_rules
            .iter()
            .find(|rule| acl.matches(&rule.acl_name, ctx))
            .map(|rule| rule.value)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let tos = self
            .tos_rules
            .iter()
            .find(|rule| acl.matches(&rule.acl_name, ctx))
            .map(|rule| rule.value)
            .unwrap_or(0);
        OutgoingAddress { ip, tos }
    }
}
