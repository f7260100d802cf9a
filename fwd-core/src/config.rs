//! Typed configuration for the forwarding core (SPEC_FULL §10.3).
//!
//! This struct is what a configuration loader populates; parsing a file
//! format is out of scope (the loader is an external collaborator).

use crate::outgoing::AclRule;
use crate::retry::RetryConfig;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ForwardConfig {
    /// Fallback per-attempt connect timeout when a candidate (peer or
    /// direct) does not override it.
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// ACL names evaluated against the request for the miss-access check
    /// (§4.1 step 1); order matters — first match wins in squid's usual
    /// allow/deny chain semantics, which the ACL engine itself resolves.
    pub miss_access: Vec<String>,
    pub outgoing_addr: Vec<AclRule<IpAddr>>,
    pub outgoing_tos: Vec<AclRule<u8>>,
    /// Delay before retrying the same (rotated) origin candidate.
    pub origin_retry_delay: Duration,
    /// Delay before retrying a freshly advanced candidate.
    pub candidate_retry_delay: Duration,
}

impl ForwardConfig {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            miss_access: Vec::new(),
            outgoing_addr: Vec::new(),
            outgoing_tos: Vec::new(),
            origin_retry_delay: Duration::from_millis(50),
            candidate_retry_delay: Duration::from_millis(5),
        }
    }
}

impl Default for ForwardConfig {
    /// Same constants as `new()` — spelled out by hand rather than
    /// derived, since a derived `Default` would zero every `Duration`
    /// field instead of using the values spec.md specifies.
    fn default() -> Self {
        Self::new()
    }
}
