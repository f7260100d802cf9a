//! Pure retry and re-forward predicates (§4.4).
//!
//! These are kept free of any I/O or state-machine side effects so they
//! can be exercised directly in unit tests and remain provably pure
//! (property P7).

use crate::candidate::CandidateList;
use crate::entry::{EntryFlags, StoreStatus};
use crate::request::Method;
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    /// `checkRetry`'s bound on total attempts (transport-level).
    pub max_tries: u32,
    /// `checkRetry`'s bound on attempts against the direct origin.
    pub max_origin_tries: u32,
    /// `reforward`'s bound on total attempts — intentionally one less
    /// than `max_tries` (10 vs 9): the asymmetry is preserved from the
    /// original rather than "fixed", per the Open Question in spec.md §9;
    /// see DESIGN.md for the resolution.
    pub max_reforward_tries: u32,
    /// `reforward`'s bound on origin-only attempts.
    pub max_origin_reforwards: u32,
    pub forward_timeout: Duration,
    /// Gates re-forwarding on 403/500/501/503; 502/504 always re-forward.
    pub retry_onerror: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_tries: 10,
            max_origin_tries: 2,
            max_reforward_tries: 9,
            max_origin_reforwards: 1,
            forward_timeout: Duration::from_secs(120),
            retry_onerror: false,
        }
    }
}

/// Whether a fresh connect/retry attempt may still be made after a
/// transport failure. All conditions must hold.
#[allow(clippy::too_many_arguments)]
pub fn check_retry(
    cfg: &RetryConfig,
    shutting_down: bool,
    store_status: StoreStatus,
    entry_empty: bool,
    n_tries: u32,
    origin_tries: u32,
    elapsed: Duration,
    dont_retry: bool,
    body_sent: bool,
) -> bool {
    !shutting_down
        && store_status == StoreStatus::Pending
        && entry_empty
        && n_tries <= cfg.max_tries
        && origin_tries <= cfg.max_origin_tries
        && elapsed < cfg.forward_timeout
        && !dont_retry
        && !body_sent
}

/// Whether a pooled connection may be handed straight to a fresh attempt
/// without re-dispatching the whole request from scratch: only requests
/// with no body and an RFC safe+idempotent method qualify.
pub fn check_retriable(method: Method, has_body: bool) -> bool {
    !has_body && method.is_idempotent()
}

/// Whether a reply status is eligible for re-forwarding at all (before
/// the entry-state and try-count gates in `reforward` are applied).
pub fn reforwardable_status(status: u16, retry_onerror: bool) -> bool {
    match status {
        502 | 504 => true,
        403 | 500 | 501 | 503 => retry_onerror,
        _ => false,
    }
}

pub struct ReforwardCheck<'a> {
    pub cfg: &'a RetryConfig,
    pub flags: EntryFlags,
    pub n_tries: u32,
    pub origin_tries: u32,
    pub body_sent: bool,
    pub status: u16,
}

/// Post-response re-forward decision (§4.4). On success, advances
/// `candidates` past the server that produced `status` (discarding it,
/// never rotating — that rotation rule is specific to transport-failure
/// retries) and returns `true` iff a candidate remains to try.
pub fn reforward(check: ReforwardCheck<'_>, candidates: &mut CandidateList) -> bool {
    if !check.flags.contains(EntryFlags::FWD_HDR_WAIT) {
        return false;
    }
    if check.n_tries > check.cfg.max_reforward_tries {
        return false;
    }
    if check.origin_tries > check.cfg.max_origin_reforwards {
        return false;
    }
    if check.body_sent {
        return false;
    }
    if !candidates.advance_after_reforward() {
        return false;
    }
    reforwardable_status(check.status, check.cfg.retry_onerror)
}
