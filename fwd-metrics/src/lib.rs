//! Reply-code statistics for the request-forwarding core.
//!
//! Mirrors the shape of `FwdReplyCodes` in the original forwarding core: a
//! table of counters keyed by (try-index, HTTP status), incremented once
//! per terminal response observed by `FwdState::complete`, and rendered as
//! a tab-separated matrix for the stats surface.

use indexmap::IndexMap;
use std::sync::Mutex;

/// Try indices above this are folded into the last column. The original
/// core tracks 10 columns (try 1..=10); this mirrors that bound exactly.
pub const MAX_TRY_INDEX: usize = 9;

#[derive(Debug, Default)]
struct Row([u64; MAX_TRY_INDEX + 1]);

/// Process-wide reply-code matrix, `(try-index, status) -> count`.
///
/// The original is a dense array indexed by status code; we use a sparse
/// map keyed by the observed status codes instead, following the same
/// `IndexMap` + `Mutex` shape `linkerd2-http-metrics` uses for its
/// per-target registries, since the status space is sparse in practice.
#[derive(Debug, Default)]
pub struct ReplyCodes {
    by_status: Mutex<IndexMap<u16, Row>>,
}

impl ReplyCodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a terminal response status observed on the `n_tries`-th
    /// attempt. `n_tries` must be at least 1; attempts beyond
    /// `MAX_TRY_INDEX + 1` are folded into the last column.
    pub fn log_reply_status(&self, n_tries: u32, status: u16) {
        debug_assert!(n_tries >= 1, "log_reply_status requires n_tries >= 1");
        let n_tries = n_tries.max(1);
        let idx = ((n_tries - 1) as usize).min(MAX_TRY_INDEX);
        let mut by_status = self.by_status.lock().expect("reply code matrix poisoned");
        let row = by_status.entry(status).or_default();
        row.0[idx] += 1;
        tracing::trace!(status, try_index = idx, "logged reply status");
    }

    /// Returns the recorded count for a given status and 1-based try index,
    /// used by tests to check the exact cell a scenario should have touched.
    pub fn count(&self, status: u16, n_tries: u32) -> u64 {
        let idx = ((n_tries.max(1) - 1) as usize).min(MAX_TRY_INDEX);
        self.by_status
            .lock()
            .expect("reply code matrix poisoned")
            .get(&status)
            .map(|row| row.0[idx])
            .unwrap_or(0)
    }

    /// Renders the matrix as tab-separated rows, one per observed status,
    /// with one column per try-index, for the cache-manager "forward"
    /// stats action.
    pub fn render(&self) -> String {
        let by_status = self.by_status.lock().expect("reply code matrix poisoned");
        let mut out = String::from("Status");
        for i in 0..=MAX_TRY_INDEX {
            out.push_str(&format!("\ttry#{}", i + 1));
        }
        out.push('\n');
        let mut statuses: Vec<_> = by_status.keys().copied().collect();
        statuses.sort_unstable();
        for status in statuses {
            let row = &by_status[&status];
            out.push_str(&status.to_string());
            for count in &row.0 {
                out.push('\t');
                out.push_str(&count.to_string());
            }
            out.push('\n');
        }
        out
    }
}
