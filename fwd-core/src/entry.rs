//! The store-entry collaborator contract.
//!
//! The core never stores bytes itself; it observes and mutates a handful
//! of fields on an externally owned entry and must leave every terminal
//! path in a state where `FWD_HDR_WAIT` is clear and exactly one of
//! {`complete` called, error appended} has happened (spec invariant I3/P4).

use async_trait::async_trait;
use bitflags::bitflags;
use tokio::sync::oneshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StoreStatus {
    #[default]
    Pending,
    Ok,
    Aborted,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        /// Response headers have not yet been committed; gates both
        /// retries (via `checkRetry`) and re-forwards (via `reforward`).
        const FWD_HDR_WAIT = 0b0000_0001;
        /// Set once the core has handed the socket to a fetcher.
        const DISPATCHED   = 0b0000_0010;
    }
}

/// The cached-response container the core completes or aborts exactly
/// once per request.
#[async_trait]
pub trait StoreEntry: Send + Sync {
    fn store_status(&self) -> StoreStatus;

    /// True iff no response bytes have been committed to the entry yet.
    fn is_empty(&self) -> bool;

    /// The status line of whatever reply is currently attached, if any.
    fn reply_status(&self) -> Option<u16>;

    fn flags(&self) -> EntryFlags;
    fn set_flag(&self, flag: EntryFlags);
    fn clear_flag(&self, flag: EntryFlags);

    /// Attaches a final status line to the entry and marks it non-empty.
    /// Called once per successful dispatch, before the re-forward decision
    /// (§4.4) and before `complete`/`reset` act on the result.
    fn attach_reply(&self, status: u16);

    /// Commits the currently attached reply headers, waking any other
    /// clients waiting on this entry.
    async fn complete(&self);

    /// Discards whatever partial reply is attached so a fresh attempt
    /// (re-forward) can write into the entry from scratch.
    fn reset(&self);

    /// Appends a terminal error to the entry. Consumes the error in the
    /// sense that after this call the entry is no longer empty.
    fn append_error(&self, err: &crate::error::FwdError);

    /// Registers the sender half of the abort channel; the entry fires it
    /// (by dropping or sending) when an external abort occurs.
    fn register_abort(&self, tx: oneshot::Sender<()>);

    /// Marks the entry eligible for release once the core is done with it.
    fn release(&self);
}
