//! The blocking rendezvous: reply slots and reply handles.
//!
//! A slot is created per blocking emission and destroyed once the emitter
//! has observed its outcome. State transitions are first-writer-wins under
//! the slot mutex; the wake signal is a one-shot channel send, issued by
//! whichever transition ends the wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};

use crate::core::molecule::MoleculeId;
use crate::core::value::{Molecular, Value};

/// Outcome of a blocking wait, as observed by the emitter.
pub(crate) enum WaitOutcome {
    Replied(Value),
    TimedOut,
    Failed(String),
}

/// What happened to a `reply` call.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReplyOutcome {
    /// The reply was delivered to the waiting emitter.
    Delivered,
    /// The slot had already been replied to; this reply was dropped.
    AlreadyReplied,
    /// The emitter timed out (or failed) first; this reply lost the race.
    Dropped,
}

enum SlotState {
    Pending,
    Replied(Option<Value>),
    TimedOut,
    Failed(String),
}

struct SlotInner {
    state: SlotState,
    /// Monotonic count of reply attempts, for protocol-violation reporting.
    replies: u32,
}

pub(crate) struct ReplySlot {
    inner: Mutex<SlotInner>,
    signal_tx: Sender<()>,
    signal_rx: Receiver<()>,
}

impl ReplySlot {
    pub(crate) fn new() -> Arc<ReplySlot> {
        let (signal_tx, signal_rx) = crossbeam::channel::bounded(1);
        Arc::new(ReplySlot {
            inner: Mutex::new(SlotInner {
                state: SlotState::Pending,
                replies: 0,
            }),
            signal_tx,
            signal_rx,
        })
    }

    pub(crate) fn reply(&self, value: Value) -> ReplyOutcome {
        let mut inner = self.inner.lock().expect("reply slot lock");
        inner.replies += 1;
        match &inner.state {
            SlotState::Pending => {
                inner.state = SlotState::Replied(Some(value));
                drop(inner);
                let _ = self.signal_tx.try_send(());
                ReplyOutcome::Delivered
            }
            SlotState::Replied(_) => ReplyOutcome::AlreadyReplied,
            SlotState::TimedOut | SlotState::Failed(_) => ReplyOutcome::Dropped,
        }
    }

    /// Unblock the emitter with a failure (reaction faulted, or finished
    /// without replying). Loses to an earlier reply.
    pub(crate) fn fail(&self, reason: &str) {
        let mut inner = self.inner.lock().expect("reply slot lock");
        if matches!(inner.state, SlotState::Pending) {
            inner.state = SlotState::Failed(reason.to_string());
            drop(inner);
            let _ = self.signal_tx.try_send(());
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(
            self.inner.lock().expect("reply slot lock").state,
            SlotState::Pending
        )
    }

    pub(crate) fn reply_count(&self) -> u32 {
        self.inner.lock().expect("reply slot lock").replies
    }

    /// Park the emitter until reply, failure, or deadline.
    ///
    /// On wake the slot state decides the outcome; a reply that has already
    /// landed wins even if the deadline has long passed, while a reply
    /// racing a timeout loses as soon as the state flips to `TimedOut`.
    pub(crate) fn wait(&self, deadline: Option<Duration>) -> WaitOutcome {
        match deadline {
            Some(timeout) => {
                let _ = self.signal_rx.recv_timeout(timeout);
            }
            None => {
                let _ = self.signal_rx.recv();
            }
        }
        let mut inner = self.inner.lock().expect("reply slot lock");
        match &mut inner.state {
            SlotState::Replied(value) => {
                WaitOutcome::Replied(value.take().expect("reply observed once"))
            }
            SlotState::Failed(reason) => WaitOutcome::Failed(reason.clone()),
            SlotState::TimedOut => WaitOutcome::TimedOut,
            SlotState::Pending => {
                inner.state = SlotState::TimedOut;
                WaitOutcome::TimedOut
            }
        }
    }

}

/// Reply capability handed to a reaction body for one consumed blocking
/// molecule. Cloneable; all clones expire together when the consuming body
/// returns, after which replies are logged no-ops.
#[derive(Clone)]
pub struct ReplyHandle {
    slot: Arc<ReplySlot>,
    expired: Arc<AtomicBool>,
    molecule: MoleculeId,
}

impl ReplyHandle {
    pub(crate) fn new(slot: Arc<ReplySlot>, expired: Arc<AtomicBool>, molecule: MoleculeId) -> Self {
        ReplyHandle {
            slot,
            expired,
            molecule,
        }
    }

    /// Deliver the reply. Returns `true` iff the waiting emitter will
    /// observe this value. Exactly one reply per consumption is the
    /// protocol; extra replies are reported and dropped.
    pub fn reply(&self, value: impl Molecular) -> bool {
        if self.expired.load(Ordering::Acquire) {
            tracing::warn!(
                molecule = %self.molecule.name(),
                "stale reply handle used after its reaction returned"
            );
            return false;
        }
        match self.slot.reply(Value::new(value)) {
            ReplyOutcome::Delivered => true,
            ReplyOutcome::AlreadyReplied => {
                tracing::error!(
                    molecule = %self.molecule.name(),
                    replies = self.slot.reply_count(),
                    "multiple replies to one blocking emission"
                );
                false
            }
            ReplyOutcome::Dropped => {
                tracing::warn!(
                    molecule = %self.molecule.name(),
                    "reply lost the race against the emitter's timeout"
                );
                false
            }
        }
    }

    pub fn molecule(&self) -> &MoleculeId {
        &self.molecule
    }
}

// Handles are molecule payloads themselves when a reaction forwards its
// reply capability onward, so they carry the payload vocabulary.
impl std::fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reply<{}>", self.molecule.name())
    }
}

impl PartialEq for ReplyHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}
