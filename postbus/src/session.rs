//! Per-thread posting sessions.
//!
//! Every thread that posts owns one session per bus channel: a FIFO queue
//! of pending messages, the re-entrancy guard, and the delivery currently in
//! progress. A post made while the thread is already draining only enqueues,
//! so delivery never recurses.

use crate::error::CancellationError;
use crate::message::Envelope;
use crate::thread_mode::ThreadMode;
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SessionKey {
    bus: u64,
    channel: TypeId,
}

struct CurrentDelivery {
    envelope: Envelope,
    thread_mode: ThreadMode,
}

#[derive(Default)]
struct PostingState {
    queue: VecDeque<Envelope>,
    is_posting: bool,
    is_main_thread: bool,
    current: Option<CurrentDelivery>,
    canceled: bool,
}

thread_local! {
    static POSTING_STATES: RefCell<HashMap<SessionKey, PostingState>> = RefCell::new(HashMap::new());
}

/// Handle to the calling thread's session for one channel of one bus.
///
/// Consumer code must never run while the session state is borrowed; every
/// method here finishes its borrow before returning.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Session {
    key: SessionKey,
}

impl Session {
    pub(crate) fn new(bus: u64, channel: TypeId) -> Self {
        Self {
            key: SessionKey { bus, channel },
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut PostingState) -> R) -> R {
        POSTING_STATES.with(|states| f(states.borrow_mut().entry(self.key).or_default()))
    }

    fn with_active<R>(&self, f: impl FnOnce(&mut PostingState) -> R) -> Option<R> {
        POSTING_STATES.with(|states| states.borrow_mut().get_mut(&self.key).map(f))
    }

    /// Appends a message to the queue.
    ///
    /// Returns a guard when the calling thread was not draining yet; its
    /// owner must drain the queue and drop the guard afterwards.
    pub(crate) fn enqueue(&self, envelope: Envelope, is_main_thread: bool) -> Option<DrainGuard> {
        self.with_state(|state| {
            state.queue.push_back(envelope);
            if state.is_posting {
                return None;
            }
            state.is_posting = true;
            state.is_main_thread = is_main_thread;
            Some(DrainGuard { key: self.key })
        })
    }

    /// Pops the next queued message.
    pub(crate) fn next(&self) -> Option<Envelope> {
        self.with_active(|state| state.queue.pop_front()).flatten()
    }

    /// Returns the main-thread flag cached when the drain started.
    pub(crate) fn is_main_thread(&self) -> bool {
        self.with_active(|state| state.is_main_thread)
            .unwrap_or_default()
    }

    /// Marks `envelope` as being delivered to a method in `thread_mode`.
    pub(crate) fn begin(&self, envelope: &Envelope, thread_mode: ThreadMode) {
        self.with_active(|state| {
            state.current = Some(CurrentDelivery {
                envelope: envelope.clone(),
                thread_mode,
            });
            state.canceled = false;
        });
    }

    /// Clears the current delivery and returns whether it was canceled.
    pub(crate) fn finish(&self) -> bool {
        let (current, canceled) = self
            .with_active(|state| (state.current.take(), std::mem::take(&mut state.canceled)))
            .unwrap_or((None, false));
        drop(current);
        canceled
    }

    /// Cancels the current delivery if it is delivering the message found
    /// at `address`.
    pub(crate) fn cancel(&self, address: usize) -> Result<(), CancellationError> {
        self.with_active(|state| {
            if !state.is_posting {
                return Err(CancellationError::NotPosting);
            }
            let current = state
                .current
                .as_ref()
                .ok_or(CancellationError::NotCurrentMessage)?;
            if !current.envelope.contains(address) {
                return Err(CancellationError::NotCurrentMessage);
            }
            if !current.thread_mode.allows_cancellation() {
                return Err(CancellationError::NotPostingThreadMode(current.thread_mode));
            }
            state.canceled = true;
            Ok(())
        })
        .unwrap_or(Err(CancellationError::NotPosting))
    }

    #[cfg(test)]
    pub(crate) fn is_posting(&self) -> bool {
        self.with_active(|state| state.is_posting).unwrap_or(false)
    }
}

/// Ends a drain when dropped, including by unwinding or an early return.
pub(crate) struct DrainGuard {
    key: SessionKey,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let state = POSTING_STATES
            .try_with(|states| states.borrow_mut().remove(&self.key))
            .ok()
            .flatten();

        if let Some(state) = state {
            if !state.queue.is_empty() {
                warn!(
                    discarded = state.queue.len(),
                    "Posting session ended with queued messages; they are dropped"
                );
            }
            // Queued messages are dropped here, after the borrow has ended.
            drop(state);
        }
    }
}
