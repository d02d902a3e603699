//! Execution-context policy for consumer methods.

use std::fmt;

/// Decides on which thread a consumer method runs.
///
/// The "main" thread is whatever the bus's
/// [`MainThreadSupport`](crate::MainThreadSupport) designates. A bus built
/// without one treats every thread as the main thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadMode {
    /// Runs synchronously on the thread draining the posting session.
    #[default]
    Posting,

    /// Runs inline when posted from the main thread, otherwise queued to it.
    ///
    /// A post made directly on the main thread can run before a message
    /// that another thread queued earlier.
    Main,

    /// Always queued to the main thread, in strict posting order.
    MainOrdered,

    /// Runs inline when posted off the main thread, otherwise handed to the
    /// single background worker.
    Background,

    /// Always handed to the async pool; no ordering guarantees.
    Async,
}

impl ThreadMode {
    /// Returns whether consumers in this mode may cancel delivery.
    pub fn allows_cancellation(self) -> bool {
        self == ThreadMode::Posting
    }
}

impl fmt::Display for ThreadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadMode::Posting => "Posting",
            ThreadMode::Main => "Main",
            ThreadMode::MainOrdered => "MainOrdered",
            ThreadMode::Background => "Background",
            ThreadMode::Async => "Async",
        };
        f.write_str(name)
    }
}
