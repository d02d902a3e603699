//! Testing utilities for code built on postbus.
//!
//! Deliveries may happen on other threads, so assertions about them have to
//! wait. [`MessageTracker`] records what consumers received, on which thread,
//! and lets a test block until an expected number of deliveries arrived.

use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Records values received by consumers across threads.
///
/// # Examples
///
/// ```rust
/// use postbus::testing::MessageTracker;
/// use postbus::{consumer, EventBus};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct Listener {
///     seen: MessageTracker<String>,
/// }
///
/// #[consumer]
/// impl Listener {
///     #[subscribe(thread_mode = Async)]
///     fn on_text(&self, text: &String) {
///         self.seen.record(text.clone());
///     }
/// }
///
/// let bus = EventBus::new();
/// let listener = Arc::new(Listener::default());
/// bus.register_subscriber(&listener)?;
/// bus.post(String::from("hello"))?;
///
/// assert!(listener.seen.wait_for(1, Duration::from_secs(5)));
/// assert_eq!(listener.seen.values(), vec!["hello".to_string()]);
/// # Ok::<(), postbus::EventBusError>(())
/// ```
#[derive(Debug)]
pub struct MessageTracker<T> {
    records: Mutex<Vec<(T, ThreadId)>>,
    arrived: Condvar,
}

impl<T> MessageTracker<T> {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            arrived: Condvar::new(),
        }
    }

    /// Records `value` as received on the current thread.
    pub fn record(&self, value: T) {
        self.records.lock().push((value, thread::current().id()));
        self.arrived.notify_all();
    }

    /// Returns the number of recorded values.
    pub fn count(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns the threads the values were recorded on, in order.
    pub fn threads(&self) -> Vec<ThreadId> {
        self.records.lock().iter().map(|(_, thread)| *thread).collect()
    }

    /// Returns the thread of the latest record.
    pub fn last_thread(&self) -> Option<ThreadId> {
        self.records.lock().last().map(|(_, thread)| *thread)
    }

    /// Blocks until at least `count` values were recorded or `timeout`
    /// elapsed. Returns whether the count was reached.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut records = self.records.lock();
        while records.len() < count {
            if self.arrived.wait_until(&mut records, deadline).timed_out() {
                return records.len() >= count;
            }
        }
        true
    }

    /// Forgets all records.
    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Asserts the number of recorded values.
    ///
    /// # Panics
    ///
    /// Panics if the count differs.
    pub fn assert_count(&self, expected: usize) {
        let actual = self.count();
        if actual != expected {
            panic!("Expected {} recorded values, but {} were recorded", expected, actual);
        }
    }
}

impl<T: Clone> MessageTracker<T> {
    /// Returns the recorded values in order.
    pub fn values(&self) -> Vec<T> {
        self.records.lock().iter().map(|(value, _)| value.clone()).collect()
    }

    /// Returns the latest recorded value.
    pub fn last(&self) -> Option<T> {
        self.records.lock().last().map(|(value, _)| value.clone())
    }
}

impl<T> Default for MessageTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}
