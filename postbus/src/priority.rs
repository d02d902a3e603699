//! Delivery priority for consumer methods.
//!
//! Within one message type, methods with a higher priority receive a message
//! before methods with a lower one. Methods with equal priority run in the
//! order they were registered. Priorities do not reorder deliveries across
//! different thread modes.

use std::fmt;

/// Priority of a consumer method. Higher values run first.
///
/// The default is `0`; negative priorities run after the default.
///
/// # Examples
///
/// ```rust
/// use postbus::Priority;
///
/// let first = Priority::new(10);
/// let last = Priority::from(-100);
///
/// assert!(first.runs_before(Priority::DEFAULT));
/// assert!(Priority::DEFAULT.runs_before(last));
/// assert_eq!(last.value(), -100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(i32);

impl Priority {
    /// Priority of methods that do not declare one.
    pub const DEFAULT: Priority = Priority(0);

    /// The highest possible priority.
    pub const HIGHEST: Priority = Priority(i32::MAX);

    /// The lowest possible priority.
    pub const LOWEST: Priority = Priority(i32::MIN);

    /// Creates a priority from its numeric value.
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the numeric value of this priority.
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Returns whether `self` is delivered strictly before `other`.
    pub fn runs_before(self, other: Priority) -> bool {
        self.0 > other.0
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position at which an entry with `priority` is inserted into `entries`,
/// which is already sorted by descending priority.
///
/// The entry goes after every existing entry of equal priority, which keeps
/// ties in registration order.
pub(crate) fn insertion_index<T>(
    entries: &[T],
    priority: Priority,
    priority_of: impl Fn(&T) -> Priority,
) -> usize {
    entries
        .iter()
        .position(|existing| priority.runs_before(priority_of(existing)))
        .unwrap_or(entries.len())
}
