//! Delivery metrics for event buses.
//!
//! Metrics are collected per channel when the bus is built with
//! [`EventBusBuilder::with_metrics`](crate::EventBusBuilder::with_metrics).
//! Collection never affects delivery.
//!
//! # Examples
//!
//! ```rust
//! use postbus::EventBus;
//!
//! let bus = EventBus::builder().with_metrics(true).build();
//! bus.post(String::from("unheard"))?;
//!
//! let snapshot = bus.metrics().unwrap().snapshot();
//! assert_eq!(snapshot.events.posted, 2);
//! assert_eq!(snapshot.events.no_consumer, 2);
//! # Ok::<(), postbus::EventBusError>(())
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Metrics of both channels of one bus.
#[derive(Debug, Clone, Default)]
pub struct BusMetrics {
    pub(crate) events: Arc<ChannelMetrics>,
    pub(crate) exceptional: Arc<ChannelMetrics>,
}

impl BusMetrics {
    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events: self.events.snapshot(),
            exceptional: self.exceptional.snapshot(),
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.events.reset();
        self.exceptional.reset();
    }
}

/// Counters of one channel.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    posted: AtomicU64,
    delivered: AtomicU64,
    failures: AtomicU64,
    no_consumer: AtomicU64,
    canceled: AtomicU64,
    invocation_nanos: AtomicU64,
    max_invocation_nanos: AtomicU64,
    messages: Mutex<HashMap<&'static str, MessageStats>>,
}

impl ChannelMetrics {
    pub(crate) fn record_posted(&self, message: &'static str) {
        self.posted.fetch_add(1, Ordering::Relaxed);
        self.messages.lock().entry(message).or_default().posted += 1;
    }

    pub(crate) fn record_delivery(&self, message: &'static str, elapsed: Duration, failed: bool) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.invocation_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_invocation_nanos.fetch_max(nanos, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut messages = self.messages.lock();
        let stats = messages.entry(message).or_default();
        stats.delivered += 1;
        if failed {
            stats.failures += 1;
        }
    }

    pub(crate) fn record_no_consumer(&self) {
        self.no_consumer.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_canceled(&self) {
        self.canceled.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            posted: self.posted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            no_consumer: self.no_consumer.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            total_invocation_time: Duration::from_nanos(self.invocation_nanos.load(Ordering::Relaxed)),
            max_invocation_time: Duration::from_nanos(
                self.max_invocation_nanos.load(Ordering::Relaxed),
            ),
            messages: self.messages.lock().clone(),
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.posted,
            &self.delivered,
            &self.failures,
            &self.no_consumer,
            &self.canceled,
            &self.invocation_nanos,
            &self.max_invocation_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.messages.lock().clear();
    }
}

/// Per message type counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStats {
    /// Messages of this type posted.
    pub posted: u64,
    /// Method invocations for messages of this type.
    pub delivered: u64,
    /// Invocations that failed.
    pub failures: u64,
}

/// Point-in-time copy of one channel's counters.
#[derive(Debug, Clone, Default)]
pub struct ChannelSnapshot {
    /// Messages posted, including wrapped failure and no-consumer messages.
    pub posted: u64,
    /// Consumer method invocations.
    pub delivered: u64,
    /// Invocations that returned an error or panicked.
    pub failures: u64,
    /// Messages that matched no consumer.
    pub no_consumer: u64,
    /// Deliveries aborted by cancellation.
    pub canceled: u64,
    /// Time spent inside consumer methods.
    pub total_invocation_time: Duration,
    /// Longest single invocation.
    pub max_invocation_time: Duration,
    /// Counters by message type name.
    pub messages: HashMap<&'static str, MessageStats>,
}

impl ChannelSnapshot {
    /// Returns the mean invocation time, or zero without deliveries.
    pub fn average_invocation_time(&self) -> Duration {
        match u32::try_from(self.delivered) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total_invocation_time / count,
            Err(_) => Duration::from_nanos(
                (self.total_invocation_time.as_nanos() / u128::from(self.delivered)) as u64,
            ),
        }
    }

    /// Returns the fraction of invocations that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.delivered == 0 {
            return 1.0;
        }
        (self.delivered - self.failures) as f64 / self.delivered as f64
    }
}

/// Point-in-time copy of a bus's counters.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// The event channel.
    pub events: ChannelSnapshot,
    /// The exceptional channel.
    pub exceptional: ChannelSnapshot,
}
