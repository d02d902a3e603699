//! # Postbus - In-Process Publish/Subscribe for Rust
//!
//! Postbus decouples the components of an application: publishers post
//! messages on a bus, and every registered consumer whose declared message
//! type matches receives them, on the thread its method asks for.
//!
//! A bus has two channels that work the same way:
//!
//! - **Events** are posted with [`EventBus::post`] to [`Subscriber`]s
//! - **Exceptional events** are thrown with [`EventBus::throw_exception`] to
//!   [`Handler`]s
//!
//! ## Features
//!
//! - **Thread Modes**: deliver on the posting thread, the main thread, a
//!   background thread or an async pool
//! - **Priorities**: higher priority consumers see a message first and may
//!   cancel its delivery
//! - **Sticky Messages**: the latest message of a type is kept and replayed
//!   to consumers registering later
//! - **Hierarchies**: messages can reach consumers of their parent types and
//!   interfaces
//! - **Indexes**: consumer methods can be supplied by a precomputed index
//!
//! ## Quick Start
//!
//! ```rust
//! use postbus::{consumer, EventBus, Message};
//! use std::sync::Arc;
//!
//! #[derive(Message, Debug)]
//! struct UserLoggedIn {
//!     user_id: u64,
//! }
//!
//! struct Greeter;
//!
//! #[consumer]
//! impl Greeter {
//!     #[subscribe(priority = 1)]
//!     fn on_login(&self, event: &UserLoggedIn) {
//!         println!("User {} logged in", event.user_id);
//!     }
//! }
//!
//! let bus = EventBus::new();
//! let greeter = Arc::new(Greeter);
//! bus.register_subscriber(&greeter)?;
//!
//! bus.post(UserLoggedIn { user_id: 123 })?;
//!
//! bus.unregister_subscriber(&greeter);
//! # Ok::<(), postbus::EventBusError>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate self as postbus;

// Re-export derive macros
pub use postbus_derive::{consumer, Message};

// Core modules
pub mod channel;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod event_bus;
pub mod failure;
pub mod hierarchy;
pub mod index;
pub mod looper;
pub mod message;
pub mod priority;
pub mod testing;
pub mod thread_mode;

mod registry;
mod session;

#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics;

// Re-exports for convenience
pub use channel::{ChannelKind, Events, Exceptional};
pub use consumer::{
    Consumer, Handler, IntoOutcome, MethodDescriptor, MethodOptions, MethodScan, Subscriber,
};
pub use dispatch::{Executor, MainThreadSupport, Task, ThreadSpawnExecutor};
#[cfg(feature = "tokio")]
pub use dispatch::TokioExecutor;
pub use error::*;
pub use event_bus::{ChannelConfig, ErrorHandling, EventBus, EventBusBuilder, EventBusConfig};
pub use failure::{
    ConsumerFailure, HandlerExceptionEvent, NoConsumer, NoHandlerEvent, NoSubscriberEvent,
    SubscriberExceptionEvent,
};
pub use hierarchy::{Lineage, TypeLineage};
pub use index::{ConsumerIndex, ConsumerInfo, StaticIndex};
pub use looper::MainLoop;
pub use message::{AnyMessage, Envelope, Message, MessageType, Routable};
pub use priority::Priority;
pub use thread_mode::ThreadMode;

#[cfg(feature = "metrics")]
pub use metrics::{BusMetrics, ChannelMetrics, ChannelSnapshot, MessageStats, MetricsSnapshot};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{ConsumerError, EventBusError, EventBusResult};
    pub use crate::{
        consumer, message_interface, AnyMessage, ErrorHandling, EventBus, EventBusBuilder,
        Handler, Message, Priority, Subscriber, ThreadMode,
    };
    pub use crate::{
        HandlerExceptionEvent, NoHandlerEvent, NoSubscriberEvent, SubscriberExceptionEvent,
    };
}

/// Version information for the postbus library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod test_builder;

#[cfg(test)]
mod test_cancel;

#[cfg(test)]
mod test_failures;

#[cfg(test)]
mod test_inheritance;

#[cfg(test)]
mod test_sticky;

#[cfg(all(test, feature = "metrics"))]
mod test_metrics;
