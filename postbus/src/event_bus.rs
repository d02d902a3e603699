//! The event bus facade, its configuration and its builder.
//!
//! An [`EventBus`] owns two channels. Events are posted to subscribers and
//! exceptional events are thrown to handlers; both channels share the same
//! dispatch rules and are configured independently.

use crate::channel::{Channel, DeliveryContext, Events, Exceptional, Route};
use crate::consumer::{Handler, Subscriber};
use crate::dispatch::{default_executor, Executor, MainPoster, MainThreadSupport};
use crate::error::{EventBusError, EventBusResult};
use crate::index::{ConsumerIndex, MethodFinder};
use crate::message::{Envelope, Message};
#[cfg(feature = "metrics")]
use crate::metrics::BusMetrics;
use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// What a channel does when a consumer method fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorHandling {
    /// Log the failure at error level and keep delivering.
    #[default]
    LogAndContinue,

    /// Keep delivering without logging.
    Continue,

    /// Return the failure to the poster as
    /// [`EventBusError::ConsumerExecutionFailure`].
    ///
    /// Only failures of methods running on the posting thread can reach the
    /// poster; the rest of that thread's queued messages are discarded.
    Rethrow,
}

/// Configuration of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Whether messages also reach consumers of their ancestors, interfaces
    /// and the catch-all type.
    pub inheritance: bool,

    /// What to do when a consumer method fails.
    pub error_handling: ErrorHandling,

    /// Whether to post a [`ConsumerFailure`](crate::ConsumerFailure) when a
    /// consumer method fails.
    pub send_failure_message: bool,

    /// Whether to log messages that reach no consumer.
    pub log_no_consumer: bool,

    /// Whether to post a [`NoConsumer`](crate::NoConsumer) for messages that
    /// reach no consumer.
    pub send_no_consumer_message: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            inheritance: true,
            error_handling: ErrorHandling::LogAndContinue,
            send_failure_message: true,
            log_no_consumer: true,
            send_no_consumer_message: true,
        }
    }
}

/// Configuration options for an [`EventBus`].
///
/// # Examples
///
/// ```rust
/// use postbus::{ChannelConfig, ErrorHandling, EventBus, EventBusConfig};
///
/// let config = EventBusConfig {
///     events: ChannelConfig {
///         inheritance: false,
///         error_handling: ErrorHandling::Rethrow,
///         ..Default::default()
///     },
///     ..Default::default()
/// };
///
/// let bus = EventBus::with_config(config);
/// ```
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// The event channel.
    pub events: ChannelConfig,

    /// The exceptional channel.
    pub exceptional: ChannelConfig,

    /// Whether to ignore consumer indexes and always use the consumer types'
    /// own descriptions.
    pub ignore_generated_index: bool,

    /// How long one turn of the ordered main-thread queue may run before it
    /// yields the main thread.
    pub main_queue_budget: Duration,

    /// Whether to collect delivery metrics.
    pub enable_metrics: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            events: ChannelConfig::default(),
            exceptional: ChannelConfig::default(),
            ignore_generated_index: false,
            main_queue_budget: Duration::from_millis(10),
            enable_metrics: false,
        }
    }
}

static NEXT_BUS_ID: AtomicU64 = AtomicU64::new(1);
static DEFAULT_BUS: OnceLock<EventBus> = OnceLock::new();

pub(crate) struct BusInner {
    id: u64,
    config: EventBusConfig,
    events: Channel<Events>,
    exceptional: Channel<Exceptional>,
    #[cfg(feature = "metrics")]
    metrics: Option<BusMetrics>,
}

impl Route for Events {
    fn channel(bus: &BusInner) -> &Channel<Self> {
        &bus.events
    }
}

impl Route for Exceptional {
    fn channel(bus: &BusInner) -> &Channel<Self> {
        &bus.exceptional
    }
}

/// An in-process publish/subscribe bus.
///
/// `EventBus` is a cheap handle; clones share the same bus. The bus holds
/// its consumers weakly, so registering never keeps a consumer alive.
///
/// # Examples
///
/// ```rust
/// use postbus::{consumer, EventBus};
/// use std::sync::Arc;
///
/// struct Greeter;
///
/// #[consumer]
/// impl Greeter {
///     #[subscribe]
///     fn on_name(&self, name: &String) {
///         println!("hello {name}");
///     }
/// }
///
/// let bus = EventBus::new();
/// let greeter = Arc::new(Greeter);
/// bus.register_subscriber(&greeter)?;
/// bus.post(String::from("world"))?;
/// bus.unregister_subscriber(&greeter);
/// # Ok::<(), postbus::EventBusError>(())
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a new bus with default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a new bus with the specified configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration options for both channels
    pub fn with_config(config: EventBusConfig) -> Self {
        EventBusBuilder::from_config(config).build()
    }

    /// Returns a builder for a new bus.
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    /// Returns the process-wide default bus, creating it on first use.
    ///
    /// Use [`EventBusBuilder::install_default_bus`] before first use to
    /// configure it.
    pub fn default_bus() -> EventBus {
        DEFAULT_BUS.get_or_init(EventBus::new).clone()
    }

    pub(crate) fn from_inner(inner: Arc<BusInner>) -> Self {
        Self { inner }
    }

    /// Returns the configuration this bus was built with.
    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    /// Returns whether both handles refer to the same bus.
    pub fn ptr_eq(&self, other: &EventBus) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Empties the cached method lists of consumer types.
    pub fn clear_caches(&self) {
        self.inner.events.clear_caches();
        self.inner.exceptional.clear_caches();
    }

    /// Returns the delivery metrics, if enabled.
    #[cfg(feature = "metrics")]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    pub fn metrics(&self) -> Option<&BusMetrics> {
        self.inner.metrics.as_ref()
    }

    /// Registers a subscriber.
    ///
    /// Sticky methods immediately receive the matching sticky events through
    /// their thread mode.
    ///
    /// # Errors
    ///
    /// Fails with [`EventBusError::DuplicateRegistration`] if `subscriber` is
    /// already registered, and with
    /// [`EventBusError::InvalidSubscriberMethod`] or
    /// [`EventBusError::NoConsumerMethods`] if its methods cannot be
    /// resolved. A rethrown failure of a sticky replay is returned after the
    /// subscriber has been registered.
    pub fn register_subscriber<C: Subscriber>(&self, subscriber: &Arc<C>) -> EventBusResult<()> {
        self.inner.events.register(subscriber)
    }

    /// Unregisters a subscriber. Returns false if it was not registered.
    pub fn unregister_subscriber<C: Subscriber>(&self, subscriber: &Arc<C>) -> bool {
        self.inner.events.unregister(subscriber)
    }

    /// Returns whether `subscriber` is registered.
    pub fn is_registered_subscriber<C: Subscriber>(&self, subscriber: &Arc<C>) -> bool {
        self.inner.events.is_registered(subscriber)
    }

    /// Returns whether an event of type `M` would reach any subscriber.
    pub fn has_subscriber_for<M: Message>(&self) -> bool {
        self.inner.events.has_consumer_for::<M>()
    }

    /// Posts an event.
    ///
    /// Returns once the calling thread has delivered everything it queued;
    /// deliveries handed to other threads may still be pending.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use postbus::EventBus;
    ///
    /// let bus = EventBus::new();
    /// bus.post(42u32)?;
    /// # Ok::<(), postbus::EventBusError>(())
    /// ```
    pub fn post<M: Message>(&self, event: M) -> EventBusResult<()> {
        self.inner.events.post(Envelope::new(event))
    }

    /// Posts an event and keeps it as the sticky event of its exact type.
    pub fn post_sticky<M: Message>(&self, event: M) -> EventBusResult<()> {
        self.inner.events.post_sticky(Envelope::new(event))
    }

    /// Returns the sticky event of exactly type `M`.
    pub fn get_sticky_event<M: Message>(&self) -> Option<Arc<M>> {
        self.inner.events.sticky::<M>()
    }

    /// Removes and returns the sticky event of exactly type `M`.
    pub fn remove_sticky_event<M: Message>(&self) -> Option<Arc<M>> {
        self.inner.events.remove_sticky::<M>()
    }

    /// Removes the sticky event of type `M` if it equals `event`.
    pub fn remove_sticky_event_instance<M: Message + PartialEq>(&self, event: &M) -> bool {
        self.inner.events.remove_sticky_instance(event)
    }

    /// Removes all sticky events.
    pub fn remove_all_sticky_events(&self) {
        self.inner.events.remove_all_sticky();
    }

    /// Stops the current event from reaching the remaining subscribers.
    ///
    /// Must be called from a [`ThreadMode::Posting`](crate::ThreadMode)
    /// subscriber method, with the event that method received.
    ///
    /// # Errors
    ///
    /// Fails with [`EventBusError::IllegalCancellation`] otherwise.
    pub fn cancel_event_delivery<T: ?Sized>(&self, event: &T) -> EventBusResult<()> {
        self.inner.events.cancel_delivery(event)
    }

    /// Registers a handler.
    pub fn register_handler<C: Handler>(&self, handler: &Arc<C>) -> EventBusResult<()> {
        self.inner.exceptional.register(handler)
    }

    /// Unregisters a handler. Returns false if it was not registered.
    pub fn unregister_handler<C: Handler>(&self, handler: &Arc<C>) -> bool {
        self.inner.exceptional.unregister(handler)
    }

    /// Returns whether `handler` is registered.
    pub fn is_registered_handler<C: Handler>(&self, handler: &Arc<C>) -> bool {
        self.inner.exceptional.is_registered(handler)
    }

    /// Returns whether an exceptional event of type `M` would reach any
    /// handler.
    pub fn has_handler_for<M: Message>(&self) -> bool {
        self.inner.exceptional.has_consumer_for::<M>()
    }

    /// Throws an exceptional event to the handlers.
    pub fn throw_exception<M: Message>(&self, exceptional_event: M) -> EventBusResult<()> {
        self.inner.exceptional.post(Envelope::new(exceptional_event))
    }

    /// Throws an exceptional event and keeps it as the sticky exceptional
    /// event of its exact type.
    pub fn throw_sticky<M: Message>(&self, exceptional_event: M) -> EventBusResult<()> {
        self.inner.exceptional.post_sticky(Envelope::new(exceptional_event))
    }

    /// Returns the sticky exceptional event of exactly type `M`.
    pub fn get_sticky_exceptional_event<M: Message>(&self) -> Option<Arc<M>> {
        self.inner.exceptional.sticky::<M>()
    }

    /// Removes and returns the sticky exceptional event of exactly type `M`.
    pub fn remove_sticky_exceptional_event<M: Message>(&self) -> Option<Arc<M>> {
        self.inner.exceptional.remove_sticky::<M>()
    }

    /// Removes the sticky exceptional event of type `M` if it equals
    /// `exceptional_event`.
    pub fn remove_sticky_exceptional_event_instance<M: Message + PartialEq>(
        &self,
        exceptional_event: &M,
    ) -> bool {
        self.inner.exceptional.remove_sticky_instance(exceptional_event)
    }

    /// Removes all sticky exceptional events.
    pub fn remove_all_sticky_exceptional_events(&self) {
        self.inner.exceptional.remove_all_sticky();
    }

    /// Stops the current exceptional event from reaching the remaining
    /// handlers.
    pub fn cancel_exceptional_event_delivery<T: ?Sized>(
        &self,
        exceptional_event: &T,
    ) -> EventBusResult<()> {
        self.inner.exceptional.cancel_delivery(exceptional_event)
    }

    #[cfg(test)]
    pub(crate) fn events(&self) -> &Channel<Events> {
        &self.inner.events
    }

    #[cfg(test)]
    pub(crate) fn exceptional(&self) -> &Channel<Exceptional> {
        &self.inner.exceptional
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring [`EventBus`] instances.
///
/// # Examples
///
/// ```rust
/// use postbus::{ErrorHandling, EventBus};
///
/// let bus = EventBus::builder()
///     .with_event_inheritance(false)
///     .with_subscriber_error_handling(ErrorHandling::Rethrow)
///     .with_no_subscriber_events(false)
///     .build();
/// assert!(!bus.config().events.inheritance);
/// ```
pub struct EventBusBuilder {
    config: EventBusConfig,
    subscriber_indexes: Vec<Arc<dyn ConsumerIndex<Events>>>,
    handler_indexes: Vec<Arc<dyn ConsumerIndex<Exceptional>>>,
    boundary: HashSet<TypeId>,
    executor: Option<Arc<dyn Executor>>,
    main_support: Option<Arc<dyn MainThreadSupport>>,
}

impl EventBusBuilder {
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self::from_config(EventBusConfig::default())
    }

    /// Creates a builder starting from `config`.
    pub fn from_config(config: EventBusConfig) -> Self {
        Self {
            config,
            subscriber_indexes: Vec::new(),
            handler_indexes: Vec::new(),
            boundary: HashSet::new(),
            executor: None,
            main_support: None,
        }
    }

    /// Enables or disables hierarchy matching for events.
    ///
    /// # Arguments
    /// * `enabled` - Whether events reach subscribers of their ancestors,
    ///   interfaces and the catch-all type
    pub fn with_event_inheritance(mut self, enabled: bool) -> Self {
        self.config.events.inheritance = enabled;
        self
    }

    /// Enables or disables hierarchy matching for exceptional events.
    pub fn with_exceptional_event_inheritance(mut self, enabled: bool) -> Self {
        self.config.exceptional.inheritance = enabled;
        self
    }

    /// Sets what happens when a subscriber method fails.
    pub fn with_subscriber_error_handling(mut self, handling: ErrorHandling) -> Self {
        self.config.events.error_handling = handling;
        self
    }

    /// Sets what happens when a handler method fails.
    pub fn with_handler_error_handling(mut self, handling: ErrorHandling) -> Self {
        self.config.exceptional.error_handling = handling;
        self
    }

    /// Enables or disables posting a
    /// [`SubscriberExceptionEvent`](crate::SubscriberExceptionEvent) when a
    /// subscriber method fails.
    pub fn with_subscriber_exception_events(mut self, enabled: bool) -> Self {
        self.config.events.send_failure_message = enabled;
        self
    }

    /// Enables or disables throwing a
    /// [`HandlerExceptionEvent`](crate::HandlerExceptionEvent) when a handler
    /// method fails.
    pub fn with_handler_exception_events(mut self, enabled: bool) -> Self {
        self.config.exceptional.send_failure_message = enabled;
        self
    }

    /// Enables or disables logging events nobody subscribed to.
    pub fn with_no_subscriber_logging(mut self, enabled: bool) -> Self {
        self.config.events.log_no_consumer = enabled;
        self
    }

    /// Enables or disables logging exceptional events nobody handles.
    pub fn with_no_handler_logging(mut self, enabled: bool) -> Self {
        self.config.exceptional.log_no_consumer = enabled;
        self
    }

    /// Enables or disables posting a
    /// [`NoSubscriberEvent`](crate::NoSubscriberEvent) for events nobody
    /// subscribed to.
    pub fn with_no_subscriber_events(mut self, enabled: bool) -> Self {
        self.config.events.send_no_consumer_message = enabled;
        self
    }

    /// Enables or disables throwing a [`NoHandlerEvent`](crate::NoHandlerEvent)
    /// for exceptional events nobody handles.
    pub fn with_no_handler_events(mut self, enabled: bool) -> Self {
        self.config.exceptional.send_no_consumer_message = enabled;
        self
    }

    /// Ignores consumer indexes even when some are added.
    pub fn ignore_generated_index(mut self, ignore: bool) -> Self {
        self.config.ignore_generated_index = ignore;
        self
    }

    /// Adds an index of subscriber methods.
    pub fn add_subscriber_index(mut self, index: impl ConsumerIndex<Events>) -> Self {
        self.subscriber_indexes.push(Arc::new(index));
        self
    }

    /// Adds an index of handler methods.
    pub fn add_handler_index(mut self, index: impl ConsumerIndex<Exceptional>) -> Self {
        self.handler_indexes.push(Arc::new(index));
        self
    }

    /// Stops inheriting consumer methods at parent type `T`.
    pub fn stop_scan_at<T: 'static>(mut self) -> Self {
        self.boundary.insert(TypeId::of::<T>());
        self
    }

    /// Sets the executor for [`ThreadMode::Async`](crate::ThreadMode::Async)
    /// deliveries.
    pub fn with_executor(mut self, executor: impl Executor) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Sets the main thread of the bus.
    pub fn with_main_thread(mut self, support: impl MainThreadSupport) -> Self {
        self.main_support = Some(Arc::new(support));
        self
    }

    /// Sets how long one turn of the ordered main-thread queue may run.
    pub fn with_main_queue_budget(mut self, budget: Duration) -> Self {
        self.config.main_queue_budget = budget;
        self
    }

    /// Enables or disables metrics collection.
    ///
    /// # Arguments
    /// * `enabled` - Whether to collect metrics; only effective with the
    ///   `metrics` feature
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.config.enable_metrics = enabled;
        self
    }

    /// Returns the configuration built so far.
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Checks the configuration, then builds the bus.
    ///
    /// # Errors
    ///
    /// Fails with [`EventBusError::Configuration`] when the main queue budget
    /// is zero.
    pub fn try_build(self) -> EventBusResult<EventBus> {
        if self.config.main_queue_budget.is_zero() {
            return Err(EventBusError::configuration(
                "main queue budget must be greater than zero",
            ));
        }
        Ok(self.build())
    }

    /// Builds the configured bus.
    pub fn build(self) -> EventBus {
        let id = NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed);
        let main_poster = self.main_support.as_ref().map(|support| {
            Arc::new(MainPoster::new(support.clone(), self.config.main_queue_budget))
        });
        let context = DeliveryContext {
            main_support: self.main_support,
            main_poster,
            executor: self.executor.unwrap_or_else(default_executor),
        };
        let boundary = Arc::new(self.boundary);
        let config = self.config;
        let subscriber_indexes = self.subscriber_indexes;
        let handler_indexes = self.handler_indexes;

        #[cfg(feature = "metrics")]
        let metrics = config.enable_metrics.then(BusMetrics::default);

        let inner = Arc::new_cyclic(|bus: &Weak<BusInner>| {
            let events = Channel::new(
                bus.clone(),
                id,
                config.events,
                MethodFinder::new(
                    subscriber_indexes,
                    config.ignore_generated_index,
                    boundary.clone(),
                ),
                context.clone(),
            );
            let exceptional = Channel::new(
                bus.clone(),
                id,
                config.exceptional,
                MethodFinder::new(handler_indexes, config.ignore_generated_index, boundary),
                context,
            );

            #[cfg(feature = "metrics")]
            let events = events.with_metrics(metrics.as_ref().map(|m| m.events.clone()));
            #[cfg(feature = "metrics")]
            let exceptional =
                exceptional.with_metrics(metrics.as_ref().map(|m| m.exceptional.clone()));

            BusInner {
                id,
                config,
                events,
                exceptional,
                #[cfg(feature = "metrics")]
                metrics,
            }
        });
        EventBus { inner }
    }

    /// Builds the bus and installs it as the process-wide default.
    ///
    /// # Errors
    ///
    /// Fails with [`EventBusError::DefaultBusAlreadyInstalled`] if a default
    /// bus has already been installed or used, and like
    /// [`try_build`](Self::try_build) on an invalid configuration.
    pub fn install_default_bus(self) -> EventBusResult<EventBus> {
        if DEFAULT_BUS.get().is_some() {
            return Err(EventBusError::DefaultBusAlreadyInstalled);
        }
        let bus = self.try_build()?;
        DEFAULT_BUS
            .set(bus.clone())
            .map_err(|_| EventBusError::DefaultBusAlreadyInstalled)?;
        Ok(bus)
    }
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBusBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBusBuilder")
            .field("config", &self.config)
            .field("subscriber_indexes", &self.subscriber_indexes.len())
            .field("handler_indexes", &self.handler_indexes.len())
            .field("has_executor", &self.executor.is_some())
            .field("has_main_thread", &self.main_support.is_some())
            .finish()
    }
}
