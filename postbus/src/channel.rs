//! The dispatch engine shared by both channels of a bus.
//!
//! A bus carries two structurally identical channels: events delivered to
//! subscribers, and exceptional events delivered to handlers. [`Channel`] is
//! written once and instantiated per [`ChannelKind`].

use crate::consumer::Consumer;
use crate::dispatch::{BackgroundPoster, Executor, MainPoster, MainThreadSupport, Task};
use crate::error::{ConsumerError, EventBusError, EventBusResult};
use crate::event_bus::{BusInner, ChannelConfig, ErrorHandling, EventBus};
use crate::failure::{ConsumerFailure, NoConsumer};
use crate::hierarchy::lineage_of;
use crate::index::MethodFinder;
use crate::message::{Envelope, Message};
use crate::registry::{ConsumerKey, Registry, Subscription};
use crate::session::Session;
use crate::thread_mode::ThreadMode;
#[cfg(feature = "metrics")]
use crate::metrics::ChannelMetrics;
use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// Tag type naming one channel of a bus.
pub trait ChannelKind: Send + Sync + 'static {
    /// What consumers on this channel are called.
    const CONSUMER: &'static str;
    /// What messages on this channel are called.
    const MESSAGE: &'static str;
    /// Short channel name used in logs and thread names.
    const LABEL: &'static str;
}

/// The event channel: events posted to subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Events;

impl ChannelKind for Events {
    const CONSUMER: &'static str = "subscriber";
    const MESSAGE: &'static str = "event";
    const LABEL: &'static str = "events";
}

/// The exceptional channel: exceptional events thrown to handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Exceptional;

impl ChannelKind for Exceptional {
    const CONSUMER: &'static str = "handler";
    const MESSAGE: &'static str = "exceptional event";
    const LABEL: &'static str = "exceptional";
}

/// Locates the channel of kind `K` inside a bus.
pub(crate) trait Route: ChannelKind + Sized {
    fn channel(bus: &BusInner) -> &Channel<Self>;
}

/// Execution contexts shared by the channels of one bus.
#[derive(Clone)]
pub(crate) struct DeliveryContext {
    pub(crate) main_support: Option<Arc<dyn MainThreadSupport>>,
    pub(crate) main_poster: Option<Arc<MainPoster>>,
    pub(crate) executor: Arc<dyn Executor>,
}

#[derive(Default)]
struct ChannelState {
    registry: Registry,
    sticky: HashMap<TypeId, Envelope>,
}

/// Registry, sticky store and dispatchers of one channel.
pub(crate) struct Channel<K: Route> {
    bus: Weak<BusInner>,
    session: Session,
    config: ChannelConfig,
    finder: MethodFinder<K>,
    state: RwLock<ChannelState>,
    context: DeliveryContext,
    background: BackgroundPoster,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<ChannelMetrics>>,
}

impl<K: Route> Channel<K> {
    pub(crate) fn new(
        bus: Weak<BusInner>,
        bus_id: u64,
        config: ChannelConfig,
        finder: MethodFinder<K>,
        context: DeliveryContext,
    ) -> Self {
        Self {
            bus,
            session: Session::new(bus_id, TypeId::of::<K>()),
            config,
            finder,
            state: RwLock::new(ChannelState::default()),
            context,
            background: BackgroundPoster::new(format!("postbus-{}-background", K::LABEL)),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn with_metrics(mut self, metrics: Option<Arc<ChannelMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    fn is_main_thread(&self) -> bool {
        self.context
            .main_support
            .as_ref()
            .map_or(true, |support| support.is_main_thread())
    }

    /// Registers `consumer` and replays matching sticky messages to it.
    pub(crate) fn register<C: Consumer<K>>(&self, consumer: &Arc<C>) -> EventBusResult<()> {
        let methods = self.finder.find::<C>()?;
        let key = ConsumerKey::of(consumer);
        let consumer_type = type_name::<C>();
        let handle: Weak<C> = Arc::downgrade(consumer);
        let handle: Weak<dyn Any + Send + Sync> = handle;

        let subscriptions: Vec<Arc<Subscription>> = methods
            .iter()
            .map(|method| {
                Arc::new(Subscription::new(
                    key,
                    handle.clone(),
                    consumer_type,
                    method.clone(),
                ))
            })
            .collect();

        let replays = {
            let mut state = self.state.write();
            if !state.registry.insert(key, handle, subscriptions.clone()) {
                return Err(EventBusError::DuplicateRegistration {
                    consumer: consumer_type,
                    role: K::CONSUMER,
                });
            }
            self.sticky_replays(&state.sticky, &subscriptions)
        };
        debug!(
            channel = K::LABEL,
            consumer = consumer_type,
            methods = methods.len(),
            "Registered {}",
            K::CONSUMER
        );

        // Every replay runs; the first failure is reported after the loop.
        let is_main_thread = self.is_main_thread();
        let mut first_error = None;
        for (subscription, envelope) in replays {
            if let Err(error) = self.post_to_subscription(&subscription, &envelope, is_main_thread) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Pairs every sticky method with the stored messages it matches, in
    /// priority order.
    fn sticky_replays(
        &self,
        sticky: &HashMap<TypeId, Envelope>,
        subscriptions: &[Arc<Subscription>],
    ) -> Vec<(Arc<Subscription>, Envelope)> {
        let mut replays = Vec::new();
        for subscription in subscriptions.iter().filter(|s| s.method.is_sticky()) {
            let declared = subscription.method.message_type();
            for envelope in sticky.values() {
                if envelope
                    .lineage()
                    .route_types(self.config.inheritance)
                    .any(|ty| ty == declared)
                {
                    replays.push((subscription.clone(), envelope.clone()));
                }
            }
        }
        replays.sort_by(|a, b| b.0.method.priority().cmp(&a.0.method.priority()));
        replays
    }

    /// Removes every subscription of `consumer`. Returns false, with a
    /// warning, if it was not registered.
    pub(crate) fn unregister<C: Send + Sync + 'static>(&self, consumer: &Arc<C>) -> bool {
        let key = ConsumerKey::of(consumer);
        let removed = {
            let mut state = self.state.write();
            let live = state.registry.contains(key);
            state.registry.remove(key) && live
        };

        if removed {
            debug!(channel = K::LABEL, consumer = type_name::<C>(), "Unregistered {}", K::CONSUMER);
        } else {
            warn!(
                channel = K::LABEL,
                consumer = type_name::<C>(),
                "{} to unregister was not registered before",
                K::CONSUMER
            );
        }
        removed
    }

    pub(crate) fn is_registered<C>(&self, consumer: &Arc<C>) -> bool {
        self.state.read().registry.contains(ConsumerKey::of(consumer))
    }

    /// Returns whether a message of type `M` would reach any consumer.
    pub(crate) fn has_consumer_for<M: Message>(&self) -> bool {
        let lineage = lineage_of::<M>();
        let state = self.state.read();
        let found = lineage
            .route_types(self.config.inheritance)
            .any(|ty| state.registry.has_route(ty.id()));
        found
    }

    /// Posts a message on the calling thread's session.
    ///
    /// Returns once the calling thread's queue is drained. Deliveries handed
    /// to other threads may still be pending.
    pub(crate) fn post(&self, envelope: Envelope) -> EventBusResult<()> {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_posted(envelope.message().type_name());
        }

        let Some(_drain) = self.session.enqueue(envelope, self.is_main_thread()) else {
            return Ok(());
        };
        while let Some(envelope) = self.session.next() {
            self.post_single(&envelope)?;
        }
        Ok(())
    }

    /// Stores `envelope` as the sticky message of its exact type, then posts it.
    pub(crate) fn post_sticky(&self, envelope: Envelope) -> EventBusResult<()> {
        let previous = self
            .state
            .write()
            .sticky
            .insert(envelope.message_type().id(), envelope.clone());
        drop(previous);
        self.post(envelope)
    }

    pub(crate) fn sticky<M: Message>(&self) -> Option<Arc<M>> {
        self.state
            .read()
            .sticky
            .get(&TypeId::of::<M>())
            .and_then(Envelope::downcast_arc::<M>)
    }

    pub(crate) fn remove_sticky<M: Message>(&self) -> Option<Arc<M>> {
        let removed = self.state.write().sticky.remove(&TypeId::of::<M>());
        removed.and_then(|envelope| envelope.downcast_arc::<M>())
    }

    /// Removes the sticky message of type `M` only if it equals `message`.
    pub(crate) fn remove_sticky_instance<M: Message + PartialEq>(&self, message: &M) -> bool {
        let ty = TypeId::of::<M>();
        let mut state = self.state.write();
        let matches = state
            .sticky
            .get(&ty)
            .and_then(Envelope::downcast_ref::<M>)
            .map_or(false, |stored| stored == message);
        let removed = if matches { state.sticky.remove(&ty) } else { None };
        drop(state);
        drop(removed);
        matches
    }

    pub(crate) fn remove_all_sticky(&self) {
        let removed = std::mem::take(&mut self.state.write().sticky);
        drop(removed);
    }

    /// Cancels the delivery in progress on the calling thread.
    pub(crate) fn cancel_delivery<T: ?Sized>(&self, message: &T) -> EventBusResult<()> {
        let address = (message as *const T).cast::<()>() as usize;
        self.session.cancel(address)?;
        trace!(channel = K::LABEL, "{} delivery canceled", K::MESSAGE);
        Ok(())
    }

    pub(crate) fn clear_caches(&self) {
        self.finder.clear_cache();
    }

    fn post_single(&self, envelope: &Envelope) -> EventBusResult<()> {
        let route = self.route_for(envelope);
        if route.is_empty() {
            return self.no_consumer(envelope);
        }

        let is_main_thread = self.session.is_main_thread();
        for subscription in &route {
            self.session.begin(envelope, subscription.method.thread_mode());
            let result = self.post_to_subscription(subscription, envelope, is_main_thread);
            let canceled = self.session.finish();
            result?;

            if canceled {
                trace!(
                    channel = K::LABEL,
                    message = envelope.message().type_name(),
                    consumer = subscription.consumer_type,
                    "Delivery aborted"
                );
                #[cfg(feature = "metrics")]
                if let Some(metrics) = &self.metrics {
                    metrics.record_canceled();
                }
                break;
            }
        }
        Ok(())
    }

    /// Snapshot of the type route for a message: exact type first, then its
    /// ancestors, interfaces and the catch-all.
    fn route_for(&self, envelope: &Envelope) -> Vec<Arc<Subscription>> {
        let state = self.state.read();
        let mut route = Vec::new();
        for ty in envelope.lineage().route_types(self.config.inheritance) {
            if let Some(subscriptions) = state.registry.route(ty.id()) {
                route.extend(subscriptions.iter().cloned());
            }
        }
        route
    }

    fn no_consumer(&self, envelope: &Envelope) -> EventBusResult<()> {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_no_consumer();
        }

        if self.config.log_no_consumer {
            debug!(
                channel = K::LABEL,
                message = envelope.message().type_name(),
                "No {}s registered for {}",
                K::CONSUMER,
                K::MESSAGE
            );
        }

        let wrapped = envelope.is::<NoConsumer<K>>() || envelope.is::<ConsumerFailure<K>>();
        if self.config.send_no_consumer_message && !wrapped {
            if let Some(bus) = self.bus.upgrade() {
                let message = NoConsumer::<K>::new(envelope.shared().clone(), EventBus::from_inner(bus));
                return self.post(Envelope::new(message));
            }
        }
        Ok(())
    }

    /// Hands one delivery to the execution context its thread mode requires.
    fn post_to_subscription(
        &self,
        subscription: &Arc<Subscription>,
        envelope: &Envelope,
        is_main_thread: bool,
    ) -> EventBusResult<()> {
        match subscription.method.thread_mode() {
            ThreadMode::Posting => self.invoke(subscription, envelope),
            ThreadMode::Main => match &self.context.main_poster {
                Some(poster) if !is_main_thread => {
                    poster.enqueue(self.pending(subscription, envelope));
                    Ok(())
                }
                _ => self.invoke(subscription, envelope),
            },
            ThreadMode::MainOrdered => match &self.context.main_poster {
                Some(poster) => {
                    poster.enqueue(self.pending(subscription, envelope));
                    Ok(())
                }
                None => self.invoke(subscription, envelope),
            },
            ThreadMode::Background => {
                if is_main_thread {
                    self.background.enqueue(self.pending(subscription, envelope));
                    Ok(())
                } else {
                    self.invoke(subscription, envelope)
                }
            }
            ThreadMode::Async => {
                self.context.executor.execute(self.pending(subscription, envelope));
                Ok(())
            }
        }
    }

    /// A delivery to run later on another execution context.
    ///
    /// The task keeps the bus alive until it has run, so deliveries queued
    /// before the last [`EventBus`] handle is dropped still reach their
    /// consumers.
    fn pending(&self, subscription: &Arc<Subscription>, envelope: &Envelope) -> Task {
        let bus = self.bus.upgrade();
        let subscription = subscription.clone();
        let envelope = envelope.clone();
        Box::new(move || {
            let Some(bus) = bus else {
                warn!(
                    channel = K::LABEL,
                    consumer = subscription.consumer_type,
                    message = envelope.message().type_name(),
                    "Bus was dropped before a queued {} could be delivered",
                    K::MESSAGE
                );
                return;
            };
            if let Err(error) = K::channel(&bus).invoke(&subscription, &envelope) {
                error!(
                    channel = K::LABEL,
                    %error,
                    "Failure in a {} running off the posting thread cannot be rethrown",
                    K::CONSUMER
                );
            }
        })
    }

    /// Calls the consumer method unless the consumer is gone or unregistered.
    fn invoke(&self, subscription: &Subscription, envelope: &Envelope) -> EventBusResult<()> {
        if !subscription.is_active() {
            return Ok(());
        }
        let Some(consumer) = subscription.consumer.upgrade() else {
            return Ok(());
        };

        #[cfg(feature = "metrics")]
        let started = Instant::now();

        let result = subscription.method.invoke(&*consumer, envelope);

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_delivery(envelope.message().type_name(), started.elapsed(), result.is_err());
        }

        match result {
            Ok(()) => Ok(()),
            Err(cause) => self.handle_consumer_failure(subscription, consumer, envelope, cause),
        }
    }

    fn handle_consumer_failure(
        &self,
        subscription: &Subscription,
        consumer: Arc<dyn Any + Send + Sync>,
        envelope: &Envelope,
        cause: ConsumerError,
    ) -> EventBusResult<()> {
        let cause = Arc::new(cause);

        if let Some(failure) = envelope.downcast_ref::<ConsumerFailure<K>>() {
            if self.config.error_handling != ErrorHandling::Continue {
                error!(
                    channel = K::LABEL,
                    consumer = subscription.consumer_type,
                    method = subscription.method.name(),
                    %cause,
                    original_message = failure.message().type_name(),
                    original_consumer = failure.consumer_type_name(),
                    original_cause = %failure.cause(),
                    "{} failed while handling a {} failure",
                    K::CONSUMER,
                    K::CONSUMER
                );
            }
            return Ok(());
        }

        match self.config.error_handling {
            ErrorHandling::Rethrow => {
                return Err(EventBusError::ConsumerExecutionFailure {
                    role: K::CONSUMER,
                    consumer: subscription.consumer_type,
                    message: envelope.message().type_name(),
                    cause,
                });
            }
            ErrorHandling::LogAndContinue => error!(
                channel = K::LABEL,
                consumer = subscription.consumer_type,
                method = subscription.method.name(),
                message = envelope.message().type_name(),
                %cause,
                "Could not dispatch {} to {}",
                K::MESSAGE,
                K::CONSUMER
            ),
            ErrorHandling::Continue => {}
        }

        if self.config.send_failure_message {
            let failure = ConsumerFailure::<K>::new(
                envelope.shared().clone(),
                consumer,
                subscription.consumer_type,
                cause,
            );
            self.post(Envelope::new(failure))?;
        }
        Ok(())
    }

    /// Registered consumers, type routes and sticky messages.
    #[cfg(test)]
    pub(crate) fn footprint(&self) -> (usize, usize, usize) {
        let state = self.state.read();
        (
            state.registry.consumer_count(),
            state.registry.route_count(),
            state.sticky.len(),
        )
    }

    #[cfg(test)]
    pub(crate) fn is_draining(&self) -> bool {
        self.session.is_posting()
    }
}
