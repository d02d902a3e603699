//! Messages the bus posts about its own deliveries.

use crate::channel::{ChannelKind, Events, Exceptional};
use crate::error::ConsumerError;
use crate::event_bus::EventBus;
use crate::message::{AnyMessage, Message};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Posted on channel `K` when a consumer method on `K` fails.
///
/// A failure raised while delivering a `ConsumerFailure` is logged only, so
/// failures never cascade.
pub struct ConsumerFailure<K: ChannelKind> {
    message: Arc<dyn AnyMessage>,
    consumer: Arc<dyn Any + Send + Sync>,
    consumer_type: &'static str,
    cause: Arc<ConsumerError>,
    _channel: PhantomData<fn(K)>,
}

/// Failure of a subscriber method.
pub type SubscriberExceptionEvent = ConsumerFailure<Events>;

/// Failure of a handler method.
pub type HandlerExceptionEvent = ConsumerFailure<Exceptional>;

impl<K: ChannelKind> ConsumerFailure<K> {
    pub(crate) fn new(
        message: Arc<dyn AnyMessage>,
        consumer: Arc<dyn Any + Send + Sync>,
        consumer_type: &'static str,
        cause: Arc<ConsumerError>,
    ) -> Self {
        Self {
            message,
            consumer,
            consumer_type,
            cause,
            _channel: PhantomData,
        }
    }

    /// Returns the message whose delivery failed.
    pub fn message(&self) -> &dyn AnyMessage {
        &*self.message
    }

    /// Returns the failing consumer.
    pub fn consumer(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.consumer
    }

    /// Returns the failing consumer as `C`, if that is its type.
    pub fn consumer_as<C: Any>(&self) -> Option<&C> {
        self.consumer.downcast_ref::<C>()
    }

    /// Returns whether `consumer` is the failing consumer object.
    pub fn consumer_is<C: Any + Send + Sync>(&self, consumer: &Arc<C>) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.consumer) as *const (),
            Arc::as_ptr(consumer) as *const (),
        )
    }

    /// Returns the type name of the failing consumer.
    pub fn consumer_type_name(&self) -> &'static str {
        self.consumer_type
    }

    /// Returns what went wrong.
    pub fn cause(&self) -> &ConsumerError {
        &self.cause
    }
}

impl<K: ChannelKind> Message for ConsumerFailure<K> {}

impl<K: ChannelKind> fmt::Debug for ConsumerFailure<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerFailure")
            .field("channel", &K::LABEL)
            .field("message", &self.message)
            .field("consumer", &self.consumer_type)
            .field("cause", &self.cause)
            .finish()
    }
}

/// Posted on channel `K` when a message on `K` reaches no consumer.
///
/// A `NoConsumer` that itself reaches no consumer is not wrapped again.
pub struct NoConsumer<K: ChannelKind> {
    message: Arc<dyn AnyMessage>,
    bus: EventBus,
    _channel: PhantomData<fn(K)>,
}

/// An event nobody subscribed to.
pub type NoSubscriberEvent = NoConsumer<Events>;

/// An exceptional event nobody handles.
pub type NoHandlerEvent = NoConsumer<Exceptional>;

impl<K: ChannelKind> NoConsumer<K> {
    pub(crate) fn new(message: Arc<dyn AnyMessage>, bus: EventBus) -> Self {
        Self {
            message,
            bus,
            _channel: PhantomData,
        }
    }

    /// Returns the undelivered message.
    pub fn message(&self) -> &dyn AnyMessage {
        &*self.message
    }

    /// Returns the bus the message was posted on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

impl<K: ChannelKind> Message for NoConsumer<K> {}

impl<K: ChannelKind> fmt::Debug for NoConsumer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoConsumer")
            .field("channel", &K::LABEL)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
