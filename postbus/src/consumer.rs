//! Consumer traits and method descriptors.
//!
//! A consumer is any `Send + Sync + 'static` value exposing methods that
//! receive messages. On the event channel consumers are [`Subscriber`]s, on
//! the exceptional channel they are [`Handler`]s. Both describe their methods
//! through a [`MethodScan`], either by hand or with `#[consumer]`.

use crate::channel::{ChannelKind, Events, Exceptional};
use crate::error::{ConsumerError, EventBusError, EventBusResult};
use crate::message::{Envelope, MessageType, Routable};
use crate::priority::Priority;
use crate::thread_mode::ThreadMode;
use std::any::{type_name, Any, TypeId};
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A consumer of events.
///
/// # Examples
///
/// ```rust
/// use postbus::{MethodScan, Events, Subscriber, ThreadMode};
///
/// struct Greeter;
///
/// impl Greeter {
///     fn on_name(&self, name: &String) {
///         println!("hello {name}");
///     }
/// }
///
/// impl Subscriber for Greeter {
///     fn subscriptions(scan: &mut MethodScan<Self, Events>) {
///         scan.on("on_name", Self::on_name)
///             .thread_mode(ThreadMode::Posting)
///             .priority(5);
///     }
/// }
/// ```
pub trait Subscriber: Send + Sync + 'static {
    /// Declares the subscriber methods of this type.
    ///
    /// The default declares none, for types whose methods come from a
    /// [`ConsumerIndex`](crate::ConsumerIndex).
    fn subscriptions(_scan: &mut MethodScan<Self, Events>)
    where
        Self: Sized,
    {
    }
}

/// A consumer of exceptional events.
pub trait Handler: Send + Sync + 'static {
    /// Declares the handler methods of this type.
    fn handlers(_scan: &mut MethodScan<Self, Exceptional>)
    where
        Self: Sized,
    {
    }
}

/// A consumer on the channel `K`.
///
/// Implemented for every [`Subscriber`] (on [`Events`]) and every
/// [`Handler`] (on [`Exceptional`]).
pub trait Consumer<K: ChannelKind>: Send + Sync + 'static {
    /// Declares the consumer methods of this type on `K`.
    fn describe(scan: &mut MethodScan<Self, K>)
    where
        Self: Sized;
}

impl<C: Subscriber> Consumer<Events> for C {
    fn describe(scan: &mut MethodScan<Self, Events>) {
        C::subscriptions(scan)
    }
}

impl<C: Handler> Consumer<Exceptional> for C {
    fn describe(scan: &mut MethodScan<Self, Exceptional>) {
        C::handlers(scan)
    }
}

/// Return types accepted from consumer methods.
///
/// Implemented for `()` and for `Result<(), E>` where `E` converts into a
/// boxed error; an `Err` is reported as a consumer failure.
pub trait IntoOutcome {
    /// Converts the return value into the delivery outcome.
    fn into_outcome(self) -> Result<(), ConsumerError>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<(), ConsumerError> {
        Ok(())
    }
}

impl<E> IntoOutcome for Result<(), E>
where
    E: Into<Box<dyn Error + Send + Sync>>,
{
    fn into_outcome(self) -> Result<(), ConsumerError> {
        self.map_err(|error| ConsumerError::Failed(error.into()))
    }
}

type Invoker = Arc<dyn Fn(&dyn Any, &Envelope) -> Result<(), ConsumerError> + Send + Sync>;

/// Everything the bus needs to deliver to one consumer method.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: &'static str,
    message_type: MessageType,
    thread_mode: ThreadMode,
    priority: Priority,
    sticky: bool,
    invoker: Invoker,
}

impl MethodDescriptor {
    /// Returns the method name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the declared message type.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Returns the thread mode.
    pub fn thread_mode(&self) -> ThreadMode {
        self.thread_mode
    }

    /// Returns the priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns whether the method wants sticky replays on registration.
    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    /// Calls the method, turning a panic into a [`ConsumerError`].
    pub(crate) fn invoke(&self, consumer: &dyn Any, envelope: &Envelope) -> Result<(), ConsumerError> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.invoker)(consumer, envelope)))
            .unwrap_or_else(|payload| Err(ConsumerError::from_panic(payload)))
    }

    fn key(&self) -> (&'static str, MessageType) {
        (self.name, self.message_type)
    }

    /// Rebinds a parent method onto a child consumer that embeds the parent.
    fn lift<C: 'static, P: 'static>(self, project: fn(&C) -> &P) -> Self {
        let inner = self.invoker.clone();
        let invoker: Invoker = Arc::new(move |consumer: &dyn Any, envelope: &Envelope| {
            let child = consumer.downcast_ref::<C>().ok_or_else(|| {
                ConsumerError::mismatch(type_name::<C>(), envelope.message().type_name())
            })?;
            inner(project(child) as &dyn Any, envelope)
        });
        Self { invoker, ..self }
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("message_type", &self.message_type)
            .field("thread_mode", &self.thread_mode)
            .field("priority", &self.priority)
            .field("sticky", &self.sticky)
            .finish_non_exhaustive()
    }
}

/// Collects the methods of consumer type `C` on channel `K`.
pub struct MethodScan<C, K: ChannelKind> {
    own: Vec<MethodDescriptor>,
    inherited: Vec<MethodDescriptor>,
    boundary: Arc<HashSet<TypeId>>,
    errors: Vec<EventBusError>,
    _consumer: PhantomData<fn(&C, K)>,
}

impl<C: Send + Sync + 'static, K: ChannelKind> MethodScan<C, K> {
    pub(crate) fn new(boundary: Arc<HashSet<TypeId>>) -> Self {
        Self {
            own: Vec::new(),
            inherited: Vec::new(),
            boundary,
            errors: Vec::new(),
            _consumer: PhantomData,
        }
    }

    /// Declares a consumer method for messages viewable as `T`.
    ///
    /// `name` identifies the method; a method with the same name and message
    /// type declared by an embedded parent is overridden.
    pub fn on<T, F, R>(&mut self, name: &'static str, method: F) -> MethodOptions<'_>
    where
        T: Routable + ?Sized,
        F: Fn(&C, &T) -> R + Send + Sync + 'static,
        R: IntoOutcome + 'static,
    {
        let invoker: Invoker = Arc::new(move |consumer: &dyn Any, envelope: &Envelope| {
            let mismatch =
                || ConsumerError::mismatch(type_name::<C>(), envelope.message().type_name());
            let consumer = consumer.downcast_ref::<C>().ok_or_else(mismatch)?;
            let message = T::view(envelope).ok_or_else(mismatch)?;
            method(consumer, message).into_outcome()
        });

        let index = self.own.len();
        self.own.push(MethodDescriptor {
            name,
            message_type: T::message_type(),
            thread_mode: ThreadMode::default(),
            priority: Priority::default(),
            sticky: false,
            invoker,
        });
        MethodOptions {
            descriptor: &mut self.own[index],
        }
    }

    /// Inherits the methods of the parent consumer embedded in `C`.
    ///
    /// Parents configured as scan boundaries are skipped together with their
    /// own parents.
    pub fn inherit<P: Consumer<K>>(&mut self, project: fn(&C) -> &P) -> &mut Self {
        if self.boundary.contains(&TypeId::of::<P>()) {
            return self;
        }

        let mut parent = MethodScan::<P, K>::new(self.boundary.clone());
        P::describe(&mut parent);
        match parent.finish() {
            Ok(methods) => self
                .inherited
                .extend(methods.into_iter().map(|method| method.lift(project))),
            Err(error) => self.errors.push(error),
        }
        self
    }

    /// Validates the collected methods and returns them, own methods first.
    pub(crate) fn finish(self) -> EventBusResult<Vec<MethodDescriptor>> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }

        let consumer = type_name::<C>();
        for (index, method) in self.own.iter().enumerate() {
            if method.name.is_empty() {
                return Err(EventBusError::invalid_method(
                    consumer,
                    "<unnamed>",
                    K::CONSUMER,
                    "method name must not be empty",
                ));
            }
            if self.own[..index].iter().any(|other| other.key() == method.key()) {
                return Err(EventBusError::invalid_method(
                    consumer,
                    method.name,
                    K::CONSUMER,
                    format!("declared twice for {}", method.message_type),
                ));
            }
        }

        let mut methods = self.own;
        for method in self.inherited {
            if !methods.iter().any(|other| other.key() == method.key()) {
                methods.push(method);
            }
        }
        Ok(methods)
    }
}

/// Options of a method declared with [`MethodScan::on`].
pub struct MethodOptions<'a> {
    descriptor: &'a mut MethodDescriptor,
}

impl MethodOptions<'_> {
    /// Sets the thread mode; defaults to [`ThreadMode::Posting`].
    pub fn thread_mode(self, mode: ThreadMode) -> Self {
        self.descriptor.thread_mode = mode;
        self
    }

    /// Sets the priority; defaults to [`Priority::DEFAULT`].
    pub fn priority(self, priority: impl Into<Priority>) -> Self {
        self.descriptor.priority = priority.into();
        self
    }

    /// Requests the current sticky messages on registration.
    pub fn sticky(self, sticky: bool) -> Self {
        self.descriptor.sticky = sticky;
        self
    }
}
