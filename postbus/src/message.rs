//! Core message traits and the type-erased envelope the bus routes.
//!
//! Any `Send + Sync + 'static` value can travel through the bus once it
//! implements [`Message`]. The bus never clones messages: a posted value is
//! moved into an [`Envelope`] and shared by reference with every consumer.

use crate::hierarchy::{lineage_of, Lineage, TypeLineage};
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Marker trait for values that can be posted on a bus.
///
/// The runtime type of a message is its routing key. Rust has no class
/// inheritance, so a message that should also reach consumers of a parent
/// type or of an interface declares that relationship in [`Message::lineage`].
///
/// Most messages should use `#[derive(Message)]`.
///
/// # Examples
///
/// ```rust
/// use postbus::Message;
///
/// #[derive(Message, Debug)]
/// struct UserLoggedIn {
///     user_id: u64,
/// }
/// ```
///
/// # Declaring a hierarchy
///
/// ```rust
/// use postbus::{message_interface, Lineage, Message};
///
/// trait Audited: 'static {
///     fn actor(&self) -> &str;
/// }
/// message_interface!(Audited);
///
/// struct Deleted {
///     actor: String,
/// }
///
/// impl Audited for Deleted {
///     fn actor(&self) -> &str {
///         &self.actor
///     }
/// }
///
/// impl Message for Deleted {
///     fn lineage(lineage: &mut Lineage<Self>) {
///         lineage.implements::<dyn Audited>(|deleted| deleted as &dyn Audited);
///     }
/// }
/// ```
pub trait Message: Any + Send + Sync {
    /// Declares the ancestors and interfaces of this message type.
    ///
    /// The default declares none, so the message only reaches consumers of
    /// its exact type and of the catch-all [`AnyMessage`].
    fn lineage(_lineage: &mut Lineage<Self>)
    where
        Self: Sized,
    {
    }

    /// Returns the name of the message type.
    ///
    /// Used for logging and error messages. The default implementation uses
    /// the full type name including module path.
    fn message_type_name() -> &'static str
    where
        Self: Sized,
    {
        type_name::<Self>()
    }
}

macro_rules! impl_message {
    ($($ty:ty),* $(,)?) => {
        $(impl Message for $ty {})*
    };
}

impl_message!(
    String,
    &'static str,
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
);

/// Object-safe view of any [`Message`].
///
/// `dyn AnyMessage` is also the catch-all message type: a consumer method
/// declared for `&dyn AnyMessage` receives every message posted on a bus
/// with inheritance enabled.
pub trait AnyMessage: Send + Sync + 'static {
    /// Returns the message as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// Converts a shared message into a shared `Any`.
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Returns the name of the concrete message type.
    fn type_name(&self) -> &'static str;
}

impl<M: Message> AnyMessage for M {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        M::message_type_name()
    }
}

impl dyn AnyMessage {
    /// Returns whether the concrete message type is `M`.
    pub fn is<M: Message>(&self) -> bool {
        self.as_any().is::<M>()
    }

    /// Returns the message as `&M` if that is its concrete type.
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}

impl fmt::Debug for dyn AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyMessage")
            .field("type", &self.type_name())
            .finish_non_exhaustive()
    }
}

/// Runtime identity of a routable type: a message type, an interface, or
/// the catch-all.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    /// Returns the identity of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Returns the identity of the catch-all type, `dyn AnyMessage`.
    pub fn catch_all() -> Self {
        Self::of::<dyn AnyMessage>()
    }

    /// Returns the `TypeId` this identity is keyed by.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Returns the type name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageType").field(&self.name).finish()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A type a consumer method can be declared for.
///
/// Implemented for every [`Message`], for `dyn AnyMessage`, and for interface
/// traits registered with [`message_interface!`](crate::message_interface).
pub trait Routable: 'static {
    /// Returns the routing key of this type.
    fn message_type() -> MessageType;

    /// Views the envelope's message as this type, if its lineage allows it.
    fn view(envelope: &Envelope) -> Option<&Self>;
}

impl<M: Message> Routable for M {
    fn message_type() -> MessageType {
        MessageType::of::<M>()
    }

    fn view(envelope: &Envelope) -> Option<&Self> {
        envelope.view_as::<M>()
    }
}

impl Routable for dyn AnyMessage {
    fn message_type() -> MessageType {
        MessageType::catch_all()
    }

    fn view(envelope: &Envelope) -> Option<&Self> {
        Some(envelope.message())
    }
}

/// Makes interface traits usable as consumer method parameters.
///
/// Each trait must be bounded by `'static` so that `dyn Trait` can be
/// identified at runtime.
///
/// # Examples
///
/// ```rust
/// use postbus::message_interface;
///
/// pub trait Shape: 'static {
///     fn area(&self) -> f64;
/// }
///
/// message_interface!(Shape);
/// ```
#[macro_export]
macro_rules! message_interface {
    ($($interface:path),+ $(,)?) => {
        $(
            impl $crate::Routable for dyn $interface {
                fn message_type() -> $crate::MessageType {
                    $crate::MessageType::of::<dyn $interface>()
                }

                fn view(envelope: &$crate::Envelope) -> ::core::option::Option<&Self> {
                    envelope.interface_view::<dyn $interface>()
                }
            }
        )+
    };
}

/// A posted message together with its cached type lineage.
///
/// Envelopes are cheap to clone; every clone shares the same message.
#[derive(Clone)]
pub struct Envelope {
    message: Arc<dyn AnyMessage>,
    lineage: Arc<TypeLineage>,
}

impl Envelope {
    /// Wraps a message.
    pub fn new<M: Message>(message: M) -> Self {
        Self::from_arc(Arc::new(message))
    }

    /// Wraps an already shared message.
    pub fn from_arc<M: Message>(message: Arc<M>) -> Self {
        Self {
            message,
            lineage: lineage_of::<M>(),
        }
    }

    /// Returns the message.
    pub fn message(&self) -> &dyn AnyMessage {
        &*self.message
    }

    /// Returns the shared message.
    pub fn shared(&self) -> &Arc<dyn AnyMessage> {
        &self.message
    }

    /// Returns the exact type of the message.
    pub fn message_type(&self) -> MessageType {
        self.lineage.message_type()
    }

    /// Returns the lineage of the message type.
    pub fn lineage(&self) -> &TypeLineage {
        &self.lineage
    }

    /// Returns whether the exact type of the message is `M`.
    pub fn is<M: Message>(&self) -> bool {
        self.message.is::<M>()
    }

    /// Returns the message as `&M` if that is its exact type.
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.message.downcast_ref::<M>()
    }

    /// Returns the shared message as `Arc<M>` if that is its exact type.
    pub fn downcast_arc<M: Message>(&self) -> Option<Arc<M>> {
        self.message.clone().into_any_arc().downcast::<M>().ok()
    }

    /// Views the message as `S`: the message itself or one of its declared
    /// ancestors.
    pub fn view_as<S: Message>(&self) -> Option<&S> {
        if self.lineage.message_type().id() == TypeId::of::<S>() {
            return self.downcast_ref::<S>();
        }
        self.lineage.project_class::<S>(self.message.as_any())
    }

    /// Views the message through one of its declared interfaces.
    pub fn interface_view<I: ?Sized + 'static>(&self) -> Option<&I> {
        self.lineage.project_interface::<I>(self.message.as_any())
    }

    /// Returns whether `address` points into the message's allocation.
    ///
    /// Views handed to consumers (the message itself, an embedded ancestor,
    /// or an interface object) all point into that allocation.
    pub(crate) fn contains(&self, address: usize) -> bool {
        let base = Arc::as_ptr(&self.message) as *const () as usize;
        let size = std::mem::size_of_val(&*self.message);
        if size == 0 {
            address == base
        } else {
            address >= base && address < base + size
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("type", &self.message_type())
            .finish_non_exhaustive()
    }
}
