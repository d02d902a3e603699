//! Consumer method metadata: pluggable indexes and the cached finder.
//!
//! The bus learns the methods of a consumer type either from a
//! [`ConsumerIndex`] (typically a table built once at startup or by a code
//! generator) or from the type's own [`Consumer`] description. Both produce
//! the same [`MethodDescriptor`]s.

use crate::channel::ChannelKind;
use crate::consumer::{Consumer, MethodDescriptor, MethodScan};
use crate::error::{EventBusError, EventBusResult};
use parking_lot::RwLock;
use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Provides precomputed consumer methods for channel `K`.
pub trait ConsumerIndex<K: ChannelKind>: Send + Sync + 'static {
    /// Returns the methods of the consumer type `consumer`, if indexed.
    fn consumer_info(&self, consumer: TypeId) -> Option<ConsumerInfo>;
}

/// The indexed methods of one consumer type.
#[derive(Clone)]
pub struct ConsumerInfo {
    consumer: TypeId,
    consumer_name: &'static str,
    methods: Arc<[MethodDescriptor]>,
}

impl ConsumerInfo {
    /// Describes the methods of consumer type `C` on channel `K`.
    ///
    /// The methods do not need to be declared by `C` itself; any function
    /// taking `&C` and a message can be listed.
    pub fn describe<C, K>(describe: impl FnOnce(&mut MethodScan<C, K>)) -> EventBusResult<Self>
    where
        C: Send + Sync + 'static,
        K: ChannelKind,
    {
        let mut scan = MethodScan::<C, K>::new(Arc::default());
        describe(&mut scan);
        Ok(Self {
            consumer: TypeId::of::<C>(),
            consumer_name: type_name::<C>(),
            methods: scan.finish()?.into(),
        })
    }

    /// Returns the consumer type this entry describes.
    pub fn consumer_type(&self) -> TypeId {
        self.consumer
    }

    /// Returns the consumer type name.
    pub fn consumer_name(&self) -> &'static str {
        self.consumer_name
    }

    /// Returns the described methods.
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }
}

impl fmt::Debug for ConsumerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerInfo")
            .field("consumer", &self.consumer_name)
            .field("methods", &self.methods)
            .finish()
    }
}

/// In-memory [`ConsumerIndex`] built at startup.
///
/// # Examples
///
/// ```rust
/// use postbus::{EventBus, Events, StaticIndex, Subscriber};
///
/// struct Audit;
/// impl Subscriber for Audit {}
///
/// let index = StaticIndex::<Events>::new()
///     .with_consumer::<Audit>(|scan| {
///         scan.on("record", |_: &Audit, line: &String| println!("{line}"));
///     })?;
///
/// let bus = EventBus::builder().add_subscriber_index(index).build();
/// # Ok::<(), postbus::EventBusError>(())
/// ```
pub struct StaticIndex<K: ChannelKind> {
    entries: HashMap<TypeId, ConsumerInfo>,
    _channel: PhantomData<fn(K)>,
}

impl<K: ChannelKind> StaticIndex<K> {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            _channel: PhantomData,
        }
    }

    /// Adds the methods of consumer type `C`.
    pub fn with_consumer<C: Send + Sync + 'static>(
        mut self,
        describe: impl FnOnce(&mut MethodScan<C, K>),
    ) -> EventBusResult<Self> {
        self.insert(ConsumerInfo::describe(describe)?);
        Ok(self)
    }

    /// Adds a prebuilt entry, replacing any entry for the same type.
    pub fn insert(&mut self, info: ConsumerInfo) {
        self.entries.insert(info.consumer_type(), info);
    }

    /// Returns the number of indexed consumer types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: ChannelKind> Default for StaticIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ChannelKind> ConsumerIndex<K> for StaticIndex<K> {
    fn consumer_info(&self, consumer: TypeId) -> Option<ConsumerInfo> {
        self.entries.get(&consumer).cloned()
    }
}

/// Resolves and caches the methods of consumer types.
pub(crate) struct MethodFinder<K: ChannelKind> {
    indexes: Vec<Arc<dyn ConsumerIndex<K>>>,
    ignore_index: bool,
    boundary: Arc<HashSet<TypeId>>,
    cache: RwLock<HashMap<TypeId, Arc<[MethodDescriptor]>>>,
}

impl<K: ChannelKind> MethodFinder<K> {
    pub(crate) fn new(
        indexes: Vec<Arc<dyn ConsumerIndex<K>>>,
        ignore_index: bool,
        boundary: Arc<HashSet<TypeId>>,
    ) -> Self {
        Self {
            indexes,
            ignore_index,
            boundary,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the methods of `C`, from an index when one knows the type.
    pub(crate) fn find<C: Consumer<K>>(&self) -> EventBusResult<Arc<[MethodDescriptor]>> {
        let ty = TypeId::of::<C>();
        if let Some(methods) = self.cache.read().get(&ty) {
            return Ok(methods.clone());
        }

        let methods = match self.from_index::<C>()? {
            Some(methods) => methods,
            None => self.scan::<C>()?,
        };
        if methods.is_empty() {
            return Err(EventBusError::NoConsumerMethods {
                consumer: type_name::<C>(),
                role: K::CONSUMER,
            });
        }

        self.cache.write().insert(ty, methods.clone());
        Ok(methods)
    }

    fn from_index<C: 'static>(&self) -> EventBusResult<Option<Arc<[MethodDescriptor]>>> {
        if self.ignore_index {
            return Ok(None);
        }

        let ty = TypeId::of::<C>();
        for index in &self.indexes {
            if let Some(info) = index.consumer_info(ty) {
                if info.consumer_type() != ty {
                    return Err(EventBusError::invalid_method(
                        type_name::<C>(),
                        "<index>",
                        K::CONSUMER,
                        format!("index entry describes {}", info.consumer_name()),
                    ));
                }
                return Ok(Some(info.methods));
            }
        }
        Ok(None)
    }

    fn scan<C: Consumer<K>>(&self) -> EventBusResult<Arc<[MethodDescriptor]>> {
        let mut scan = MethodScan::<C, K>::new(self.boundary.clone());
        C::describe(&mut scan);
        Ok(scan.finish()?.into())
    }

    pub(crate) fn clear_cache(&self) {
        self.cache.write().clear();
    }

    #[cfg(test)]
    pub(crate) fn cached(&self) -> usize {
        self.cache.read().len()
    }
}
