//! Declared type hierarchies for message routing.
//!
//! A message type can declare class ancestors (values embedded in it,
//! reached through a projection) and interfaces (trait objects it can be
//! viewed as). The resulting [`TypeLineage`] is computed once per type and
//! cached for the lifetime of the process.

use crate::message::{Message, MessageType};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

/// One step from a value to an embedded ancestor value.
type Hop = Arc<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync>;

fn hop<F>(step: F) -> Hop
where
    F: for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync + 'static,
{
    Arc::new(step)
}

/// Views a value as the interface object `I`.
struct Caster<I: ?Sized + 'static>(
    Arc<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a I> + Send + Sync>,
);

impl<I: ?Sized + 'static> Caster<I> {
    fn new<F>(cast: F) -> Self
    where
        F: for<'a> Fn(&'a dyn Any) -> Option<&'a I> + Send + Sync + 'static,
    {
        Self(Arc::new(cast))
    }
}

/// An ancestor type together with the path that reaches it from the root.
#[derive(Clone)]
struct Ancestor {
    ty: MessageType,
    hops: Vec<Hop>,
    /// A `Caster<I>` for interface ancestors.
    cast: Option<Arc<dyn Any + Send + Sync>>,
}

impl Ancestor {
    fn behind(&self, first: &Hop) -> Self {
        let mut hops = Vec::with_capacity(self.hops.len() + 1);
        hops.push(first.clone());
        hops.extend(self.hops.iter().cloned());
        Self {
            ty: self.ty,
            hops,
            cast: self.cast.clone(),
        }
    }

    fn walk<'a>(&self, root: &'a dyn Any) -> Option<&'a dyn Any> {
        self.hops.iter().try_fold(root, |value, hop| hop(value))
    }
}

/// The resolved hierarchy of one message type.
pub struct TypeLineage {
    ty: MessageType,
    supertypes: Vec<Ancestor>,
    interfaces: Vec<Ancestor>,
}

impl TypeLineage {
    /// Returns the exact type.
    pub fn message_type(&self) -> MessageType {
        self.ty
    }

    /// Returns the class ancestors, nearest first.
    pub fn supertypes(&self) -> impl Iterator<Item = MessageType> + '_ {
        self.supertypes.iter().map(|ancestor| ancestor.ty)
    }

    /// Returns the interfaces, the type's own first.
    pub fn interfaces(&self) -> impl Iterator<Item = MessageType> + '_ {
        self.interfaces.iter().map(|ancestor| ancestor.ty)
    }

    /// Returns the types whose consumers receive a message of this type, in
    /// delivery order: the exact type, then class ancestors, interfaces and
    /// the catch-all. Only the exact type applies without inheritance.
    pub fn route_types(&self, inheritance: bool) -> impl Iterator<Item = MessageType> + '_ {
        let extended = self
            .supertypes()
            .chain(self.interfaces())
            .chain(std::iter::once(MessageType::catch_all()))
            .take(if inheritance { usize::MAX } else { 0 });
        std::iter::once(self.ty).chain(extended)
    }

    pub(crate) fn project_class<'a, S: 'static>(&self, root: &'a dyn Any) -> Option<&'a S> {
        let target = TypeId::of::<S>();
        self.supertypes
            .iter()
            .find(|ancestor| ancestor.ty.id() == target)?
            .walk(root)?
            .downcast_ref::<S>()
    }

    pub(crate) fn project_interface<'a, I: ?Sized + 'static>(
        &self,
        root: &'a dyn Any,
    ) -> Option<&'a I> {
        let target = TypeId::of::<I>();
        let ancestor = self
            .interfaces
            .iter()
            .find(|ancestor| ancestor.ty.id() == target)?;
        let caster = ancestor.cast.as_ref()?.downcast_ref::<Caster<I>>()?;
        (caster.0)(ancestor.walk(root)?)
    }
}

impl fmt::Debug for TypeLineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeLineage")
            .field("type", &self.ty)
            .field("supertypes", &self.supertypes().collect::<Vec<_>>())
            .field("interfaces", &self.interfaces().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder passed to [`Message::lineage`].
pub struct Lineage<M> {
    supertypes: Vec<Ancestor>,
    interfaces: Vec<Ancestor>,
    inherited: Vec<Ancestor>,
    _message: PhantomData<fn(&M)>,
}

impl<M: Message> Lineage<M> {
    fn new() -> Self {
        Self {
            supertypes: Vec::new(),
            interfaces: Vec::new(),
            inherited: Vec::new(),
            _message: PhantomData,
        }
    }

    /// Declares `S` as a class ancestor, reached through `project`.
    ///
    /// The whole lineage of `S` is inherited: its ancestors follow it in
    /// route order, and its interfaces follow the interfaces of `M`.
    pub fn extends<S: Message>(&mut self, project: fn(&M) -> &S) -> &mut Self {
        let first = hop(move |value| {
            value
                .downcast_ref::<M>()
                .map(|message| project(message) as &dyn Any)
        });
        let parent = lineage_of::<S>();

        Self::push(
            &mut self.supertypes,
            Ancestor {
                ty: MessageType::of::<S>(),
                hops: vec![first.clone()],
                cast: None,
            },
        );
        for ancestor in &parent.supertypes {
            Self::push(&mut self.supertypes, ancestor.behind(&first));
        }
        for ancestor in &parent.interfaces {
            Self::push(&mut self.inherited, ancestor.behind(&first));
        }
        self
    }

    /// Declares that `M` can be viewed as the interface object `I`.
    pub fn implements<I: ?Sized + 'static>(&mut self, cast: fn(&M) -> &I) -> &mut Self {
        let caster = Caster::<I>::new(move |value| value.downcast_ref::<M>().map(cast));
        Self::push(
            &mut self.interfaces,
            Ancestor {
                ty: MessageType::of::<I>(),
                hops: Vec::new(),
                cast: Some(Arc::new(caster)),
            },
        );
        self
    }

    fn push(ancestors: &mut Vec<Ancestor>, ancestor: Ancestor) {
        if ancestor.ty != MessageType::of::<M>()
            && !ancestors.iter().any(|existing| existing.ty == ancestor.ty)
        {
            ancestors.push(ancestor);
        }
    }

    fn finish(mut self) -> TypeLineage {
        for ancestor in std::mem::take(&mut self.inherited) {
            Self::push(&mut self.interfaces, ancestor);
        }
        TypeLineage {
            ty: MessageType::of::<M>(),
            supertypes: self.supertypes,
            interfaces: self.interfaces,
        }
    }
}

static LINEAGES: OnceLock<RwLock<HashMap<TypeId, Arc<TypeLineage>>>> = OnceLock::new();

/// Returns the cached lineage of `M`, computing it on first use.
pub(crate) fn lineage_of<M: Message>() -> Arc<TypeLineage> {
    let cache = LINEAGES.get_or_init(Default::default);
    if let Some(lineage) = cache.read().get(&TypeId::of::<M>()) {
        return lineage.clone();
    }

    // Built outside the lock: declaring an ancestor resolves its lineage too.
    let mut builder = Lineage::<M>::new();
    M::lineage(&mut builder);
    let lineage = Arc::new(builder.finish());

    cache
        .write()
        .entry(TypeId::of::<M>())
        .or_insert(lineage)
        .clone()
}
