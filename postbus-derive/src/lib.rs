//! Derive and attribute macros for postbus.
//!
//! `#[derive(Message)]` implements `postbus::Message` and declares the
//! message's hierarchy. `#[consumer]` turns annotated methods of an inherent
//! impl block into subscriber and handler methods.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{quote, ToTokens};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{
    parse_macro_input, Attribute, Data, DeriveInput, Expr, Fields, FnArg, Ident, ImplItem,
    ItemImpl, LitBool, Member, Token, Type,
};

/// Derives `postbus::Message`.
///
/// A field marked `#[message(extends)]` embeds the parent message: the
/// derived message also reaches consumers of the field's type and of its
/// ancestors. `#[message(implements(dyn Trait, ...))]` on the type makes it
/// reach consumers of those interfaces; each trait must be registered with
/// `postbus::message_interface!`.
///
/// # Examples
///
/// ## Basic struct
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
/// ## Hierarchy
///
/// ```rust
/// use postbus::{message_interface, Message};
///
/// pub trait Audited: 'static {
///     fn actor(&self) -> &str;
/// }
/// message_interface!(Audited);
///
/// #[derive(Message)]
/// struct Changed {
///     id: u64,
/// }
///
/// #[derive(Message)]
/// #[message(implements(dyn Audited))]
/// struct Renamed {
///     #[message(extends)]
///     changed: Changed,
///     actor: String,
/// }
///
/// impl Audited for Renamed {
///     fn actor(&self) -> &str {
///         &self.actor
///     }
/// }
/// ```
#[proc_macro_derive(Message, attributes(message))]
pub fn derive_message(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_message(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Declares the subscriber and handler methods of a type.
///
/// Place it on an inherent impl block. Methods marked `#[subscribe]` become
/// subscriber methods, methods marked `#[handle]` become handler methods.
/// Both take `&self` and a reference to the message.
///
/// Method options:
///
/// - `thread_mode = Posting | Main | MainOrdered | Background | Async`
/// - `priority = <expr>`
/// - `sticky` or `sticky = <bool>`
///
/// Block options:
///
/// - `inherit(field: Type, ...)` inherits the methods of embedded consumers
/// - `subscriber` or `handler` forces the trait impl even without own methods
///
/// # Examples
///
/// ```rust
/// use postbus::{consumer, AnyMessage};
///
/// struct Audit;
///
/// #[consumer]
/// impl Audit {
///     #[subscribe(thread_mode = Background, priority = 10)]
///     fn on_any(&self, event: &dyn AnyMessage) {
///         println!("saw {}", event.type_name());
///     }
///
///     #[handle(sticky)]
///     fn on_failure(&self, error: &String) -> Result<(), String> {
///         Err(error.clone())
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn consumer(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as ConsumerArgs);
    let item = parse_macro_input!(input as ItemImpl);
    expand_consumer(args, item)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Options of `#[message(...)]` on the message type.
#[derive(Default)]
struct MessageArgs {
    implements: Vec<Type>,
}

impl MessageArgs {
    fn from_attributes(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut args = Self::default();
        for attr in attrs.iter().filter(|attr| attr.path().is_ident("message")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("implements") {
                    let content;
                    syn::parenthesized!(content in meta.input);
                    let interfaces = Punctuated::<Type, Token![,]>::parse_terminated(&content)?;
                    args.implements.extend(interfaces);
                    Ok(())
                } else {
                    Err(meta.error("expected `implements(dyn Trait, ...)`"))
                }
            })?;
        }
        Ok(args)
    }
}

fn expand_message(input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let args = MessageArgs::from_attributes(&input.attrs)?;

    let parent = match &input.data {
        Data::Struct(data) => extended_field(&data.fields)?,
        Data::Enum(_) => None,
        Data::Union(_) => {
            return Err(syn::Error::new(
                Span::call_site(),
                "Message cannot be derived for union types",
            ))
        }
    };

    let extends = parent.map(|(member, ty)| {
        quote! {
            lineage.extends::<#ty>(|message| &message.#member);
        }
    });
    let implements = args.implements.iter().map(|interface| {
        quote! {
            lineage.implements::<#interface>(|message| message as &#interface);
        }
    });

    let lineage = if extends.is_none() && args.implements.is_empty() {
        TokenStream2::new()
    } else {
        quote! {
            fn lineage(lineage: &mut ::postbus::Lineage<Self>) {
                #extends
                #(#implements)*
            }
        }
    };

    Ok(quote! {
        impl #impl_generics ::postbus::Message for #name #ty_generics #where_clause {
            #lineage
        }
    })
}

/// Finds the single field marked `#[message(extends)]`.
fn extended_field(fields: &Fields) -> syn::Result<Option<(Member, Type)>> {
    let mut found: Option<(Member, Type)> = None;
    for (index, field) in fields.iter().enumerate() {
        let mut extends = false;
        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("message")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("extends") {
                    extends = true;
                    Ok(())
                } else {
                    Err(meta.error("expected `extends`"))
                }
            })?;
        }
        if !extends {
            continue;
        }
        if found.is_some() {
            return Err(syn::Error::new(
                field.span(),
                "a message can extend only one parent",
            ));
        }
        let member = match &field.ident {
            Some(ident) => Member::Named(ident.clone()),
            None => Member::Unnamed(index.into()),
        };
        found = Some((member, field.ty.clone()));
    }
    Ok(found)
}

/// Options of `#[consumer(...)]`.
#[derive(Default)]
struct ConsumerArgs {
    inherit: Vec<(Ident, Type)>,
    subscriber: bool,
    handler: bool,
}

struct InheritedField {
    field: Ident,
    ty: Type,
}

impl Parse for InheritedField {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let field = input.parse()?;
        input.parse::<Token![:]>()?;
        let ty = input.parse()?;
        Ok(Self { field, ty })
    }
}

impl Parse for ConsumerArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = Self::default();
        let parser = syn::meta::parser(|meta| {
            if meta.path.is_ident("inherit") {
                let content;
                syn::parenthesized!(content in meta.input);
                let fields = Punctuated::<InheritedField, Token![,]>::parse_terminated(&content)?;
                args.inherit
                    .extend(fields.into_iter().map(|inherited| (inherited.field, inherited.ty)));
                Ok(())
            } else if meta.path.is_ident("subscriber") {
                args.subscriber = true;
                Ok(())
            } else if meta.path.is_ident("handler") {
                args.handler = true;
                Ok(())
            } else {
                Err(meta.error("expected `inherit(...)`, `subscriber` or `handler`"))
            }
        });
        syn::parse::Parser::parse2(parser, input.parse::<TokenStream2>()?)?;
        Ok(args)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Subscribe,
    Handle,
}

impl Role {
    fn of(attr: &Attribute) -> Option<Self> {
        if attr.path().is_ident("subscribe") {
            Some(Role::Subscribe)
        } else if attr.path().is_ident("handle") {
            Some(Role::Handle)
        } else {
            None
        }
    }
}

/// One annotated method.
struct ConsumerMethod {
    name: Ident,
    role: Role,
    thread_mode: Option<Ident>,
    priority: Option<Expr>,
    sticky: Option<LitBool>,
}

impl ConsumerMethod {
    fn parse(name: Ident, role: Role, attr: &Attribute) -> syn::Result<Self> {
        let mut method = Self {
            name,
            role,
            thread_mode: None,
            priority: None,
            sticky: None,
        };
        if matches!(attr.meta, syn::Meta::Path(_)) {
            return Ok(method);
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("thread_mode") {
                method.thread_mode = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("priority") {
                method.priority = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("sticky") {
                method.sticky = Some(if meta.input.peek(Token![=]) {
                    meta.value()?.parse()?
                } else {
                    LitBool::new(true, meta.path.span())
                });
            } else {
                return Err(meta.error("expected `thread_mode`, `priority` or `sticky`"));
            }
            Ok(())
        })?;
        Ok(method)
    }

    fn registration(&self) -> TokenStream2 {
        let name = &self.name;
        let mut tokens = quote! {
            scan.on(::core::stringify!(#name), Self::#name)
        };
        if let Some(mode) = &self.thread_mode {
            tokens.extend(quote! { .thread_mode(::postbus::ThreadMode::#mode) });
        }
        if let Some(priority) = &self.priority {
            tokens.extend(quote! { .priority(#priority) });
        }
        if let Some(sticky) = &self.sticky {
            tokens.extend(quote! { .sticky(#sticky) });
        }
        quote! { #tokens; }
    }
}

/// Checks the shape `fn name(&self, message: &T) -> R`.
fn check_signature(method: &syn::ImplItemFn) -> syn::Result<()> {
    let sig = &method.sig;
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            sig.generics.span(),
            "consumer methods cannot be generic",
        ));
    }
    if sig.asyncness.is_some() {
        return Err(syn::Error::new(
            sig.asyncness.span(),
            "consumer methods cannot be async; use `thread_mode = Async`",
        ));
    }

    let mut inputs = sig.inputs.iter();
    let receiver_ok = matches!(
        inputs.next(),
        Some(FnArg::Receiver(receiver)) if receiver.reference.is_some() && receiver.mutability.is_none()
    );
    let message_ok = matches!(
        inputs.next(),
        Some(FnArg::Typed(arg)) if matches!(&*arg.ty, Type::Reference(reference) if reference.mutability.is_none())
    );
    if !receiver_ok || !message_ok || inputs.next().is_some() {
        return Err(syn::Error::new(
            sig.span(),
            "consumer methods must take `&self` and one message reference",
        ));
    }
    Ok(())
}

fn expand_consumer(args: ConsumerArgs, mut item: ItemImpl) -> syn::Result<TokenStream2> {
    if let Some((_, path, _)) = &item.trait_ {
        return Err(syn::Error::new(
            path.span(),
            "#[consumer] must be placed on an inherent impl block",
        ));
    }

    let mut methods = Vec::new();
    for impl_item in &mut item.items {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };

        let mut roles = Vec::new();
        let mut kept = Vec::with_capacity(method.attrs.len());
        for attr in method.attrs.drain(..) {
            match Role::of(&attr) {
                Some(role) => roles.push((role, attr)),
                None => kept.push(attr),
            }
        }
        method.attrs = kept;

        if roles.is_empty() {
            continue;
        }
        check_signature(method)?;
        for (role, attr) in roles {
            methods.push(ConsumerMethod::parse(method.sig.ident.clone(), role, &attr)?);
        }
    }

    let wants = |role: Role| methods.iter().any(|method| method.role == role);
    let subscriber = args.subscriber || wants(Role::Subscribe);
    let handler = args.handler || wants(Role::Handle);
    if !subscriber && !handler {
        return Err(syn::Error::new(
            item.self_ty.span(),
            "#[consumer] found no #[subscribe] or #[handle] methods",
        ));
    }

    let self_ty = &item.self_ty;
    let (impl_generics, _, where_clause) = item.generics.split_for_impl();
    let inherit: Vec<TokenStream2> = args
        .inherit
        .iter()
        .map(|(field, ty)| quote! { scan.inherit::<#ty>(|this| &this.#field); })
        .collect();
    let registrations = |role: Role| -> Vec<TokenStream2> {
        methods
            .iter()
            .filter(|method| method.role == role)
            .map(ConsumerMethod::registration)
            .collect()
    };

    let mut expanded = item.to_token_stream();
    if subscriber {
        let body = registrations(Role::Subscribe);
        expanded.extend(quote! {
            impl #impl_generics ::postbus::Subscriber for #self_ty #where_clause {
                fn subscriptions(scan: &mut ::postbus::MethodScan<Self, ::postbus::Events>) {
                    #(#body)*
                    #(#inherit)*
                }
            }
        });
    }
    if handler {
        let body = registrations(Role::Handle);
        expanded.extend(quote! {
            impl #impl_generics ::postbus::Handler for #self_ty #where_clause {
                fn handlers(scan: &mut ::postbus::MethodScan<Self, ::postbus::Exceptional>) {
                    #(#body)*
                    #(#inherit)*
                }
            }
        });
    }
    Ok(expanded)
}
