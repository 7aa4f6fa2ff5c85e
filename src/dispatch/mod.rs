//! Routing of decoded packets to registered methods.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{OscError, Result};
use crate::osc::codec::{self, BUNDLE_TAG};
use crate::osc::pattern::Pattern;
use crate::osc::timetag::TimeTag;
use crate::osc::types::{Arg, Bundle, Message, Packet, TypeTag};
use crate::shared::Shared;

pub mod scheduler;

use scheduler::Scheduler;

/// What a method callback returns. An `Err` is reported as a dispatch
/// failure but does not stop other bindings from running.
pub type MethodResult = std::result::Result<(), String>;

pub type Callback = Arc<dyn Fn(&Message) -> MethodResult + Send + Sync>;

pub(crate) type Registry = Shared<Vec<Arc<Binding>>>;

/// Handle returned by registration, used to remove the binding again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

/// A registered (pattern, typespec, callback) triple.
pub struct Binding {
    id: BindingId,
    // None matches every address.
    pattern: Option<Pattern>,
    // None skips arity checks and coercion.
    typespec: Option<String>,
    tags: Vec<TypeTag>,
    callback: Callback,
}

impl Binding {
    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn pattern(&self) -> Option<&Pattern> {
        self.pattern.as_ref()
    }

    pub fn typespec(&self) -> Option<&str> {
        self.typespec.as_deref()
    }

    fn matches_address(&self, address: &Pattern) -> bool {
        self.pattern
            .as_ref()
            .is_none_or(|pattern| pattern.intersects(address))
    }

    /// The arguments coerced to this binding's typespec, or `None` when the
    /// arity or an argument kind does not fit.
    fn coerce(&self, args: &[Arg]) -> Option<Vec<Arg>> {
        if self.tags.len() != args.len() {
            return None;
        }
        if !args.iter().zip(&self.tags).all(|(arg, tag)| arg.accepts(*tag)) {
            return None;
        }
        args.iter()
            .zip(&self.tags)
            .map(|(arg, tag)| arg.coerce(*tag).ok())
            .collect()
    }

    fn invoke(&self, msg: &Message) -> MethodResult {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(msg))) {
            Ok(result) => result,
            Err(payload) => Err(panic_message(payload.as_ref())),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_ref().map(Pattern::as_str))
            .field("typespec", &self.typespec)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("callback panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("callback panicked: {s}")
    } else {
        "callback panicked".to_string()
    }
}

/// Tally of one routing pass.
#[derive(Debug, Default)]
pub(crate) struct Delivery {
    pub invoked: usize,
    pub failures: Vec<String>,
}

/// Routes `packet` against `bindings`. Bundles that are not yet due are
/// handed to `defer` together with their remaining delay.
pub(crate) fn deliver(
    bindings: &[Arc<Binding>],
    packet: Packet,
    defer: &mut dyn FnMut(Duration, Bundle),
    out: &mut Delivery,
) {
    route_all(bindings, vec![packet], defer, out);
}

/// Routes every element of `bundle` now, stamping each with the bundle's source.
pub(crate) fn deliver_elements(
    bindings: &[Arc<Binding>],
    bundle: Bundle,
    defer: &mut dyn FnMut(Duration, Bundle),
    out: &mut Delivery,
) {
    let mut pending = Vec::new();
    push_elements(&mut pending, bundle);
    route_all(bindings, pending, defer, out);
}

// `pending` is a stack: the next packet to route is last.
fn push_elements(pending: &mut Vec<Packet>, bundle: Bundle) {
    let source = bundle.source();
    for mut element in bundle.into_elements().into_iter().rev() {
        element.set_source(source);
        pending.push(element);
    }
}

fn route_all(
    bindings: &[Arc<Binding>],
    mut pending: Vec<Packet>,
    defer: &mut dyn FnMut(Duration, Bundle),
    out: &mut Delivery,
) {
    while let Some(packet) = pending.pop() {
        match packet {
            Packet::Message(msg) => route_message(bindings, msg, out),
            Packet::Bundle(bundle) => {
                let delay = bundle.timetag().to_secs_f64() - TimeTag::now().to_secs_f64();
                if delay <= 0.0 {
                    push_elements(&mut pending, bundle);
                } else {
                    trace!("deferring bundle by {delay:.6}s");
                    defer(Duration::from_secs_f64(delay), bundle);
                }
            }
        }
    }
}

fn route_message(bindings: &[Arc<Binding>], mut msg: Message, out: &mut Delivery) {
    trace!("routing {msg}");
    // The incoming address may itself be a pattern.
    let address = Pattern::compile(msg.address());
    for binding in bindings {
        if !binding.matches_address(&address) {
            continue;
        }
        if binding.typespec.is_some() {
            match binding.coerce(msg.args()) {
                // Coercion sticks: later bindings see the converted values.
                Some(args) => *msg.args_mut() = args,
                None => {
                    debug!(
                        "{} ({}) does not fit typespec {:?} of binding {:?}",
                        msg.address(),
                        msg.types(),
                        binding.typespec,
                        binding.id
                    );
                    continue;
                }
            }
        }
        out.invoked += 1;
        if let Err(err) = binding.invoke(&msg) {
            warn!("method {:?} failed on {}: {err}", binding.id, msg.address());
            out.failures.push(format!("{}: {err}", msg.address()));
        }
    }
}

/// Input accepted by [`Dispatcher::dispatch`]: raw bytes or a decoded packet.
pub enum Inbound<'a> {
    Raw(&'a [u8]),
    Decoded(Packet),
}

impl<'a> From<&'a [u8]> for Inbound<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Inbound::Raw(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for Inbound<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Inbound::Raw(bytes)
    }
}

impl From<Packet> for Inbound<'_> {
    fn from(packet: Packet) -> Self {
        Inbound::Decoded(packet)
    }
}

impl From<Message> for Inbound<'_> {
    fn from(msg: Message) -> Self {
        Inbound::Decoded(msg.into())
    }
}

impl From<Bundle> for Inbound<'_> {
    fn from(bundle: Bundle) -> Self {
        Inbound::Decoded(bundle.into())
    }
}

/// Builder for a single binding. Exactly one callback must be supplied.
pub struct MethodBuilder<'a> {
    dispatcher: &'a Dispatcher,
    pattern: Option<Pattern>,
    typespec: Option<String>,
    callbacks: Vec<Callback>,
}

impl MethodBuilder<'_> {
    pub fn typespec(mut self, typespec: impl Into<String>) -> Self {
        self.typespec = Some(typespec.into());
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Message) -> MethodResult + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    pub fn register(self) -> Result<BindingId> {
        let tags = match &self.typespec {
            Some(typespec) => TypeTag::parse_typespec(typespec)?,
            None => Vec::new(),
        };
        if self.callbacks.len() > 1 {
            return Err(OscError::InvalidBinding(
                "specify exactly one callback, not several".to_string(),
            ));
        }
        let Some(callback) = self.callbacks.into_iter().next() else {
            return Err(OscError::InvalidBinding("no callback supplied".to_string()));
        };

        let id = BindingId(self.dispatcher.next_id.fetch_add(1, Ordering::SeqCst));
        let binding = Arc::new(Binding {
            id,
            pattern: self.pattern,
            typespec: self.typespec,
            tags,
            callback,
        });
        debug!("registering {binding:?}");
        self.dispatcher.registry.with_mut(|bindings| bindings.push(binding));
        Ok(id)
    }
}

/// Registry of methods plus the routing and bundle scheduling on top of it.
///
/// Cloning yields another handle onto the same registry and scheduler.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
    next_id: Arc<AtomicU64>,
    scheduler: Scheduler,
}

impl Dispatcher {
    pub fn new() -> Self {
        let registry: Registry = Shared::new(Vec::new());
        let scheduler = Scheduler::start(registry.clone());
        Dispatcher {
            registry,
            next_id: Arc::new(AtomicU64::new(0)),
            scheduler,
        }
    }

    /// Starts a binding for `pattern`. Addresses are matched as OSC patterns.
    pub fn method(&self, pattern: &str) -> MethodBuilder<'_> {
        MethodBuilder {
            dispatcher: self,
            pattern: Some(Pattern::compile(pattern)),
            typespec: None,
            callbacks: Vec::new(),
        }
    }

    /// Starts a binding that sees every message.
    pub fn any_method(&self) -> MethodBuilder<'_> {
        MethodBuilder {
            dispatcher: self,
            pattern: None,
            typespec: None,
            callbacks: Vec::new(),
        }
    }

    /// Registers `callback` for messages matching `pattern` (all messages when
    /// `None`) whose arguments fit `typespec` (anything when `None`).
    pub fn add_method<F>(
        &self,
        pattern: Option<&str>,
        typespec: Option<&str>,
        callback: F,
    ) -> Result<BindingId>
    where
        F: Fn(&Message) -> MethodResult + Send + Sync + 'static,
    {
        let builder = match pattern {
            Some(pattern) => self.method(pattern),
            None => self.any_method(),
        };
        let builder = match typespec {
            Some(typespec) => builder.typespec(typespec),
            None => builder,
        };
        builder.with_callback(callback).register()
    }

    /// Removes a binding. Returns false if it was not registered.
    pub fn remove_method(&self, id: BindingId) -> bool {
        self.registry.with_mut(|bindings| {
            let before = bindings.len();
            bindings.retain(|binding| binding.id != id);
            bindings.len() != before
        })
    }

    pub fn len(&self) -> usize {
        self.registry.with(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current bindings in registration order.
    pub fn bindings(&self) -> Arc<Vec<Arc<Binding>>> {
        self.registry.snapshot()
    }

    /// Bundles waiting for their time tag.
    pub fn pending_bundles(&self) -> usize {
        self.scheduler.pending()
    }

    /// Decodes `input` if needed and routes it.
    ///
    /// Already decoded packets are checked like received ones: an address
    /// without a leading `/` or bundles nested too deeply are
    /// [`OscError::MalformedPacket`].
    ///
    /// Every matching binding runs, in registration order. Bundles that are
    /// due run before this returns; later ones are scheduled. Returns how many
    /// callbacks ran now, or [`OscError::DispatchPanic`] listing the callbacks
    /// that failed.
    pub fn dispatch<'a>(&self, input: impl Into<Inbound<'a>>) -> Result<usize> {
        let packet = match input.into() {
            Inbound::Raw(bytes) => codec::decode(bytes)?,
            Inbound::Decoded(packet) => {
                codec::validate(&packet)?;
                packet
            }
        };
        let address = match &packet {
            Packet::Message(msg) => msg.address().to_string(),
            Packet::Bundle(_) => BUNDLE_TAG.to_string(),
        };

        let bindings = self.registry.snapshot();
        let mut delivery = Delivery::default();
        deliver(
            &bindings,
            packet,
            &mut |delay, bundle| self.scheduler.schedule(delay, bundle),
            &mut delivery,
        );

        if delivery.failures.is_empty() {
            Ok(delivery.invoked)
        } else {
            Err(OscError::DispatchPanic {
                address,
                failures: delivery.failures,
            })
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new()
    }
}
