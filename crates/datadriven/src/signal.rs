//! Typed signals and their listeners.

use std::sync::Arc;

use tracing::warn;

use ddbus::ObjectId;
use ddbus::UnmarshalError;
use ddbus::Value;

/// A signal payload decoded from its bus arguments.
pub trait SignalType: Sized + Send + Sync + 'static {
    /// Member name of the signal within its interface.
    const MEMBER: &'static str;

    fn decode(args: &[Value]) -> Result<Self, UnmarshalError>;
}

/// Receives decoded signals from objects of one observer.
///
/// Runs on the dispatch lane of the emitting object.
pub trait SignalListener<T, S>: Send + Sync + 'static {
    fn on_signal(&self, emitter: &Arc<T>, signal: &S);
}

impl<T, S, F> SignalListener<T, S> for F
where
    F: Fn(&Arc<T>, &S) + Send + Sync + 'static,
{
    fn on_signal(&self, emitter: &Arc<T>, signal: &S) {
        (self)(emitter, signal)
    }
}

/// Type-erased registration of one listener for one signal member.
pub(crate) struct Subscription<T> {
    listener_addr: usize,
    deliver: Box<dyn Fn(&Arc<T>, &ObjectId, &[Value]) + Send + Sync>,
}

impl<T: Send + Sync + 'static> Subscription<T> {
    pub(crate) fn new<S, L>(listener: Arc<L>) -> Self
    where
        S: SignalType,
        L: SignalListener<T, S>,
    {
        let listener_addr = listener_addr(&listener);
        let deliver = move |emitter: &Arc<T>, id: &ObjectId, args: &[Value]| match S::decode(args) {
            Ok(signal) => listener.on_signal(emitter, &signal),
            Err(e) => warn!(id = %id, member = S::MEMBER, error = %e, "dropping undecodable signal"),
        };
        Self {
            listener_addr,
            deliver: Box::new(deliver),
        }
    }

    pub(crate) fn is_listener(&self, addr: usize) -> bool {
        self.listener_addr == addr
    }

    pub(crate) fn deliver(&self, emitter: &Arc<T>, id: &ObjectId, args: &[Value]) {
        (self.deliver)(emitter, id, args)
    }
}

/// Identity of a listener: the address of its allocation.
pub(crate) fn listener_addr<L: ?Sized>(listener: &Arc<L>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}
