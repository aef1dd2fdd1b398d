//! # Method invocations
//!
//! A [`MethodInvocation`] is the future of one call on a remote object: a
//! method call, a property get or set, or a property refresh. It is handed out
//! immediately while the call runs on the runtime, and can be consumed three
//! ways: blocking ([`reply`](MethodInvocation::reply)), async
//! ([`reply_async`](MethodInvocation::reply_async)) or through a
//! [`MethodReplyListener`].
//!
//! ## State machine
//!
//! ```text
//! Waiting --(reply)--> Ready
//! Waiting --(cancel)--> Cancelled --(late reply)--> Cancelled
//! ```
//!
//! `Ready` and `Cancelled` are terminal. The reply is stored once and shared
//! as an `Arc`, so every consumer sees the same value.
//!
//! ## Liveness
//!
//! The shared state holds a strong reference to itself while waiting. The
//! task running the call only keeps a `Weak`; the self-reference is what keeps
//! the invocation alive until it resolves, even when the caller dropped every
//! handle. It is released exactly once, by whichever of completion or cancel
//! comes first.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Condvar;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;
use tracing::trace;

use ddbus::BusError;
use ddbus::FromValue;
use ddbus::ObjectId;
use ddbus::TIMEOUT_ERROR_NAME;
use ddbus::UnmarshalError;
use ddbus::Value;

use crate::manager::ObserverManager;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InvocationState {
    Waiting,
    Ready,
    Cancelled,
}

/// Outcome class of a call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    /// The call could not be sent at all (dead proxy, unknown member,
    /// refused by the bus).
    DispatchFailed,
    /// No reply arrived before the deadline.
    Timeout,
    /// The peer answered with an error; see `error_name`.
    ErrorReply,
    /// A reply arrived but was malformed, or the connection failed.
    TransportFailure,
    /// The caller cancelled the invocation before a reply arrived.
    Cancelled,
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::DispatchFailed => "dispatch failed",
            Self::Timeout => "timeout",
            Self::ErrorReply => "error reply",
            Self::TransportFailure => "transport failure",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// The result of one invocation. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodReply<R> {
    status: ReplyStatus,
    error_name: Option<String>,
    error_description: Option<String>,
    value: Option<R>,
}

impl<R> MethodReply<R> {
    pub(crate) fn ok(value: Option<R>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            error_name: None,
            error_description: None,
            value,
        }
    }

    pub(crate) fn failed(status: ReplyStatus, description: impl Into<String>) -> Self {
        Self {
            status,
            error_name: None,
            error_description: Some(description.into()),
            value: None,
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::failed(ReplyStatus::Cancelled, "Invocation cancelled")
    }

    /// Classifies a bus failure into the reply taxonomy.
    pub(crate) fn from_error(error: BusError) -> Self {
        match error {
            BusError::Timeout => Self::failed(ReplyStatus::Timeout, error.to_string()),
            BusError::ErrorReply { name, description } if name == TIMEOUT_ERROR_NAME => Self {
                status: ReplyStatus::Timeout,
                error_name: Some(name),
                error_description: Some(description),
                value: None,
            },
            BusError::ErrorReply { name, description } => Self {
                status: ReplyStatus::ErrorReply,
                error_name: Some(name),
                error_description: Some(description),
                value: None,
            },
            BusError::ConnectionLost(_) | BusError::Malformed(_) => {
                Self::failed(ReplyStatus::TransportFailure, error.to_string())
            }
            other => Self::failed(ReplyStatus::DispatchFailed, other.to_string()),
        }
    }

    pub fn status(&self) -> ReplyStatus {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// Error name sent by the peer. Only set for error replies.
    pub fn error_name(&self) -> Option<&str> {
        self.error_name.as_deref()
    }

    pub fn error_description(&self) -> Option<&str> {
        self.error_description.as_deref()
    }

    /// The decoded reply. `None` unless the status is `Ok`, and for
    /// fire-and-forget calls.
    pub fn value(&self) -> Option<&R> {
        self.value.as_ref()
    }
}

/// Decoding of a method's reply arguments.
pub trait FromReply: Sized + Send + Sync + 'static {
    fn from_reply(args: Vec<Value>) -> Result<Self, UnmarshalError>;
}

fn expect_args(args: &[Value], expected: usize) -> Result<(), UnmarshalError> {
    if args.len() != expected {
        return Err(UnmarshalError::ArgumentCount {
            expected,
            found: args.len(),
        });
    }
    Ok(())
}

impl FromReply for () {
    fn from_reply(args: Vec<Value>) -> Result<Self, UnmarshalError> {
        expect_args(&args, 0)
    }
}

/// All reply arguments, undecoded.
impl FromReply for Vec<Value> {
    fn from_reply(args: Vec<Value>) -> Result<Self, UnmarshalError> {
        Ok(args)
    }
}

macro_rules! single_reply {
    ($($ty:ty),*) => {
        $(
            impl FromReply for $ty {
                fn from_reply(args: Vec<Value>) -> Result<Self, UnmarshalError> {
                    expect_args(&args, 1)?;
                    <$ty as FromValue>::from_value(&args[0])
                }
            }
        )*
    };
}

single_reply!(bool, u8, i32, u32, i64, u64, f64, String, Value, BTreeMap<String, Value>);

macro_rules! tuple_reply {
    ($count:literal; $($name:ident : $idx:tt),*) => {
        impl<$($name),*> FromReply for ($($name,)*)
        where
            $($name: FromValue + Send + Sync + 'static),*
        {
            fn from_reply(args: Vec<Value>) -> Result<Self, UnmarshalError> {
                expect_args(&args, $count)?;
                Ok(($($name::from_value(&args[$idx])?,)*))
            }
        }
    };
}

tuple_reply!(2; A: 0, B: 1);
tuple_reply!(3; A: 0, B: 1, C: 2);
tuple_reply!(4; A: 0, B: 1, C: 2, D: 3);

/// Consumer of a finished invocation.
///
/// Runs on the dispatch lane of the target object, never on the thread that
/// received the reply. Do not block on other invocations from here.
pub trait MethodReplyListener<R>: Send + Sync + 'static {
    fn on_reply(&self, reply: Arc<MethodReply<R>>);
}

impl<R, F> MethodReplyListener<R> for F
where
    F: Fn(Arc<MethodReply<R>>) + Send + Sync + 'static,
{
    fn on_reply(&self, reply: Arc<MethodReply<R>>) {
        (self)(reply)
    }
}

struct Inner<R> {
    state: InvocationState,
    reply: Option<Arc<MethodReply<R>>>,
    listener: Option<Box<dyn MethodReplyListener<R>>>,
}

struct Shared<R> {
    id: ObjectId,
    manager: Arc<ObserverManager>,
    inner: Mutex<Inner<R>>,
    ready: Condvar,
    notify: Notify,
    keep_alive: Mutex<Option<Arc<Shared<R>>>>,
}

impl<R: Send + Sync + 'static> Shared<R> {
    /// Releases the self-reference. Only the first call has an effect.
    fn release(&self) {
        let this = self.keep_alive.lock().take();
        drop(this);
    }

    fn wake(&self) {
        self.ready.notify_all();
        self.notify.notify_waiters();
    }

    /// Resolves the invocation. A completion after cancel is absorbed.
    fn complete(self: &Arc<Self>, reply: MethodReply<R>) {
        let (reply, listener) = {
            let mut inner = self.inner.lock();
            if inner.state != InvocationState::Waiting {
                trace!(id = %self.id, state = ?inner.state, "late completion absorbed");
                return;
            }
            let reply = Arc::new(reply);
            inner.state = InvocationState::Ready;
            inner.reply = Some(reply.clone());
            (reply, inner.listener.take())
        };

        trace!(id = %self.id, status = %reply.status(), "invocation ready");
        self.release();
        self.wake();
        if let Some(listener) = listener {
            self.schedule(listener, reply);
        }
    }

    fn schedule(&self, listener: Box<dyn MethodReplyListener<R>>, reply: Arc<MethodReply<R>>) {
        self.manager.enqueue(&self.id, async move { listener.on_reply(reply) }.boxed());
    }
}

/// Handle to one in-flight call. Clones share the same invocation.
pub struct MethodInvocation<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for MethodInvocation<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<R: Send + Sync + 'static> MethodInvocation<R> {
    fn waiting(manager: Arc<ObserverManager>, id: ObjectId) -> Self {
        let shared = Arc::new(Shared {
            id,
            manager,
            inner: Mutex::new(Inner {
                state: InvocationState::Waiting,
                reply: None,
                listener: None,
            }),
            ready: Condvar::new(),
            notify: Notify::new(),
            keep_alive: Mutex::new(None),
        });
        *shared.keep_alive.lock() = Some(shared.clone());
        Self { shared }
    }

    /// An invocation that resolved before anything was sent.
    pub(crate) fn resolved(manager: Arc<ObserverManager>, id: ObjectId, reply: MethodReply<R>) -> Self {
        let invocation = Self::waiting(manager, id);
        invocation.shared.complete(reply);
        invocation
    }

    /// Runs `call` on the manager's runtime, bounded by `timeout`.
    pub(crate) fn spawn<F>(manager: Arc<ObserverManager>, id: ObjectId, timeout: Duration, call: F) -> Self
    where
        F: Future<Output = ddbus::Result<R>> + Send + 'static,
    {
        let invocation = Self::waiting(manager.clone(), id);
        let weak: Weak<Shared<R>> = Arc::downgrade(&invocation.shared);

        manager.handle().spawn(async move {
            let reply = match tokio::time::timeout(timeout, call).await {
                Ok(Ok(value)) => MethodReply::ok(Some(value)),
                Ok(Err(e)) => MethodReply::from_error(e),
                Err(_) => MethodReply::from_error(BusError::Timeout),
            };
            match weak.upgrade() {
                Some(shared) => shared.complete(reply),
                None => debug!("invocation dropped before completion"),
            }
        });

        invocation
    }

    pub fn state(&self) -> InvocationState {
        self.shared.inner.lock().state
    }

    /// The target object.
    pub fn object_id(&self) -> &ObjectId {
        &self.shared.id
    }

    /// Blocks the current thread until the invocation is no longer waiting.
    ///
    /// Every call returns the same `Arc`. Must not be called from a dispatch
    /// lane or a single-threaded runtime.
    pub fn reply(&self) -> Arc<MethodReply<R>> {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(reply) = &inner.reply {
                return reply.clone();
            }
            self.shared.ready.wait(&mut inner);
        }
    }

    pub fn wait_for_reply(&self) {
        self.reply();
    }

    /// Like [`reply`](Self::reply) but gives up after `timeout`.
    pub fn reply_timeout(&self, timeout: Duration) -> Option<Arc<MethodReply<R>>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(reply) = &inner.reply {
                return Some(reply.clone());
            }
            if self.shared.ready.wait_until(&mut inner, deadline).timed_out() {
                return inner.reply.clone();
            }
        }
    }

    pub async fn reply_async(&self) -> Arc<MethodReply<R>> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let reply = self.shared.inner.lock().reply.clone();
            if let Some(reply) = reply {
                return reply;
            }
            notified.await;
        }
    }

    /// Stops waiting for the reply. Local and advisory: the remote side is
    /// not told, and a reply that arrives later is discarded together with
    /// any attached listener. No effect once the invocation has resolved.
    pub fn cancel(&self) {
        let listener = {
            let mut inner = self.shared.inner.lock();
            if inner.state != InvocationState::Waiting {
                return;
            }
            inner.state = InvocationState::Cancelled;
            inner.reply = Some(Arc::new(MethodReply::cancelled()));
            inner.listener.take()
        };
        drop(listener);

        debug!(id = %self.shared.id, "invocation cancelled");
        self.shared.release();
        self.shared.wake();
    }

    /// Attaches the completion listener.
    ///
    /// If the reply is already there the listener is scheduled right away;
    /// either way it runs exactly once. A cancelled invocation drops it.
    ///
    /// While waiting there is one listener slot: the last listener set wins
    /// and a replaced one is dropped without running.
    pub fn set_listener(&self, listener: impl MethodReplyListener<R>) {
        let mut inner = self.shared.inner.lock();
        let state = inner.state;
        match state {
            InvocationState::Waiting => {
                if inner.listener.replace(Box::new(listener)).is_some() {
                    debug!(id = %self.shared.id, "pending reply listener replaced");
                }
            }
            InvocationState::Ready => {
                let reply = inner.reply.clone();
                drop(inner);
                if let Some(reply) = reply {
                    self.shared.schedule(Box::new(listener), reply);
                }
            }
            InvocationState::Cancelled => trace!(id = %self.shared.id, "listener on cancelled invocation dropped"),
        }
    }

    #[cfg(test)]
    pub(crate) fn holds_self(&self) -> bool {
        self.shared.keep_alive.lock().is_some()
    }
}

impl<R> fmt::Debug for MethodInvocation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInvocation")
            .field("id", &self.shared.id)
            .field("state", &self.shared.inner.lock().state)
            .finish()
    }
}
