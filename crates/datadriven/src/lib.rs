//! Observer-style access to remote bus objects.
//!
//! An [`ObserverManager`] wraps a [`Bus`](ddbus::Bus). [`Observer`]s created
//! on it keep a cache of typed proxies for one interface each, and
//! [`ProxyObject`] call stubs return [`MethodInvocation`] futures.

mod config;
mod dispatch;
mod error;
mod invocation;
mod iter;
mod manager;
mod observer;
mod proxy;
mod registry;
mod signal;

#[cfg(test)]
mod tests;

pub use ddbus;

pub use crate::config::DEFAULT_CALL_TIMEOUT;
pub use crate::config::DEFAULT_DISPATCH_LANES;
pub use crate::config::ManagerConfig;

pub use crate::error::Error;
pub use crate::error::Result;

pub use crate::invocation::FromReply;
pub use crate::invocation::InvocationState;
pub use crate::invocation::MethodInvocation;
pub use crate::invocation::MethodReply;
pub use crate::invocation::MethodReplyListener;
pub use crate::invocation::ReplyStatus;

pub use crate::iter::ObserverIter;

pub use crate::manager::ObserverManager;

pub use crate::observer::Observer;
pub use crate::observer::ObserverListener;
pub use crate::observer::ObserverStatus;

pub use crate::proxy::ProxyInterface;
pub use crate::proxy::ProxyObject;

pub use crate::registry::ProxyRegistry;

pub use crate::signal::SignalListener;
pub use crate::signal::SignalType;
