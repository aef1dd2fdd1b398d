//! # Proxies
//!
//! A [`ProxyObject`] is the local stand-in for one remote object as seen by
//! one observer: identity, interface description, cached property values and
//! call stubs. Typed proxies (written by hand or generated) wrap it and
//! implement [`ProxyInterface`].
//!
//! Cached values are only ever replaced by the observer (on discovery events)
//! and by successful `get_property` / `refresh` calls. A property announced as
//! invalidated keeps its last value and is reported stale until one of those
//! re-reads it.
//!
//! Every merged discovery change bumps the cache generation. A read stores
//! its result only if the generation is still the one it started from, so a
//! slow read never overwrites a newer change. The reply still carries the
//! value that was read.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use ddbus::BusError;
use ddbus::FromValue;
use ddbus::MemberKind;
use ddbus::ObjectId;
use ddbus::PropertySet;
use ddbus::TypeDescription;
use ddbus::UnmarshalError;
use ddbus::Value;

use crate::invocation::FromReply;
use crate::invocation::MethodInvocation;
use crate::invocation::MethodReply;
use crate::invocation::ReplyStatus;
use crate::manager::ObserverManager;

/// A typed view of one remote interface.
pub trait ProxyInterface: Send + Sync + Sized + 'static {
    /// The interface this proxy type speaks.
    fn type_description() -> &'static TypeDescription;

    /// Builds the typed proxy. Failing here keeps the object out of the
    /// observer's cache.
    fn from_proxy(proxy: ProxyObject) -> Result<Self, UnmarshalError>;

    fn proxy(&self) -> &ProxyObject;
}

#[derive(Default)]
struct PropertyCache {
    values: PropertySet,
    stale: BTreeSet<String>,
    generation: u64,
}

struct ProxyInner {
    id: ObjectId,
    desc: &'static TypeDescription,
    cache: RwLock<PropertyCache>,
    alive: AtomicBool,
    manager: Arc<ObserverManager>,
}

/// Untyped proxy of one remote object. Clones share the same cache.
#[derive(Clone)]
pub struct ProxyObject {
    inner: Arc<ProxyInner>,
}

impl ProxyObject {
    pub(crate) fn new(
        manager: Arc<ObserverManager>,
        id: ObjectId,
        desc: &'static TypeDescription,
        properties: PropertySet,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                id,
                desc,
                cache: RwLock::new(PropertyCache {
                    values: properties,
                    stale: BTreeSet::new(),
                    generation: 0,
                }),
                alive: AtomicBool::new(true),
                manager,
            }),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.inner.id
    }

    pub fn interface_name(&self) -> &str {
        self.inner.desc.name()
    }

    pub fn type_description(&self) -> &'static TypeDescription {
        self.inner.desc
    }

    /// False once the object left the bus.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Reads a cached property.
    pub fn property<V: FromValue>(&self, name: &str) -> Result<V, UnmarshalError> {
        let cache = self.inner.cache.read();
        let value = cache
            .values
            .get(name)
            .ok_or_else(|| UnmarshalError::MissingProperty(name.to_string()))?;
        V::from_value(value)
    }

    pub fn property_value(&self, name: &str) -> Option<Value> {
        self.inner.cache.read().values.get(name).cloned()
    }

    /// Copy of the whole cache.
    pub fn properties(&self) -> PropertySet {
        self.inner.cache.read().values.clone()
    }

    /// True if the property was invalidated and not re-read since.
    pub fn is_stale(&self, name: &str) -> bool {
        self.inner.cache.read().stale.contains(name)
    }

    pub(crate) fn merge(&self, changed: PropertySet, invalidated: Vec<String>) {
        if changed.is_empty() && invalidated.is_empty() {
            return;
        }
        let mut cache = self.inner.cache.write();
        cache.generation += 1;
        for (name, value) in changed {
            cache.stale.remove(&name);
            cache.values.insert(name, value);
        }
        cache.stale.extend(invalidated);
    }

    pub(crate) fn mark_dead(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }

    fn generation(&self) -> u64 {
        self.inner.cache.read().generation
    }

    fn refreshed(&self, name: String, value: Value, since: u64) {
        let mut cache = self.inner.cache.write();
        if cache.generation != since {
            debug!(id = %self.inner.id, property = %name, "read overtaken by a change, cache kept");
            return;
        }
        cache.stale.remove(&name);
        cache.values.insert(name, value);
    }

    fn replace_all(&self, properties: PropertySet, since: u64) {
        let mut cache = self.inner.cache.write();
        if cache.generation != since {
            debug!(id = %self.inner.id, "refresh overtaken by a change, cache kept");
            return;
        }
        cache.values = properties;
        cache.stale.clear();
    }

    fn dispatch_failed<R: Send + Sync + 'static>(&self, reason: String) -> MethodInvocation<R> {
        debug!(id = %self.inner.id, reason = %reason, "call not dispatched");
        MethodInvocation::resolved(
            self.inner.manager.clone(),
            self.inner.id.clone(),
            MethodReply::failed(ReplyStatus::DispatchFailed, reason),
        )
    }

    fn check_alive<R: Send + Sync + 'static>(&self) -> Result<(), MethodInvocation<R>> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(self.dispatch_failed(format!("{} is no longer on the bus", self.inner.id)))
        }
    }

    /// Calls a method with the manager's default timeout.
    pub fn invoke<R: FromReply>(&self, method: &str, args: Vec<Value>) -> MethodInvocation<R> {
        self.invoke_with_timeout(method, args, self.inner.manager.config().call_timeout)
    }

    pub fn invoke_with_timeout<R: FromReply>(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> MethodInvocation<R> {
        if let Err(failed) = self.check_alive() {
            return failed;
        }
        let Some((_, member)) = self.inner.desc.member(method, MemberKind::Method) else {
            return self.dispatch_failed(format!("no method '{}' on '{}'", method, self.interface_name()));
        };

        let manager = self.inner.manager.clone();
        let bus = manager.bus().clone();
        let id = self.inner.id.clone();
        let interface = self.inner.desc.shared_name();

        if member.no_reply {
            return match bus.call_no_reply(&id, &interface, method, args) {
                Ok(()) => MethodInvocation::resolved(manager, id, MethodReply::ok(R::from_reply(Vec::new()).ok())),
                Err(e) => MethodInvocation::resolved(manager, id, MethodReply::from_error(e)),
            };
        }

        let method = method.to_string();
        let target = id.clone();
        MethodInvocation::spawn(manager, id, timeout, async move {
            let values = bus.call(&target, &interface, &method, args, timeout).await?;
            R::from_reply(values).map_err(|e| BusError::Malformed(e.to_string()))
        })
    }

    /// Reads a property from the remote object and refreshes the cache.
    pub fn get_property<R: FromReply>(&self, name: &str) -> MethodInvocation<R> {
        if let Err(failed) = self.check_alive() {
            return failed;
        }
        let Some((_, member)) = self.inner.desc.member(name, MemberKind::Property) else {
            return self.dispatch_failed(format!("no property '{}' on '{}'", name, self.interface_name()));
        };
        if !member.access.readable() {
            return self.dispatch_failed(format!("property '{}' is not readable", name));
        }

        let manager = self.inner.manager.clone();
        let timeout = manager.config().call_timeout;
        let bus = manager.bus().clone();
        let id = self.inner.id.clone();
        let interface = self.inner.desc.shared_name();
        let proxy = self.clone();
        let name = name.to_string();
        let since = self.generation();

        MethodInvocation::spawn(manager, id.clone(), timeout, async move {
            let value = bus.get_property(&id, &interface, &name, timeout).await?;
            let reply = R::from_reply(vec![value.clone()]).map_err(|e| BusError::Malformed(e.to_string()))?;
            proxy.refreshed(name, value, since);
            Ok(reply)
        })
    }

    /// Writes a property on the remote object.
    ///
    /// The cache is not touched; the new value arrives through the
    /// observer if the provider announces it.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> MethodInvocation<()> {
        if let Err(failed) = self.check_alive() {
            return failed;
        }
        let Some((_, member)) = self.inner.desc.member(name, MemberKind::Property) else {
            return self.dispatch_failed(format!("no property '{}' on '{}'", name, self.interface_name()));
        };
        if !member.access.writable() {
            return self.dispatch_failed(format!("property '{}' is not writable", name));
        }

        let manager = self.inner.manager.clone();
        let timeout = manager.config().call_timeout;
        let bus = manager.bus().clone();
        let id = self.inner.id.clone();
        let interface = self.inner.desc.shared_name();
        let name = name.to_string();
        let value = value.into();

        MethodInvocation::spawn(manager, id.clone(), timeout, async move {
            bus.set_property(&id, &interface, &name, value, timeout).await
        })
    }

    /// Re-reads every property, clearing all stale marks unless a change
    /// arrives while the read is in flight.
    pub fn refresh(&self) -> MethodInvocation<()> {
        if let Err(failed) = self.check_alive() {
            return failed;
        }

        let manager = self.inner.manager.clone();
        let timeout = manager.config().call_timeout;
        let bus = manager.bus().clone();
        let id = self.inner.id.clone();
        let interface = self.inner.desc.shared_name();
        let proxy = self.clone();
        let since = self.generation();

        MethodInvocation::spawn(manager, id.clone(), timeout, async move {
            let properties = bus.fetch_properties(&id, &interface).await?;
            proxy.replace_all(properties, since);
            Ok(())
        })
    }
}

impl fmt::Debug for ProxyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyObject")
            .field("id", &self.inner.id)
            .field("interface", &self.interface_name())
            .field("alive", &self.is_alive())
            .finish()
    }
}
