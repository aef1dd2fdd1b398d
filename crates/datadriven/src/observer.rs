//! # Observer
//!
//! An [`Observer`] keeps a cache of every remote object implementing one
//! interface and tells one optional [`ObserverListener`] about changes.
//!
//! ## Event handling
//!
//! | event                  | cache                          | listener     |
//! |------------------------|--------------------------------|--------------|
//! | appeared, unseen id    | new proxy                      | `on_update`  |
//! | appeared, known id     | merge properties               | `on_update`  |
//! | changed, known id      | merge, mark invalidated stale  | `on_update`  |
//! | disappeared, known id  | unlink, clear alive flag       | `on_remove`  |
//! | changed / disappeared, unknown id | none                | none         |
//!
//! One event gives at most one callback, however many properties it carries.
//! Events of one object are handled in bus order on that object's dispatch
//! lane; listener callbacks run after the cache lock is released, so a
//! listener may iterate the observer.
//!
//! ## Failure
//!
//! An observer that cannot register its interface or open its discovery
//! stream is permanently failed. It reports that through
//! [`status`](Observer::status) and otherwise behaves as an empty view.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use ddbus::DiscoveryEvent;
use ddbus::DiscoveryKind;
use ddbus::MemberKey;
use ddbus::MemberKind;
use ddbus::ObjectId;
use ddbus::PropertySet;
use ddbus::SignalEvent;

use crate::error::Error;
use crate::error::Result;
use crate::iter::ObserverIter;
use crate::manager::ObserverCore;
use crate::manager::ObserverManager;
use crate::manager::ObserverToken;
use crate::proxy::ProxyInterface;
use crate::proxy::ProxyObject;
use crate::registry::ProxyRegistry;
use crate::signal::SignalListener;
use crate::signal::SignalType;
use crate::signal::Subscription;
use crate::signal::listener_addr;

/// Callbacks for cache changes. Both default to doing nothing.
pub trait ObserverListener<T>: Send + Sync + 'static {
    /// An object appeared or its properties changed.
    fn on_update(&self, _proxy: &Arc<T>) {}

    /// An object left the bus. The handle stays usable but is no longer alive.
    fn on_remove(&self, _proxy: &Arc<T>) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObserverStatus {
    Ok,
    Failed(Error),
}

type SignalMap<T> = HashMap<MemberKey, Vec<Arc<Subscription<T>>>>;

pub struct Observer<T: ProxyInterface> {
    manager: Arc<ObserverManager>,
    interface: Arc<str>,
    status: ObserverStatus,
    registry: ProxyRegistry<T>,
    listener: Option<Arc<dyn ObserverListener<T>>>,
    signals: Mutex<SignalMap<T>>,
    token: Option<ObserverToken>,
    pump: Mutex<Option<AbortHandle>>,
}

impl<T: ProxyInterface> Observer<T> {
    /// Registers the interface, starts discovery and returns the observer.
    ///
    /// Objects already on the bus are reported through the listener like
    /// any other appearance.
    pub fn create(manager: &Arc<ObserverManager>, listener: Option<Arc<dyn ObserverListener<T>>>) -> Arc<Self> {
        let desc = T::type_description();
        let interface = desc.shared_name();

        let attached = manager
            .bus()
            .register_interface(desc)
            .and_then(|()| manager.bus().discover(&interface));
        let (status, stream) = match attached {
            Ok(stream) => (ObserverStatus::Ok, Some(stream)),
            Err(e) => {
                warn!(interface = %interface, error = %e, "observer failed to attach to the bus");
                (ObserverStatus::Failed(Error::ObserverFailed(Box::new(e.into()))), None)
            }
        };

        let observer = Arc::new_cyclic(|this: &Weak<Self>| {
            let token = stream
                .is_some()
                .then(|| manager.register_observer(interface.clone(), this.clone()));
            Self {
                manager: manager.clone(),
                interface: interface.clone(),
                status,
                registry: ProxyRegistry::new(),
                listener,
                signals: Mutex::new(HashMap::new()),
                token,
                pump: Mutex::new(None),
            }
        });

        if let Some(stream) = stream {
            let weak: Weak<dyn ObserverCore> = Arc::downgrade(&observer) as Weak<dyn ObserverCore>;
            let pump = manager.start_discovery(interface.clone(), stream, weak);
            *observer.pump.lock() = Some(pump);
            debug!(interface = %interface, "observer created");
        }

        observer
    }

    pub fn status(&self) -> ObserverStatus {
        self.status.clone()
    }

    pub fn interface_name(&self) -> &str {
        &self.interface
    }

    pub fn get(&self, id: &ObjectId) -> Option<Arc<T>> {
        self.registry.resolve(id)
    }

    pub fn size(&self) -> usize {
        self.registry.len()
    }

    /// Iterates over a snapshot of the cache taken now.
    pub fn iter(&self) -> ObserverIter<T> {
        ObserverIter::new(self.registry.snapshot())
    }

    pub fn begin(&self) -> ObserverIter<T> {
        self.iter()
    }

    pub fn end(&self) -> ObserverIter<T> {
        ObserverIter::end()
    }

    /// Registers `listener` for signal `S` from any object in the cache.
    ///
    /// The same listener may be registered for several signals.
    pub fn add_signal_listener<S, L>(&self, listener: Arc<L>) -> Result<()>
    where
        S: SignalType,
        L: SignalListener<T, S>,
    {
        if let ObserverStatus::Failed(e) = &self.status {
            return Err(e.clone());
        }

        let key = T::type_description()
            .member_key(S::MEMBER, MemberKind::Signal)
            .ok_or_else(|| Error::UnknownMember {
                interface: self.interface.to_string(),
                member: S::MEMBER.to_string(),
            })?;

        // a key is present only while it holds a feed reference
        let mut signals = self.signals.lock();
        if !signals.contains_key(&key) {
            self.manager.acquire_signal(&self.interface, S::MEMBER)?;
        }
        signals
            .entry(key)
            .or_default()
            .push(Arc::new(Subscription::new::<S, L>(listener)));
        Ok(())
    }

    /// Unregisters `listener` from every signal it was added for.
    pub fn remove_signal_listener<L: ?Sized>(&self, listener: &Arc<L>) -> Result<()> {
        let addr = listener_addr(listener);
        let desc = T::type_description();
        let mut found = false;

        let mut signals = self.signals.lock();
        signals.retain(|key, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| !s.is_listener(addr));
            found |= subscribers.len() != before;

            if subscribers.is_empty() {
                if let Some(member) = desc.member_at(key) {
                    self.manager.release_signal(&self.interface, &member.name);
                }
                return false;
            }
            true
        });

        if found { Ok(()) } else { Err(Error::ListenerNotFound) }
    }

    async fn appeared(&self, id: ObjectId, properties: Option<PropertySet>) {
        if let Some(existing) = self.registry.resolve(&id) {
            if let Some(properties) = properties {
                existing.proxy().merge(properties, Vec::new());
            }
            self.notify_update(&existing);
            return;
        }

        let properties = match properties {
            Some(properties) => properties,
            None if self.manager.config().fetch_missing_properties => {
                match self.manager.bus().fetch_properties(&id, &self.interface).await {
                    Ok(properties) => properties,
                    Err(e) => {
                        warn!(id = %id, interface = %self.interface, error = %e, "cannot fetch properties, object ignored");
                        return;
                    }
                }
            }
            None => PropertySet::new(),
        };

        let proxy = ProxyObject::new(self.manager.clone(), id.clone(), T::type_description(), properties);
        match self.registry.get_or_create(&id, || T::from_proxy(proxy)) {
            Ok((entry, created)) => {
                trace!(id = %id, created, "object appeared");
                self.notify_update(&entry);
            }
            Err(e) => warn!(id = %id, interface = %self.interface, error = %e, "cannot build proxy, object ignored"),
        }
    }

    fn changed(&self, id: ObjectId, changed: PropertySet, invalidated: Vec<String>) {
        let Some(entry) = self.registry.resolve(&id) else {
            debug!(id = %id, "change for unknown object dropped");
            return;
        };
        entry.proxy().merge(changed, invalidated);
        self.notify_update(&entry);
    }

    fn disappeared(&self, id: ObjectId) {
        let Some(entry) = self.registry.remove(&id) else {
            debug!(id = %id, "removal of unknown object dropped");
            return;
        };
        entry.proxy().mark_dead();
        trace!(id = %id, "object disappeared");
        if let Some(listener) = &self.listener {
            listener.on_remove(&entry);
        }
    }

    fn notify_update(&self, entry: &Arc<T>) {
        if let Some(listener) = &self.listener {
            listener.on_update(entry);
        }
    }
}

#[async_trait::async_trait]
impl<T: ProxyInterface> ObserverCore for Observer<T> {
    async fn handle_discovery(&self, event: DiscoveryEvent) {
        let DiscoveryEvent { id, kind } = event;
        match kind {
            DiscoveryKind::Appeared { properties } => self.appeared(id, properties).await,
            DiscoveryKind::Changed { changed, invalidated } => self.changed(id, changed, invalidated),
            DiscoveryKind::Disappeared => self.disappeared(id),
        }
    }

    fn handle_signal(&self, event: &SignalEvent) {
        let Some(key) = T::type_description().member_key(&event.member, MemberKind::Signal) else {
            debug!(member = %event.member, "signal for unknown member dropped");
            return;
        };
        let Some(emitter) = self.registry.resolve(&event.id) else {
            debug!(id = %event.id, member = %event.member, "signal from unknown object dropped");
            return;
        };

        let subscribers = match self.signals.lock().get(&key) {
            Some(subscribers) => subscribers.clone(),
            None => return,
        };
        for subscriber in subscribers {
            subscriber.deliver(&emitter, &event.id, &event.args);
        }
    }
}

impl<T: ProxyInterface> Drop for Observer<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
        if let Some(token) = self.token {
            self.manager.unregister_observer(&self.interface, token);
        }

        let desc = T::type_description();
        for key in self.signals.get_mut().keys() {
            if let Some(member) = desc.member_at(key) {
                self.manager.release_signal(&self.interface, &member.name);
            }
        }
        debug!(interface = %self.interface, "observer dropped");
    }
}

impl<T: ProxyInterface> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("interface", &self.interface)
            .field("status", &self.status)
            .field("size", &self.size())
            .finish()
    }
}
