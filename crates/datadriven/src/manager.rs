//! # Observer manager
//!
//! Owns everything observers share: the bus handle, the dispatch lanes, the
//! list of live observers per interface and the signal feeds.
//!
//! ## Liveness
//!
//! The manager only holds `Weak` references to observers. Every dispatch task
//! upgrades its observer when it runs and silently does nothing if the
//! observer is gone. Pumps hold a `Weak` to the manager for the same reason:
//! dropping the last `Arc<ObserverManager>` stops all event flow.
//!
//! ## Signal feeds
//!
//! A feed is one bus subscription for an (interface, member) pair plus the
//! pump task reading it. Feeds are reference counted by the observers that
//! have listeners for the member: the first acquire subscribes, the last
//! release aborts the pump, which drops the subscription.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use ddbus::Bus;
use ddbus::DiscoveryEvent;
use ddbus::EventStream;
use ddbus::ObjectId;
use ddbus::SignalEvent;

use crate::config::ManagerConfig;
use crate::dispatch::Dispatcher;
use crate::dispatch::Task;
use crate::error::Error;
use crate::error::Result;

/// What the manager needs from an observer, independent of its proxy type.
#[async_trait::async_trait]
pub(crate) trait ObserverCore: Send + Sync + 'static {
    /// Applies one discovery event to the cache and notifies the listener.
    async fn handle_discovery(&self, event: DiscoveryEvent);

    /// Delivers one signal to the listeners registered for its member.
    fn handle_signal(&self, event: &SignalEvent);
}

/// Identifies one registered observer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ObserverToken(u64);

struct Registration {
    token: ObserverToken,
    observer: Weak<dyn ObserverCore>,
}

struct SignalFeed {
    refs: usize,
    pump: AbortHandle,
}

pub struct ObserverManager {
    bus: Arc<dyn Bus>,
    config: ManagerConfig,
    handle: Handle,
    dispatcher: Dispatcher,
    observers: DashMap<Arc<str>, Vec<Registration>>,
    feeds: Mutex<HashMap<(Arc<str>, String), SignalFeed>>,
    next_token: AtomicU64,
    this: Weak<ObserverManager>,
}

impl ObserverManager {
    /// Creates a manager with default settings on the current tokio runtime.
    pub fn new(bus: Arc<dyn Bus>) -> Result<Arc<Self>> {
        Self::with_config(bus, ManagerConfig::default())
    }

    pub fn with_config(bus: Arc<dyn Bus>, config: ManagerConfig) -> Result<Arc<Self>> {
        let handle = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Ok(Self::with_handle(bus, config, handle))
    }

    /// Creates a manager that spawns its lanes and pumps on `handle`.
    pub fn with_handle(bus: Arc<dyn Bus>, config: ManagerConfig, handle: Handle) -> Arc<Self> {
        let dispatcher = Dispatcher::start(&handle, config.dispatch_lanes);
        debug!(lanes = dispatcher.lane_count(), "observer manager started");

        Arc::new_cyclic(|this| Self {
            bus,
            config,
            handle,
            dispatcher,
            observers: DashMap::new(),
            feeds: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Number of live observers for an interface.
    pub fn observer_count(&self, interface: &str) -> usize {
        self.observers
            .get(interface)
            .map_or(0, |regs| regs.iter().filter(|r| r.observer.strong_count() > 0).count())
    }

    /// Number of open signal feeds across all interfaces.
    pub fn signal_feed_count(&self) -> usize {
        self.feeds.lock().len()
    }

    pub(crate) fn register_observer(&self, interface: Arc<str>, observer: Weak<dyn ObserverCore>) -> ObserverToken {
        let token = ObserverToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        trace!(interface = %interface, token = token.0, "register observer");
        self.observers
            .entry(interface)
            .or_default()
            .push(Registration { token, observer });
        token
    }

    pub(crate) fn unregister_observer(&self, interface: &str, token: ObserverToken) {
        trace!(interface, token = token.0, "unregister observer");
        let now_empty = match self.observers.get_mut(interface) {
            Some(mut regs) => {
                regs.retain(|r| r.token != token);
                regs.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.observers.remove_if(interface, |_, regs| regs.is_empty());
        }
    }

    fn observers_of(&self, interface: &str) -> Vec<Weak<dyn ObserverCore>> {
        self.observers
            .get(interface)
            .map(|regs| {
                regs.iter()
                    .filter(|r| r.observer.strong_count() > 0)
                    .map(|r| r.observer.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Runs a task on the lane of `id`, after every task already queued there.
    pub(crate) fn enqueue(&self, id: &ObjectId, task: Task) {
        if !self.dispatcher.enqueue(id, task) {
            warn!(id = %id, "dispatch lane closed, task dropped");
        }
    }

    /// Spawns the pump moving one observer's discovery events onto the lanes.
    pub(crate) fn start_discovery(
        &self,
        interface: Arc<str>,
        mut stream: EventStream<DiscoveryEvent>,
        observer: Weak<dyn ObserverCore>,
    ) -> AbortHandle {
        let manager = self.this.clone();
        let task = self.handle.spawn(async move {
            while let Some(event) = stream.recv().await {
                let Some(manager) = manager.upgrade() else { break };
                trace!(interface = %interface, id = %event.id, "discovery event");

                let id = event.id.clone();
                let observer = observer.clone();
                manager.enqueue(
                    &id,
                    async move {
                        if let Some(observer) = observer.upgrade() {
                            observer.handle_discovery(event).await;
                        }
                    }
                    .boxed(),
                );
            }
            debug!(interface = %interface, "discovery stream ended");
        });
        task.abort_handle()
    }

    /// Takes a reference on the signal feed for one member, opening it on
    /// first use.
    pub(crate) fn acquire_signal(&self, interface: &Arc<str>, member: &str) -> Result<()> {
        let mut feeds = self.feeds.lock();
        let key = (interface.clone(), member.to_string());
        if let Some(feed) = feeds.get_mut(&key) {
            feed.refs += 1;
            return Ok(());
        }

        let stream = self.bus.subscribe_signal(interface, member)?;
        let pump = self.spawn_signal_pump(interface.clone(), stream);
        feeds.insert(key, SignalFeed { refs: 1, pump });
        debug!(interface = %interface, member, "signal feed opened");
        Ok(())
    }

    pub(crate) fn release_signal(&self, interface: &Arc<str>, member: &str) {
        let mut feeds = self.feeds.lock();
        let key = (interface.clone(), member.to_string());
        let Some(feed) = feeds.get_mut(&key) else { return };

        feed.refs -= 1;
        if feed.refs == 0 {
            if let Some(feed) = feeds.remove(&key) {
                feed.pump.abort();
            }
            debug!(interface = %interface, member, "signal feed closed");
        }
    }

    fn spawn_signal_pump(&self, interface: Arc<str>, mut stream: EventStream<SignalEvent>) -> AbortHandle {
        let manager = self.this.clone();
        let task = self.handle.spawn(async move {
            while let Some(event) = stream.recv().await {
                let Some(manager) = manager.upgrade() else { break };
                trace!(interface = %interface, id = %event.id, member = %event.member, "signal event");

                let observers = manager.observers_of(&interface);
                if observers.is_empty() {
                    continue;
                }

                let id = event.id.clone();
                manager.enqueue(
                    &id,
                    async move {
                        for observer in observers.iter().filter_map(Weak::upgrade) {
                            observer.handle_signal(&event);
                        }
                    }
                    .boxed(),
                );
            }
        });
        task.abort_handle()
    }
}

impl Drop for ObserverManager {
    fn drop(&mut self) {
        for (_, feed) in self.feeds.get_mut().drain() {
            feed.pump.abort();
        }
    }
}
