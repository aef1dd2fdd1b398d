//! # In-process bus
//!
//! `LocalBus` implements [`Bus`] inside one process. Providers advertise
//! objects on it and drive them through [`LocalObject`] handles; consumers see
//! the same discovery, property-change and signal traffic a real bus would
//! produce.
//!
//! All subscriber bookkeeping sits behind one mutex, and events are pushed
//! into subscriber channels while it is held. That is what makes the
//! replay-then-stream contract of `discover` hold: no event can slip between
//! the replay of present objects and the registration of the new stream.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;

use crate::bus::Bus;
use crate::bus::BusError;
use crate::bus::DiscoveryEvent;
use crate::bus::DiscoveryKind;
use crate::bus::EventStream;
use crate::bus::Result;
use crate::bus::SignalEvent;
use crate::description::EmitsChanged;
use crate::description::MemberKind;
use crate::description::TypeDescription;
use crate::object_id::ObjectId;
use crate::object_id::SessionId;
use crate::object_id::is_valid_object_path;
use crate::value::PropertySet;
use crate::value::Value;

/// Server-side implementation of one method.
pub type MethodHandler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Vec<Value>>> + Send + Sync>;

const NOT_SUPPORTED: &str = "org.freedesktop.DBus.Error.NotSupported";
const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
const PROPERTY_WRITE_ONLY: &str = "org.freedesktop.DBus.Error.PropertyWriteOnly";

struct Hosted {
    desc: Arc<TypeDescription>,
    properties: PropertySet,
    methods: HashMap<String, MethodHandler>,
}

struct State {
    open: bool,
    interfaces: HashMap<String, Arc<TypeDescription>>,
    sessions: HashMap<String, SessionId>,
    objects: BTreeMap<ObjectId, HashMap<Arc<str>, Hosted>>,
    discovery: HashMap<String, Vec<mpsc::UnboundedSender<DiscoveryEvent>>>,
    signals: HashMap<(String, String), Vec<mpsc::UnboundedSender<SignalEvent>>>,
}

impl State {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(BusError::ConnectionLost("Local bus closed".into()))
        }
    }

    fn hosted(&self, id: &ObjectId, interface: &str) -> Result<&Hosted> {
        self.ensure_open()?;
        let object = self.objects.get(id).ok_or_else(|| BusError::NoSuchObject(id.clone()))?;
        object
            .get(interface)
            .ok_or_else(|| BusError::UnknownInterface(interface.to_string()))
    }

    fn hosted_mut(&mut self, id: &ObjectId, interface: &str) -> Result<&mut Hosted> {
        self.ensure_open()?;
        let object = self.objects.get_mut(id).ok_or_else(|| BusError::NoSuchObject(id.clone()))?;
        object
            .get_mut(interface)
            .ok_or_else(|| BusError::UnknownInterface(interface.to_string()))
    }

    fn publish_discovery(&mut self, interface: &str, event: DiscoveryEvent) {
        if let Some(subscribers) = self.discovery.get_mut(interface) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn publish_signal(&mut self, interface: &str, member: &str, event: SignalEvent) {
        let key = (interface.to_string(), member.to_string());
        if let Some(subscribers) = self.signals.get_mut(&key) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Stores new property values and announces them as one change event,
    /// following each property's emits-changed policy.
    fn apply_update(&mut self, id: &ObjectId, interface: &str, props: PropertySet) -> Result<()> {
        let hosted = self.hosted_mut(id, interface)?;

        let mut changed = PropertySet::new();
        let mut invalidated = Vec::new();
        for (name, value) in props {
            let (_, member) = hosted
                .desc
                .member(&name, MemberKind::Property)
                .ok_or_else(|| BusError::UnknownMember {
                    interface: interface.to_string(),
                    member: name.clone(),
                })?;
            match member.emits_changed {
                EmitsChanged::Always => {
                    changed.insert(name.clone(), value.clone());
                }
                EmitsChanged::Invalidates => invalidated.push(name.clone()),
                EmitsChanged::Never => (),
            }
            hosted.properties.insert(name, value);
        }

        if changed.is_empty() && invalidated.is_empty() {
            return Ok(());
        }

        let event = DiscoveryEvent {
            id: id.clone(),
            kind: DiscoveryKind::Changed { changed, invalidated },
        };
        self.publish_discovery(interface, event);
        Ok(())
    }
}

/// An in-process bus shared by providers and consumers.
pub struct LocalBus {
    state: Mutex<State>,
    next_session: AtomicU32,
    announce_properties: AtomicBool,
    this: Weak<LocalBus>,
}

impl LocalBus {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(State {
                open: true,
                interfaces: HashMap::new(),
                sessions: HashMap::new(),
                objects: BTreeMap::new(),
                discovery: HashMap::new(),
                signals: HashMap::new(),
            }),
            next_session: AtomicU32::new(1),
            announce_properties: AtomicBool::new(true),
            this: this.clone(),
        })
    }

    /// Controls whether `Appeared` events carry property values.
    ///
    /// When disabled, consumers must fetch the properties themselves.
    pub fn set_announce_properties(&self, announce: bool) {
        self.announce_properties.store(announce, Ordering::Relaxed);
    }

    /// Puts an object implementing `desc` on the bus.
    ///
    /// All objects advertised under the same `bus_name` share one session.
    pub fn advertise(
        &self,
        bus_name: &str,
        path: &str,
        desc: &TypeDescription,
        properties: PropertySet,
    ) -> Result<LocalObject> {
        if !is_valid_object_path(path) {
            return Err(BusError::InvalidArgument(format!("bad object path '{}'", path)));
        }
        self.register_interface(desc)?;

        for name in properties.keys() {
            if desc.member(name, MemberKind::Property).is_none() {
                return Err(BusError::UnknownMember {
                    interface: desc.name().to_string(),
                    member: name.clone(),
                });
            }
        }

        let announce = self.announce_properties.load(Ordering::Relaxed);
        let mut state = self.state.lock();
        state.ensure_open()?;

        let session = *state
            .sessions
            .entry(bus_name.to_string())
            .or_insert_with(|| SessionId(self.next_session.fetch_add(1, Ordering::Relaxed)));
        let id = ObjectId::new(bus_name, path, session);
        let interface = desc.shared_name();

        let desc = state
            .interfaces
            .get(desc.name())
            .cloned()
            .unwrap_or_else(|| Arc::new(desc.clone()));

        let object = state.objects.entry(id.clone()).or_default();
        if object.contains_key(&interface) {
            return Err(BusError::AlreadyAdvertised {
                id,
                interface: interface.to_string(),
            });
        }
        object.insert(
            interface.clone(),
            Hosted {
                desc,
                properties: properties.clone(),
                methods: HashMap::new(),
            },
        );

        debug!(id = %id, interface = %interface, "advertised object");
        let event = DiscoveryEvent {
            id: id.clone(),
            kind: DiscoveryKind::Appeared {
                properties: announce.then_some(properties),
            },
        };
        state.publish_discovery(&interface, event);

        Ok(LocalObject {
            bus: self.this.clone(),
            id,
            interface,
            removed: AtomicBool::new(false),
        })
    }

    /// Takes every object off the bus and ends all streams.
    ///
    /// Further operations fail with `ConnectionLost`.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.open {
            return;
        }

        let gone: Vec<(ObjectId, Vec<Arc<str>>)> = state
            .objects
            .iter()
            .map(|(id, ifaces)| (id.clone(), ifaces.keys().cloned().collect()))
            .collect();
        for (id, interfaces) in gone {
            for interface in interfaces {
                let event = DiscoveryEvent { id: id.clone(), kind: DiscoveryKind::Disappeared };
                state.publish_discovery(&interface, event);
            }
        }

        state.objects.clear();
        state.discovery.clear();
        state.signals.clear();
        state.open = false;
        debug!("local bus closed");
    }

    /// Number of live discovery subscribers for an interface.
    pub fn discovery_subscribers(&self, interface: &str) -> usize {
        let state = self.state.lock();
        state
            .discovery
            .get(interface)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Number of live subscribers for one signal member.
    pub fn signal_subscribers(&self, interface: &str, member: &str) -> usize {
        let state = self.state.lock();
        state
            .signals
            .get(&(interface.to_string(), member.to_string()))
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    fn method_handler(&self, id: &ObjectId, interface: &str, member: &str) -> Result<MethodHandler> {
        let state = self.state.lock();
        let hosted = state.hosted(id, interface)?;
        if hosted.desc.member(member, MemberKind::Method).is_none() {
            return Err(BusError::UnknownMember {
                interface: interface.to_string(),
                member: member.to_string(),
            });
        }
        hosted
            .methods
            .get(member)
            .cloned()
            .ok_or_else(|| BusError::error_reply(NOT_SUPPORTED, format!("{} is not implemented", member)))
    }
}

#[async_trait::async_trait]
impl Bus for LocalBus {
    fn register_interface(&self, desc: &TypeDescription) -> Result<()> {
        desc.validate()?;

        let mut state = self.state.lock();
        state.ensure_open()?;
        match state.interfaces.get(desc.name()) {
            Some(existing) if **existing != *desc => Err(BusError::InterfaceMismatch(desc.name().to_string())),
            Some(_) => Ok(()),
            None => {
                state.interfaces.insert(desc.name().to_string(), Arc::new(desc.clone()));
                Ok(())
            }
        }
    }

    fn discover(&self, interface: &str) -> Result<EventStream<DiscoveryEvent>> {
        let announce = self.announce_properties.load(Ordering::Relaxed);
        let mut state = self.state.lock();
        state.ensure_open()?;

        let (tx, rx) = mpsc::unbounded_channel();
        for (id, ifaces) in &state.objects {
            if let Some(hosted) = ifaces.get(interface) {
                let event = DiscoveryEvent {
                    id: id.clone(),
                    kind: DiscoveryKind::Appeared {
                        properties: announce.then(|| hosted.properties.clone()),
                    },
                };
                // the receiver is still in hand, this cannot fail
                let _ = tx.send(event);
            }
        }

        state.discovery.entry(interface.to_string()).or_default().push(tx);
        trace!(interface, "discovery stream opened");
        Ok(rx)
    }

    fn subscribe_signal(&self, interface: &str, member: &str) -> Result<EventStream<SignalEvent>> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        let (tx, rx) = mpsc::unbounded_channel();
        state
            .signals
            .entry((interface.to_string(), member.to_string()))
            .or_default()
            .push(tx);
        trace!(interface, member, "signal stream opened");
        Ok(rx)
    }

    async fn fetch_properties(&self, id: &ObjectId, interface: &str) -> Result<PropertySet> {
        let state = self.state.lock();
        let hosted = state.hosted(id, interface)?;
        Ok(hosted.properties.clone())
    }

    async fn call(
        &self,
        id: &ObjectId,
        interface: &str,
        member: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let handler = self.method_handler(id, interface, member)?;
        match tokio::time::timeout(timeout, handler(args)).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout),
        }
    }

    fn call_no_reply(&self, id: &ObjectId, interface: &str, member: &str, args: Vec<Value>) -> Result<()> {
        let handler = self.method_handler(id, interface, member)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| BusError::ConnectionLost("no runtime to deliver the call".into()))?;

        let member = member.to_string();
        runtime.spawn(async move {
            if let Err(e) = handler(args).await {
                debug!(member = %member, error = %e, "fire-and-forget call failed");
            }
        });
        Ok(())
    }

    async fn get_property(&self, id: &ObjectId, interface: &str, name: &str, _timeout: Duration) -> Result<Value> {
        let state = self.state.lock();
        let hosted = state.hosted(id, interface)?;
        let (_, member) = hosted
            .desc
            .member(name, MemberKind::Property)
            .ok_or_else(|| BusError::UnknownMember {
                interface: interface.to_string(),
                member: name.to_string(),
            })?;
        if !member.access.readable() {
            return Err(BusError::error_reply(PROPERTY_WRITE_ONLY, format!("{} is write-only", name)));
        }
        hosted
            .properties
            .get(name)
            .cloned()
            .ok_or_else(|| BusError::error_reply(NOT_SUPPORTED, format!("{} has no value", name)))
    }

    async fn set_property(
        &self,
        id: &ObjectId,
        interface: &str,
        name: &str,
        value: Value,
        _timeout: Duration,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let hosted = state.hosted(id, interface)?;
        let (_, member) = hosted
            .desc
            .member(name, MemberKind::Property)
            .ok_or_else(|| BusError::UnknownMember {
                interface: interface.to_string(),
                member: name.to_string(),
            })?;
        if !member.access.writable() {
            return Err(BusError::error_reply(PROPERTY_READ_ONLY, format!("{} is read-only", name)));
        }

        let mut props = PropertySet::new();
        props.insert(name.to_string(), value);
        state.apply_update(id, interface, props)
    }
}

/// Provider-side handle of one advertised (object, interface) pair.
///
/// Dropping the handle takes the interface off the bus.
pub struct LocalObject {
    bus: Weak<LocalBus>,
    id: ObjectId,
    interface: Arc<str>,
    removed: AtomicBool,
}

impl LocalObject {
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn bus(&self) -> Result<Arc<LocalBus>> {
        self.bus
            .upgrade()
            .ok_or_else(|| BusError::ConnectionLost("Local bus dropped".into()))
    }

    /// Writes several properties at once and announces them as a single
    /// change event.
    pub fn update(&self, props: PropertySet) -> Result<()> {
        let bus = self.bus()?;
        let mut state = bus.state.lock();
        state.apply_update(&self.id, &self.interface, props)
    }

    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let mut props = PropertySet::new();
        props.insert(name.to_string(), value.into());
        self.update(props)
    }

    /// Announces that the named properties changed without sending values.
    pub fn invalidate(&self, names: &[&str]) -> Result<()> {
        let bus = self.bus()?;
        let mut state = bus.state.lock();
        let hosted = state.hosted(&self.id, &self.interface)?;
        if let Some(unknown) = names.iter().find(|n| hosted.desc.member(n, MemberKind::Property).is_none()) {
            return Err(BusError::UnknownMember {
                interface: self.interface.to_string(),
                member: unknown.to_string(),
            });
        }

        let event = DiscoveryEvent {
            id: self.id.clone(),
            kind: DiscoveryKind::Changed {
                changed: PropertySet::new(),
                invalidated: names.iter().map(|n| n.to_string()).collect(),
            },
        };
        state.publish_discovery(&self.interface, event);
        Ok(())
    }

    /// Current provider-side value of a property.
    pub fn property(&self, name: &str) -> Option<Value> {
        let bus = self.bus().ok()?;
        let state = bus.state.lock();
        state.hosted(&self.id, &self.interface).ok()?.properties.get(name).cloned()
    }

    pub fn emit_signal(&self, member: &str, args: Vec<Value>) -> Result<()> {
        let bus = self.bus()?;
        let mut state = bus.state.lock();
        let hosted = state.hosted(&self.id, &self.interface)?;
        if hosted.desc.member(member, MemberKind::Signal).is_none() {
            return Err(BusError::UnknownMember {
                interface: self.interface.to_string(),
                member: member.to_string(),
            });
        }

        let event = SignalEvent {
            id: self.id.clone(),
            interface: self.interface.clone(),
            member: member.to_string(),
            args,
        };
        state.publish_signal(&self.interface, member, event);
        Ok(())
    }

    /// Installs a synchronous method implementation.
    pub fn on_method<F>(&self, member: &str, handler: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        self.install(member, Arc::new(move |args: Vec<Value>| {
            let result = handler(args);
            async move { result }.boxed()
        }))
    }

    /// Installs an asynchronous method implementation.
    pub fn on_method_async<F, Fut>(&self, member: &str, handler: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Value>>> + Send + 'static,
    {
        self.install(member, Arc::new(move |args: Vec<Value>| handler(args).boxed()))
    }

    fn install(&self, member: &str, handler: MethodHandler) -> Result<()> {
        let bus = self.bus()?;
        let mut state = bus.state.lock();
        let hosted = state.hosted_mut(&self.id, &self.interface)?;
        if hosted.desc.member(member, MemberKind::Method).is_none() {
            return Err(BusError::UnknownMember {
                interface: self.interface.to_string(),
                member: member.to_string(),
            });
        }
        hosted.methods.insert(member.to_string(), handler);
        Ok(())
    }

    /// Takes the interface off the bus. Idempotent.
    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(bus) = self.bus.upgrade() else { return };

        let mut state = bus.state.lock();
        let Some(object) = state.objects.get_mut(&self.id) else { return };
        if object.remove(&self.interface).is_none() {
            return;
        }
        if object.is_empty() {
            state.objects.remove(&self.id);
        }

        debug!(id = %self.id, interface = %self.interface, "removed object");
        let event = DiscoveryEvent {
            id: self.id.clone(),
            kind: DiscoveryKind::Disappeared,
        };
        state.publish_discovery(&self.interface, event);
    }
}

impl Drop for LocalObject {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::description::PropertyAccess;
    use crate::value::property_set;

    fn door() -> TypeDescription {
        TypeDescription::builder("org.example.Door")
            .property("open", "b", PropertyAccess::Read, EmitsChanged::Always)
            .property("location", "s", PropertyAccess::ReadWrite, EmitsChanged::Always)
            .property("keycode", "u", PropertyAccess::Read, EmitsChanged::Invalidates)
            .property("secret", "s", PropertyAccess::Read, EmitsChanged::Never)
            .method("Open", "", "b")
            .signal("PersonPassedThrough", "s")
            .build()
    }

    fn initial() -> PropertySet {
        property_set([
            ("open", Value::Bool(false)),
            ("location", Value::from("hall")),
            ("keycode", Value::U32(1234)),
        ])
    }

    #[tokio::test]
    async fn test_discover_replays_present_objects() {
        let bus = LocalBus::new();
        let _front = bus.advertise(":1.1", "/door/front", &door(), initial()).unwrap();

        let mut rx = bus.discover("org.example.Door").unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.id.object_path(), "/door/front");
        assert!(matches!(event.kind, DiscoveryKind::Appeared { properties: Some(_) }));
    }

    #[tokio::test]
    async fn test_update_is_one_event_per_policy() {
        let bus = LocalBus::new();
        let mut rx = bus.discover("org.example.Door").unwrap();
        let front = bus.advertise(":1.1", "/door/front", &door(), initial()).unwrap();
        let _appeared = rx.recv().await.unwrap();

        front
            .update(property_set([
                ("open", Value::Bool(true)),
                ("location", Value::from("porch")),
                ("keycode", Value::U32(42)),
                ("secret", Value::from("hidden")),
            ]))
            .unwrap();

        let event = rx.recv().await.unwrap();
        match event.kind {
            DiscoveryKind::Changed { changed, invalidated } => {
                assert_eq!(changed.len(), 2);
                assert_eq!(changed.get("open"), Some(&Value::Bool(true)));
                assert_eq!(invalidated, vec!["keycode".to_string()]);
            }
            other => panic!("Expected Changed, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());

        // never-emitting properties still change provider-side
        assert_eq!(front.property("secret"), Some(Value::from("hidden")));
    }

    #[tokio::test]
    async fn test_drop_removes_object() {
        let bus = LocalBus::new();
        let mut rx = bus.discover("org.example.Door").unwrap();
        let front = bus.advertise(":1.1", "/door/front", &door(), initial()).unwrap();
        let id = front.id().clone();
        drop(front);

        let _appeared = rx.recv().await.unwrap();
        let gone = rx.recv().await.unwrap();
        assert_eq!(gone, DiscoveryEvent { id: id.clone(), kind: DiscoveryKind::Disappeared });
        assert_eq!(
            bus.fetch_properties(&id, "org.example.Door").await,
            Err(BusError::NoSuchObject(id))
        );
    }

    #[tokio::test]
    async fn test_same_bus_name_shares_session() {
        let bus = LocalBus::new();
        let a = bus.advertise(":1.1", "/door/a", &door(), initial()).unwrap();
        let b = bus.advertise(":1.1", "/door/b", &door(), initial()).unwrap();
        let c = bus.advertise(":1.2", "/door/a", &door(), initial()).unwrap();

        assert_eq!(a.id().session_id(), b.id().session_id());
        assert_ne!(a.id().session_id(), c.id().session_id());

        let dup = bus.advertise(":1.1", "/door/a", &door(), initial());
        assert!(matches!(dup, Err(BusError::AlreadyAdvertised { .. })));
    }

    #[tokio::test]
    async fn test_calls() {
        let bus = LocalBus::new();
        let front = bus.advertise(":1.1", "/door/front", &door(), initial()).unwrap();
        front.on_method("Open", |_| Ok(vec![Value::Bool(true)])).unwrap();

        let reply = bus
            .call(front.id(), "org.example.Door", "Open", vec![], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, vec![Value::Bool(true)]);

        let err = bus
            .call(front.id(), "org.example.Door", "Close", vec![], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownMember { .. }));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let bus = LocalBus::new();
        let front = bus.advertise(":1.1", "/door/front", &door(), initial()).unwrap();
        front
            .on_method_async("Open", |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(vec![Value::Bool(true)])
            })
            .unwrap();

        let err = bus
            .call(front.id(), "org.example.Door", "Open", vec![], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, BusError::Timeout);
    }

    #[tokio::test]
    async fn test_set_property_respects_access() {
        let bus = LocalBus::new();
        let front = bus.advertise(":1.1", "/door/front", &door(), initial()).unwrap();
        let timeout = Duration::from_secs(1);

        bus.set_property(front.id(), "org.example.Door", "location", "attic".into(), timeout)
            .await
            .unwrap();
        assert_eq!(front.property("location"), Some(Value::from("attic")));

        let err = bus
            .set_property(front.id(), "org.example.Door", "open", Value::Bool(true), timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::ErrorReply { ref name, .. } if name == PROPERTY_READ_ONLY));
    }

    #[tokio::test]
    async fn test_signals_reach_subscribers() {
        let bus = LocalBus::new();
        let front = bus.advertise(":1.1", "/door/front", &door(), initial()).unwrap();
        let mut rx = bus.subscribe_signal("org.example.Door", "PersonPassedThrough").unwrap();

        front.emit_signal("PersonPassedThrough", vec!["alice".into()]).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.args, vec![Value::from("alice")]);

        assert!(front.emit_signal("Nope", vec![]).is_err());
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let bus = LocalBus::new();
        let _front = bus.advertise(":1.1", "/door/front", &door(), initial()).unwrap();
        let mut rx = bus.discover("org.example.Door").unwrap();

        bus.close();
        assert!(matches!(rx.recv().await.unwrap().kind, DiscoveryKind::Appeared { .. }));
        assert!(matches!(rx.recv().await.unwrap().kind, DiscoveryKind::Disappeared));
        assert!(rx.recv().await.is_none());
        assert!(matches!(bus.discover("org.example.Door"), Err(BusError::ConnectionLost(_))));
    }
}
