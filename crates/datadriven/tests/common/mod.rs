#![allow(dead_code)]

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;

use datadriven::ManagerConfig;
use datadriven::ObserverListener;
use datadriven::ObserverManager;
use datadriven::ProxyInterface;
use datadriven::ProxyObject;
use datadriven::SignalType;
use datadriven::ddbus::Bus;
use datadriven::ddbus::BusError;
use datadriven::ddbus::DiscoveryEvent;
use datadriven::ddbus::EmitsChanged;
use datadriven::ddbus::EventStream;
use datadriven::ddbus::LocalBus;
use datadriven::ddbus::ObjectId;
use datadriven::ddbus::PropertyAccess;
use datadriven::ddbus::PropertySet;
use datadriven::ddbus::SignalEvent;
use datadriven::ddbus::TypeDescription;
use datadriven::ddbus::UnmarshalError;
use datadriven::ddbus::Value;
use datadriven::ddbus::property_set;

pub const DOOR: &str = "org.example.Door";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn door_description() -> &'static TypeDescription {
    static DESC: OnceLock<TypeDescription> = OnceLock::new();
    DESC.get_or_init(|| {
        TypeDescription::builder(DOOR)
            .property("open", "b", PropertyAccess::Read, EmitsChanged::Always)
            .property("location", "s", PropertyAccess::ReadWrite, EmitsChanged::Always)
            .property("keycode", "u", PropertyAccess::Read, EmitsChanged::Invalidates)
            .method("Open", "", "b")
            .method("Close", "", "")
            .method("KnockAndRun", "", "")
            .method_no_reply("Knock", "s")
            .signal("PersonPassedThrough", "s")
            .build()
    })
}

/// Typed proxy for the door interface.
pub struct Door {
    proxy: ProxyObject,
}

impl ProxyInterface for Door {
    fn type_description() -> &'static TypeDescription {
        door_description()
    }

    fn from_proxy(proxy: ProxyObject) -> Result<Self, UnmarshalError> {
        // a door without a position is not worth caching
        proxy.property::<bool>("open")?;
        Ok(Self { proxy })
    }

    fn proxy(&self) -> &ProxyObject {
        &self.proxy
    }
}

impl Door {
    pub fn id(&self) -> &ObjectId {
        self.proxy.id()
    }

    pub fn open(&self) -> Option<bool> {
        self.proxy.property("open").ok()
    }

    pub fn location(&self) -> Option<String> {
        self.proxy.property("location").ok()
    }

    pub fn keycode(&self) -> Option<u32> {
        self.proxy.property("keycode").ok()
    }
}

pub struct PersonPassedThrough {
    pub name: String,
}

impl SignalType for PersonPassedThrough {
    const MEMBER: &'static str = "PersonPassedThrough";

    fn decode(args: &[Value]) -> Result<Self, UnmarshalError> {
        match args {
            [Value::Str(name)] => Ok(Self { name: name.clone() }),
            [other] => Err(UnmarshalError::TypeMismatch {
                expected: "string".into(),
                found: other.type_name().into(),
            }),
            _ => Err(UnmarshalError::ArgumentCount { expected: 1, found: args.len() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Update { path: String, open: Option<bool>, location: Option<String> },
    Remove { path: String, alive: bool },
}

/// Listener that records every callback in order.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<Seen>>,
    pub updated: Mutex<Vec<Arc<Door>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Seen> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn updates_for(&self, path: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Seen::Update { path: p, .. } if p == path))
            .count()
    }
}

impl ObserverListener<Door> for Recorder {
    fn on_update(&self, door: &Arc<Door>) {
        self.updated.lock().push(door.clone());
        self.events.lock().push(Seen::Update {
            path: door.id().object_path().to_string(),
            open: door.open(),
            location: door.location(),
        });
    }

    fn on_remove(&self, door: &Arc<Door>) {
        self.events.lock().push(Seen::Remove {
            path: door.id().object_path().to_string(),
            alive: door.proxy().is_alive(),
        });
    }
}

pub fn door_props(open: bool, location: &str) -> PropertySet {
    property_set([
        ("open", Value::Bool(open)),
        ("location", Value::from(location)),
        ("keycode", Value::U32(1234)),
    ])
}

pub fn setup() -> (Arc<LocalBus>, Arc<ObserverManager>) {
    setup_with(ManagerConfig::default().with_call_timeout(Duration::from_secs(2)))
}

pub fn setup_with(config: ManagerConfig) -> (Arc<LocalBus>, Arc<ObserverManager>) {
    init_tracing();
    let bus = LocalBus::new();
    let manager = ObserverManager::with_config(bus.clone(), config).expect("tests run inside a runtime");
    (bus, manager)
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Bus that forwards to a [`LocalBus`] and can be told to misbehave.
///
/// Reads (`fetch_properties`, `get_property`) take their value first and
/// only then wait `read_delay`, so the result may be older than the bus.
pub struct GatedBus {
    inner: Arc<LocalBus>,
    failing_subscribes: AtomicUsize,
    read_delay: Mutex<Duration>,
}

impl GatedBus {
    pub fn new(inner: Arc<LocalBus>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_subscribes: AtomicUsize::new(0),
            read_delay: Mutex::new(Duration::ZERO),
        })
    }

    /// The next `count` signal subscriptions fail with `ConnectionLost`.
    pub fn fail_subscribes(&self, count: usize) {
        self.failing_subscribes.store(count, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    async fn delay_read(&self) {
        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl Bus for GatedBus {
    fn register_interface(&self, desc: &TypeDescription) -> Result<(), BusError> {
        self.inner.register_interface(desc)
    }

    fn discover(&self, interface: &str) -> Result<EventStream<DiscoveryEvent>, BusError> {
        self.inner.discover(interface)
    }

    fn subscribe_signal(&self, interface: &str, member: &str) -> Result<EventStream<SignalEvent>, BusError> {
        let failing = self
            .failing_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(BusError::ConnectionLost("transient".into()));
        }
        self.inner.subscribe_signal(interface, member)
    }

    async fn fetch_properties(&self, id: &ObjectId, interface: &str) -> Result<PropertySet, BusError> {
        let properties = self.inner.fetch_properties(id, interface).await?;
        self.delay_read().await;
        Ok(properties)
    }

    async fn call(
        &self,
        id: &ObjectId,
        interface: &str,
        member: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>, BusError> {
        self.inner.call(id, interface, member, args, timeout).await
    }

    fn call_no_reply(&self, id: &ObjectId, interface: &str, member: &str, args: Vec<Value>) -> Result<(), BusError> {
        self.inner.call_no_reply(id, interface, member, args)
    }

    async fn get_property(&self, id: &ObjectId, interface: &str, name: &str, timeout: Duration) -> Result<Value, BusError> {
        let value = self.inner.get_property(id, interface, name, timeout).await?;
        self.delay_read().await;
        Ok(value)
    }

    async fn set_property(
        &self,
        id: &ObjectId,
        interface: &str,
        name: &str,
        value: Value,
        timeout: Duration,
    ) -> Result<(), BusError> {
        self.inner.set_property(id, interface, name, value, timeout).await
    }
}

/// Like [`setup`], with the manager talking through a [`GatedBus`].
pub fn setup_gated() -> (Arc<LocalBus>, Arc<GatedBus>, Arc<ObserverManager>) {
    init_tracing();
    let bus = LocalBus::new();
    let gated = GatedBus::new(bus.clone());
    let config = ManagerConfig::default().with_call_timeout(Duration::from_secs(2));
    let manager = ObserverManager::with_config(gated.clone(), config).expect("tests run inside a runtime");
    (bus, gated, manager)
}
