//! # Bus Abstraction
//!
//! The minimal contract the consumer core needs from the bus middleware.
//!
//! ## Philosophy
//!
//! - **Capabilities, not protocol**: The trait names what the core consumes
//!   (discovery, signal feeds, property fetch, async calls). Sessions,
//!   announcements and wire marshaling stay behind it.
//! - **Streams are push-based**: Discovery and signal subscriptions hand back
//!   an unbounded channel receiver. The bus owns the sending side; when it
//!   drops the sender the stream ends.
//! - **Events are ordered per stream**: A bus must deliver the events of one
//!   object on one stream in the order they happened.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::description::DescriptionError;
use crate::description::TypeDescription;
use crate::object_id::ObjectId;
use crate::value::PropertySet;
use crate::value::Value;

/// Error name a bus uses to report that the remote side did not answer in time.
pub const TIMEOUT_ERROR_NAME: &str = "org.alljoyn.Bus.Timeout";

/// Errors that occur at the bus layer.
#[derive(Debug, Clone, PartialEq)]
pub enum BusError {
    /// The bus connection is gone or was never established.
    ConnectionLost(String),
    /// The target object is not (or no longer) on the bus.
    NoSuchObject(ObjectId),
    /// The interface was never registered or the object does not implement it.
    UnknownInterface(String),
    /// The member does not exist on the interface.
    UnknownMember { interface: String, member: String },
    /// The operation timed out before a reply was received.
    Timeout,
    /// The peer answered with an explicit error.
    ErrorReply { name: String, description: String },
    /// A reply arrived but could not be interpreted.
    Malformed(String),
    /// The interface description was rejected.
    Description(DescriptionError),
    /// The interface is already registered with a different definition.
    InterfaceMismatch(String),
    /// The object already hosts this interface.
    AlreadyAdvertised { id: ObjectId, interface: String },
    /// The argument is not acceptable to the bus (bad path, undeclared property).
    InvalidArgument(String),
}

impl BusError {
    pub fn error_reply(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::ErrorReply {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::NoSuchObject(id) => write!(f, "No such object: {}", id),
            Self::UnknownInterface(name) => write!(f, "Unknown interface '{}'", name),
            Self::UnknownMember { interface, member } => {
                write!(f, "Unknown member '{}' on interface '{}'", member, interface)
            }
            Self::Timeout => write!(f, "Request timed out"),
            Self::ErrorReply { name, description } => write!(f, "Error reply {}: {}", name, description),
            Self::Malformed(msg) => write!(f, "Malformed reply: {}", msg),
            Self::Description(e) => write!(f, "Invalid description: {}", e),
            Self::InterfaceMismatch(name) => {
                write!(f, "Interface '{}' already registered with a different definition", name)
            }
            Self::AlreadyAdvertised { id, interface } => {
                write!(f, "{} already implements '{}'", id, interface)
            }
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Description(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DescriptionError> for BusError {
    fn from(e: DescriptionError) -> Self {
        Self::Description(e)
    }
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Receiving side of a discovery or signal subscription.
pub type EventStream<T> = mpsc::UnboundedReceiver<T>;

/// What happened to a discovered object.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryKind {
    /// The object is present. Carries its properties when the bus has them at hand.
    Appeared { properties: Option<PropertySet> },
    /// Some properties changed (with values) or were invalidated (names only).
    Changed { changed: PropertySet, invalidated: Vec<String> },
    /// The object left the bus or its session was lost.
    Disappeared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryEvent {
    pub id: ObjectId,
    pub kind: DiscoveryKind,
}

/// A signal emitted by a remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub id: ObjectId,
    pub interface: Arc<str>,
    pub member: String,
    pub args: Vec<Value>,
}

/// The bus collaborator consumed by the data-driven core.
///
/// This trait is designed to be object-safe (`Arc<dyn Bus>`).
#[async_trait::async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Makes an interface known to the bus.
    ///
    /// Registering the same definition twice is not an error.
    fn register_interface(&self, desc: &TypeDescription) -> Result<()>;

    /// Starts a discovery stream for objects implementing `interface`.
    ///
    /// # invariants
    /// - Objects already present are replayed as `Appeared` first.
    /// - Each call yields an independent stream.
    fn discover(&self, interface: &str) -> Result<EventStream<DiscoveryEvent>>;

    /// Subscribes to one signal member of an interface, from any object.
    fn subscribe_signal(&self, interface: &str, member: &str) -> Result<EventStream<SignalEvent>>;

    /// Fetches all current property values of one interface of an object.
    async fn fetch_properties(&self, id: &ObjectId, interface: &str) -> Result<PropertySet>;

    /// Calls a method and waits for its reply values.
    ///
    /// Must return `Err(BusError::Timeout)` if no reply arrives within `timeout`.
    async fn call(
        &self,
        id: &ObjectId,
        interface: &str,
        member: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>>;

    /// Sends a method call for which no reply will ever be sent.
    fn call_no_reply(&self, id: &ObjectId, interface: &str, member: &str, args: Vec<Value>) -> Result<()>;

    async fn get_property(&self, id: &ObjectId, interface: &str, name: &str, timeout: Duration) -> Result<Value>;

    async fn set_property(
        &self,
        id: &ObjectId,
        interface: &str,
        name: &str,
        value: Value,
        timeout: Duration,
    ) -> Result<()>;
}
