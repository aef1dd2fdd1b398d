//! Bus-facing types for the data-driven consumer core: object identity,
//! dynamic values, interface descriptions, the `Bus` contract and an
//! in-process implementation of it.

mod bus;
mod description;
mod local;
mod object_id;
mod value;

pub use crate::bus::Bus;
pub use crate::bus::BusError;
pub use crate::bus::DiscoveryEvent;
pub use crate::bus::DiscoveryKind;
pub use crate::bus::EventStream;
pub use crate::bus::Result;
pub use crate::bus::SignalEvent;
pub use crate::bus::TIMEOUT_ERROR_NAME;

pub use crate::description::DescriptionError;
pub use crate::description::EmitsChanged;
pub use crate::description::MemberDescription;
pub use crate::description::MemberKey;
pub use crate::description::MemberKind;
pub use crate::description::PropertyAccess;
pub use crate::description::TypeDescription;
pub use crate::description::TypeDescriptionBuilder;

pub use crate::local::LocalBus;
pub use crate::local::LocalObject;
pub use crate::local::MethodHandler;

pub use crate::object_id::ObjectId;
pub use crate::object_id::SessionId;
pub use crate::object_id::is_valid_object_path;

pub use crate::value::FromValue;
pub use crate::value::PropertySet;
pub use crate::value::UnmarshalError;
pub use crate::value::Value;
pub use crate::value::property_set;
pub use crate::value::take_property;
