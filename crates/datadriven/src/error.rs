use std::fmt;

use ddbus::BusError;
use ddbus::DescriptionError;
use ddbus::UnmarshalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Bus(BusError),
    Description(DescriptionError),
    Unmarshal(UnmarshalError),
    /// No tokio runtime was running and no handle was supplied.
    NoRuntime,
    /// The observer could not attach to the bus and is permanently inert.
    ObserverFailed(Box<Error>),
    UnknownMember { interface: String, member: String },
    ListenerNotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "Bus error: {}", e),
            Self::Description(e) => write!(f, "Description error: {}", e),
            Self::Unmarshal(e) => write!(f, "Unmarshal error: {}", e),
            Self::NoRuntime => write!(f, "No tokio runtime available"),
            Self::ObserverFailed(e) => write!(f, "Observer failed: {}", e),
            Self::UnknownMember { interface, member } => {
                write!(f, "Unknown member '{}' on interface '{}'", member, interface)
            }
            Self::ListenerNotFound => write!(f, "Signal listener not registered"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bus(e) => Some(e),
            Self::Description(e) => Some(e),
            Self::Unmarshal(e) => Some(e),
            Self::ObserverFailed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<DescriptionError> for Error {
    fn from(e: DescriptionError) -> Self {
        Self::Description(e)
    }
}

impl From<UnmarshalError> for Error {
    fn from(e: UnmarshalError) -> Self {
        Self::Unmarshal(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
