//! # Interface type descriptions
//!
//! A `TypeDescription` is the schema of one bus interface: its name and an
//! ordered list of members (methods, signals, properties). Generated proxy
//! types hand a static description to the observer; the bus validates it at
//! registration time.
//!
//! Members are addressed by position. A [`MemberKey`] (interface name plus
//! member index) is the stable logical key used wherever a live introspection
//! handle would otherwise be needed, for example to key signal listeners.

use std::fmt;
use std::sync::Arc;

/// Errors detected while validating a description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionError {
    /// The interface name does not follow the dotted naming rules.
    InvalidInterfaceName(String),
    /// A member name is empty, too long or contains forbidden characters.
    InvalidMemberName(String),
    /// Two members of the same kind share a name.
    DuplicateMember(String),
    /// A member signature is not a well-formed type signature.
    InvalidSignature { member: String, signature: String },
}

impl fmt::Display for DescriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterfaceName(name) => write!(f, "Invalid interface name '{}'", name),
            Self::InvalidMemberName(name) => write!(f, "Invalid member name '{}'", name),
            Self::DuplicateMember(name) => write!(f, "Duplicate member '{}'", name),
            Self::InvalidSignature { member, signature } => {
                write!(f, "Invalid signature '{}' on member '{}'", signature, member)
            }
        }
    }
}

impl std::error::Error for DescriptionError {}

pub type Result<T> = std::result::Result<T, DescriptionError>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    Signal,
    Property,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method => write!(f, "method"),
            Self::Signal => write!(f, "signal"),
            Self::Property => write!(f, "property"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PropertyAccess {
    Read,
    Write,
    ReadWrite,
}

impl PropertyAccess {
    pub fn readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// How a provider announces changes of a property.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EmitsChanged {
    /// Changes are announced together with the new value.
    Always,
    /// Changes are announced without a value; consumers keep the stale one.
    Invalidates,
    /// Changes are never announced.
    Never,
}

/// One member of an interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberDescription {
    pub name: String,
    pub kind: MemberKind,
    /// Argument signature for methods and signals, value signature for properties.
    pub signature: String,
    /// Reply signature, methods only.
    pub reply_signature: String,
    /// Fire-and-forget method: no reply is ever sent.
    pub no_reply: bool,
    pub access: PropertyAccess,
    pub emits_changed: EmitsChanged,
}

/// Stable logical key of an interface member.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey {
    pub interface: Arc<str>,
    pub index: usize,
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.interface, self.index)
    }
}

/// Schema of a named bus interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescription {
    name: Arc<str>,
    members: Vec<MemberDescription>,
}

impl TypeDescription {
    pub fn builder(name: impl Into<String>) -> TypeDescriptionBuilder {
        TypeDescriptionBuilder {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_name(&self) -> Arc<str> {
        self.name.clone()
    }

    pub fn members(&self) -> &[MemberDescription] {
        &self.members
    }

    /// Looks up a member by name and kind, returning its index and description.
    pub fn member(&self, name: &str, kind: MemberKind) -> Option<(usize, &MemberDescription)> {
        self.members
            .iter()
            .enumerate()
            .find(|(_, m)| m.kind == kind && m.name == name)
    }

    pub fn member_key(&self, name: &str, kind: MemberKind) -> Option<MemberKey> {
        self.member(name, kind).map(|(index, _)| MemberKey {
            interface: self.name.clone(),
            index,
        })
    }

    pub fn member_at(&self, key: &MemberKey) -> Option<&MemberDescription> {
        if *key.interface != *self.name {
            return None;
        }
        self.members.get(key.index)
    }

    pub fn properties(&self) -> impl Iterator<Item = &MemberDescription> {
        self.members.iter().filter(|m| m.kind == MemberKind::Property)
    }

    /// Validates naming rules, member uniqueness and signatures.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_interface_name(&self.name) {
            return Err(DescriptionError::InvalidInterfaceName(self.name.to_string()));
        }

        for (i, member) in self.members.iter().enumerate() {
            if !is_valid_member_name(&member.name) {
                return Err(DescriptionError::InvalidMemberName(member.name.clone()));
            }

            let duplicate = self.members[..i]
                .iter()
                .any(|m| m.kind == member.kind && m.name == member.name);
            if duplicate {
                return Err(DescriptionError::DuplicateMember(member.name.clone()));
            }

            for sig in [&member.signature, &member.reply_signature] {
                if !is_valid_signature(sig) {
                    return Err(DescriptionError::InvalidSignature {
                        member: member.name.clone(),
                        signature: sig.clone(),
                    });
                }
            }

            if member.kind == MemberKind::Property && member.signature.is_empty() {
                return Err(DescriptionError::InvalidSignature {
                    member: member.name.clone(),
                    signature: String::new(),
                });
            }
        }

        Ok(())
    }
}

/// Builder for [`TypeDescription`]; members keep insertion order.
pub struct TypeDescriptionBuilder {
    name: String,
    members: Vec<MemberDescription>,
}

impl TypeDescriptionBuilder {
    pub fn property(mut self, name: &str, signature: &str, access: PropertyAccess, emits: EmitsChanged) -> Self {
        self.members.push(MemberDescription {
            name: name.to_string(),
            kind: MemberKind::Property,
            signature: signature.to_string(),
            reply_signature: String::new(),
            no_reply: false,
            access,
            emits_changed: emits,
        });
        self
    }

    pub fn method(mut self, name: &str, signature: &str, reply_signature: &str) -> Self {
        self.members.push(MemberDescription {
            name: name.to_string(),
            kind: MemberKind::Method,
            signature: signature.to_string(),
            reply_signature: reply_signature.to_string(),
            no_reply: false,
            access: PropertyAccess::Read,
            emits_changed: EmitsChanged::Never,
        });
        self
    }

    /// Adds a fire-and-forget method.
    pub fn method_no_reply(mut self, name: &str, signature: &str) -> Self {
        self = self.method(name, signature, "");
        if let Some(last) = self.members.last_mut() {
            last.no_reply = true;
        }
        self
    }

    pub fn signal(mut self, name: &str, signature: &str) -> Self {
        self.members.push(MemberDescription {
            name: name.to_string(),
            kind: MemberKind::Signal,
            signature: signature.to_string(),
            reply_signature: String::new(),
            no_reply: false,
            access: PropertyAccess::Read,
            emits_changed: EmitsChanged::Never,
        });
        self
    }

    pub fn build(self) -> TypeDescription {
        TypeDescription {
            name: self.name.into(),
            members: self.members,
        }
    }
}

/// Dotted name with at least two elements, each `[A-Za-z_][A-Za-z0-9_]*`.
fn is_valid_interface_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }
    let elements: Vec<&str> = name.split('.').collect();
    elements.len() >= 2 && elements.iter().all(|e| is_valid_element(e))
}

fn is_valid_member_name(name: &str) -> bool {
    name.len() <= 255 && is_valid_element(name)
}

fn is_valid_element(element: &str) -> bool {
    let mut chars = element.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => (),
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Checks the signature alphabet and that struct/dict brackets balance.
fn is_valid_signature(sig: &str) -> bool {
    let mut stack = Vec::new();
    for c in sig.chars() {
        match c {
            'y' | 'b' | 'n' | 'q' | 'i' | 'u' | 'x' | 't' | 'd' | 's' | 'o' | 'g' | 'v' | 'h' | 'a' => (),
            '(' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => return false,
        }
    }
    stack.is_empty() && !sig.ends_with('a')
}
