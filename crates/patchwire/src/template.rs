//! Immutable descriptions of module kinds.

use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

use crate::registry::RegistryError;

/// Whether a port carries audio or control data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortKind {
    Audio,
    Data,
}

/// Describes one inlet or outlet of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortDescriptor {
    /// Stable id, used in connection endpoints.
    pub id: String,
    /// Name shown to the user.
    pub name: String,
    pub kind: PortKind,
}

impl PortDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn audio(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, PortKind::Audio)
    }

    pub fn data(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, PortKind::Data)
    }
}

/// The two-part `collection/name` identifier of a template.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TemplateId {
    pub collection: String,
    pub name: String,
}

impl TemplateId {
    pub fn new(collection: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            name: name.into(),
        }
    }

    /// Parses `"collection/name"`. Both parts must be present and non-empty.
    pub fn parse(id: &str) -> Result<Self, RegistryError> {
        let mut parts = id.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(collection), Some(name), None) if !collection.is_empty() && !name.is_empty() => {
                Ok(Self::new(collection, name))
            }
            _ => Err(RegistryError::MalformedId(id.to_string())),
        }
    }
}

impl FromStr for TemplateId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.name)
    }
}

impl Debug for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TemplateId({self})")
    }
}

/// The library and class a native module is instantiated from.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NativeClass {
    pub library: String,
    pub class_name: String,
}

/// An immutable description of a kind of module.
///
/// Templates are registered once at startup and shared by every module
/// created from them.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleTemplate {
    id: TemplateId,
    name: String,
    description: String,
    inlets: Vec<PortDescriptor>,
    outlets: Vec<PortDescriptor>,
    remote_code: Option<String>,
    native_class: Option<NativeClass>,
}

impl ModuleTemplate {
    pub fn new(collection: impl Into<String>, name: impl Into<String>) -> Self {
        let id = TemplateId::new(collection, name);
        Self {
            name: id.name.clone(),
            id,
            description: String::new(),
            inlets: Vec::new(),
            outlets: Vec::new(),
            remote_code: None,
            native_class: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_inlet(mut self, inlet: PortDescriptor) -> Self {
        self.inlets.push(inlet);
        self
    }

    pub fn with_outlet(mut self, outlet: PortDescriptor) -> Self {
        self.outlets.push(outlet);
        self
    }

    /// Sets the code that must be installed in the remote engine before
    /// instances of this template can run there.
    pub fn with_remote_code(mut self, code: impl Into<String>) -> Self {
        self.remote_code = Some(code.into());
        self
    }

    pub fn with_native_class(
        mut self,
        library: impl Into<String>,
        class_name: impl Into<String>,
    ) -> Self {
        self.native_class = Some(NativeClass {
            library: library.into(),
            class_name: class_name.into(),
        });
        self
    }

    #[inline]
    pub fn id(&self) -> &TemplateId {
        &self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[inline]
    pub fn inlets(&self) -> &[PortDescriptor] {
        &self.inlets
    }

    #[inline]
    pub fn outlets(&self) -> &[PortDescriptor] {
        &self.outlets
    }

    pub fn inlet(&self, id: &str) -> Option<&PortDescriptor> {
        self.inlets.iter().find(|port| port.id == id)
    }

    pub fn outlet(&self, id: &str) -> Option<&PortDescriptor> {
        self.outlets.iter().find(|port| port.id == id)
    }

    #[inline]
    pub fn remote_code(&self) -> Option<&str> {
        self.remote_code.as_deref()
    }

    #[inline]
    pub fn has_remote_code(&self) -> bool {
        self.remote_code.is_some()
    }

    #[inline]
    pub fn native_class(&self) -> Option<&NativeClass> {
        self.native_class.as_ref()
    }

    #[inline]
    pub fn has_native_class(&self) -> bool {
        self.native_class.is_some()
    }
}
