//! TypeRegistry - tag -> decoder table.
//!
//! Built once at startup, read-only afterwards. Each entry turns envelope
//! content into the matching `Payload` variant.

use std::collections::HashMap;

use super::message::{Message, MessageKind};
use super::vocabulary::{Payload, register_vocabulary};

type DecodeFn = fn(&str) -> serde_json::Result<Payload>;

/// What the registry knows about one tag.
#[derive(Clone, Copy)]
pub struct TypeEntry {
    pub kind: MessageKind,
    decode: DecodeFn,
}

impl TypeEntry {
    pub fn decode(&self, content: &str) -> serde_json::Result<Payload> {
        (self.decode)(content)
    }
}

impl std::fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeEntry").field("kind", &self.kind).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("type tag '{0}' is already registered")]
    DuplicateTag(&'static str),
}

fn decode_as<T: Message + Into<Payload>>(content: &str) -> serde_json::Result<Payload> {
    serde_json::from_str::<T>(content).map(Into::into)
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: HashMap<&'static str, TypeEntry>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry holding the whole fleet vocabulary.
    pub fn standard() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        register_vocabulary(&mut registry)?;
        Ok(registry)
    }

    /// Add `T` under its simple name. Two shapes with one name are refused.
    pub fn register<T: Message + Into<Payload>>(&mut self) -> Result<(), RegistryError> {
        if self.entries.contains_key(T::TYPE) {
            return Err(RegistryError::DuplicateTag(T::TYPE));
        }
        self.entries.insert(
            T::TYPE,
            TypeEntry {
                kind: T::KIND,
                decode: decode_as::<T>,
            },
        );
        Ok(())
    }

    /// Look a tag up, ignoring any namespace in front of the simple name
    /// (`Shared.Requests.GetCarRequest`, `fleet::GetCarRequest`).
    pub fn resolve(&self, type_name: &str) -> Option<&TypeEntry> {
        self.entries.get(simple_name(type_name))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.resolve(type_name).is_some()
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.entries.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `a.b.Name`, `a::b::Name` and `a.b.Name, Assembly` all become `Name`.
fn simple_name(type_name: &str) -> &str {
    let without_assembly = type_name.split(',').next().unwrap_or(type_name).trim();
    without_assembly
        .rsplit(['.', ':'])
        .next()
        .unwrap_or(without_assembly)
}
