//! Key registry — the immutable set of parameters a store knows about.
//!
//! The registry is built once and handed to each `ParamStore`, so tests can
//! run isolated stores with their own key sets. Lookups never touch disk.

use std::fmt;

use hashbrown::HashMap;

/// Declared type of a parameter's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKeyType {
    String,
    Bool,
    Int,
    Float,
    Json,
    Bytes,
}

impl fmt::Display for ParamKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKeyType::String => "STRING",
            ParamKeyType::Bool => "BOOL",
            ParamKeyType::Int => "INT",
            ParamKeyType::Float => "FLOAT",
            ParamKeyType::Json => "JSON",
            ParamKeyType::Bytes => "BYTES",
        };
        f.write_str(name)
    }
}

/// One registered parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamKey {
    /// Unique name; also the value file's name under the store root
    pub name: String,
    /// Declared value type
    pub key_type: ParamKeyType,
    /// Default value in the type's string encoding (base64 for BYTES)
    pub default_value: String,
}

impl ParamKey {
    pub fn new(
        name: impl Into<String>,
        key_type: ParamKeyType,
        default_value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            key_type,
            default_value: default_value.into(),
        }
    }
}

/// Immutable name → (type, default) mapping.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    keys: HashMap<String, ParamKey>,
}

impl KeyRegistry {
    /// Build a registry from a list of keys. A repeated name keeps its last definition.
    pub fn new<I: IntoIterator<Item = ParamKey>>(keys: I) -> Self {
        let keys = keys.into_iter().map(|k| (k.name.clone(), k)).collect();
        Self { keys }
    }

    pub fn builder() -> KeyRegistryBuilder {
        KeyRegistryBuilder::default()
    }

    /// Keys shipped with the navigation stack.
    pub fn builtin() -> Self {
        Self::builder()
            .key("MapboxSettings", ParamKeyType::Json, "")
            .key("IsMetric", ParamKeyType::Bool, "false")
            .key("MapboxToken", ParamKeyType::String, "")
            .build()
    }

    pub fn check_key(&self, name: &str) -> bool {
        self.keys.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ParamKey> {
        self.keys.get(name)
    }

    pub fn key_type(&self, name: &str) -> Option<ParamKeyType> {
        self.keys.get(name).map(|k| k.key_type)
    }

    pub fn default_value(&self, name: &str) -> Option<&str> {
        self.keys.get(name).map(|k| k.default_value.as_str())
    }

    /// Registered keys in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &ParamKey> {
        self.keys.values()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Incremental construction of a [`KeyRegistry`].
#[derive(Debug, Default)]
pub struct KeyRegistryBuilder {
    keys: Vec<ParamKey>,
}

impl KeyRegistryBuilder {
    pub fn key(
        mut self,
        name: impl Into<String>,
        key_type: ParamKeyType,
        default_value: impl Into<String>,
    ) -> Self {
        self.keys.push(ParamKey::new(name, key_type, default_value));
        self
    }

    pub fn build(self) -> KeyRegistry {
        KeyRegistry::new(self.keys)
    }
}
