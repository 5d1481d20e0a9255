//! # Plugin Settings Blocks
//!
//! A host player hands each decoder plugin a named block of flat key/value
//! settings (`dstdec_threads`, `lsbitfirst`, ...). `ConfigBlock` holds such a
//! block and gives typed, defaulted access to it.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::ConfigBlock;
//!
//! let block = ConfigBlock::from_json_str("dsdiff", r#"{ "dstdec_threads": 4 }"#).unwrap();
//! let threads: usize = block.get_value("dstdec_threads", 8).unwrap();
//! let lsb_first: bool = block.get_value("lsbitfirst", false).unwrap();
//!
//! assert_eq!(threads, 4);
//! assert!(!lsb_first);
//! ```
//!
//! Lookups fail fast: a key that is present with the wrong type is reported
//! as an error instead of silently falling back to the default.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Named block of plugin settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigBlock {
    name: String,
    values: Map<String, Value>,
}

impl ConfigBlock {
    /// Create an empty block. Every lookup returns its default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Map::new(),
        }
    }

    /// Parse a block from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not valid JSON or its top
    /// level is not an object.
    pub fn from_json_str(name: impl Into<String>, json: &str) -> Result<Self> {
        let name = name.into();
        let value: Value = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("block '{}': invalid JSON: {}", name, e)))?;

        match value {
            Value::Object(values) => Ok(Self { name, values }),
            other => Err(Error::Config(format!(
                "block '{}': expected a JSON object, found {}",
                name,
                json_kind(&other)
            ))),
        }
    }

    /// Set a value, replacing any previous one under the same key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the value cannot be represented as JSON.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Serialize) -> Result<Self> {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|e| Error::Config(format!("block '{}': key '{}': {}", self.name, key, e)))?;
        self.values.insert(key, value);
        Ok(self)
    }

    /// Typed lookup with a default for missing keys.
    ///
    /// A JSON `null` counts as missing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the block and key when the stored
    /// value does not deserialize into `T`.
    pub fn get_value<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => T::deserialize(value).map_err(|e| {
                Error::Config(format!(
                    "block '{}': invalid value for '{}': {}",
                    self.name, key, e
                ))
            }),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
