//! Contract between the dispatcher and resource handlers.
//!
//! Every resource implements the same three operations. Each receives the
//! request's arguments keyed by name and answers with a return code plus
//! optional outputs; a non-zero code is reported to the host as a failure.

use std::io;
use std::sync::Arc;

use serde::Serialize;

use crate::bridge::{ArgMap, SUCCESS, Value, ValueType};
use crate::config::BridgeConfig;

/// Read-only state handed to every handler call.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    config: Arc<BridgeConfig>,
}

impl ResourceContext {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

/// What a handler returns: a code and, optionally, output values.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResult {
    pub code: i32,
    pub outputs: Option<ArgMap>,
}

impl ResourceResult {
    pub fn ok() -> Self {
        Self {
            code: SUCCESS,
            outputs: None,
        }
    }

    pub fn ok_with(outputs: ArgMap) -> Self {
        Self {
            code: SUCCESS,
            outputs: Some(outputs),
        }
    }

    pub fn failed(code: i32) -> Self {
        Self {
            code,
            outputs: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == SUCCESS
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    #[error("argument '{name}' is {found}, expected {expected}")]
    InvalidArgument {
        name: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Failed(String),
}

impl ResourceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Arguments as a handler sees them.
///
/// Null values never reach a handler: an argument the host did not supply is
/// simply absent, so every accessor returns `Option`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Arguments(ArgMap);

impl Arguments {
    /// Unwraps a decoded argument map, dropping null entries.
    pub fn from_wire(mut map: ArgMap) -> Self {
        map.retain(|_, value| !value.is_null());
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn into_inner(self) -> ArgMap {
        self.0
    }

    pub fn string(&self, name: &str) -> Result<Option<&str>, ResourceError> {
        self.typed(name, ValueType::String, Value::as_str)
    }

    pub fn require_string(&self, name: &str) -> Result<&str, ResourceError> {
        self.string(name)?
            .ok_or_else(|| ResourceError::MissingArgument(name.to_string()))
    }

    pub fn strings(&self, name: &str) -> Result<Option<&[String]>, ResourceError> {
        self.typed(name, ValueType::StringA, Value::as_strings)
    }

    pub fn instances(&self, name: &str) -> Result<Option<&[ArgMap]>, ResourceError> {
        self.typed(name, ValueType::InstanceA, Value::as_instances)
    }

    pub fn boolean(&self, name: &str) -> Result<Option<bool>, ResourceError> {
        self.typed(name, ValueType::Boolean, Value::as_bool)
    }

    fn typed<'a, T>(
        &'a self,
        name: &str,
        expected: ValueType,
        extract: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<Option<T>, ResourceError> {
        let Some(value) = self.0.get(name) else {
            return Ok(None);
        };
        let found = value.value_type();
        extract(value)
            .map(Some)
            .ok_or_else(|| ResourceError::InvalidArgument {
                name: name.to_string(),
                expected,
                found,
            })
    }
}

/// A manageable unit of configuration state.
///
/// Implementations live for the whole process and are shared across calls;
/// they must not rely on per-call state kept between operations.
#[async_trait::async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Reports whether the system is in the described state (host: `Test`).
    async fn verify(
        &self,
        ctx: &ResourceContext,
        args: Arguments,
    ) -> Result<ResourceResult, ResourceError>;

    /// Moves the system into the described state (host: `Set`).
    async fn apply(
        &self,
        ctx: &ResourceContext,
        args: Arguments,
    ) -> Result<ResourceResult, ResourceError>;

    /// Reads the current state back as outputs (host: `Get`).
    async fn query(
        &self,
        ctx: &ResourceContext,
        args: Arguments,
    ) -> Result<ResourceResult, ResourceError>;
}
