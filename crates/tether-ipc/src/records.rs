//! Call and event records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::value::{to_value, Value};
use crate::WireResult;

/// Positional and keyword arguments of a call or constructor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    /// Positional arguments, in order.
    #[serde(default)]
    pub positional: Vec<Value>,

    /// Keyword arguments by name.
    #[serde(default)]
    pub keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    /// Create empty arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of positional arguments.
    pub fn arity(&self) -> usize {
        self.positional.len()
    }

    /// Returns true if there are neither positional nor keyword arguments.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// Builder for [`CallArgs`].
///
/// Each argument is converted to a [`Value`] as it is added. The first
/// conversion failure is remembered and returned by [`Args::build`], so a
/// call chain stays readable while the error still surfaces before anything
/// is queued.
#[derive(Debug, Default)]
pub struct Args {
    args: CallArgs,
    error: Option<WireError>,
}

impl Args {
    /// Start an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize>(mut self, value: T) -> Self {
        if self.error.is_none() {
            match to_value(value) {
                Ok(value) => self.args.positional.push(value),
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    /// Set a keyword argument. A later value for the same name wins.
    pub fn kwarg<T: Serialize>(mut self, name: impl Into<String>, value: T) -> Self {
        if self.error.is_none() {
            match to_value(value) {
                Ok(value) => {
                    self.args.keyword.insert(name.into(), value);
                }
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    /// Finish the argument list, or report the first conversion failure.
    pub fn build(self) -> WireResult<CallArgs> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.args),
        }
    }
}

impl From<CallArgs> for Args {
    fn from(args: CallArgs) -> Self {
        Self { args, error: None }
    }
}

/// A deferred, fire-and-forget invocation on the remote interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Method name on the interface.
    pub method: String,

    /// Arguments to pass.
    pub args: CallArgs,
}

impl CallRecord {
    /// Create a call record.
    pub fn new(method: impl Into<String>, args: CallArgs) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

/// An occurrence emitted by the remote interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event name subscribers register for.
    pub name: String,

    /// Single payload value.
    pub payload: Value,
}

impl EventRecord {
    /// Create an event record from an already converted payload.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Create an event record from any serializable payload.
    pub fn with_payload<T: Serialize>(name: impl Into<String>, payload: T) -> WireResult<Self> {
        Ok(Self::new(name, to_value(payload)?))
    }
}
