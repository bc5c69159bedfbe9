//! Method table and argument decoding.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use tether_ipc::{from_value, CallArgs, Value};

use crate::error::InvokeError;
use crate::interface::{Context, Interface};

/// A callable entry in the method table.
pub type Method<I> = Box<
    dyn Fn(&mut I, &mut Context<'_, <I as Interface>::Toolkit>, CallArgs) -> Result<(), InvokeError>,
>;

/// Name to method lookup, built once when the host starts.
pub struct MethodTable<I: Interface> {
    methods: HashMap<&'static str, Method<I>>,
}

impl<I: Interface> Default for MethodTable<I> {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }
}

impl<I: Interface> MethodTable<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method that decodes its own arguments.
    pub fn method<F>(mut self, name: &'static str, f: F) -> Self
    where
        F: Fn(&mut I, &mut Context<'_, I::Toolkit>, CallArgs) -> Result<(), InvokeError> + 'static,
    {
        self.methods.insert(name, Box::new(f));
        self
    }

    /// Register a method that takes no positional arguments.
    pub fn method0<F>(self, name: &'static str, f: F) -> Self
    where
        F: Fn(&mut I, &mut Context<'_, I::Toolkit>) -> Result<(), InvokeError> + 'static,
    {
        self.method(name, move |iface, ctx, args| {
            ArgReader::exact(args, 0)?;
            f(iface, ctx)
        })
    }

    /// Register a method that takes exactly one positional argument.
    pub fn method1<A, F>(self, name: &'static str, f: F) -> Self
    where
        A: DeserializeOwned + 'static,
        F: Fn(&mut I, &mut Context<'_, I::Toolkit>, A) -> Result<(), InvokeError> + 'static,
    {
        self.method(name, move |iface, ctx, args| {
            let arg = ArgReader::exact(args, 1)?.get(0)?;
            f(iface, ctx, arg)
        })
    }

    /// Look up a method by name.
    pub fn get(&self, name: &str) -> Option<&Method<I>> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Declared method names with no entry in the table.
    pub fn missing(&self) -> Vec<&'static str> {
        I::METHODS
            .iter()
            .copied()
            .filter(|name| !self.contains(name))
            .collect()
    }
}

/// Typed access to call arguments.
#[derive(Debug)]
pub struct ArgReader {
    args: CallArgs,
}

impl ArgReader {
    /// Accept any number of positional arguments.
    pub fn new(args: CallArgs) -> Self {
        Self { args }
    }

    /// Require exactly `expected` positional arguments and no keywords.
    pub fn exact(args: CallArgs, expected: usize) -> Result<Self, InvokeError> {
        Self::signature(args, expected, expected, &[])
    }

    /// Require between `min` and `max` positional arguments and no keywords.
    pub fn range(args: CallArgs, min: usize, max: usize) -> Result<Self, InvokeError> {
        Self::signature(args, min, max, &[])
    }

    /// Require between `min` and `max` positional arguments. Keyword
    /// arguments must be named in `keywords`.
    pub fn signature(
        args: CallArgs,
        min: usize,
        max: usize,
        keywords: &[&str],
    ) -> Result<Self, InvokeError> {
        let got = args.arity();
        if got < min || got > max {
            let expected = if got < min { min } else { max };
            return Err(InvokeError::Arity { expected, got });
        }
        if let Some(name) = args
            .keyword
            .keys()
            .find(|name| !keywords.contains(&name.as_str()))
        {
            return Err(InvokeError::UnexpectedKeyword(name.clone()));
        }
        Ok(Self { args })
    }

    /// Number of positional arguments.
    pub fn arity(&self) -> usize {
        self.args.arity()
    }

    /// Decode the positional argument at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, InvokeError> {
        let value = self.args.positional.get(index).ok_or(InvokeError::Arity {
            expected: index + 1,
            got: self.args.arity(),
        })?;
        decode(value, index.to_string())
    }

    /// Decode the positional argument at `index`, if present.
    pub fn opt<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>, InvokeError> {
        match self.args.positional.get(index) {
            Some(value) => decode(value, index.to_string()).map(Some),
            None => Ok(None),
        }
    }

    /// Decode a keyword argument, if present.
    pub fn keyword<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, InvokeError> {
        match self.args.keyword.get(name) {
            Some(value) => decode(value, name.to_string()).map(Some),
            None => Ok(None),
        }
    }
}

fn decode<T: DeserializeOwned>(value: &Value, argument: String) -> Result<T, InvokeError> {
    from_value(value.clone()).map_err(|e| InvokeError::ArgumentType {
        argument,
        message: e.to_string(),
    })
}
