//! Parameterized statements

use indexmap::IndexMap;
use std::fmt;

use crate::codec::Codec;
use crate::condition::CompiledCondition;
use crate::error::OgmResult;
use crate::value::{NodeId, Value};

/// Value representation at the store boundary
pub type WireValue = serde_json::Value;

/// Parameter name (without `$`) to encoded value
pub type Params = IndexMap<String, WireValue>;

/// A complete statement string plus its parameter bindings
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: Params,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: WireValue) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn param(&self, name: &str) -> Option<&WireValue> {
        self.params.get(name)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Hands out placeholder names and collects encoded parameters for one statement
pub(crate) struct ParamBinder<'a> {
    codec: &'a dyn Codec,
    prefix: &'a str,
    next_index: usize,
    params: Params,
}

impl<'a> ParamBinder<'a> {
    pub(crate) fn new(codec: &'a dyn Codec, prefix: &'a str) -> Self {
        Self {
            codec,
            prefix,
            next_index: 0,
            params: Params::new(),
        }
    }

    pub(crate) fn next_index(&self) -> usize {
        self.next_index
    }

    /// Bind an already encoded value and return its placeholder
    pub(crate) fn bind_wire(&mut self, wire: WireValue) -> String {
        let name = format!("{}{}", self.prefix, self.next_index);
        self.next_index += 1;
        self.params.insert(name.clone(), wire);
        format!("${}", name)
    }

    pub(crate) fn bind(&mut self, value: &Value) -> OgmResult<String> {
        let wire = self.codec.encode(value)?;
        Ok(self.bind_wire(wire))
    }

    pub(crate) fn bind_id(&mut self, id: &NodeId) -> String {
        let wire = self.codec.encode_id(id);
        self.bind_wire(wire)
    }

    pub(crate) fn bind_bag(&mut self, bag: &crate::value::PropertyMap) -> OgmResult<String> {
        let wire = self.codec.encode_bag(bag)?;
        Ok(self.bind_wire(wire))
    }

    /// Take over the bindings of a condition compiled from `next_index()`
    pub(crate) fn absorb(&mut self, compiled: CompiledCondition) -> OgmResult<String> {
        for (name, value) in compiled.bindings {
            let wire = self.codec.encode(&value)?;
            self.params.insert(name, wire);
        }
        self.next_index = compiled.next_index;
        Ok(compiled.fragment)
    }

    pub(crate) fn finish(self, text: String) -> Statement {
        Statement {
            text,
            params: self.params,
        }
    }
}
