// SPDX-FileCopyrightText: Copyright © 2024-2025 Quarry Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Typed variable values and per-scope variable maps.
//!
//! The buildfile front-end assigns values; the engine only reads them. Maps
//! are ordered so that dumps are deterministic.

use std::collections::BTreeMap;
use std::fmt;

use crate::path::{DirPath, Path};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    String(String),
    List(Vec<String>),
    Path(Path),
    Dir(DirPath),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Parse a whitespace-separated assignment right-hand side: one word
    /// becomes a string, several a list.
    pub fn from_words(rhs: &str) -> Value {
        let words: Vec<&str> = rhs.split_whitespace().collect();
        match words.as_slice() {
            [] => Value::String(String::new()),
            [one] => Value::String((*one).to_owned()),
            many => Value::List(many.iter().map(|w| (*w).to_owned()).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(l) => write!(f, "{}", l.join(" ")),
            Value::Path(p) => write!(f, "{p}"),
            Value::Dir(d) => write!(f, "{d}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariableMap(BTreeMap<String, Value>);

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn find(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}
