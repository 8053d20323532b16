//! Simulated memory: a flat arena of objects.
//!
//! Memory here is just a growable sequence of [`Object`] cells owned by the
//! kernel. Each process is handed a slice of it at creation (one cell), and
//! by convention the first cell doubles as the process's variable pool.

use std::collections::BTreeMap;

/// A dynamically-tagged payload stored in a memory cell or moved over a
/// device/interrupt channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Uninitialized cell
    #[default]
    Null,
    Int(i64),
    Str(String),
    /// A variable pool: the string-keyed mapping installed in a process's
    /// first memory cell
    Pool(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Decode as an identifier (pipe id, variable name).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Decode as a non-negative size (buffer capacity).
    pub fn as_size(&self) -> Option<usize> {
        match self {
            Value::Int(n) if *n >= 0 => Some(*n as usize),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Pool(pool) => write!(f, "pool({} vars)", pool.len()),
        }
    }
}

/// One cell of simulated memory
#[derive(Debug, Clone)]
pub struct Object {
    /// Owning process id
    pub pid: String,
    pub content: Value,
}

impl Object {
    pub fn new(pid: &str) -> Self {
        Self {
            pid: pid.to_string(),
            content: Value::Null,
        }
    }
}

/// The kernel's flat memory arena
pub type Memory = Vec<Object>;

/// A process's owned slice of the arena, held by index so the arena can
/// grow without invalidating anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemSlice {
    pub base: usize,
    pub len: usize,
}

impl MemSlice {
    pub fn single(base: usize) -> Self {
        Self { base, len: 1 }
    }
}
