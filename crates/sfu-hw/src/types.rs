//! Polymorphic key/data tuples for table-operation construction.
//!
//! Mirrors the `Key`/`Data` class hierarchy of the original BF Runtime
//! agent (`bfrt_agent.py`): every concrete field kind carries its own
//! constructor so a caller can't accidentally build e.g. a boolean field
//! where the table expects an exact-match integer. Rust's type system
//! already prevents most of that at compile time; the remaining runtime
//! check is against a *named* table schema (see [`crate::FieldKind`]),
//! which is only known once a table has been loaded.

use std::fmt;

/// One key field in a match tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyField {
    Exact { name: String, value: u64 },
    Ternary { name: String, value: u64, mask: u64 },
    Lpm { name: String, value: u64, prefix_len: u8 },
    Range { name: String, low: u64, high: u64 },
    Bool { name: String, value: bool },
}

impl KeyField {
    pub fn name(&self) -> &str {
        match self {
            KeyField::Exact { name, .. }
            | KeyField::Ternary { name, .. }
            | KeyField::Lpm { name, .. }
            | KeyField::Range { name, .. }
            | KeyField::Bool { name, .. } => name,
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            KeyField::Exact { .. } => FieldKind::Exact,
            KeyField::Ternary { .. } => FieldKind::Ternary,
            KeyField::Lpm { .. } => FieldKind::Lpm,
            KeyField::Range { .. } => FieldKind::Range,
            KeyField::Bool { .. } => FieldKind::Bool,
        }
    }
}

/// One data field in an action tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum DataField {
    Int { name: String, value: u64 },
    Bool { name: String, value: bool },
    Bytes { name: String, value: Vec<u8> },
    Str { name: String, value: String },
    IntArray { name: String, value: Vec<u64> },
    BoolArray { name: String, value: Vec<bool> },
    /// A field requested for read-back only (`get`), carrying no value.
    FetchOnly { name: String },
}

impl DataField {
    pub fn name(&self) -> &str {
        match self {
            DataField::Int { name, .. }
            | DataField::Bool { name, .. }
            | DataField::Bytes { name, .. }
            | DataField::Str { name, .. }
            | DataField::IntArray { name, .. }
            | DataField::BoolArray { name, .. }
            | DataField::FetchOnly { name } => name,
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            DataField::Int { .. } => FieldKind::Int,
            DataField::Bool { .. } => FieldKind::Bool,
            DataField::Bytes { .. } => FieldKind::Bytes,
            DataField::Str { .. } => FieldKind::Str,
            DataField::IntArray { .. } => FieldKind::IntArray,
            DataField::BoolArray { .. } => FieldKind::BoolArray,
            DataField::FetchOnly { .. } => FieldKind::FetchOnly,
        }
    }
}

/// The kind tag shared by [`KeyField`] and [`DataField`], used to validate
/// a constructed tuple against a table's declared schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Exact,
    Ternary,
    Lpm,
    Range,
    Bool,
    Int,
    Bytes,
    Str,
    IntArray,
    BoolArray,
    FetchOnly,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An ordered tuple of typed key fields, matched against a table's rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Match(pub Vec<KeyField>);

impl Match {
    pub fn new(fields: Vec<KeyField>) -> Self {
        Match(fields)
    }

    pub fn fields(&self) -> &[KeyField] {
        &self.0
    }
}

/// An optional named action function plus an ordered tuple of typed data
/// fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Action {
    pub func: Option<String>,
    pub data: Vec<DataField>,
}

impl Action {
    pub fn new(data: Vec<DataField>) -> Self {
        Action { func: None, data }
    }

    pub fn with_func(func: impl Into<String>, data: Vec<DataField>) -> Self {
        Action {
            func: Some(func.into()),
            data,
        }
    }
}
