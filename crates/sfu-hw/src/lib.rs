//! `sfu-hw`: the Runtime Client (RC) contract.
//!
//! Abstracts the concrete hardware driver — out of scope per the system
//! overview — behind a table-operations trait polymorphic over key-match
//! kinds (exact, ternary, LPM, range, boolean) and data kinds (integer,
//! boolean, bytes, string, integer-array, boolean-array, fetch-only).
//! The single concrete implementation shipped here,
//! [`memory::InMemoryRuntimeClient`], stands in for the real gRPC-based
//! switch-agent client the same way the original Python source's
//! `BFRuntimeAgent` stands in for direct driver access — with schema
//! validation performed at `add`/`modify`/`get` time against whatever was
//! registered via `load_table`.

mod memory;
mod types;

pub use memory::InMemoryRuntimeClient;
pub use types::{Action, DataField, FieldKind, KeyField, Match};

/// Errors a [`RuntimeClient`] implementation may raise.
///
/// `TypeMismatch` is a caller bug, detected at construction/validation
/// time. `RuntimeFailure` wraps whatever the underlying table-operation
/// backend reported.
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("runtime failure: {0}")]
    RuntimeFailure(String),
}

/// One installed row, returned by `get`/`get_all`.
pub type Entry = (Match, Action);

/// The table-operation contract exposed by the switch agent.
///
/// A match-action table must be [`load_table`](RuntimeClient::load_table)ed
/// before any other operation against it is valid. Implementations are not
/// required to be internally thread-safe — per §5 of the control-plane
/// spec, the caller serializes operations on a single switch from one task.
pub trait RuntimeClient {
    /// Load a table's schema, making it available for subsequent
    /// operations. Loading an already-loaded table is an error.
    fn load_table(&mut self, table: &str) -> Result<(), HwError>;

    /// Insert a new row. Errors if the key already exists.
    fn add(&mut self, table: &str, key: &Match, action: &Action) -> Result<(), HwError>;

    /// Replace an existing row's action. Errors if the key is absent.
    fn modify(&mut self, table: &str, key: &Match, action: &Action) -> Result<(), HwError>;

    /// Remove a row. Errors if the key is absent.
    fn delete(&mut self, table: &str, key: &Match) -> Result<(), HwError>;

    /// Read back a single row.
    fn get(&mut self, table: &str, key: &Match) -> Result<Entry, HwError>;

    /// Read back every row currently installed in a table.
    fn get_all(&mut self, table: &str) -> Result<Vec<Entry>, HwError>;

    /// Remove every row from a table (used on startup and on SVC
    /// structure changes).
    fn flush(&mut self, table: &str) -> Result<(), HwError>;
}
