use std::collections::HashMap;

use tracing::debug;

use crate::types::{Action, DataField, FieldKind, KeyField, Match};
use crate::HwError;

/// A single in-memory match-action table.
///
/// Schema is learned lazily: the field kinds used in the first `add` to
/// ever reference a given key/data field name become that field's
/// expected kind for the table's lifetime. A later operation that reuses
/// the same field name with a different kind is a `TypeMismatch` — the
/// same class of bug `bfrt_agent.py`'s `check_type` catches against the
/// P4 program's declared schema, which this in-memory stand-in does not
/// have access to.
#[derive(Default)]
struct Table {
    key_schema: HashMap<String, FieldKind>,
    data_schema: HashMap<String, FieldKind>,
    rows: HashMap<Vec<(String, String)>, (Match, Action)>,
}

fn key_fingerprint(m: &Match) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = m
        .fields()
        .iter()
        .map(|f| (f.name().to_owned(), format!("{:?}", f)))
        .collect();
    out.sort();
    out
}

impl Table {
    fn check_and_learn_key(&mut self, key: &Match) -> Result<(), HwError> {
        for field in key.fields() {
            match self.key_schema.get(field.name()) {
                Some(kind) if *kind != field.kind() => {
                    return Err(HwError::TypeMismatch(format!(
                        "key field '{}' previously used as {:?}, now {:?}",
                        field.name(),
                        kind,
                        field.kind()
                    )));
                }
                Some(_) => {}
                None => {
                    self.key_schema.insert(field.name().to_owned(), field.kind());
                }
            }
        }
        Ok(())
    }

    fn check_and_learn_data(&mut self, action: &Action) -> Result<(), HwError> {
        for field in &action.data {
            match self.data_schema.get(field.name()) {
                Some(kind) if *kind != field.kind() => {
                    return Err(HwError::TypeMismatch(format!(
                        "data field '{}' previously used as {:?}, now {:?}",
                        field.name(),
                        kind,
                        field.kind()
                    )));
                }
                Some(_) => {}
                None => {
                    self.data_schema
                        .insert(field.name().to_owned(), field.kind());
                }
            }
        }
        Ok(())
    }
}

/// An in-process stand-in for the real switch-agent gRPC client.
///
/// Every table named in §3 of the control-plane spec ends up here:
/// `packet_replication`, `av1_template_id_mod_lookup`, `pre.node`,
/// `pre.mgid`, `pre.prune`, `pre.ipv4_route`, plus the planned-but-unused
/// `nack_pli_forwarding` / `recv_report_forwarding` /
/// `video_layer_suppression` tables. Tables are created on first
/// `load_table` and live for the process lifetime.
#[derive(Default)]
pub struct InMemoryRuntimeClient {
    tables: HashMap<String, Table>,
}

impl InMemoryRuntimeClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut Table, HwError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| HwError::RuntimeFailure(format!("table '{table}' not loaded")))
    }
}

impl crate::RuntimeClient for InMemoryRuntimeClient {
    fn load_table(&mut self, table: &str) -> Result<(), HwError> {
        if self.tables.contains_key(table) {
            return Err(HwError::RuntimeFailure(format!(
                "table '{table}' already loaded"
            )));
        }
        debug!(table, "loaded table");
        self.tables.insert(table.to_owned(), Table::default());
        Ok(())
    }

    fn add(&mut self, table: &str, key: &Match, action: &Action) -> Result<(), HwError> {
        let t = self.table_mut(table)?;
        t.check_and_learn_key(key)?;
        t.check_and_learn_data(action)?;
        let fp = key_fingerprint(key);
        if t.rows.contains_key(&fp) {
            return Err(HwError::RuntimeFailure(format!(
                "table '{table}': entry already exists for key {fp:?}"
            )));
        }
        t.rows.insert(fp, (key.clone(), action.clone()));
        Ok(())
    }

    fn modify(&mut self, table: &str, key: &Match, action: &Action) -> Result<(), HwError> {
        let t = self.table_mut(table)?;
        t.check_and_learn_key(key)?;
        t.check_and_learn_data(action)?;
        let fp = key_fingerprint(key);
        if !t.rows.contains_key(&fp) {
            return Err(HwError::RuntimeFailure(format!(
                "table '{table}': no entry to modify for key {fp:?}"
            )));
        }
        t.rows.insert(fp, (key.clone(), action.clone()));
        Ok(())
    }

    fn delete(&mut self, table: &str, key: &Match) -> Result<(), HwError> {
        let t = self.table_mut(table)?;
        t.check_and_learn_key(key)?;
        let fp = key_fingerprint(key);
        if t.rows.remove(&fp).is_none() {
            return Err(HwError::RuntimeFailure(format!(
                "table '{table}': no entry to delete for key {fp:?}"
            )));
        }
        Ok(())
    }

    fn get(&mut self, table: &str, key: &Match) -> Result<(Match, Action), HwError> {
        let t = self.table_mut(table)?;
        let fp = key_fingerprint(key);
        t.rows
            .get(&fp)
            .cloned()
            .ok_or_else(|| HwError::RuntimeFailure(format!("table '{table}': key not found")))
    }

    fn get_all(&mut self, table: &str) -> Result<Vec<(Match, Action)>, HwError> {
        let t = self.table_mut(table)?;
        Ok(t.rows.values().cloned().collect())
    }

    fn flush(&mut self, table: &str) -> Result<(), HwError> {
        let t = self.table_mut(table)?;
        t.rows.clear();
        Ok(())
    }
}
