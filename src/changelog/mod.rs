pub mod record;

use crate::catalog::Catalog;
use crate::changelog::record::{ChangeEntry, ChangePayload, ChangeRecord, ChangeTarget};
use parking_lot::RwLock;
use tracing::warn;

/// Append-only change ledger. Records are never updated or removed.
#[derive(Debug, Default)]
pub struct ChangeLedger {
    records: RwLock<Vec<ChangeRecord>>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends all records in one step; readers see all of them or none.
    /// Returns the assigned change ids.
    pub fn append(&self, records: Vec<ChangeRecord>) -> Vec<u64> {
        if records.is_empty() {
            return Vec::new();
        }
        let mut stored = self.records.write();
        let mut ids = Vec::with_capacity(records.len());
        for mut record in records {
            record.change_id = stored.len() as u64 + 1;
            ids.push(record.change_id);
            stored.push(record);
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Cell-target history of one cell, oldest first.
    pub fn list_for_cell(
        &self,
        catalog: &Catalog,
        table_id: &str,
        column_id: &str,
        row_id: i64,
    ) -> Vec<ChangeEntry> {
        let selected: Vec<ChangeRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| {
                r.target == ChangeTarget::Cell
                    && r.table_id.as_deref() == Some(table_id)
                    && r.column_id.as_deref() == Some(column_id)
                    && r.row_id == Some(row_id)
            })
            .cloned()
            .collect();
        join_actors(catalog, selected)
    }

    /// Row and column history of a table, oldest first. Any other payload
    /// stored under a table target is skipped.
    pub fn list_for_table(&self, catalog: &Catalog, table_id: &str) -> Vec<ChangeEntry> {
        let selected: Vec<ChangeRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| r.target == ChangeTarget::Table && r.table_id.as_deref() == Some(table_id))
            .filter(|r| matches!(r.payload, ChangePayload::Row(_) | ChangePayload::Column(_)))
            .cloned()
            .collect();
        join_actors(catalog, selected)
    }
}

/// Inner join with the user directory, then a stable sort by time so
/// records sharing a timestamp keep their append order.
fn join_actors(catalog: &Catalog, records: Vec<ChangeRecord>) -> Vec<ChangeEntry> {
    let mut entries: Vec<ChangeEntry> = records
        .into_iter()
        .filter_map(|record| match catalog.user(record.actor_id) {
            Ok(actor) => Some(ChangeEntry {
                actor: actor.clone(),
                record,
            }),
            Err(_) => {
                warn!(
                    change_id = record.change_id,
                    actor_id = record.actor_id,
                    "change record references unknown actor"
                );
                None
            }
        })
        .collect();
    entries.sort_by_key(|e| e.record.changed_at_nanos);
    entries
}
