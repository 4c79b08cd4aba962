//! Row deduplication.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::reconcile::{MatchedRow, RowKey};

/// Merges rows that are identical on every field except quantity.
///
/// Quantities of merged rows are summed. The output keeps the order in
/// which each distinct row was first seen.
pub fn merge_rows(rows: impl IntoIterator<Item = MatchedRow>) -> Vec<MatchedRow> {
    let mut index: HashMap<RowKey, usize> = HashMap::new();
    let mut merged: Vec<MatchedRow> = Vec::new();

    for row in rows {
        match index.entry(row.key()) {
            Entry::Occupied(slot) => merged[*slot.get()].quantity += row.quantity,
            Entry::Vacant(slot) => {
                slot.insert(merged.len());
                merged.push(row);
            }
        }
    }

    merged
}

/// Sum of quantities over a row set.
pub fn total_quantity(rows: &[MatchedRow]) -> u64 {
    rows.iter().map(|row| row.quantity).sum()
}
