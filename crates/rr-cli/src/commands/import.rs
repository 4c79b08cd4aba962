//! Import command for loading products, machines and events into `SQLite`.
//!
//! Input is JSONL, one record per line, tagged by `kind`:
//!
//! ```text
//! {"kind":"product","id":"p1","name":"Widget","category":"plastics"}
//! {"kind":"machine","id":"m1","name":"Press #3"}
//! {"kind":"event","product_id":"p1","machine_id":"m1","state":"on","quantity":5,"occurred_at":"2025-03-04T09:00:00Z"}
//! ```

use std::io::BufRead;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rr_core::{EventId, MachineId, MachineState, ProductId};
use rr_db::{EventRecord, MachineRecord, ProductRecord};
use serde::Deserialize;

use crate::Config;
use crate::commands::util::open_database;

/// Counts reported after an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub products: usize,
    pub machines: usize,
    pub events_read: usize,
    pub events_inserted: usize,
}

/// Parsed contents of an import stream.
#[derive(Debug, Default)]
struct ImportBatch {
    products: Vec<ProductRecord>,
    machines: Vec<MachineRecord>,
    events: Vec<EventRecord>,
}

pub fn run<R: BufRead>(reader: R, config: &Config) -> Result<ImportSummary> {
    let batch = parse_lines(reader)?;

    let mut db = open_database(config)?;
    let products = db.upsert_products(&batch.products)?;
    let machines = db.upsert_machines(&batch.machines)?;
    let events_inserted = db.insert_events(&batch.events)?;

    let summary = ImportSummary {
        products,
        machines,
        events_read: batch.events.len(),
        events_inserted,
    };
    tracing::debug!(?summary, "import finished");
    Ok(summary)
}

fn parse_lines<R: BufRead>(reader: R) -> Result<ImportBatch> {
    let mut batch = ImportBatch::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed: ImportLine = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid record on line {}", idx + 1))?;
        match parsed {
            ImportLine::Product { id, name, category } => batch.products.push(ProductRecord {
                id,
                name,
                category: category.filter(|c| !c.trim().is_empty()),
            }),
            ImportLine::Machine { id, name } => batch.machines.push(MachineRecord { id, name }),
            ImportLine::Event(event) => batch.events.push(event.into_record()?),
        }
    }
    Ok(batch)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ImportLine {
    Product {
        id: ProductId,
        name: String,
        #[serde(default)]
        category: Option<String>,
    },
    Machine {
        id: MachineId,
        name: String,
    },
    Event(ImportEvent),
}

#[derive(Debug, Deserialize)]
struct ImportEvent {
    #[serde(default)]
    id: Option<EventId>,
    product_id: ProductId,
    machine_id: MachineId,
    state: MachineState,
    quantity: u64,
    occurred_at: DateTime<Utc>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
}

impl ImportEvent {
    fn into_record(self) -> Result<EventRecord> {
        let id = match self.id {
            Some(id) => id,
            None => EventId::new(uuid::Uuid::new_v4().to_string())?,
        };
        Ok(EventRecord {
            id,
            product_id: self.product_id,
            machine_id: self.machine_id,
            state: self.state,
            quantity: self.quantity,
            occurred_at: self.occurred_at,
            closed_at: self.closed_at,
        })
    }
}
