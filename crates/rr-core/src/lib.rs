//! Core domain logic for machine run reports.
//!
//! This crate contains the fundamental types and logic for:
//! - Grouping: partitioning ON/OFF events by product and machine
//! - Reconciliation: pairing ON and OFF quantities into production runs
//! - Aggregation: merging identical rows and totalling quantities

mod aggregate;
pub mod event;
mod grouping;
mod reconcile;
mod report;
mod state;
mod types;

#[cfg(test)]
mod testing;

pub use aggregate::{merge_rows, total_quantity};
pub use event::{Event, machine_number};
pub use grouping::{EventGroup, GroupKey, Grouping, group_events};
pub use reconcile::{MatchedRow, RowKey, reconcile_group};
pub use report::{
    FallbackRow, NO_EVENTS_MESSAGE, ReportBody, ReportError, ReportRecord, ReportScope,
    UsageReport, build_report,
};
pub use state::{MachineState, UnknownState};
pub use types::{EventId, MachineId, ProductId, ValidationError};
