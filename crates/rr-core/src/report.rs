//! Usage report assembly.
//!
//! Runs the grouping, reconciliation and merge stages over one batch of
//! events and applies the empty-result policy: when reconciliation yields no
//! rows but events exist, every event is listed on its own; when there are
//! no events at all, a single placeholder row explains the empty report.

use chrono::{NaiveDate, NaiveTime, TimeZone};
use serde::Serialize;
use thiserror::Error;

use crate::aggregate::{merge_rows, total_quantity};
use crate::event::Event;
use crate::grouping::group_events;
use crate::reconcile::{MatchedRow, local_minute, reconcile_group};
use crate::state::MachineState;

/// Message carried by the placeholder row of an empty report.
pub const NO_EVENTS_MESSAGE: &str = "No production events recorded for this period.";

/// Errors raised while preparing a report request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReportError {
    /// A category-scoped report was requested without a category.
    #[error("a category is required for a category report")]
    MissingCategory,
}

/// Which events a report covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportScope {
    /// Every product.
    All,
    /// Products of one category.
    Category(String),
}

impl ReportScope {
    /// Builds the scope for a report.
    ///
    /// A category-scoped report needs a non-blank category; a report over
    /// all products ignores `category`.
    pub fn resolve(category_scoped: bool, category: Option<&str>) -> Result<Self, ReportError> {
        if !category_scoped {
            return Ok(Self::All);
        }
        match category.map(str::trim) {
            Some(category) if !category.is_empty() => Ok(Self::Category(category.to_string())),
            _ => Err(ReportError::MissingCategory),
        }
    }

    /// The category filter, if any.
    pub fn category(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Category(category) => Some(category),
        }
    }
}

/// Best-effort row for a single event, used when reconciliation yields nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackRow {
    pub product_label: String,
    pub machine_number: String,
    pub date: NaiveDate,
    pub on_time: Option<NaiveTime>,
    pub off_time: Option<NaiveTime>,
    pub quantity: u64,
}

impl FallbackRow {
    fn from_event<Tz: TimeZone>(event: &Event, tz: &Tz) -> Self {
        let (when, on_time, off_time) = match event.state {
            MachineState::On => {
                let when = local_minute(event.occurred_at, tz);
                (when, Some(when.time()), None)
            }
            MachineState::Off => {
                let when = local_minute(event.close_time(), tz);
                (when, None, Some(when.time()))
            }
        };
        Self {
            product_label: event.product_label.clone().unwrap_or_default(),
            machine_number: event.machine_number(),
            date: when.date(),
            on_time,
            off_time,
            quantity: event.quantity,
        }
    }
}

/// The rows of a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportBody {
    /// Reconciled and merged runs.
    Matched(Vec<MatchedRow>),
    /// One row per raw event.
    Fallback(Vec<FallbackRow>),
    /// No events existed; carries the explanation shown in place of rows.
    Placeholder(String),
}

impl ReportBody {
    /// Number of rows, counting a placeholder as one.
    pub fn row_count(&self) -> usize {
        match self {
            Self::Matched(rows) => rows.len(),
            Self::Fallback(rows) => rows.len(),
            Self::Placeholder(_) => 1,
        }
    }

    fn total_quantity(&self) -> u64 {
        match self {
            Self::Matched(rows) => total_quantity(rows),
            Self::Fallback(rows) => rows.iter().map(|row| row.quantity).sum(),
            Self::Placeholder(_) => 0,
        }
    }
}

/// A computed usage report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageReport {
    pub body: ReportBody,
    /// Sum of quantities over the rows.
    pub total_quantity: u64,
    /// Number of events the report was built from.
    pub event_count: usize,
    /// Events skipped because their product or machine is unknown.
    pub dropped_events: usize,
}

/// One report row flattened to display strings, ready for a tabular sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRecord {
    pub product: String,
    pub machine: String,
    pub date: String,
    pub on_time: String,
    pub off_time: String,
    pub total_minutes: String,
    pub quantity: Option<u64>,
}

fn format_time(time: Option<NaiveTime>) -> String {
    time.map(|t| t.format("%H:%M").to_string())
        .unwrap_or_default()
}

impl From<&MatchedRow> for ReportRecord {
    fn from(row: &MatchedRow) -> Self {
        Self {
            product: row.product_label.clone(),
            machine: row.machine_number.clone(),
            date: row.date.format("%Y-%m-%d").to_string(),
            on_time: format_time(Some(row.on_time)),
            off_time: format_time(row.off_time),
            total_minutes: row
                .total_minutes
                .map(|minutes| minutes.to_string())
                .unwrap_or_default(),
            quantity: Some(row.quantity),
        }
    }
}

impl From<&FallbackRow> for ReportRecord {
    fn from(row: &FallbackRow) -> Self {
        Self {
            product: row.product_label.clone(),
            machine: row.machine_number.clone(),
            date: row.date.format("%Y-%m-%d").to_string(),
            on_time: format_time(row.on_time),
            off_time: format_time(row.off_time),
            total_minutes: String::new(),
            quantity: Some(row.quantity),
        }
    }
}

impl UsageReport {
    /// Flattens the report body into display records.
    pub fn records(&self) -> Vec<ReportRecord> {
        match &self.body {
            ReportBody::Matched(rows) => rows.iter().map(ReportRecord::from).collect(),
            ReportBody::Fallback(rows) => rows.iter().map(ReportRecord::from).collect(),
            ReportBody::Placeholder(message) => vec![ReportRecord {
                product: message.clone(),
                machine: String::new(),
                date: String::new(),
                on_time: String::new(),
                off_time: String::new(),
                total_minutes: String::new(),
                quantity: None,
            }],
        }
    }
}

/// Builds a usage report from a batch of already-filtered events.
///
/// Dates and times in the rows are wall-clock values in `tz`.
pub fn build_report<Tz: TimeZone>(events: &[Event], tz: &Tz) -> UsageReport {
    let grouping = group_events(events);
    let rows = merge_rows(
        grouping
            .groups
            .iter()
            .flat_map(|group| reconcile_group(group, tz)),
    );

    tracing::debug!(
        events = events.len(),
        groups = grouping.groups.len(),
        rows = rows.len(),
        dropped = grouping.dropped,
        "reconciled events"
    );

    let body = if !rows.is_empty() {
        ReportBody::Matched(rows)
    } else if events.is_empty() {
        ReportBody::Placeholder(NO_EVENTS_MESSAGE.to_string())
    } else {
        tracing::info!(
            events = events.len(),
            "no runs reconciled; listing events individually"
        );
        ReportBody::Fallback(
            events
                .iter()
                .map(|event| FallbackRow::from_event(event, tz))
                .collect(),
        )
    };

    UsageReport {
        total_quantity: body.total_quantity(),
        body,
        event_count: events.len(),
        dropped_events: grouping.dropped,
    }
}
