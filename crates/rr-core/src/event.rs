//! Machine state-change events.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::state::MachineState;
use crate::types::{EventId, MachineId, ProductId};

/// Digits directly after a `#` marker, e.g. "Press #12".
static HASH_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\s*(\d+)").expect("valid regex"));

/// Trailing digits, e.g. "Press 12".
static TRAILING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*$").expect("valid regex"));

/// A recorded ON/OFF state change for one product on one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub product_id: ProductId,
    pub machine_id: MachineId,
    pub state: MachineState,
    /// Units of work carried by this event.
    pub quantity: u64,
    /// When the state change was recorded.
    pub occurred_at: DateTime<Utc>,
    /// Actual close time of a run. Only meaningful for OFF events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Display name of the product, `None` if the product is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_label: Option<String>,
    /// Display name of the machine, `None` if the machine is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_label: Option<String>,
}

impl Event {
    /// The time this event closes a run: `closed_at` when present, else `occurred_at`.
    pub fn close_time(&self) -> DateTime<Utc> {
        self.closed_at.unwrap_or(self.occurred_at)
    }

    /// Machine designator extracted from the machine label.
    pub fn machine_number(&self) -> String {
        self.machine_label
            .as_deref()
            .map(machine_number)
            .unwrap_or_default()
    }
}

/// Extracts the numeric machine designator from a display label.
///
/// Prefers the first digit run after a `#`, then a trailing digit run.
/// Returns an empty string when the label carries no number.
pub fn machine_number(label: &str) -> String {
    HASH_NUMBER_RE
        .captures(label)
        .or_else(|| TRAILING_NUMBER_RE.captures(label))
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}
