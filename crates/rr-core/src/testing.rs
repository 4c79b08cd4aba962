//! Event fixtures shared by unit tests.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};

use crate::event::Event;
use crate::state::MachineState;
use crate::types::{EventId, MachineId, ProductId};

/// A labelled event. Machine `mN` is labelled "Machine #N".
pub fn event(
    id: &str,
    product: &str,
    machine: &str,
    state: MachineState,
    quantity: u64,
    occurred_at: DateTime<Utc>,
) -> Event {
    Event {
        id: EventId::new(id).unwrap(),
        product_id: ProductId::new(product).unwrap(),
        machine_id: MachineId::new(machine).unwrap(),
        state,
        quantity,
        occurred_at,
        closed_at: None,
        product_label: Some(format!("Product {product}")),
        machine_label: Some(format!("Machine #{}", machine.trim_start_matches('m'))),
    }
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    at_secs(hour, minute, 0)
}

pub fn at_secs(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 4, hour, minute, second)
        .single()
        .expect("valid test timestamp")
}

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid test time")
}
