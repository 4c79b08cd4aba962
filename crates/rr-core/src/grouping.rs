//! Partitioning of events into (product, machine) groups.

use std::collections::HashMap;

use crate::event::Event;
use crate::state::MachineState;
use crate::types::{MachineId, ProductId};

/// Composite key identifying one product running on one machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub product_id: ProductId,
    pub machine_id: MachineId,
}

/// Events of a single group, split by state and sorted by `occurred_at`.
#[derive(Debug, Clone)]
pub struct EventGroup<'a> {
    pub key: GroupKey,
    pub product_label: &'a str,
    pub machine_number: String,
    pub on: Vec<&'a Event>,
    pub off: Vec<&'a Event>,
}

/// Result of grouping a batch of events.
#[derive(Debug, Clone, Default)]
pub struct Grouping<'a> {
    /// Groups in order of first appearance in the input.
    pub groups: Vec<EventGroup<'a>>,
    /// Number of events skipped because their product or machine is unknown.
    pub dropped: usize,
}

/// Groups events by (product, machine).
///
/// Events without a resolved product or machine label are skipped and
/// counted. Within a group the ON and OFF sequences are stably sorted by
/// `occurred_at`, so equal timestamps keep their input order.
pub fn group_events(events: &[Event]) -> Grouping<'_> {
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut grouping = Grouping::default();

    for event in events {
        let (Some(product_label), Some(_)) = (&event.product_label, &event.machine_label) else {
            tracing::warn!(
                event_id = %event.id,
                product_id = %event.product_id,
                machine_id = %event.machine_id,
                "skipping event with unknown product or machine"
            );
            grouping.dropped += 1;
            continue;
        };

        let key = GroupKey {
            product_id: event.product_id.clone(),
            machine_id: event.machine_id.clone(),
        };
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            grouping.groups.push(EventGroup {
                key,
                product_label,
                machine_number: event.machine_number(),
                on: Vec::new(),
                off: Vec::new(),
            });
            grouping.groups.len() - 1
        });

        let group = &mut grouping.groups[slot];
        match event.state {
            MachineState::On => group.on.push(event),
            MachineState::Off => group.off.push(event),
        }
    }

    for group in &mut grouping.groups {
        group.on.sort_by_key(|event| event.occurred_at);
        group.off.sort_by_key(|event| event.occurred_at);
    }

    grouping
}
