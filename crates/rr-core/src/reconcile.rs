//! ON/OFF reconciliation.
//!
//! Rebuilds production runs from the ON and OFF events of one group using a
//! two-pointer greedy merge:
//!
//! 1. Pair the earliest ON that still has quantity with the earliest OFF that
//!    still has quantity (FIFO: first started, first finished)
//! 2. Emit a row for the smaller of the two remaining quantities and deduct
//!    it from both sides, splitting an event across several rows if needed
//! 3. Report leftover ON quantity as open runs without an OFF time
//!
//! Surplus OFF quantity has no start to pair with and produces no row.
//! Event quantities are never modified; remaining amounts live in a ledger
//! indexed alongside the event slices.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde::Serialize;

use crate::event::Event;
use crate::grouping::EventGroup;

/// A reconciled run segment or an open run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MatchedRow {
    pub product_label: String,
    pub machine_number: String,
    /// Calendar day of the ON time in the report time zone.
    pub date: NaiveDate,
    /// ON time truncated to the minute.
    pub on_time: NaiveTime,
    /// Close time truncated to the minute, `None` for an open run.
    pub off_time: Option<NaiveTime>,
    /// Run length in rounded minutes. `None` for open runs and zero-length runs.
    ///
    /// Computed from the unrounded instants, not from the displayed times.
    pub total_minutes: Option<i64>,
    pub quantity: u64,
}

/// Every field of a [`MatchedRow`] except its quantity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub product_label: String,
    pub machine_number: String,
    pub date: NaiveDate,
    pub on_time: NaiveTime,
    pub off_time: Option<NaiveTime>,
    pub total_minutes: Option<i64>,
}

impl MatchedRow {
    /// Returns the merge key of this row.
    pub fn key(&self) -> RowKey {
        RowKey {
            product_label: self.product_label.clone(),
            machine_number: self.machine_number.clone(),
            date: self.date,
            on_time: self.on_time,
            off_time: self.off_time,
            total_minutes: self.total_minutes,
        }
    }

    fn paired<Tz: TimeZone>(
        group: &EventGroup<'_>,
        on: &Event,
        off: &Event,
        quantity: u64,
        tz: &Tz,
    ) -> Self {
        let start = local_minute(on.occurred_at, tz);
        let end = local_minute(off.close_time(), tz);
        let minutes = rounded_minutes(on.occurred_at, off.close_time());
        Self {
            product_label: group.product_label.to_string(),
            machine_number: group.machine_number.clone(),
            date: start.date(),
            on_time: start.time(),
            off_time: Some(end.time()),
            total_minutes: (minutes != 0).then_some(minutes),
            quantity,
        }
    }

    fn open<Tz: TimeZone>(group: &EventGroup<'_>, on: &Event, quantity: u64, tz: &Tz) -> Self {
        let start = local_minute(on.occurred_at, tz);
        Self {
            product_label: group.product_label.to_string(),
            machine_number: group.machine_number.clone(),
            date: start.date(),
            on_time: start.time(),
            off_time: None,
            total_minutes: None,
            quantity,
        }
    }
}

/// Converts a UTC instant to local wall-clock time truncated to the minute.
pub(crate) fn local_minute<Tz: TimeZone>(instant: DateTime<Utc>, tz: &Tz) -> NaiveDateTime {
    let local = instant.with_timezone(tz).naive_local();
    local
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(local)
}

/// Minutes between two instants, rounded half up.
fn rounded_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let ms = end.signed_duration_since(start).num_milliseconds();
    (ms + 30_000).div_euclid(60_000)
}

/// Reconciles one group's ON and OFF events into rows.
///
/// `group.on` and `group.off` must be sorted by `occurred_at` ascending, as
/// produced by [`crate::group_events`]. Rows are emitted in pairing order,
/// followed by open runs in ON order.
pub fn reconcile_group<Tz: TimeZone>(group: &EventGroup<'_>, tz: &Tz) -> Vec<MatchedRow> {
    let mut on_remaining: Vec<u64> = group.on.iter().map(|e| e.quantity).collect();
    let mut off_remaining: Vec<u64> = group.off.iter().map(|e| e.quantity).collect();
    let mut rows = Vec::new();
    let mut i = 0;
    let mut j = 0;

    while i < group.on.len() && j < group.off.len() {
        let pair_qty = on_remaining[i].min(off_remaining[j]);
        if pair_qty > 0 {
            rows.push(MatchedRow::paired(
                group,
                group.on[i],
                group.off[j],
                pair_qty,
                tz,
            ));
            on_remaining[i] -= pair_qty;
            off_remaining[j] -= pair_qty;
        }

        let on_done = on_remaining[i] == 0;
        let off_done = off_remaining[j] == 0;
        debug_assert!(
            on_done || off_done,
            "pairing made no progress at on[{i}], off[{j}]"
        );
        if !on_done && !off_done {
            tracing::error!(
                product_id = %group.key.product_id,
                machine_id = %group.key.machine_id,
                on_event = %group.on[i].id,
                off_event = %group.off[j].id,
                "pairing made no progress; stopping reconciliation for group"
            );
            break;
        }
        if on_done {
            i += 1;
        }
        if off_done {
            j += 1;
        }
    }

    let absorbed: u64 = off_remaining[j..].iter().sum();
    if absorbed > 0 {
        tracing::debug!(
            product_id = %group.key.product_id,
            machine_id = %group.key.machine_id,
            absorbed,
            "OFF quantity without a matching ON"
        );
    }

    for (on, &remaining) in group.on[i..].iter().zip(&on_remaining[i..]) {
        if remaining > 0 {
            rows.push(MatchedRow::open(group, on, remaining, tz));
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::group_events;
    use crate::state::MachineState::{Off, On};
    use crate::testing::{at, at_secs, event, hm};

    fn reconcile_all(events: &[Event]) -> Vec<MatchedRow> {
        group_events(events)
            .groups
            .iter()
            .flat_map(|group| reconcile_group(group, &Utc))
            .collect()
    }

    fn summary(rows: &[MatchedRow]) -> Vec<(u64, NaiveTime, Option<NaiveTime>, Option<i64>)> {
        rows.iter()
            .map(|r| (r.quantity, r.on_time, r.off_time, r.total_minutes))
            .collect()
    }

    #[test]
    fn exact_match_produces_single_row() {
        let events = vec![
            event("on", "p1", "m1", On, 5, at(9, 0)),
            event("off", "p1", "m1", Off, 5, at(9, 30)),
        ];

        let rows = reconcile_all(&events);

        assert_eq!(summary(&rows), vec![(5, hm(9, 0), Some(hm(9, 30)), Some(30))]);
        assert_eq!(rows[0].product_label, "Product p1");
        assert_eq!(rows[0].machine_number, "1");
        assert_eq!(rows[0].date, at(9, 0).date_naive());
    }

    #[test]
    fn partial_split_across_two_offs() {
        let events = vec![
            event("on", "p1", "m1", On, 10, at(9, 0)),
            event("off-1", "p1", "m1", Off, 4, at(9, 15)),
            event("off-2", "p1", "m1", Off, 6, at(9, 45)),
        ];

        let rows = reconcile_all(&events);

        assert_eq!(
            summary(&rows),
            vec![
                (4, hm(9, 0), Some(hm(9, 15)), Some(15)),
                (6, hm(9, 0), Some(hm(9, 45)), Some(45)),
            ]
        );
    }

    #[test]
    fn unmatched_on_has_no_off_time() {
        let events = vec![event("on", "p1", "m1", On, 3, at(9, 0))];

        let rows = reconcile_all(&events);

        assert_eq!(summary(&rows), vec![(3, hm(9, 0), None, None)]);
    }

    #[test]
    fn surplus_off_is_absorbed() {
        let events = vec![
            event("on", "p1", "m1", On, 2, at(9, 0)),
            event("off", "p1", "m1", Off, 5, at(9, 10)),
        ];

        let rows = reconcile_all(&events);

        assert_eq!(summary(&rows), vec![(2, hm(9, 0), Some(hm(9, 10)), Some(10))]);
    }

    #[test]
    fn off_only_group_produces_nothing() {
        let events = vec![event("off", "p1", "m1", Off, 5, at(9, 10))];
        assert!(reconcile_all(&events).is_empty());
    }

    #[test]
    fn pairing_is_fifo() {
        let events = vec![
            event("on-b", "p1", "m1", On, 1, at(10, 0)),
            event("off-b", "p1", "m1", Off, 1, at(10, 20)),
            event("on-a", "p1", "m1", On, 1, at(9, 0)),
            event("off-a", "p1", "m1", Off, 1, at(9, 5)),
        ];

        let rows = reconcile_all(&events);

        assert_eq!(
            summary(&rows),
            vec![
                (1, hm(9, 0), Some(hm(9, 5)), Some(5)),
                (1, hm(10, 0), Some(hm(10, 20)), Some(20)),
            ]
        );
    }

    #[test]
    fn one_off_closes_several_ons() {
        let events = vec![
            event("on-1", "p1", "m1", On, 3, at(9, 0)),
            event("on-2", "p1", "m1", On, 4, at(9, 10)),
            event("off", "p1", "m1", Off, 5, at(9, 40)),
        ];

        let rows = reconcile_all(&events);

        assert_eq!(
            summary(&rows),
            vec![
                (3, hm(9, 0), Some(hm(9, 40)), Some(40)),
                (2, hm(9, 10), Some(hm(9, 40)), Some(30)),
                (2, hm(9, 10), None, None),
            ]
        );
    }

    #[test]
    fn zero_quantity_events_are_skipped() {
        let events = vec![
            event("on-0", "p1", "m1", On, 0, at(8, 0)),
            event("off-0", "p1", "m1", Off, 0, at(8, 30)),
            event("on", "p1", "m1", On, 2, at(9, 0)),
            event("off", "p1", "m1", Off, 2, at(9, 30)),
        ];

        let rows = reconcile_all(&events);

        assert_eq!(summary(&rows), vec![(2, hm(9, 0), Some(hm(9, 30)), Some(30))]);
    }

    #[test]
    fn close_time_overrides_occurred_at() {
        let mut off = event("off", "p1", "m1", Off, 5, at(9, 30));
        off.closed_at = Some(at(9, 50));
        let events = vec![event("on", "p1", "m1", On, 5, at(9, 0)), off];

        let rows = reconcile_all(&events);

        assert_eq!(summary(&rows), vec![(5, hm(9, 0), Some(hm(9, 50)), Some(50))]);
    }

    #[test]
    fn times_truncate_but_minutes_round() {
        let events = vec![
            event("on", "p1", "m1", On, 1, at_secs(9, 0, 50)),
            event("off", "p1", "m1", Off, 1, at_secs(9, 10, 40)),
        ];

        let rows = reconcile_all(&events);

        // 9m50s rounds to 10
        assert_eq!(summary(&rows), vec![(1, hm(9, 0), Some(hm(9, 10)), Some(10))]);
    }

    #[test]
    fn sub_half_minute_run_has_no_duration() {
        let events = vec![
            event("on", "p1", "m1", On, 1, at_secs(9, 0, 0)),
            event("off", "p1", "m1", Off, 1, at_secs(9, 0, 20)),
        ];

        let rows = reconcile_all(&events);

        assert_eq!(summary(&rows), vec![(1, hm(9, 0), Some(hm(9, 0)), None)]);
    }

    #[test]
    fn duration_ignores_displayed_minute_boundaries() {
        let events = vec![
            event("on", "p1", "m1", On, 1, at_secs(9, 0, 59)),
            event("off", "p1", "m1", Off, 1, at_secs(9, 1, 10)),
        ];

        let rows = reconcile_all(&events);

        // 11 seconds apart even though the shown times differ by a minute
        assert_eq!(summary(&rows), vec![(1, hm(9, 0), Some(hm(9, 1)), None)]);
    }

    #[test]
    fn groups_do_not_pair_across_machines() {
        let events = vec![
            event("on", "p1", "m1", On, 4, at(9, 0)),
            event("off", "p1", "m2", Off, 4, at(9, 30)),
        ];

        let rows = reconcile_all(&events);

        assert_eq!(summary(&rows), vec![(4, hm(9, 0), None, None)]);
    }

    #[test]
    fn date_and_time_follow_time_zone() {
        let events = vec![
            event("on", "p1", "m1", On, 1, at(23, 30)),
            event("off", "p1", "m1", Off, 1, at(23, 50)),
        ];
        let tz = chrono::FixedOffset::east_opt(2 * 3600).unwrap();

        let grouping = group_events(&events);
        let rows = reconcile_group(&grouping.groups[0], &tz);

        assert_eq!(rows[0].date, at(23, 30).date_naive().succ_opt().unwrap());
        assert_eq!(rows[0].on_time, hm(1, 30));
        assert_eq!(rows[0].off_time, Some(hm(1, 50)));
        assert_eq!(rows[0].total_minutes, Some(20));
    }

    #[test]
    fn quantity_is_conserved_per_group() {
        let events = vec![
            event("on-1", "p1", "m1", On, 7, at(8, 0)),
            event("off-1", "p1", "m1", Off, 3, at(8, 20)),
            event("on-2", "p1", "m1", On, 5, at(8, 30)),
            event("off-2", "p1", "m1", Off, 2, at(8, 45)),
            event("off-3", "p1", "m1", Off, 4, at(9, 0)),
            event("on-3", "p1", "m1", On, 6, at(9, 10)),
        ];

        let rows = reconcile_all(&events);
        let emitted: u64 = rows.iter().map(|r| r.quantity).sum();

        assert_eq!(emitted, 7 + 5 + 6);
    }

    #[test]
    fn generated_batches_conserve_quantity() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let len = rng.gen_range(1..=8);
            let events: Vec<Event> = (0..len)
                .map(|i| {
                    let machine = if rng.gen_bool(0.5) { "m1" } else { "m2" };
                    let state = if rng.gen_bool(0.5) { On } else { Off };
                    let offset = chrono::Duration::seconds(rng.gen_range(0..4 * 3600));
                    let quantity = rng.gen_range(1..=10);
                    event(&format!("e{i}"), "p1", machine, state, quantity, at(8, 0) + offset)
                })
                .collect();

            let grouping = group_events(&events);
            for group in &grouping.groups {
                let rows = reconcile_group(group, &Utc);
                let on_total: u64 = group.on.iter().map(|e| e.quantity).sum();
                let off_total: u64 = group.off.iter().map(|e| e.quantity).sum();
                let emitted: u64 = rows.iter().map(|r| r.quantity).sum();
                let closed: u64 = rows
                    .iter()
                    .filter(|r| r.off_time.is_some())
                    .map(|r| r.quantity)
                    .sum();

                assert_eq!(emitted, on_total, "events: {events:?}");
                assert!(closed <= off_total, "events: {events:?}");
                assert!(rows.iter().all(|r| r.quantity > 0));
                assert_eq!(rows, reconcile_group(group, &Utc));
            }

            let report = crate::report::build_report(&events, &Utc);
            assert!(!matches!(
                report.body,
                crate::report::ReportBody::Placeholder(_)
            ));
        }
    }

    #[test]
    fn reconciliation_is_deterministic() {
        let events = vec![
            event("on-1", "p1", "m1", On, 3, at(9, 0)),
            event("on-2", "p1", "m1", On, 3, at(9, 0)),
            event("off-1", "p1", "m1", Off, 4, at(9, 20)),
            event("off-2", "p1", "m1", Off, 1, at(9, 20)),
        ];

        assert_eq!(reconcile_all(&events), reconcile_all(&events));
    }
}
