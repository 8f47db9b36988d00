//! Punch pairing: turn a day's raw punches into entry/exit pairs.
//!
//! Punches outside the working-hours window are dropped before anything
//! else happens. The pairing itself is greedy with a minimum-gap merge:
//! the exit for an entry is the first later punch at least 30 minutes away,
//! and punches scanned over inside that dead zone are discarded, not reused.
//! An entry with no qualifying exit stays unpaired and the scan advances by
//! one. Downstream reports depend on these exact counts, so the discard
//! behavior is deliberately kept.

use chrono::{NaiveDateTime, NaiveTime};
use serde::Serialize;

/// Working-hours window, inclusive on both ends.
pub const WINDOW_START_HOUR: u32 = 6;
pub const WINDOW_END_HOUR: u32 = 22;

/// Minimum entry-to-exit gap. Closer punches are treated as bounce/noise.
pub const MIN_GAP_MINUTES: i64 = 30;

/// One matched entry/exit pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PunchPair {
    pub entry: NaiveDateTime,
    pub exit: NaiveDateTime,
    pub duration_minutes: i64,
}

/// Pairing result for one employee on one calendar day.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DaySummary {
    pub pairs: Vec<PunchPair>,
    pub total_minutes: i64,
    pub first_entry: Option<NaiveDateTime>,
    pub last_exit: Option<NaiveDateTime>,
    /// Punches inside the window that ended up in no pair.
    pub unpaired: usize,
    pub events_in_window: usize,
}

fn in_window(ts: NaiveDateTime) -> bool {
    let start = NaiveTime::from_hms_opt(WINDOW_START_HOUR, 0, 0).unwrap();
    let end = NaiveTime::from_hms_opt(WINDOW_END_HOUR, 0, 0).unwrap();
    let t = ts.time();
    t >= start && t <= end
}

/// Pair one day's punches for one employee. Input order does not matter.
pub fn pair_day(timestamps: &[NaiveDateTime]) -> DaySummary {
    let mut events: Vec<NaiveDateTime> =
        timestamps.iter().copied().filter(|ts| in_window(*ts)).collect();
    events.sort();
    let events_in_window = events.len();

    let mut pairs = Vec::new();
    let mut i = 0;
    while i < events.len() {
        let entry = events[i];
        let mut exit_index = None;
        for (j, candidate) in events.iter().enumerate().skip(i + 1) {
            if (*candidate - entry).num_minutes() >= MIN_GAP_MINUTES {
                exit_index = Some(j);
                break;
            }
        }
        match exit_index {
            Some(j) => {
                let exit = events[j];
                pairs.push(PunchPair {
                    entry,
                    exit,
                    duration_minutes: (exit - entry).num_minutes(),
                });
                // Everything scanned over in (i, j) is discarded.
                i = j + 1;
            }
            None => i += 1,
        }
    }

    let total_minutes = pairs.iter().map(|p| p.duration_minutes).sum();
    let first_entry = pairs.first().map(|p| p.entry);
    let last_exit = pairs.last().map(|p| p.exit);
    let unpaired = events_in_window - 2 * pairs.len();

    DaySummary {
        pairs,
        total_minutes,
        first_entry,
        last_exit,
        unpaired,
        events_in_window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_short_gap_skips_to_later_exit() {
        // 09:05 is inside the dead zone of the 09:00 entry: it is scanned
        // over and discarded, and 17:00 becomes the exit.
        let summary = pair_day(&[t(9, 0), t(9, 5), t(17, 0)]);
        assert_eq!(summary.pairs.len(), 1);
        assert_eq!(summary.pairs[0].entry, t(9, 0));
        assert_eq!(summary.pairs[0].exit, t(17, 0));
        assert_eq!(summary.pairs[0].duration_minutes, 480);
        assert_eq!(summary.total_minutes, 480);
        assert_eq!(summary.unpaired, 1);
        assert_eq!(summary.events_in_window, 3);
    }

    #[test]
    fn test_events_outside_window_are_dropped_entirely() {
        let summary = pair_day(&[t(23, 30), t(9, 0), t(17, 0), t(5, 59)]);
        assert_eq!(summary.events_in_window, 2);
        assert_eq!(summary.pairs.len(), 1);
        assert_eq!(summary.unpaired, 0);
        for pair in &summary.pairs {
            assert_ne!(pair.entry, t(23, 30));
            assert_ne!(pair.exit, t(23, 30));
        }
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let summary = pair_day(&[t(6, 0), t(22, 0)]);
        assert_eq!(summary.events_in_window, 2);
        assert_eq!(summary.pairs.len(), 1);
        assert_eq!(summary.pairs[0].duration_minutes, 960);
    }

    #[test]
    fn test_unordered_input_is_sorted_first() {
        let summary = pair_day(&[t(17, 0), t(9, 0)]);
        assert_eq!(summary.pairs.len(), 1);
        assert_eq!(summary.pairs[0].entry, t(9, 0));
        assert_eq!(summary.pairs[0].exit, t(17, 0));
        assert_eq!(summary.first_entry, Some(t(9, 0)));
        assert_eq!(summary.last_exit, Some(t(17, 0)));
    }

    #[test]
    fn test_exactly_thirty_minutes_pairs() {
        let summary = pair_day(&[t(9, 0), t(9, 30)]);
        assert_eq!(summary.pairs.len(), 1);
        assert_eq!(summary.pairs[0].duration_minutes, 30);
    }

    #[test]
    fn test_no_qualifying_exit_leaves_all_unpaired() {
        let summary = pair_day(&[t(21, 50), t(22, 0)]);
        assert!(summary.pairs.is_empty());
        assert_eq!(summary.unpaired, 2);
        assert_eq!(summary.total_minutes, 0);
        assert!(summary.first_entry.is_none());
        assert!(summary.last_exit.is_none());
    }

    #[test]
    fn test_consecutive_pairs() {
        let summary = pair_day(&[t(8, 0), t(8, 40), t(9, 0), t(9, 50)]);
        assert_eq!(summary.pairs.len(), 2);
        assert_eq!(summary.pairs[0].entry, t(8, 0));
        assert_eq!(summary.pairs[0].exit, t(8, 40));
        assert_eq!(summary.pairs[1].entry, t(9, 0));
        assert_eq!(summary.pairs[1].exit, t(9, 50));
        assert_eq!(summary.total_minutes, 40 + 50);
        assert_eq!(summary.unpaired, 0);
    }

    #[test]
    fn test_multiple_dead_zone_events_discarded() {
        let summary = pair_day(&[t(9, 0), t(9, 5), t(9, 10), t(10, 0)]);
        assert_eq!(summary.pairs.len(), 1);
        assert_eq!(summary.pairs[0].entry, t(9, 0));
        assert_eq!(summary.pairs[0].exit, t(10, 0));
        assert_eq!(summary.unpaired, 2);
    }

    #[test]
    fn test_empty_input() {
        let summary = pair_day(&[]);
        assert!(summary.pairs.is_empty());
        assert_eq!(summary.events_in_window, 0);
        assert_eq!(summary.unpaired, 0);
    }

}
