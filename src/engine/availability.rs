use crate::model::*;

// ── Free-window computation ──────────────────────────────────────

/// Free windows inside `window` once every active booking is taken out.
pub fn free_windows(window: &Span, bookings: &[Booking]) -> Vec<Span> {
    let mut busy: Vec<Span> = bookings
        .iter()
        .filter(|b| b.is_active() && b.span.overlaps(window))
        .map(|b| Span::new(b.span.start.max(window.start), b.span.end.min(window.end)))
        .collect();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);
    subtract_intervals(&[*window], &busy)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start and internally disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        for r in to_remove[ri..].iter().take_while(|r| r.start < b.end) {
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn at(h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn span(a: (u32, u32), b: (u32, u32)) -> Span {
        Span::new(at(a.0, a.1), at(b.0, b.1))
    }

    fn booking(s: Span, status: BookingStatus) -> Booking {
        Booking {
            id: 1,
            room_id: 1,
            organiser_id: 1,
            title: "Busy".into(),
            notes: None,
            span: s,
            status,
            visibility: Visibility::Private,
            accepted_attendee_ids: BTreeSet::new(),
            pending_attendee_ids: BTreeSet::new(),
            reminder_sent: false,
            created_at: at(0, 0),
        }
    }

    #[test]
    fn merge_joins_overlapping_and_adjacent() {
        let merged = merge_overlapping(&[
            span((9, 0), (10, 0)),
            span((9, 30), (11, 0)),
            span((11, 0), (12, 0)),
            span((13, 0), (14, 0)),
        ]);
        assert_eq!(merged, vec![span((9, 0), (12, 0)), span((13, 0), (14, 0))]);
        assert!(merge_overlapping(&[]).is_empty());
    }

    #[test]
    fn subtract_splits_base() {
        let free = subtract_intervals(
            &[span((8, 0), (18, 0))],
            &[span((9, 0), (10, 0)), span((12, 0), (13, 30))],
        );
        assert_eq!(
            free,
            vec![span((8, 0), (9, 0)), span((10, 0), (12, 0)), span((13, 30), (18, 0))]
        );
    }

    #[test]
    fn subtract_with_nothing_to_remove() {
        let base = [span((8, 0), (9, 0))];
        assert_eq!(subtract_intervals(&base, &[]), base.to_vec());
        assert!(subtract_intervals(&[], &base).is_empty());
    }

    #[test]
    fn free_windows_clamp_and_skip_cancelled() {
        let day = span((0, 0), (23, 59));
        let bookings = vec![
            booking(span((9, 0), (10, 0)), BookingStatus::Confirmed),
            booking(span((9, 30), (11, 0)), BookingStatus::Confirmed),
            booking(span((15, 0), (16, 0)), BookingStatus::Cancelled),
        ];
        assert_eq!(
            free_windows(&day, &bookings),
            vec![span((0, 0), (9, 0)), span((11, 0), (23, 59))]
        );
    }
}
