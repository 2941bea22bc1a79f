//! Interval math shared by the advisory slot preview and the authoritative
//! booking check. Pure functions over half-open `[start, end)` ranges.
//!
//! Degenerate ranges (`end <= start`) never overlap anything and are dropped
//! before merging.

use crate::model::{Ms, Span};

/// True unless the ranges are disjoint or either one is degenerate.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    if a_end <= a_start || b_end <= b_start {
        return false;
    }
    !(a_end <= b_start || a_start >= b_end)
}

/// Drop degenerate entries, clip to the bound, sort by start and merge
/// anything that touches or overlaps.
pub fn merge_and_clip(intervals: &[Span], bound_start: Ms, bound_end: Ms) -> Vec<Span> {
    if bound_end <= bound_start {
        return Vec::new();
    }
    let mut clipped: Vec<Span> = intervals
        .iter()
        .filter(|s| s.end > s.start)
        .filter_map(|s| Span::checked(s.start.max(bound_start), s.end.min(bound_end)))
        .collect();
    clipped.sort_by_key(|s| s.start);

    let mut merged: Vec<Span> = Vec::with_capacity(clipped.len());
    for span in clipped {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Gaps inside `[bound_start, bound_end)` not covered by `busy`, in order.
///
/// The returned iterator is lazy and `Clone`, so a caller can restart the
/// sweep from a saved copy.
pub fn free_intervals(bound_start: Ms, bound_end: Ms, busy: &[Span]) -> FreeIntervals {
    FreeIntervals {
        busy: merge_and_clip(busy, bound_start, bound_end),
        next: 0,
        cursor: bound_start,
        end: bound_end,
    }
}

/// True iff the bound has no gap left, or the bound itself is empty.
pub fn is_fully_occupied(bound_start: Ms, bound_end: Ms, busy: &[Span]) -> bool {
    if bound_end <= bound_start {
        return true;
    }
    free_intervals(bound_start, bound_end, busy).next().is_none()
}

/// Sweep over merged busy ranges, emitting the gaps between them.
#[derive(Debug, Clone)]
pub struct FreeIntervals {
    busy: Vec<Span>,
    next: usize,
    cursor: Ms,
    end: Ms,
}

impl Iterator for FreeIntervals {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        while self.cursor < self.end {
            let Some(b) = self.busy.get(self.next) else {
                let gap = Span::new(self.cursor, self.end);
                self.cursor = self.end;
                return Some(gap);
            };
            self.next += 1;
            let gap = Span::checked(self.cursor, b.start);
            self.cursor = self.cursor.max(b.end);
            if gap.is_some() {
                return gap;
            }
        }
        None
    }
}
