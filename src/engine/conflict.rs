use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub type SharedCalendar = Arc<RwLock<Calendar>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Booked {
    pub reservation_id: Ulid,
    pub span: Span,
}

/// The occupied intervals of one resource, sorted by start.
/// Only reservations whose status occupies the calendar are present.
#[derive(Debug, Default)]
pub struct Calendar {
    intervals: Vec<Booked>,
}

impl Calendar {
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn insert(&mut self, reservation_id: Ulid, span: Span) {
        let pos = self
            .intervals
            .binary_search_by_key(&span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, Booked { reservation_id, span });
    }

    pub fn remove(&mut self, reservation_id: Ulid) -> Option<Booked> {
        let pos = self
            .intervals
            .iter()
            .position(|b| b.reservation_id == reservation_id)?;
        Some(self.intervals.remove(pos))
    }

    /// Intervals overlapping `query` (half-open on both sides).
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booked> {
        // Everything at index >= right_bound starts at or after query.end
        let right_bound = self
            .intervals
            .partition_point(|b| b.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// Caller must hold the calendar's write lock across this check and the insert.
pub(crate) fn check_no_conflict(cal: &Calendar, span: &Span) -> Result<(), EngineError> {
    if let Some(existing) = cal.overlapping(span).next() {
        return Err(EngineError::Conflict(format!(
            "resource already booked in that time range (reservation {})",
            existing.reservation_id
        )));
    }
    Ok(())
}
