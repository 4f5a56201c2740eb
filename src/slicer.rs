//! Window slicing: mapping one cutoff time to one data slice.

use chrono::{DateTime, Utc};

use crate::cutoffs::WindowSize;
use crate::timeline::{BoundaryPolicy, EntityTimeline, Record};

/// A borrowed view over the records of one window, handed to the labeling
/// function. Zero-copy and read-only from the engine's perspective.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSlice<'a, T> {
    entity_id: &'a str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    slice_number: usize,
    records: &'a [Record<T>],
}

impl<'a, T> DataSlice<'a, T> {
    pub fn entity_id(&self) -> &str {
        self.entity_id
    }

    /// Start of the window, clamped to the timeline start.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// End of the window: the cutoff time this slice is anchored at.
    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_end
    }

    /// 1-based position of this slice within its entity's cutoff sequence.
    pub fn slice_number(&self) -> usize {
        self.slice_number
    }

    pub fn records(&self) -> &'a [Record<T>] {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn payloads(&self) -> impl Iterator<Item = &'a T> {
        self.records.iter().map(|record| &record.payload)
    }
}

/// Extracts the data slice owned by one cutoff.
///
/// The window start is `max(timeline_start, cutoff - window_size)` for
/// bounded windows and the timeline start otherwise. A window containing no
/// records yields an empty slice, not an error. Pure function of its inputs:
/// identical inputs always yield the identical slice.
pub fn slice_for_cutoff<'a, T>(
    timeline: &'a EntityTimeline<T>,
    cutoff: DateTime<Utc>,
    window_size: &WindowSize,
    policy: BoundaryPolicy,
    slice_number: usize,
) -> DataSlice<'a, T> {
    let timeline_start = timeline.start().unwrap_or(cutoff);
    let window_start = match window_size {
        WindowSize::Duration(d) => (cutoff - *d).max(timeline_start),
        WindowSize::AllPriorData => timeline_start,
    };

    DataSlice {
        entity_id: timeline.entity_id(),
        window_start,
        window_end: cutoff,
        slice_number,
        records: timeline.records_in(window_start, cutoff, policy),
    }
}
