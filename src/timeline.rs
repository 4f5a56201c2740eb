//! Time-indexed record storage: per-entity timelines with range queries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single timestamped observation with an entity identifier and an
/// arbitrary payload. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> Record<T> {
    pub fn new(entity_id: impl Into<String>, timestamp: DateTime<Utc>, payload: T) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp,
            payload,
        }
    }
}

/// How interval endpoints are treated by range queries and window slicing.
///
/// The start is always inclusive. `EndExclusive` yields `[start, end)`;
/// `BothInclusive` yields `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    EndExclusive,
    BothInclusive,
}

/// Whether unsorted input is sorted at construction or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortPolicy {
    RequireSorted,
    SortIfNeeded,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimelineError {
    #[error("records for entity '{entity_id}' are not sorted by timestamp at position {position}")]
    UnsortedInput { entity_id: String, position: usize },
}

/// The ordered-by-timestamp records of one entity.
///
/// Timestamps are non-decreasing; duplicates are allowed. The timeline is
/// rebuilt from its input records, never mutated incrementally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTimeline<T> {
    entity_id: String,
    records: Vec<Record<T>>,
}

impl<T> EntityTimeline<T> {
    pub fn new(
        entity_id: impl Into<String>,
        mut records: Vec<Record<T>>,
        sort: SortPolicy,
    ) -> Result<Self, TimelineError> {
        let entity_id = entity_id.into();
        if let Some(position) = first_unsorted_position(&records) {
            match sort {
                SortPolicy::RequireSorted => {
                    return Err(TimelineError::UnsortedInput {
                        entity_id,
                        position,
                    })
                }
                SortPolicy::SortIfNeeded => records.sort_by_key(|record| record.timestamp),
            }
        }
        Ok(Self { entity_id, records })
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record<T>] {
        &self.records
    }

    /// First timestamp in the timeline, if any.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.records.first().map(|record| record.timestamp)
    }

    /// Last timestamp in the timeline, if any.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.records.last().map(|record| record.timestamp)
    }

    /// Timestamp of the record at `index`, if the index is in range.
    pub fn timestamp_at(&self, index: usize) -> Option<DateTime<Utc>> {
        self.records.get(index).map(|record| record.timestamp)
    }

    /// Index of the first record with timestamp >= `ts`.
    ///
    /// Equals `len()` when every record precedes `ts`.
    pub fn position_at_or_after(&self, ts: DateTime<Utc>) -> usize {
        self.records
            .partition_point(|record| record.timestamp < ts)
    }

    /// The contiguous records whose timestamps fall in the interval from
    /// `start` to `end` under the given boundary policy.
    ///
    /// Locates the range bounds by binary search; cost is O(log n) plus the
    /// size of the returned slice.
    pub fn records_in(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        policy: BoundaryPolicy,
    ) -> &[Record<T>] {
        let lo = self.position_at_or_after(start);
        let hi = match policy {
            BoundaryPolicy::EndExclusive => self
                .records
                .partition_point(|record| record.timestamp < end),
            BoundaryPolicy::BothInclusive => self
                .records
                .partition_point(|record| record.timestamp <= end),
        };
        if hi <= lo {
            return &[];
        }
        &self.records[lo..hi]
    }
}

/// All entity timelines of one dataset, in first-seen entity order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSet<T> {
    timelines: Vec<EntityTimeline<T>>,
}

impl<T> TimelineSet<T> {
    /// Groups a flat record collection by entity identifier.
    ///
    /// Entity order is the order of first appearance in the input. Each
    /// entity's records must be chronological under
    /// [`SortPolicy::RequireSorted`]; [`SortPolicy::SortIfNeeded`] sorts them
    /// once at construction (stable, so equal timestamps keep input order).
    pub fn from_records(records: Vec<Record<T>>, sort: SortPolicy) -> Result<Self, TimelineError> {
        let mut grouped: Vec<(String, Vec<Record<T>>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in records {
            match index.get(&record.entity_id) {
                Some(&slot) => grouped[slot].1.push(record),
                None => {
                    index.insert(record.entity_id.clone(), grouped.len());
                    grouped.push((record.entity_id.clone(), vec![record]));
                }
            }
        }

        let mut timelines = Vec::with_capacity(grouped.len());
        for (entity_id, entity_records) in grouped {
            timelines.push(EntityTimeline::new(entity_id, entity_records, sort)?);
        }
        Ok(Self { timelines })
    }

    /// Builds a set from pre-grouped timelines, preserving their order.
    pub fn from_timelines(timelines: Vec<EntityTimeline<T>>) -> Self {
        Self { timelines }
    }

    pub fn len(&self) -> usize {
        self.timelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.is_empty()
    }

    pub fn timelines(&self) -> &[EntityTimeline<T>] {
        &self.timelines
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityTimeline<T>> {
        self.timelines
            .iter()
            .find(|timeline| timeline.entity_id() == entity_id)
    }
}

fn first_unsorted_position<T>(records: &[Record<T>]) -> Option<usize> {
    records
        .windows(2)
        .position(|pair| pair[1].timestamp < pair[0].timestamp)
        .map(|i| i + 1)
}
