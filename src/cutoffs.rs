//! Labeling configuration and cutoff-time planning.
//!
//! The full ordered cutoff list for an entity is computed before any slicing
//! so windows and gaps are validated up front rather than discovered
//! incrementally.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::collection::LabelingSettings;
use crate::timeline::{BoundaryPolicy, EntityTimeline};

/// How much history must precede the first cutoff of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinimumData {
    /// Offset from the timeline start.
    Duration(Duration),
    /// Number of records that must precede the first cutoff; the cutoff
    /// lands on the timestamp of the record at this index.
    Rows(usize),
}

/// The span of history included in each data slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowSize {
    Duration(Duration),
    /// The window grows from the timeline start.
    AllPriorData,
}

/// Spacing between consecutive cutoff times for one entity.
///
/// The three modes are mutually exclusive; `Explicit` replaces planning
/// entirely and uses the given times verbatim (sorted, deduplicated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gap {
    Duration(Duration),
    /// Advance until this many additional records have occurred since the
    /// previous cutoff.
    Rows(usize),
    Explicit(Vec<DateTime<Utc>>),
}

/// What happens when the labeling function fails for one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelErrorPolicy {
    /// Record the failure, keep going, and surface the aggregate at the end.
    SkipAndRecord,
    /// Abort the run on the first failure.
    FailFast,
}

/// Full configuration of a labeling run.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelingConfig {
    pub minimum_data: Option<MinimumData>,
    pub window_size: WindowSize,
    /// Defaults to the window size when unset and the window is bounded.
    pub gap: Option<Gap>,
    pub maximum_cutoffs: Option<usize>,
    pub boundary_policy: BoundaryPolicy,
    pub on_label_error: LabelErrorPolicy,
}

impl Default for LabelingConfig {
    /// One cutoff per entity at the timeline start, over all prior data.
    fn default() -> Self {
        Self {
            minimum_data: None,
            window_size: WindowSize::AllPriorData,
            gap: None,
            maximum_cutoffs: Some(1),
            boundary_policy: BoundaryPolicy::EndExclusive,
            on_label_error: LabelErrorPolicy::SkipAndRecord,
        }
    }
}

impl LabelingConfig {
    /// String rendering of the configuration, kept on the resulting label
    /// collection for reproducibility.
    pub fn settings(&self) -> LabelingSettings {
        LabelingSettings {
            minimum_data: self.minimum_data.as_ref().map(|m| match m {
                MinimumData::Duration(d) => duration_repr(*d),
                MinimumData::Rows(n) => format!("{n} rows"),
            }),
            window_size: match &self.window_size {
                WindowSize::Duration(d) => duration_repr(*d),
                WindowSize::AllPriorData => "all prior data".to_string(),
            },
            gap: match self.gap.as_ref() {
                Some(Gap::Duration(d)) => duration_repr(*d),
                Some(Gap::Rows(n)) => format!("{n} rows"),
                Some(Gap::Explicit(times)) => format!("{} explicit cutoffs", times.len()),
                None => "window size".to_string(),
            },
            maximum_cutoffs: self.maximum_cutoffs,
            boundary_policy: match self.boundary_policy {
                BoundaryPolicy::EndExclusive => "end-exclusive".to_string(),
                BoundaryPolicy::BothInclusive => "both-inclusive".to_string(),
            },
            on_label_error: match self.on_label_error {
                LabelErrorPolicy::SkipAndRecord => "skip-and-record".to_string(),
                LabelErrorPolicy::FailFast => "fail-fast".to_string(),
            },
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window size duration must be positive")]
    NonPositiveWindowSize,
    #[error("minimum data duration must be positive")]
    NonPositiveMinimumData,
    #[error("minimum data row count must be at least 1")]
    ZeroRowMinimumData,
    #[error("gap duration must be positive")]
    NonPositiveGap,
    #[error("gap row count must be at least 1")]
    ZeroRowGap,
    #[error("maximum_cutoffs must be at least 1 when set")]
    ZeroMaximumCutoffs,
    #[error("explicit cutoff times cannot be combined with minimum_data")]
    ExplicitCutoffsWithMinimumData,
    #[error("gap is required when window size is all prior data and maximum_cutoffs is not 1")]
    GapRequired,
}

/// Validates a configuration eagerly, before any slicing begins.
pub fn validate_config(cfg: &LabelingConfig) -> Result<(), ConfigError> {
    match &cfg.window_size {
        WindowSize::Duration(d) if *d <= Duration::zero() => {
            return Err(ConfigError::NonPositiveWindowSize)
        }
        _ => {}
    }

    match cfg.minimum_data.as_ref() {
        Some(MinimumData::Duration(d)) if *d <= Duration::zero() => {
            return Err(ConfigError::NonPositiveMinimumData)
        }
        Some(MinimumData::Rows(0)) => return Err(ConfigError::ZeroRowMinimumData),
        _ => {}
    }

    match cfg.gap.as_ref() {
        Some(Gap::Duration(d)) if *d <= Duration::zero() => {
            return Err(ConfigError::NonPositiveGap)
        }
        Some(Gap::Rows(0)) => return Err(ConfigError::ZeroRowGap),
        Some(Gap::Explicit(_)) if cfg.minimum_data.is_some() => {
            return Err(ConfigError::ExplicitCutoffsWithMinimumData)
        }
        None => {
            let unbounded = matches!(cfg.window_size, WindowSize::AllPriorData);
            if unbounded && cfg.maximum_cutoffs != Some(1) {
                return Err(ConfigError::GapRequired);
            }
        }
        _ => {}
    }

    if cfg.maximum_cutoffs == Some(0) {
        return Err(ConfigError::ZeroMaximumCutoffs);
    }

    Ok(())
}

enum EffectiveGap {
    Duration(Duration),
    Rows(usize),
    /// No advancement: the plan holds at most the first cutoff. Only
    /// reachable when validation has pinned `maximum_cutoffs` to 1.
    Single,
}

/// Computes the full ordered cutoff list for one entity timeline.
///
/// Pure function of its inputs: the same timeline and configuration always
/// produce the same plan. An empty result means the entity has insufficient
/// history and is skipped, which is not an error.
pub fn plan_cutoffs<T>(timeline: &EntityTimeline<T>, cfg: &LabelingConfig) -> Vec<DateTime<Utc>> {
    let gap = match cfg.gap.as_ref() {
        Some(Gap::Explicit(times)) => {
            let mut cutoffs = times.clone();
            cutoffs.sort_unstable();
            cutoffs.dedup();
            return cutoffs;
        }
        Some(Gap::Duration(d)) => EffectiveGap::Duration(*d),
        Some(Gap::Rows(n)) => EffectiveGap::Rows(*n),
        None => match &cfg.window_size {
            WindowSize::Duration(d) => EffectiveGap::Duration(*d),
            WindowSize::AllPriorData => EffectiveGap::Single,
        },
    };

    let (Some(timeline_start), Some(timeline_end)) = (timeline.start(), timeline.end()) else {
        return Vec::new();
    };

    // First cutoff and the record index it lands on (the index cursor is
    // only consulted in row-count gap mode).
    let first = match cfg.minimum_data.as_ref() {
        None => Some((timeline_start, 0)),
        Some(MinimumData::Duration(offset)) => {
            let cutoff = timeline_start + *offset;
            Some((cutoff, timeline.position_at_or_after(cutoff)))
        }
        Some(MinimumData::Rows(rows)) => timeline
            .timestamp_at(*rows)
            .map(|cutoff| (cutoff, *rows)),
    };
    let Some((first_cutoff, first_index)) = first else {
        return Vec::new();
    };

    let included = |cutoff: DateTime<Utc>| {
        cutoff < timeline_end
            || (cutoff == timeline_end && cfg.boundary_policy == BoundaryPolicy::BothInclusive)
    };
    let at_capacity =
        |count: usize| cfg.maximum_cutoffs.is_some_and(|maximum| count >= maximum);

    let mut cutoffs = Vec::new();
    match gap {
        EffectiveGap::Duration(step) => {
            let mut cutoff = first_cutoff;
            while included(cutoff) && !at_capacity(cutoffs.len()) {
                cutoffs.push(cutoff);
                cutoff = cutoff + step;
            }
        }
        EffectiveGap::Rows(step) => {
            // Row-count gaps walk index positions in the sorted record
            // sequence; each cutoff snaps to a record timestamp, stepping
            // past duplicates so cutoffs stay strictly increasing.
            let mut index = first_index;
            let Some(mut cutoff) = timeline.timestamp_at(index) else {
                return cutoffs;
            };
            loop {
                if !included(cutoff) || at_capacity(cutoffs.len()) {
                    break;
                }
                cutoffs.push(cutoff);
                index += step;
                let mut next = timeline.timestamp_at(index);
                while next.is_some_and(|ts| ts <= cutoff) {
                    index += 1;
                    next = timeline.timestamp_at(index);
                }
                match next {
                    Some(ts) => cutoff = ts,
                    None => break,
                }
            }
        }
        EffectiveGap::Single => {
            if included(first_cutoff) {
                cutoffs.push(first_cutoff);
            }
        }
    }
    cutoffs
}

fn duration_repr(d: Duration) -> String {
    let ms = d.num_milliseconds();
    if ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{ms}ms")
    }
}
