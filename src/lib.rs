//! Labelgen core crate.
//!
//! Generates supervised-learning labels from time-indexed event data:
//! - per-entity timelines with binary-search range queries
//! - cutoff-time planning (duration, row-count, and explicit gap modes)
//! - window slicing and label generation with per-slice failure isolation
//! - label collections with summaries, transforms, and CSV export

mod collection;
mod cutoffs;
mod maker;
mod observability;
mod slicer;
mod timeline;

pub use collection::{
    CollectionSummary, ExportError, LabelCollection, LabelValue, LabeledExample, LabelingSettings,
    NumericSummary,
};
pub use cutoffs::{
    plan_cutoffs, validate_config, ConfigError, Gap, LabelErrorPolicy, LabelingConfig, MinimumData,
    WindowSize,
};
pub use maker::{
    make_labels, make_labels_from_records, make_labels_parallel, LabelError, LabelingFailure,
    RunError, RunReport,
};
pub use observability::{
    init_logging, logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use slicer::{slice_for_cutoff, DataSlice};
pub use timeline::{
    BoundaryPolicy, EntityTimeline, Record, SortPolicy, TimelineError, TimelineSet,
};
