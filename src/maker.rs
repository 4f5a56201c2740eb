//! Label generation runs: drives cutoff planning and window slicing per
//! entity, invokes the labeling function on each slice, and assembles the
//! resulting label collection and run report.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::collection::{LabelCollection, LabelValue, LabeledExample};
use crate::cutoffs::{plan_cutoffs, validate_config, ConfigError, LabelErrorPolicy, LabelingConfig};
use crate::slicer::{slice_for_cutoff, DataSlice};
use crate::timeline::{EntityTimeline, Record, SortPolicy, TimelineError, TimelineSet};

/// Error type labeling functions may return for one slice.
pub type LabelError = Box<dyn std::error::Error + Send + Sync>;

/// One recorded labeling failure. Never fatal under
/// [`LabelErrorPolicy::SkipAndRecord`]; aggregated in the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelingFailure {
    pub entity_id: String,
    pub cutoff_time: DateTime<Utc>,
    pub message: String,
}

/// Counts and failures surfaced at the end of a run. Skips are reported
/// separately from failures: an entity with insufficient history is skipped,
/// never failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub entities_processed: u64,
    pub entities_skipped: u64,
    pub examples_produced: u64,
    /// Labeling calls that returned no label; the example is dropped.
    pub null_labels: u64,
    pub failures: Vec<LabelingFailure>,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid labeling config: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error("labeling failed for entity '{entity_id}' at cutoff {cutoff_time}: {message}")]
    Labeling {
        entity_id: String,
        cutoff_time: DateTime<Utc>,
        message: String,
    },
}

#[derive(Default)]
struct EntityOutcome {
    rows: Vec<LabeledExample>,
    skipped: bool,
    null_labels: u64,
    failures: Vec<LabelingFailure>,
    fatal: Option<LabelingFailure>,
}

/// Generates labels for every entity timeline, sequentially.
///
/// Entities run in first-seen order; slices within one entity run in
/// increasing cutoff order, so labeling functions may keep per-entity state
/// across consecutive calls. A completed run always yields a collection
/// (possibly empty) plus the report; only fatal errors abort without one.
pub fn make_labels<T, F>(
    timelines: &TimelineSet<T>,
    mut labeling_fn: F,
    cfg: &LabelingConfig,
) -> Result<(LabelCollection, RunReport), RunError>
where
    F: FnMut(&DataSlice<'_, T>) -> Result<Option<LabelValue>, LabelError>,
{
    validate_config(cfg)?;
    log_run_start(timelines.len(), "sequential", cfg);

    let mut rows = Vec::new();
    let mut report = RunReport::default();
    for timeline in timelines.timelines() {
        let outcome = label_entity(timeline, &mut labeling_fn, cfg);
        if let Some(failure) = outcome.fatal {
            return Err(fatal_error(failure));
        }
        merge_outcome(outcome, &mut rows, &mut report);
    }
    finish_run(rows, report, cfg)
}

/// Groups a flat record collection by entity and generates labels.
pub fn make_labels_from_records<T, F>(
    records: Vec<Record<T>>,
    sort: SortPolicy,
    labeling_fn: F,
    cfg: &LabelingConfig,
) -> Result<(LabelCollection, RunReport), RunError>
where
    F: FnMut(&DataSlice<'_, T>) -> Result<Option<LabelValue>, LabelError>,
{
    let timelines = TimelineSet::from_records(records, sort)?;
    make_labels(&timelines, labeling_fn, cfg)
}

/// Generates labels with a worker pool fanning out over entities.
///
/// Per-entity ordering is unchanged: each entity's slices are labeled
/// sequentially by one worker, and results merge in entity-first-seen order,
/// so output equals the sequential run. Timelines are shared immutably
/// across workers. Fail-fast cancels between entities (workers finish the
/// entity in hand); which failure surfaces may depend on scheduling.
pub fn make_labels_parallel<T, F>(
    timelines: &TimelineSet<T>,
    labeling_fn: F,
    cfg: &LabelingConfig,
    workers: usize,
) -> Result<(LabelCollection, RunReport), RunError>
where
    T: Sync,
    F: Fn(&DataSlice<'_, T>) -> Result<Option<LabelValue>, LabelError> + Sync,
{
    validate_config(cfg)?;
    let worker_count = workers.clamp(1, timelines.len().max(1));
    if worker_count == 1 {
        return make_labels(timelines, |slice| labeling_fn(slice), cfg);
    }
    log_run_start(timelines.len(), "parallel", cfg);

    let abort = AtomicBool::new(false);
    let (task_tx, task_rx) = crossbeam_channel::unbounded();
    let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
    for task in timelines.timelines().iter().enumerate() {
        task_tx.send(task).expect("task channel open while sending");
    }
    drop(task_tx);

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let task_rx = task_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let abort = &abort;
            let labeling_fn = &labeling_fn;
            scope.spawn(move || {
                let mut call = |slice: &DataSlice<'_, T>| labeling_fn(slice);
                while let Ok((index, timeline)) = task_rx.recv() {
                    if abort.load(Ordering::Relaxed) {
                        break;
                    }
                    let outcome = label_entity(timeline, &mut call, cfg);
                    if outcome.fatal.is_some() {
                        abort.store(true, Ordering::Relaxed);
                    }
                    if outcome_tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(outcome_tx);

    let mut outcomes: Vec<(usize, EntityOutcome)> = outcome_rx.iter().collect();
    outcomes.sort_by_key(|(index, _)| *index);

    let mut rows = Vec::new();
    let mut report = RunReport::default();
    for (_, outcome) in outcomes {
        if let Some(failure) = outcome.fatal {
            return Err(fatal_error(failure));
        }
        merge_outcome(outcome, &mut rows, &mut report);
    }
    finish_run(rows, report, cfg)
}

fn label_entity<T, F>(
    timeline: &EntityTimeline<T>,
    labeling_fn: &mut F,
    cfg: &LabelingConfig,
) -> EntityOutcome
where
    F: FnMut(&DataSlice<'_, T>) -> Result<Option<LabelValue>, LabelError>,
{
    let cutoffs = plan_cutoffs(timeline, cfg);
    if cutoffs.is_empty() {
        debug!(
            component = "label_maker",
            event = "labels.entity.skipped",
            entity_id = %timeline.entity_id(),
            reason = "insufficient_data"
        );
        return EntityOutcome {
            skipped: true,
            ..EntityOutcome::default()
        };
    }

    let mut outcome = EntityOutcome::default();
    for (i, cutoff) in cutoffs.iter().copied().enumerate() {
        let slice = slice_for_cutoff(
            timeline,
            cutoff,
            &cfg.window_size,
            cfg.boundary_policy,
            i + 1,
        );
        match labeling_fn(&slice) {
            Ok(Some(label)) => outcome.rows.push(LabeledExample {
                entity_id: timeline.entity_id().to_string(),
                cutoff_time: cutoff,
                label,
                window_start: slice.window_start(),
                window_end: slice.window_end(),
                slice_size: slice.len(),
            }),
            Ok(None) => outcome.null_labels += 1,
            Err(err) => {
                let failure = LabelingFailure {
                    entity_id: timeline.entity_id().to_string(),
                    cutoff_time: cutoff,
                    message: err.to_string(),
                };
                warn!(
                    component = "label_maker",
                    event = "labels.slice.failed",
                    entity_id = %failure.entity_id,
                    cutoff_time = %failure.cutoff_time,
                    error = %failure.message
                );
                match cfg.on_label_error {
                    LabelErrorPolicy::FailFast => {
                        outcome.fatal = Some(failure);
                        return outcome;
                    }
                    LabelErrorPolicy::SkipAndRecord => outcome.failures.push(failure),
                }
            }
        }
    }
    outcome
}

fn merge_outcome(outcome: EntityOutcome, rows: &mut Vec<LabeledExample>, report: &mut RunReport) {
    if outcome.skipped {
        report.entities_skipped += 1;
        return;
    }
    report.entities_processed += 1;
    report.null_labels += outcome.null_labels;
    report.failures.extend(outcome.failures);
    rows.extend(outcome.rows);
}

fn finish_run(
    rows: Vec<LabeledExample>,
    mut report: RunReport,
    cfg: &LabelingConfig,
) -> Result<(LabelCollection, RunReport), RunError> {
    report.examples_produced = rows.len() as u64;
    info!(
        component = "label_maker",
        event = "labels.run.finish",
        entities_processed = report.entities_processed,
        entities_skipped = report.entities_skipped,
        examples_produced = report.examples_produced,
        null_labels = report.null_labels,
        failures = report.failures.len() as u64
    );
    Ok((LabelCollection::new(rows, cfg.settings()), report))
}

fn fatal_error(failure: LabelingFailure) -> RunError {
    RunError::Labeling {
        entity_id: failure.entity_id,
        cutoff_time: failure.cutoff_time,
        message: failure.message,
    }
}

fn log_run_start(entities: usize, mode: &str, cfg: &LabelingConfig) {
    info!(
        component = "label_maker",
        event = "labels.run.start",
        mode,
        entities,
        on_label_error = ?cfg.on_label_error
    );
}
