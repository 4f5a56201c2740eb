use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use labelgen::{
    make_labels, BoundaryPolicy, DataSlice, Gap, LabelError, LabelErrorPolicy, LabelValue,
    LabelingConfig, MinimumData, Record, SortPolicy, TimelineSet, WindowSize,
};
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

#[test]
fn run_emits_start_and_finish_events() {
    let logs = capture_logs(Level::INFO, || {
        let (collection, _) =
            make_labels(&hourly_timelines(10), total_spent, &reference_config())
                .expect("run succeeds");
        assert_eq!(collection.len(), 4);
    });

    assert!(logs.contains("\"event\":\"labels.run.start\""));
    assert!(logs.contains("\"event\":\"labels.run.finish\""));
}

#[test]
fn failing_slice_emits_warn_event() {
    let logs = capture_logs(Level::INFO, || {
        let (_, report) = make_labels(
            &hourly_timelines(10),
            |slice: &DataSlice<'_, f64>| {
                if slice.window_end() == ts(7) {
                    return Err("sensor outage at hour 7".into());
                }
                total_spent(slice)
            },
            &reference_config(),
        )
        .expect("run completes despite the failure");
        assert_eq!(report.failures.len(), 1);
    });

    assert!(logs.contains("\"event\":\"labels.slice.failed\""));
    assert!(logs.contains("sensor outage at hour 7"));
}

#[test]
fn skipped_entity_logs_at_debug() {
    let logs = capture_logs(Level::DEBUG, || {
        let (_, report) = make_labels(&hourly_timelines(2), total_spent, &reference_config())
            .expect("run succeeds");
        assert_eq!(report.entities_skipped, 1);
    });

    assert!(logs.contains("\"event\":\"labels.entity.skipped\""));
    assert!(logs.contains("insufficient_data"));
}

fn ts(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap()
}

fn hourly_timelines(hours: u32) -> TimelineSet<f64> {
    let records = (0..=hours)
        .map(|h| Record::new("a", ts(h), 10.0 * h as f64))
        .collect();
    TimelineSet::from_records(records, SortPolicy::RequireSorted).expect("sorted fixture")
}

fn reference_config() -> LabelingConfig {
    LabelingConfig {
        minimum_data: Some(MinimumData::Duration(Duration::hours(3))),
        window_size: WindowSize::Duration(Duration::hours(2)),
        gap: Some(Gap::Duration(Duration::hours(2))),
        maximum_cutoffs: None,
        boundary_policy: BoundaryPolicy::EndExclusive,
        on_label_error: LabelErrorPolicy::SkipAndRecord,
    }
}

fn total_spent(slice: &DataSlice<'_, f64>) -> Result<Option<LabelValue>, LabelError> {
    Ok(Some(LabelValue::Float(slice.payloads().sum())))
}
