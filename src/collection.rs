//! Label collections: the ordered table of labeled examples plus the
//! configuration snapshot that produced them.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// The value returned by a labeling function for one data slice.
///
/// Covers binary, count, continuous, and categorical labels; opaque to the
/// engine beyond summary statistics and generic transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LabelValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl LabelValue {
    /// Numeric view of the label, when it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }

    /// Whether the label is counted in the value distribution rather than
    /// the continuous summary.
    pub fn is_discrete(&self) -> bool {
        !matches!(self, Self::Float(_))
    }
}

impl fmt::Display for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// One row of the label table. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub entity_id: String,
    pub cutoff_time: DateTime<Utc>,
    pub label: LabelValue,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub slice_size: usize,
}

/// String rendering of the configuration that produced a collection, kept
/// for reproducibility and for describing gap/window semantics in summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelingSettings {
    pub minimum_data: Option<String>,
    pub window_size: String,
    pub gap: String,
    pub maximum_cutoffs: Option<usize>,
    pub boundary_policy: String,
    pub on_label_error: String,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Continuous statistics over the numeric labels of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Summary statistics returned by [`LabelCollection::describe`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub total_examples: usize,
    /// Counts per rendered label value, over discrete labels (Bool, Int,
    /// Text).
    pub label_distribution: BTreeMap<String, u64>,
    /// Mean/std/min/max over numeric labels (Int, Float), when any exist.
    pub numeric: Option<NumericSummary>,
    pub min_slice_size: Option<usize>,
    pub max_slice_size: Option<usize>,
    pub settings: LabelingSettings,
}

/// The ordered sequence of labeled examples produced by one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCollection {
    examples: Vec<LabeledExample>,
    settings: LabelingSettings,
    fingerprint: String,
}

impl LabelCollection {
    pub fn new(examples: Vec<LabeledExample>, settings: LabelingSettings) -> Self {
        let fingerprint = settings_fingerprint(&settings);
        Self {
            examples,
            settings,
            fingerprint,
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// The ordered rows, for external consumption.
    pub fn to_table(&self) -> &[LabeledExample] {
        &self.examples
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabeledExample> {
        self.examples.iter()
    }

    pub fn settings(&self) -> &LabelingSettings {
        &self.settings
    }

    /// SHA-256 over the canonical settings rendering. Two collections with
    /// the same fingerprint were produced by the same configuration.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Returns a new collection with every label replaced by
    /// `transform(label)`. Window metadata and settings are untouched.
    pub fn apply_transform<F>(&self, transform: F) -> LabelCollection
    where
        F: Fn(&LabelValue) -> LabelValue,
    {
        let examples = self
            .examples
            .iter()
            .map(|example| LabeledExample {
                label: transform(&example.label),
                ..example.clone()
            })
            .collect();
        LabelCollection {
            examples,
            settings: self.settings.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }

    /// Summary statistics over the collection.
    pub fn describe(&self) -> CollectionSummary {
        let mut label_distribution: BTreeMap<String, u64> = BTreeMap::new();
        let mut numeric_values = Vec::new();

        for example in &self.examples {
            if example.label.is_discrete() {
                *label_distribution
                    .entry(example.label.to_string())
                    .or_insert(0) += 1;
            }
            if let Some(value) = example.label.as_f64() {
                numeric_values.push(value);
            }
        }

        CollectionSummary {
            total_examples: self.examples.len(),
            label_distribution,
            numeric: numeric_summary(&numeric_values),
            min_slice_size: self.examples.iter().map(|e| e.slice_size).min(),
            max_slice_size: self.examples.iter().map(|e| e.slice_size).max(),
            settings: self.settings.clone(),
        }
    }

    /// Writes the label table as CSV with a fixed header row. Timestamps
    /// are RFC 3339.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), ExportError> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record([
            "entity_id",
            "cutoff_time",
            "label",
            "window_start",
            "window_end",
            "slice_size",
        ])?;
        for example in &self.examples {
            out.write_record([
                example.entity_id.clone(),
                example.cutoff_time.to_rfc3339(),
                example.label.to_string(),
                example.window_start.to_rfc3339(),
                example.window_end.to_rfc3339(),
                example.slice_size.to_string(),
            ])?;
        }
        out.flush()?;
        Ok(())
    }
}

fn numeric_summary(values: &[f64]) -> Option<NumericSummary> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values
        .iter()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    let min = values.iter().copied().fold(f64::MAX, f64::min);
    let max = values.iter().copied().fold(f64::MIN, f64::max);
    Some(NumericSummary {
        mean,
        std: variance.sqrt(),
        min,
        max,
    })
}

fn settings_fingerprint(settings: &LabelingSettings) -> String {
    let canonical =
        serde_json::to_string(settings).expect("settings render to canonical JSON");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap()
    }

    fn sample_settings() -> LabelingSettings {
        LabelingSettings {
            minimum_data: Some("3600s".to_string()),
            window_size: "7200s".to_string(),
            gap: "7200s".to_string(),
            maximum_cutoffs: None,
            boundary_policy: "end-exclusive".to_string(),
            on_label_error: "skip-and-record".to_string(),
        }
    }

    fn example(entity: &str, hour: u32, label: LabelValue, slice_size: usize) -> LabeledExample {
        LabeledExample {
            entity_id: entity.to_string(),
            cutoff_time: ts(hour),
            label,
            window_start: ts(hour.saturating_sub(2)),
            window_end: ts(hour),
            slice_size,
        }
    }

    #[test]
    fn describe_summarizes_discrete_and_numeric_labels() {
        let collection = LabelCollection::new(
            vec![
                example("a", 3, LabelValue::Text("churn".to_string()), 2),
                example("a", 5, LabelValue::Text("stay".to_string()), 3),
                example("b", 3, LabelValue::Text("churn".to_string()), 1),
                example("b", 5, LabelValue::Float(4.0), 4),
                example("b", 7, LabelValue::Float(8.0), 2),
            ],
            sample_settings(),
        );

        let summary = collection.describe();
        assert_eq!(summary.total_examples, 5);
        assert_eq!(summary.label_distribution.get("churn"), Some(&2));
        assert_eq!(summary.label_distribution.get("stay"), Some(&1));
        assert_eq!(summary.min_slice_size, Some(1));
        assert_eq!(summary.max_slice_size, Some(4));

        let numeric = summary.numeric.expect("float labels present");
        assert!((numeric.mean - 6.0).abs() < 1e-12);
        assert!((numeric.std - 2.0).abs() < 1e-12);
        assert!((numeric.min - 4.0).abs() < 1e-12);
        assert!((numeric.max - 8.0).abs() < 1e-12);
    }

    #[test]
    fn describe_of_empty_collection_is_empty() {
        let collection = LabelCollection::new(Vec::new(), sample_settings());
        let summary = collection.describe();

        assert_eq!(summary.total_examples, 0);
        assert!(summary.label_distribution.is_empty());
        assert!(summary.numeric.is_none());
        assert_eq!(summary.min_slice_size, None);
    }

    #[test]
    fn apply_transform_rewrites_labels_and_preserves_metadata() {
        let collection = LabelCollection::new(
            vec![example("a", 3, LabelValue::Float(250.0), 2)],
            sample_settings(),
        );

        let binarized = collection.apply_transform(|label| match label.as_f64() {
            Some(v) => LabelValue::Bool(v > 100.0),
            None => label.clone(),
        });

        assert_eq!(binarized.len(), 1);
        assert_eq!(binarized.to_table()[0].label, LabelValue::Bool(true));
        assert_eq!(binarized.to_table()[0].cutoff_time, ts(3));
        assert_eq!(binarized.to_table()[0].slice_size, 2);
        assert_eq!(binarized.settings(), collection.settings());
        assert_eq!(binarized.fingerprint(), collection.fingerprint());
    }

    #[test]
    fn identity_transform_round_trips() {
        let collection = LabelCollection::new(
            vec![
                example("a", 3, LabelValue::Int(7), 2),
                example("a", 5, LabelValue::Int(9), 3),
            ],
            sample_settings(),
        );

        let identity = collection.apply_transform(|label| label.clone());
        assert_eq!(identity, collection);
    }

    #[test]
    fn fingerprint_is_stable_and_settings_sensitive() {
        let a = LabelCollection::new(Vec::new(), sample_settings());
        let b = LabelCollection::new(Vec::new(), sample_settings());
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut other = sample_settings();
        other.gap = "3600s".to_string();
        let c = LabelCollection::new(Vec::new(), other);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn csv_export_writes_header_and_rows() {
        let collection = LabelCollection::new(
            vec![example("a", 3, LabelValue::Bool(true), 2)],
            sample_settings(),
        );

        let mut buffer = Vec::new();
        collection.write_csv(&mut buffer).expect("export succeeds");
        let text = String::from_utf8(buffer).expect("valid utf-8");
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("entity_id,cutoff_time,label,window_start,window_end,slice_size")
        );
        let row = lines.next().expect("one data row");
        assert!(row.starts_with("a,2025-01-01T03:00:00+00:00,true,"));
        assert!(row.ends_with(",2"));
    }
}
