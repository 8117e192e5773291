//! Adapter from subject records to trial and subject tables
//!
//! Each subject gets a zero-padded sequential label (`"000"`, `"001"`, ...) in
//! batch order. Trial rows keep every trial field, list-valued ones included;
//! the exploder separates those out afterwards.

use crate::error::WrangleError;
use crate::normalizer::flatten_dotted;
use crate::schema::subject_record::SubjectBatch;
use crate::table::Table;
use serde_json::Value;
use tracing::info;

/// Column holding the sequential subject label
pub const SUBJECT_COLUMN: &str = "subject";

/// Column holding the original subject key
pub const UID_COLUMN: &str = "uid";

/// Column identifying a trial within a subject
pub const TRIAL_COLUMN: &str = "trialNumber";

/// Sequential label of the subject at `index` in the batch
pub fn subject_label(index: usize) -> String {
    format!("{:0>3}", index)
}

/// Adapter for converting subject records into tables
pub struct RecordAdapter;

impl RecordAdapter {
    /// Build the trial table (one row per trial) and the subject table (one row per subject).
    ///
    /// The `info` object is flattened with `.` separators, so a nested home
    /// position becomes `homePosn.x`, `homePosn.y`, `homePosn.z`.
    pub fn to_tables(batch: &SubjectBatch) -> Result<(Table, Table), WrangleError> {
        if batch.is_empty() {
            return Err(WrangleError::EmptyBatch);
        }

        let mut trials = Table::new();
        let mut subjects = Table::new();

        for (si, record) in batch.subjects().iter().enumerate() {
            let label = Value::String(subject_label(si));
            let uid = Value::String(record.uid.clone());

            let mut info = flatten_dotted(&record.info);
            info.insert(SUBJECT_COLUMN.to_string(), label.clone());
            info.insert(UID_COLUMN.to_string(), uid.clone());
            subjects.push_record(info);

            for (_, trial) in &record.trials {
                let mut row = trial.clone();
                row.insert(SUBJECT_COLUMN.to_string(), label.clone());
                row.insert(UID_COLUMN.to_string(), uid.clone());
                trials.push_record(row);
            }
        }

        if trials.is_empty() {
            return Err(WrangleError::NoTrials);
        }

        info!(
            "Assembled {} trials from {} subjects",
            trials.len(),
            subjects.len()
        );
        Ok((trials, subjects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn batch() -> SubjectBatch {
        SubjectBatch::parse(
            r#"{
                "first": {
                    "info": {"homePosn": {"x": 0.1, "y": 1.0, "z": -0.2}, "targetDistance": 0.2},
                    "0": {"trialNumber": 0, "cycle": 0, "t": [0, 10]},
                    "1": {"trialNumber": 1, "cycle": 0, "t": [0, 10, 20]}
                },
                "second": {
                    "info": {"homePosn": {"x": 0.0, "y": 1.1, "z": 0.0}},
                    "0": {"trialNumber": 0, "cycle": 0, "t": [0]}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_subject_labels_are_zero_padded() {
        assert_eq!(subject_label(0), "000");
        assert_eq!(subject_label(12), "012");
        assert_eq!(subject_label(1234), "1234");
    }

    #[test]
    fn test_to_tables() {
        let (trials, subjects) = RecordAdapter::to_tables(&batch()).unwrap();
        assert_eq!(trials.len(), 3);
        assert_eq!(subjects.len(), 2);

        assert_eq!(trials.get(2, "subject"), Some(&json!("001")));
        assert_eq!(trials.get(2, "uid"), Some(&json!("second")));
        assert_eq!(trials.get(1, "t"), Some(&json!([0, 10, 20])));

        assert!(subjects.has_column("homePosn.x"));
        assert_eq!(subjects.get_f64(0, "homePosn.z"), Some(-0.2));
        assert_eq!(subjects.get(1, "targetDistance"), Some(&Value::Null));
    }

    #[test]
    fn test_empty_batch() {
        assert!(matches!(
            RecordAdapter::to_tables(&SubjectBatch::new()),
            Err(WrangleError::EmptyBatch)
        ));
    }

    #[test]
    fn test_subjects_without_trials() {
        let batch = SubjectBatch::parse(r#"{"only": {"info": {}}}"#).unwrap();
        assert!(matches!(
            RecordAdapter::to_tables(&batch),
            Err(WrangleError::NoTrials)
        ));
    }
}
