//! Per-subject experiment records
//!
//! A batch is one JSON object keyed by subject id (a Firebase user id). Each
//! subject holds an `info` object and its trials, either as keys next to `info`
//! (`"0"`, `"1"`, ...), or as a dense array, which Firebase produces when the
//! trial keys are consecutive integers.

use crate::error::WrangleError;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Key of the subject-level metadata object
pub const INFO_KEY: &str = "info";

/// Key of an explicit trial container inside a subject record
pub const TRIALS_KEY: &str = "trials";

/// One participant's raw data
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRecord {
    /// Subject key as stored by the experiment platform
    pub uid: String,
    /// Subject-level metadata (home position, target distance, state names, ...)
    pub info: Map<String, Value>,
    /// Trials in storage order, keyed by their storage key
    pub trials: Vec<(String, Map<String, Value>)>,
}

impl SubjectRecord {
    /// Build a record from one subject's JSON value
    pub fn from_value(uid: &str, value: Value) -> Result<Self, WrangleError> {
        let mut object = match value {
            Value::Object(map) => map,
            other => {
                return Err(WrangleError::ParseError(format!(
                    "subject '{uid}' is a {} rather than an object",
                    json_type(&other)
                )))
            }
        };

        let info = match object.shift_remove(INFO_KEY) {
            Some(Value::Object(info)) => info,
            Some(other) => {
                return Err(WrangleError::ParseError(format!(
                    "'info' of subject '{uid}' is a {} rather than an object",
                    json_type(&other)
                )))
            }
            None => {
                warn!("Subject '{}' has no info object", uid);
                Map::new()
            }
        };

        let container = if object.len() == 1 && object.contains_key(TRIALS_KEY) {
            object.shift_remove(TRIALS_KEY).unwrap_or(Value::Null)
        } else {
            Value::Object(object)
        };

        let mut trials = Vec::new();
        for (key, trial) in keyed_trials(container)? {
            match trial {
                Value::Object(trial) => trials.push((key, trial)),
                Value::Null => debug!("Subject '{}': skipping empty trial slot {}", uid, key),
                other => warn!(
                    "Subject '{}': skipping key '{}' holding a {} instead of a trial",
                    uid,
                    key,
                    json_type(&other)
                ),
            }
        }

        Ok(Self {
            uid: uid.to_string(),
            info,
            trials,
        })
    }
}

/// Normalize a trial container to (key, trial) pairs.
///
/// Arrays are keyed by their index so both storage forms look alike downstream.
pub fn keyed_trials(container: Value) -> Result<Vec<(String, Value)>, WrangleError> {
    match container {
        Value::Object(map) => Ok(map.into_iter().collect()),
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(WrangleError::ParseError(format!(
            "trial container is a {} rather than an object or array",
            json_type(&other)
        ))),
    }
}

/// A batch of subject records assembled from one or more JSON documents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectBatch {
    subjects: Vec<SubjectRecord>,
}

impl SubjectBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one JSON document mapping subject keys to subject records
    pub fn parse(raw_json: &str) -> Result<Self, WrangleError> {
        let value: Value = serde_json::from_str(raw_json)?;
        let object = match value {
            Value::Object(map) => map,
            other => {
                return Err(WrangleError::ParseError(format!(
                    "expected an object keyed by subject, found a {}",
                    json_type(&other)
                )))
            }
        };

        let subjects = object
            .into_iter()
            .map(|(uid, value)| SubjectRecord::from_value(&uid, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { subjects })
    }

    /// Parse and merge several documents (one per data file)
    pub fn parse_documents<S: AsRef<str>>(documents: &[S]) -> Result<Self, WrangleError> {
        let mut batch = Self::new();
        for (i, document) in documents.iter().enumerate() {
            let parsed = Self::parse(document.as_ref())?;
            info!("Read document {} with {} subjects", i, parsed.len());
            batch.merge(parsed);
        }
        Ok(batch)
    }

    /// Merge another batch into this one.
    ///
    /// A subject already present is replaced in place; new subjects are appended.
    pub fn merge(&mut self, other: SubjectBatch) {
        for record in other.subjects {
            match self.subjects.iter_mut().find(|s| s.uid == record.uid) {
                Some(existing) => {
                    debug!("Subject '{}' appears in several documents; keeping the last", record.uid);
                    *existing = record;
                }
                None => self.subjects.push(record),
            }
        }
    }

    pub fn push(&mut self, record: SubjectRecord) {
        self.merge(SubjectBatch {
            subjects: vec![record],
        });
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn subjects(&self) -> &[SubjectRecord] {
        &self.subjects
    }

    pub fn into_subjects(self) -> Vec<SubjectRecord> {
        self.subjects
    }

    /// Warn when subject keys do not look like platform user ids.
    ///
    /// Returns true if every key has the expected length.
    pub fn check_uids(&self, expected_len: usize) -> bool {
        let odd: Vec<&str> = self
            .subjects
            .iter()
            .map(|s| s.uid.as_str())
            .filter(|uid| uid.chars().count() != expected_len)
            .collect();
        if !odd.is_empty() {
            warn!(
                "Keys do not look like user ids ({} of {} have length != {}): {:?}. Check your files.",
                odd.len(),
                self.subjects.len(),
                expected_len,
                odd
            );
        }
        odd.is_empty()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
