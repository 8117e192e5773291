//! Field roles of trial records
//!
//! Trial fields are either scalars (one value per trial), frame lists (one
//! value per rendered frame), or state lists (one value per state transition).
//! Some fields additionally hold objects (vectors, quaternions) that the
//! normalizer expands into scalar columns.

use crate::error::WrangleError;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Declared roles of the fields in a batch's trial records
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRoles {
    /// Lists with one entry per frame
    pub frame_fields: Vec<String>,
    /// Lists with one entry per state transition
    pub state_fields: Vec<String>,
    /// Object-valued columns to expand. When `None`, a column is expanded if
    /// its value in the first row of a table is an object.
    pub structured_fields: Option<Vec<String>>,
}

impl FieldRoles {
    pub fn new(frame_fields: Vec<String>, state_fields: Vec<String>) -> Self {
        Self {
            frame_fields,
            state_fields,
            structured_fields: None,
        }
    }

    pub fn with_structured_fields(mut self, fields: Vec<String>) -> Self {
        self.structured_fields = Some(fields);
        self
    }

    /// Infer roles from the first trial of the trial table.
    ///
    /// List-valued fields as long as `frame_reference` are frame fields; those
    /// as long as `state_reference` are state fields. Later trials are not
    /// inspected.
    pub fn infer(
        trials: &Table,
        frame_reference: &str,
        state_reference: Option<&str>,
    ) -> Result<Self, WrangleError> {
        if trials.is_empty() {
            return Err(WrangleError::NoTrials);
        }

        let lists: Vec<(&str, usize)> = trials
            .columns()
            .iter()
            .filter_map(|c| match trials.get(0, c) {
                Some(Value::Array(items)) => Some((c.as_str(), items.len())),
                _ => None,
            })
            .collect();

        let reference_len = |field: &str| {
            lists
                .iter()
                .find(|(c, _)| *c == field)
                .map(|(_, n)| *n)
                .ok_or_else(|| WrangleError::missing(field, "reference list of the first trial"))
        };

        let num_frames = reference_len(frame_reference)?;
        let frame_fields: Vec<String> = lists
            .iter()
            .filter(|(_, n)| *n == num_frames)
            .map(|(c, _)| c.to_string())
            .collect();
        info!("Frame variables are: {:?}", frame_fields);

        let state_fields = match state_reference {
            Some(reference) => {
                let num_states = reference_len(reference)?;
                if num_states == num_frames {
                    warn!(
                        "'{}' and '{}' have the same length ({}) in the first trial; \
                         fields of that length go to both frame and state tables",
                        frame_reference, reference, num_frames
                    );
                }
                let fields: Vec<String> = lists
                    .iter()
                    .filter(|(_, n)| *n == num_states)
                    .map(|(c, _)| c.to_string())
                    .collect();
                info!("State change variables are: {:?}", fields);
                fields
            }
            None => Vec::new(),
        };

        Ok(Self::new(frame_fields, state_fields))
    }

    /// All list fields, frame fields first, without duplicates
    pub fn list_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.frame_fields.iter().map(String::as_str).collect();
        for field in &self.state_fields {
            if !fields.contains(&field.as_str()) {
                fields.push(field);
            }
        }
        fields
    }
}
