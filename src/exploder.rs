//! Long-format explosion
//!
//! Trial rows carry per-frame and per-state-change lists. This module turns
//! them into one row per list element, copying identifying trial scalars onto
//! every generated row.

use crate::error::WrangleError;
use crate::schema::{FieldRoles, SUBJECT_COLUMN, TRIAL_COLUMN};
use crate::table::Table;
use serde_json::Value;
use tracing::{info, warn};

/// Trial, frame and state-change tables split out of a trial table
#[derive(Debug, Clone)]
pub struct ExplodedTrials {
    /// Trial table without list fields
    pub trials: Table,
    pub frames: Table,
    pub states: Table,
}

/// Explode `list_fields` of every trial into one row per element.
///
/// The row count of each trial is the length of its `reference` list; other
/// list fields are indexed without checking their length (a shorter list
/// yields Null). Missing `keys` are skipped with a warning. Output columns are
/// the list fields followed by the keys.
pub fn explode(
    trials: &Table,
    list_fields: &[&str],
    reference: &str,
    keys: &[String],
) -> Result<Table, WrangleError> {
    let present_keys: Vec<&str> = keys
        .iter()
        .map(String::as_str)
        .filter(|k| {
            let present = trials.has_column(k);
            if !present {
                warn!("Trial table has no '{}' column to copy onto exploded rows", k);
            }
            present
        })
        .collect();

    let mut columns: Vec<&str> = list_fields.to_vec();
    columns.extend(present_keys.iter().copied());
    let mut out = Table::with_columns(columns);

    for row in 0..trials.len() {
        let length = match trials.get(row, reference) {
            Some(Value::Array(items)) => items.len(),
            _ => {
                return Err(WrangleError::missing(
                    reference,
                    format!("list of trial {}", describe_trial(trials, row)),
                ))
            }
        };

        let lists: Vec<Option<&Vec<Value>>> = list_fields
            .iter()
            .map(|f| match trials.get(row, f) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .collect();
        let scalars: Vec<Value> = present_keys
            .iter()
            .map(|k| trials.get(row, k).cloned().unwrap_or(Value::Null))
            .collect();

        for i in 0..length {
            let mut cells: Vec<Value> = lists
                .iter()
                .map(|list| list.and_then(|l| l.get(i)).cloned().unwrap_or(Value::Null))
                .collect();
            cells.extend(scalars.iter().cloned());
            out.push_row(cells);
        }
    }
    Ok(out)
}

/// Split list fields out of the trial table into frame and state-change tables
pub fn split_trials(
    mut trials: Table,
    roles: &FieldRoles,
    frame_reference: &str,
    frame_keys: &[String],
    state_reference: Option<&str>,
    state_keys: &[String],
) -> Result<ExplodedTrials, WrangleError> {
    let frame_fields: Vec<&str> = roles.frame_fields.iter().map(String::as_str).collect();
    if !frame_fields.contains(&frame_reference) {
        return Err(WrangleError::missing(frame_reference, "declared frame fields"));
    }
    let frames = explode(&trials, &frame_fields, frame_reference, frame_keys)?;

    let states = match state_reference {
        Some(reference) => {
            let state_fields: Vec<&str> =
                roles.state_fields.iter().map(String::as_str).collect();
            if !state_fields.contains(&reference) {
                return Err(WrangleError::missing(reference, "declared state fields"));
            }
            explode(&trials, &state_fields, reference, state_keys)?
        }
        None => Table::new(),
    };

    for field in roles.list_fields() {
        trials.remove_column(field);
    }

    info!(
        "Exploded {} trials into {} frames and {} state changes",
        trials.len(),
        frames.len(),
        states.len()
    );
    Ok(ExplodedTrials {
        trials,
        frames,
        states,
    })
}

fn describe_trial(trials: &Table, row: usize) -> String {
    let subject = trials
        .get(row, SUBJECT_COLUMN)
        .map(|v| v.to_string())
        .unwrap_or_else(|| "?".to_string());
    let trial = trials
        .get(row, TRIAL_COLUMN)
        .map(|v| v.to_string())
        .unwrap_or_else(|| format!("row {row}"));
    format!("({subject}, {trial})")
}
