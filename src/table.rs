//! Dynamic tables
//!
//! Every stage of the pipeline reads and writes [`Table`]s: a list of named
//! columns and rows of JSON values. Missing values are `Value::Null`; numeric
//! columns hold JSON numbers and are read back through [`Table::column_f64`].

use crate::error::WrangleError;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Column-named rows of JSON values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Convert an optional float into a table cell. Non-finite values become Null.
pub fn num(value: Option<f64>) -> Value {
    match value {
        Some(v) if v.is_finite() => {
            serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
        }
        _ => Value::Null,
    }
}

/// Lenient numeric read of a cell.
///
/// Numbers, numeric strings and booleans are accepted; Null is missing.
/// Returns `Err(())` for values that cannot be interpreted as a number.
pub(crate) fn value_as_f64(value: &Value) -> Result<Option<f64>, ()> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => s.trim().parse::<f64>().map(Some).map_err(|_| ()),
        _ => Err(()),
    }
}

fn key_of(values: &[&Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Hashed lookup from key-column values to the first row holding them
#[derive(Debug, Clone, Default)]
pub struct RowIndex {
    rows: HashMap<String, usize>,
}

impl RowIndex {
    /// Row whose key columns equal `values`, in the order the index was built with
    pub fn get(&self, values: &[&Value]) -> Option<usize> {
        self.rows.get(&key_of(values)).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Table {
    /// Create an empty table with no columns
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table with the given columns
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from records; columns are the union of keys in order of appearance
    pub fn from_records(records: impl IntoIterator<Item = Map<String, Value>>) -> Self {
        let mut table = Self::new();
        for record in records {
            table.push_record(record);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at (`row`, `column`), or `None` if either does not exist
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Numeric cell at (`row`, `column`); missing and non-numeric cells are `None`
    pub fn get_f64(&self, row: usize, column: &str) -> Option<f64> {
        self.get(row, column)
            .and_then(|v| value_as_f64(v).ok().flatten())
    }

    /// All cells of a column
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// A column read as floats
    pub fn column_f64(&self, name: &str) -> Result<Vec<Option<f64>>, WrangleError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| WrangleError::missing(name, "numeric column lookup"))?;
        self.rows
            .iter()
            .enumerate()
            .map(|(row, r)| {
                value_as_f64(&r[idx]).map_err(|_| WrangleError::ColumnType {
                    column: name.to_string(),
                    row,
                })
            })
            .collect()
    }

    /// Index of `name`, appending a Null-filled column if it does not exist
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        self.columns.len() - 1
    }

    pub fn set(&mut self, row: usize, column: &str, value: Value) {
        let idx = self.ensure_column(column);
        if let Some(r) = self.rows.get_mut(row) {
            r[idx] = value;
        }
    }

    /// Replace (or append) a whole column. `values` must have one entry per row.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len(), "column length mismatch");
        let idx = self.ensure_column(name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
    }

    pub fn set_f64_column(&mut self, name: &str, values: &[Option<f64>]) {
        self.set_column(name, values.iter().map(|v| num(*v)).collect());
    }

    /// Remove a column and return its cells
    pub fn remove_column(&mut self, name: &str) -> Option<Vec<Value>> {
        let idx = self.column_index(name)?;
        self.columns.remove(idx);
        Some(self.rows.iter_mut().map(|r| r.remove(idx)).collect())
    }

    /// Append a row given in column order. Short rows are padded with Null.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Append a record, adding any columns it introduces
    pub fn push_record(&mut self, record: Map<String, Value>) {
        for key in record.keys() {
            self.ensure_column(key);
        }
        let mut row = vec![Value::Null; self.columns.len()];
        for (key, value) in record {
            if let Some(idx) = self.column_index(&key) {
                row[idx] = value;
            }
        }
        self.rows.push(row);
    }

    /// Rows at `indices`, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    /// Rows whose mask entry is true
    pub fn filter_rows(&self, keep: &[bool]) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .zip(keep)
                .filter(|(_, k)| **k)
                .map(|(r, _)| r.clone())
                .collect(),
        }
    }

    /// Group row indices by the values of `keys`.
    ///
    /// Groups are returned in order of first appearance and rows keep their
    /// original order within each group.
    pub fn group_indices(&self, keys: &[&str]) -> Result<Vec<(Vec<Value>, Vec<usize>)>, WrangleError> {
        let key_idx = keys
            .iter()
            .map(|k| {
                self.column_index(k)
                    .ok_or_else(|| WrangleError::missing(*k, "grouping key"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut lookup: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Value>, Vec<usize>)> = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            let values: Vec<&Value> = key_idx.iter().map(|&k| &row[k]).collect();
            let key = key_of(&values);
            match lookup.get(&key) {
                Some(&g) => groups[g].1.push(i),
                None => {
                    lookup.insert(key, groups.len());
                    groups.push((values.into_iter().cloned().collect(), vec![i]));
                }
            }
        }
        Ok(groups)
    }

    /// First row where every `(column, value)` pair matches
    pub fn find_row(&self, criteria: &[(&str, &Value)]) -> Option<usize> {
        let idx: Vec<(usize, &Value)> = criteria
            .iter()
            .map(|(c, v)| self.column_index(c).map(|i| (i, *v)))
            .collect::<Option<_>>()?;
        self.rows
            .iter()
            .position(|row| idx.iter().all(|(i, v)| &row[*i] == *v))
    }

    /// Index rows by the values of `keys`; the first row wins on duplicates
    pub fn row_index(&self, keys: &[&str]) -> Result<RowIndex, WrangleError> {
        let key_idx = keys
            .iter()
            .map(|k| {
                self.column_index(k)
                    .ok_or_else(|| WrangleError::missing(*k, "row index key"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = HashMap::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            let values: Vec<&Value> = key_idx.iter().map(|&k| &row[k]).collect();
            rows.entry(key_of(&values)).or_insert(i);
        }
        Ok(RowIndex { rows })
    }

    /// Distinct values of a column in order of first appearance
    pub fn unique_values(&self, column: &str) -> Result<Vec<Value>, WrangleError> {
        Ok(self
            .group_indices(&[column])?
            .into_iter()
            .filter_map(|(mut key, _)| key.pop())
            .collect())
    }

    /// Row whose `column` value is nearest to `value`. Missing cells are skipped.
    pub fn nearest_row(&self, column: &str, value: f64) -> Result<Option<usize>, WrangleError> {
        let values = self.column_f64(column)?;
        Ok(values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i, (v - value).abs())))
            .filter(|(_, d)| !d.is_nan())
            .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((i, d)),
            })
            .map(|(i, _)| i))
    }

    /// Rows of a single (subject, trial).
    ///
    /// Either key may be `None`, in which case one is drawn at random from the
    /// values present (the trial is drawn among the chosen subject's trials).
    pub fn trial<R: Rng + ?Sized>(
        &self,
        subject: Option<&Value>,
        trial: Option<&Value>,
        rng: &mut R,
    ) -> Result<Table, WrangleError> {
        let subject = match subject {
            Some(s) => s.clone(),
            None => match self.unique_values("subject")?.choose(rng) {
                Some(s) => s.clone(),
                None => return Ok(self.select_rows(&[])),
            },
        };
        let subject_idx = self
            .column_index("subject")
            .ok_or_else(|| WrangleError::missing("subject", "trial lookup"))?;
        let subject_rows: Vec<usize> = (0..self.len())
            .filter(|&i| self.rows[i][subject_idx] == subject)
            .collect();
        let subject_table = self.select_rows(&subject_rows);

        let trial = match trial {
            Some(t) => t.clone(),
            None => match subject_table.unique_values("trialNumber")?.choose(rng) {
                Some(t) => t.clone(),
                None => return Ok(subject_table),
            },
        };
        let trial_idx = subject_table
            .column_index("trialNumber")
            .ok_or_else(|| WrangleError::missing("trialNumber", "trial lookup"))?;
        let keep: Vec<bool> = subject_table
            .rows
            .iter()
            .map(|r| r[trial_idx] == trial)
            .collect();
        Ok(subject_table.filter_rows(&keep))
    }

    /// Rows as JSON objects
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for record in self.to_records() {
            seq.serialize_element(&record)?;
        }
        seq.end()
    }
}
