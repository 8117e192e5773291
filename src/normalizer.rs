//! Schema normalization
//!
//! This module turns structured cell values into flat scalar columns.
//! - Object columns (vectors, quaternions, Euler angles) expand to `<col>_<key>`
//! - Runs of underscores in the resulting names collapse to one
//! - Subject `info` objects flatten recursively with `.` separators

use crate::table::Table;
use serde_json::{Map, Value};
use tracing::info;

/// Normalizer for expanding structured columns
pub struct SchemaNormalizer;

impl SchemaNormalizer {
    /// Expand object-valued columns into one column per leaf key.
    ///
    /// With `structured = None` a column is expanded only if its first-row value
    /// is an object; a column that is scalar in the first row and structured
    /// later stays as is. Passing the structured column names explicitly avoids
    /// that blind spot. Rows whose value is not an object get Null in every
    /// expanded column. Expanded columns are appended in place of the original.
    pub fn expand_object_columns(table: &Table, structured: Option<&[String]>) -> Table {
        if table.is_empty() {
            return table.clone();
        }

        let object_columns: Vec<String> = match structured {
            Some(fields) => fields
                .iter()
                .filter(|f| table.has_column(f))
                .cloned()
                .collect(),
            None => table
                .columns()
                .iter()
                .filter(|c| matches!(table.get(0, c), Some(Value::Object(_))))
                .cloned()
                .collect(),
        };

        let mut out = table.clone();
        for column in object_columns {
            let cells = match out.remove_column(&column) {
                Some(cells) => cells,
                None => continue,
            };

            let mut keys: Vec<String> = Vec::new();
            for cell in &cells {
                if let Value::Object(map) = cell {
                    for key in map.keys() {
                        if !keys.contains(key) {
                            keys.push(key.clone());
                        }
                    }
                }
            }

            let mut names = Vec::with_capacity(keys.len());
            for key in &keys {
                let name = collapse_separators(&format!("{column}_{key}"));
                let values = cells
                    .iter()
                    .map(|cell| match cell {
                        Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
                        _ => Value::Null,
                    })
                    .collect();
                out.set_column(&name, values);
                names.push(name);
            }
            info!("Expanded {} to {:?}", column, names);
        }
        out
    }
}

/// Collapse runs of `_` into a single underscore.
///
/// Three.js serializes orientation components as `_x`, `_y`, `_z`, which would
/// otherwise expand to `rhOri__x`.
pub fn collapse_separators(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut previous_underscore = false;
    for c in name.chars() {
        if c == '_' {
            if !previous_underscore {
                out.push(c);
            }
            previous_underscore = true;
        } else {
            out.push(c);
            previous_underscore = false;
        }
    }
    out
}

/// Flatten nested objects into dotted keys (`{"a": {"b": 1}}` → `{"a.b": 1}`).
///
/// Arrays and scalars are kept as leaf values; empty objects produce no keys.
pub fn flatten_dotted(object: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(&mut out, None, object);
    out
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, object: &Map<String, Value>) {
    for (key, value) in object {
        let name = match prefix {
            Some(p) => format!("{p}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_into(out, Some(&name), inner),
            other => {
                out.insert(name, other.clone());
            }
        }
    }
}
