//! Orientation resolution
//!
//! Recorded orientations come from three.js objects, serialized either as an
//! Euler triple (`_x`, `_y`, `_z`, order XYZ, flagged `isEuler`) or as a
//! quaternion (`_w`, `_x`, `_y`, `_z`, flagged `isQuaternion`). Conversions
//! follow `Quaternion.setFromEuler` and `Vector3.applyQuaternion` term for term
//! so resolved directions match what the experiment rendered.

use crate::error::WrangleError;
use crate::table::{value_as_f64, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The world -Z axis, "forward" in three.js
    pub fn forward() -> Self {
        Self::new(0.0, 0.0, -1.0)
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl From<[f64; 3]> for Vector3 {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Euler angles in radians, applied in XYZ order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EulerXyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Half-angle product for XYZ order
    pub fn from_euler_xyz(euler: &EulerXyz) -> Self {
        let (s1, c1) = (euler.x / 2.0).sin_cos();
        let (s2, c2) = (euler.y / 2.0).sin_cos();
        let (s3, c3) = (euler.z / 2.0).sin_cos();

        Self {
            x: s1 * c2 * c3 + c1 * s2 * s3,
            y: c1 * s2 * c3 - s1 * c2 * s3,
            z: c1 * c2 * s3 + s1 * s2 * c3,
            w: c1 * c2 * c3 - s1 * s2 * s3,
        }
    }

    /// Rotate `v` by this quaternion (`q * v * q⁻¹`), without renormalizing
    pub fn rotate(&self, v: Vector3) -> Vector3 {
        let (qx, qy, qz, qw) = (self.x, self.y, self.z, self.w);

        let ix = qw * v.x + qy * v.z - qz * v.y;
        let iy = qw * v.y + qz * v.x - qx * v.z;
        let iz = qw * v.z + qx * v.y - qy * v.x;
        let iw = -qx * v.x - qy * v.y - qz * v.z;

        Vector3 {
            x: ix * qw + iw * -qx + iy * -qz - iz * -qy,
            y: iy * qw + iw * -qy + iz * -qx - ix * -qz,
            z: iz * qw + iw * -qz + ix * -qy - iy * -qx,
        }
    }
}

/// A recorded orientation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rotation {
    Euler(EulerXyz),
    Quaternion(Quaternion),
}

impl Rotation {
    pub fn to_quaternion(&self) -> Quaternion {
        match self {
            Rotation::Euler(e) => Quaternion::from_euler_xyz(e),
            Rotation::Quaternion(q) => *q,
        }
    }

    /// Direction obtained by rotating `reference` by this orientation
    pub fn direction(&self, reference: Vector3) -> Vector3 {
        self.to_quaternion().rotate(reference)
    }
}

/// Add `dir_x`, `dir_y`, `dir_z` columns resolved from the `<prefix>_*` columns.
///
/// Each row is read as a quaternion when `<prefix>_isQuaternion` is true, as
/// Euler angles when `<prefix>_isEuler` is true, and otherwise by whether it
/// has a `<prefix>_w` component. Rows with missing components get Null.
/// Returns false (and adds nothing) when the table has no `<prefix>_x` column.
pub fn add_direction_columns(
    table: &mut Table,
    prefix: &str,
    reference: Vector3,
) -> Result<bool, WrangleError> {
    let col = |suffix: &str| format!("{prefix}_{suffix}");
    if !table.has_column(&col("x")) {
        debug!("No '{}' orientation columns; skipping direction", prefix);
        return Ok(false);
    }

    let xs = table.column_f64(&col("x"))?;
    let ys = table.column_f64(&col("y"))?;
    let zs = table.column_f64(&col("z"))?;
    let ws = if table.has_column(&col("w")) {
        table.column_f64(&col("w"))?
    } else {
        vec![None; table.len()]
    };
    let flag = |name: &str| -> Vec<bool> {
        match table.column(name) {
            Some(cells) => cells.iter().map(|v| is_true(v)).collect(),
            None => vec![false; table.len()],
        }
    };
    let is_euler = flag(&col("isEuler"));
    let is_quaternion = flag(&col("isQuaternion"));

    let mut unresolved = 0usize;
    let directions: Vec<Option<Vector3>> = (0..table.len())
        .map(|i| {
            let rotation = match (xs[i], ys[i], zs[i], ws[i]) {
                (Some(x), Some(y), Some(z), Some(w)) if !is_euler[i] || is_quaternion[i] => {
                    Some(Rotation::Quaternion(Quaternion { w, x, y, z }))
                }
                (Some(x), Some(y), Some(z), _) if !is_quaternion[i] => {
                    Some(Rotation::Euler(EulerXyz { x, y, z }))
                }
                _ => None,
            };
            if rotation.is_none() {
                unresolved += 1;
            }
            rotation.map(|r| r.direction(reference))
        })
        .collect();

    if unresolved > 0 {
        warn!(
            "{} of {} rows have no resolvable '{}' orientation",
            unresolved,
            table.len(),
            prefix
        );
    }

    table.set_f64_column("dir_x", &directions.iter().map(|d| d.map(|v| v.x)).collect::<Vec<_>>());
    table.set_f64_column("dir_y", &directions.iter().map(|d| d.map(|v| v.y)).collect::<Vec<_>>());
    table.set_f64_column("dir_z", &directions.iter().map(|d| d.map(|v| v.z)).collect::<Vec<_>>());
    Ok(true)
}

fn is_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        other => matches!(value_as_f64(other), Ok(Some(v)) if v != 0.0),
    }
}
