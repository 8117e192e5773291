//! Pipeline orchestration
//!
//! This module provides the public API for Motion Wrangle.
//! It runs the full pipeline from raw subject JSON to the four output tables.

use crate::config::WrangleConfig;
use crate::error::WrangleError;
use crate::exploder::split_trials;
use crate::kinematics::KinematicDiffer;
use crate::normalizer::SchemaNormalizer;
use crate::onset::OnsetDetector;
use crate::schema::{FieldRoles, RecordAdapter, SubjectBatch};
use crate::types::{RunProvenance, WrangledTables};
use crate::{PRODUCER_NAME, WRANGLE_VERSION};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// Wrangle a raw batch of subject records with kinematics and onsets.
///
/// # Arguments
/// * `raw_json` - JSON object keyed by subject id
/// * `config` - Pipeline configuration
///
/// # Returns
/// Trial, subject, frame and state-change tables
///
/// # Example
/// ```ignore
/// let tables = wrangle_batch(&raw_json, &WrangleConfig::default())?;
/// println!("{}", tables.to_json()?);
/// ```
pub fn wrangle_batch(raw_json: &str, config: &WrangleConfig) -> Result<WrangledTables, WrangleError> {
    let processor = WrangleProcessor::with_config(config.clone())?;
    processor.process(&SubjectBatch::parse(raw_json)?)
}

/// Processor holding a validated configuration.
///
/// Stages can be run one at a time (`reshape`, `compute_kinematics`,
/// `detect_onsets`) to inspect intermediate tables, or all at once with
/// `process`. Every output bundle is stamped with this processor's instance id.
pub struct WrangleProcessor {
    config: WrangleConfig,
    instance_id: String,
}

impl Default for WrangleProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl WrangleProcessor {
    /// Create a new processor with default settings
    pub fn new() -> Self {
        Self {
            config: WrangleConfig::default(),
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create a processor with a specific configuration
    pub fn with_config(config: WrangleConfig) -> Result<Self, WrangleError> {
        config.validate()?;
        Ok(Self {
            config,
            instance_id: Uuid::new_v4().to_string(),
        })
    }

    /// Create a processor from a JSON configuration
    pub fn from_config_json(json: &str) -> Result<Self, WrangleError> {
        Self::with_config(WrangleConfig::from_json(json)?)
    }

    /// Use a fixed instance id (for reproducible output)
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn config(&self) -> &WrangleConfig {
        &self.config
    }

    pub fn provenance(&self) -> RunProvenance {
        RunProvenance {
            producer: PRODUCER_NAME.to_string(),
            version: WRANGLE_VERSION.to_string(),
            instance_id: self.instance_id.clone(),
            computed_at_utc: Utc::now(),
        }
    }

    /// Reshape subject records into trial, subject, frame and state-change tables.
    ///
    /// Pipeline stages:
    /// 1. RecordAdapter - Trial and subject tables, `info` flattened
    /// 2. FieldRoles - Declared, or inferred from the first trial
    /// 3. Exploder - Frame and state-change tables in long format
    /// 4. SchemaNormalizer - Object columns expanded to scalar columns
    pub fn reshape(&self, batch: &SubjectBatch) -> Result<WrangledTables, WrangleError> {
        let schema = &self.config.schema;
        if let Some(expected) = schema.expected_uid_length {
            batch.check_uids(expected);
        }

        // Stage 1: Subject records to tables
        let (trials, subjects) = RecordAdapter::to_tables(batch)?;

        // Stage 2: Field roles
        let roles = match &schema.roles {
            Some(roles) => roles.clone(),
            None => FieldRoles::infer(
                &trials,
                &schema.frame_reference,
                schema.state_reference.as_deref(),
            )?,
        };

        // Stage 3: Explode list fields
        let exploded = split_trials(
            trials,
            &roles,
            &schema.frame_reference,
            &schema.frame_keys,
            schema.state_reference.as_deref(),
            &schema.state_keys,
        )?;

        // Stage 4: Expand object columns
        let structured = roles.structured_fields.as_deref();
        let trials = SchemaNormalizer::expand_object_columns(&exploded.trials, structured);
        let states = SchemaNormalizer::expand_object_columns(&exploded.states, structured);
        let mut frames = SchemaNormalizer::expand_object_columns(&exploded.frames, structured);

        // Mixed integer and float timestamps read back as floats
        let t = frames.column_f64(&schema.frame_reference)?;
        frames.set_f64_column(&schema.frame_reference, &t);

        Ok(WrangledTables {
            trials,
            subjects,
            frames,
            states,
            provenance: self.provenance(),
        })
    }

    /// Add kinematic columns to the frame table
    pub fn compute_kinematics(&self, tables: WrangledTables) -> Result<WrangledTables, WrangleError> {
        let frames = KinematicDiffer::new(&self.config.kinematics).compute(&tables.frames, &tables.subjects)?;
        Ok(WrangledTables { frames, ..tables })
    }

    /// Add onset metrics to the trial table and onset-relative time to the frame table
    pub fn detect_onsets(&self, tables: WrangledTables) -> Result<WrangledTables, WrangleError> {
        let (trials, frames) = OnsetDetector::new(&self.config.onset).apply(
            &tables.trials,
            &tables.subjects,
            &tables.frames,
            &self.config.kinematics.pos_prefix,
        )?;
        Ok(WrangledTables {
            trials,
            frames,
            ..tables
        })
    }

    /// Run every stage
    pub fn process(&self, batch: &SubjectBatch) -> Result<WrangledTables, WrangleError> {
        let tables = self.reshape(batch)?;
        let tables = self.compute_kinematics(tables)?;
        let tables = self.detect_onsets(tables)?;
        info!(
            "Wrangled {} subjects, {} trials, {} frames, {} state changes",
            tables.subjects.len(),
            tables.trials.len(),
            tables.frames.len(),
            tables.states.len()
        );
        Ok(tables)
    }

    /// Merge several JSON documents (one per data file) and run every stage
    pub fn process_documents<S: AsRef<str>>(&self, documents: &[S]) -> Result<WrangledTables, WrangleError> {
        self.process(&SubjectBatch::parse_documents(documents)?)
    }
}

impl WrangledTables {
    /// Serialize all four tables and the provenance block
    pub fn to_json(&self) -> Result<String, WrangleError> {
        Ok(serde_json::to_string(self)?)
    }
}
