//! Pipeline configuration.
//!
//! Stored as an optional JSON file; every key falls back to the layout of
//! the melanoma workbooks:
//! ```json
//! {
//!   "join": "reference",
//!   "empty_subset": "skip",
//!   "patient_columns": { "map": "Map", "x": "X", "y": "Y", "node_fields": "Node Fields" },
//!   "reference_columns": { "map": "Body map #", "coord_x": "x", "coord_y": "y", "coord_z": "z" }
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Which side of the site join decides the output rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinDirection {
    /// Every reference site appears, zero-filled when no patient matched.
    #[default]
    Reference,
    /// Only sites with grouped patients appear.
    Patient,
}

/// What to do with a filter variant that matched no patients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptySubsetPolicy {
    #[default]
    Skip,
    Emit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatientColumns {
    pub map: String,
    pub x: String,
    pub y: String,
    pub node_fields: String,
}

impl Default for PatientColumns {
    fn default() -> Self {
        Self {
            map: "Map".into(),
            x: "X".into(),
            y: "Y".into(),
            node_fields: "Node Fields".into(),
        }
    }
}

impl PatientColumns {
    pub fn site_key(&self) -> [&str; 3] {
        [&self.map, &self.x, &self.y]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferenceColumns {
    pub map: String,
    pub x: String,
    pub y: String,
    pub coord_x: String,
    pub coord_y: String,
    pub coord_z: String,
}

impl Default for ReferenceColumns {
    fn default() -> Self {
        Self {
            map: "Body map #".into(),
            x: "X".into(),
            y: "Y".into(),
            coord_x: "x".into(),
            coord_y: "y".into(),
            coord_z: "z".into(),
        }
    }
}

/// Drainage regions recorded in the node-fields column, prefixed with `l`/`r`
/// for the side of the body.
const NODE_FIELD_REGIONS: &[&str] = &[
    "o", "posta", "prea", "p", "f", "sm", "sl", "c1", "c2", "c3", "c4", "c5", "sc", "ax", "tri",
    "epi", "ic", "ing", "pop", "ilc",
];

/// The node-field tokens used by `--all-node-fields`.
pub fn default_node_fields() -> Vec<String> {
    ["l", "r"]
        .iter()
        .flat_map(|side| NODE_FIELD_REGIONS.iter().map(move |r| format!("{side}{r}")))
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub patient_columns: PatientColumns,
    pub reference_columns: ReferenceColumns,
    pub followup_suffix: String,
    pub join: JoinDirection,
    pub empty_subset: EmptySubsetPolicy,
    pub group_name: String,
    pub all_node_fields: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            patient_columns: PatientColumns::default(),
            reference_columns: ReferenceColumns::default(),
            followup_suffix: "_followup".into(),
            join: JoinDirection::default(),
            empty_subset: EmptySubsetPolicy::default(),
            group_name: "melanoma".into(),
            all_node_fields: default_node_fields(),
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}
