//! Shared record and activity types flowing between pipeline stages.
//!
//! Raw CAD extract records are untyped key/value blobs — we keep them as
//! `serde_json::Map` rather than a fixed struct, and build typed views
//! (`CleanedActivity`, `EnrichedActivity`, ...) on top without mutating the
//! underlying map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// An unconstrained string-keyed record, as extracted from CAD software.
pub type RawRecord = Map<String, Value>;

/// A cleaned activity: the join of one layer with its first matching solid.
///
/// Stored as an ordered map so JSON output preserves the field order spec'd
/// in `spec.md` §4.1 (`Element Name`, `CWA`, `GUID`, coordinates, geometry,
/// `Volume`, bounding box).
pub type CleanedActivity = Map<String, Value>;

/// An enriched activity: a cleaned activity plus `Type` and `Duration`.
pub type EnrichedActivity = Map<String, Value>;

/// A predecessor edge between two activities in the same CWA.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    #[serde(rename = "ScheduleActivityID")]
    pub schedule_activity_id: String,
    #[serde(rename = "Predecessor")]
    pub predecessor: String,
    #[serde(rename = "Rel")]
    pub rel: String,
    #[serde(rename = "TaskType")]
    pub task_type: String,
}

impl Edge {
    pub fn new(schedule_activity_id: impl Into<String>, predecessor: impl Into<String>) -> Self {
        Edge {
            schedule_activity_id: schedule_activity_id.into(),
            predecessor: predecessor.into(),
            rel: "FS".to_string(),
            task_type: "Construct".to_string(),
        }
    }
}

/// An activity node in the sequence stage's stable topological order.
///
/// `predecessors` is absent (`None`) for every node the sequence stage
/// emits — spec.md's sequence-stage schema has no such field, and that
/// stage's predecessor relation lives entirely in the separate edge list.
/// The critical stage populates it while merging extras (spec.md §4.4), so
/// it rides along on the same type rather than a parallel one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityNode {
    #[serde(rename = "ScheduleActivityID")]
    pub schedule_activity_id: String,
    #[serde(rename = "Type", default)]
    pub activity_type: Option<String>,
    #[serde(rename = "Duration", default)]
    pub duration: Option<Value>,
    #[serde(rename = "CWA", default)]
    pub cwa: Option<String>,
    #[serde(rename = "TaskType", default)]
    pub task_type: String,
    #[serde(rename = "Predecessors", default, skip_serializing_if = "Option::is_none")]
    pub predecessors: Option<Vec<String>>,
}

/// A node after the CPM forward/backward pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpmActivity {
    #[serde(rename = "ScheduleActivityID")]
    pub schedule_activity_id: String,
    #[serde(rename = "Type")]
    pub activity_type: Option<String>,
    #[serde(rename = "Duration")]
    pub duration: Value,
    #[serde(rename = "CWA")]
    pub cwa: Option<String>,
    #[serde(rename = "TaskType")]
    pub task_type: String,
    #[serde(rename = "Predecessors")]
    pub predecessors: Vec<String>,
    #[serde(rename = "ES")]
    pub es: f64,
    #[serde(rename = "EF")]
    pub ef: f64,
    #[serde(rename = "LS")]
    pub ls: f64,
    #[serde(rename = "LF")]
    pub lf: f64,
    #[serde(rename = "Float")]
    pub float: f64,
    #[serde(rename = "Critical")]
    pub critical: bool,
}

/// A predecessor rule: allowed predecessor type plus the spatial thresholds
/// used to confirm a candidate. `vert` is `(th_low, th_up)`; absent means no
/// vertical-adjacency check is performed for this rule.
#[derive(Debug, Clone, PartialEq)]
pub struct PredecessorRule {
    pub pred_type: String,
    pub horiz: Option<f64>,
    pub vert: Option<(f64, f64)>,
}

/// Dependency rules: current-type -> ordered, deduplicated list of allowed
/// predecessor types. Keys are compared case-folded with internal
/// whitespace collapsed (see `crate::normalize::fold`).
pub type DependencyRules = HashMap<String, Vec<String>>;
