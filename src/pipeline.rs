//! Stage orchestration: wires the pure stage functions in `clean`,
//! `duration`, `sequence`, and `critical` to the working-directory
//! artifacts described in spec.md §6, so the HTTP layer (`dashboard.rs`)
//! and the CLI stage subcommands (`cli.rs`) share one implementation.

use crate::clean::{clean_data, coerce_payload};
use crate::critical::{
    attach_predecessors_from_edges, coerce_critical_body, compute_critical_path, merge_activities,
};
use crate::duration::compute_durations;
use crate::error::{AppError, AppResult};
use crate::model::{ActivityNode, DependencyRules, Edge};
use crate::sequence::{compute_edges, order_activities};
use crate::store::{timestamp_now, write_json_atomic, WorkingDir};
use serde_json::{json, Map, Value};

const CLEAN_INPUT: &str = "clean_input_latest.json";
const CLEAN_OUTPUT: &str = "clean_output_latest.json";
const DURATION_OUTPUT: &str = "duration_output_latest.json";
const SEQUENCE_OUTPUT: &str = "sequence_output_latest.json";
const SEQUENCE_EDGES: &str = "sequence_edges_latest.json";
const CRITICAL_OUTPUT: &str = "critical_output_latest.json";
const DEPENDENCY_RULES: &str = "dependency_rules.json";

fn file_path_str(wd: &WorkingDir, filename: &str) -> String {
    wd.path(filename).display().to_string()
}

/// Read a required artifact as a JSON array of objects, failing with
/// `MissingArtifact` (404) if absent or `InputShape` (422) if it isn't a
/// list of objects — spec.md §7's "missing prerequisite artifact" and
/// "input shape" kinds.
fn read_required_object_list(
    wd: &WorkingDir,
    filename: &str,
    label: &str,
) -> AppResult<Vec<Map<String, Value>>> {
    let value: Value = wd
        .read_json::<Value>(filename)
        .map_err(AppError::from)?
        .ok_or_else(|| {
            AppError::MissingArtifact(format!(
                "{label} artifact not found at {}; run the previous stage first",
                file_path_str(wd, filename)
            ))
        })?;
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(m) => out.push(m),
                    _ => {
                        return Err(AppError::InputShape(format!(
                            "{label} artifact must be a list of objects"
                        )))
                    }
                }
            }
            Ok(out)
        }
        _ => Err(AppError::InputShape(format!("{label} artifact must be a list"))),
    }
}

/// Defensive check carried over from the original duration job: every
/// enriched record must carry a non-null numeric `Duration` after
/// `compute_durations` runs. The current algorithm always produces one, but
/// we verify rather than assume, naming the first few offending indices in
/// a `Config` (422) error if a future change to the algorithm breaks that.
fn check_durations_present(enriched: &[crate::model::EnrichedActivity]) -> AppResult<()> {
    let missing: Vec<usize> = enriched
        .iter()
        .enumerate()
        .filter(|(_, rec)| !matches!(rec.get("Duration"), Some(Value::Number(_))))
        .map(|(i, _)| i)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let shown: Vec<String> = missing.iter().take(5).map(usize::to_string).collect();
    let suffix = if missing.len() > 5 { "..." } else { "" };
    Err(AppError::Config(format!(
        "Some activities missing Duration: indices {}{suffix}",
        shown.join(", ")
    )))
}

fn read_dependency_rules(wd: &WorkingDir) -> AppResult<Option<DependencyRules>> {
    let value: Option<Value> = wd.read_json(DEPENDENCY_RULES).map_err(AppError::from)?;
    match value {
        None => Ok(None),
        Some(Value::Object(map)) => {
            let mut rules = DependencyRules::new();
            for (k, v) in map {
                let Value::Array(items) = v else { continue };
                let preds = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s),
                        other => Some(other.to_string()),
                    })
                    .collect();
                rules.insert(k, preds);
            }
            Ok(Some(rules))
        }
        Some(_) => Ok(None),
    }
}

/// `/clean` — joins layers with solids and writes `clean_input_latest.json`
/// / `clean_output_latest.json` (and `dependency_rules.json` when the
/// request body carries one).
pub fn run_clean(wd: &WorkingDir, body: &Value) -> AppResult<Value> {
    let (records, dependencies) = coerce_payload(body)?;
    let ts = timestamp_now();

    wd.write_latest_and_archive(CLEAN_INPUT, "clean", "input", &ts, body)
        .map_err(AppError::from)?;

    let mut files = Map::new();
    files.insert("input".to_string(), json!(file_path_str(wd, CLEAN_INPUT)));

    if let Some(deps) = &dependencies {
        write_json_atomic(&wd.path(DEPENDENCY_RULES), deps).map_err(AppError::from)?;
        files.insert(
            "dependency_rules".to_string(),
            json!(file_path_str(wd, DEPENDENCY_RULES)),
        );
    }

    let cleaned = clean_data(&records);
    let cleaned_value = Value::Array(cleaned.into_iter().map(Value::Object).collect());
    wd.write_latest_and_archive(CLEAN_OUTPUT, "clean", "output", &ts, &cleaned_value)
        .map_err(AppError::from)?;
    files.insert("output".to_string(), json!(file_path_str(wd, CLEAN_OUTPUT)));

    let rows = cleaned_value.as_array().map(Vec::len).unwrap_or(0);
    Ok(json!({ "rows": rows, "result": cleaned_value, "files": files }))
}

/// `/duration` — reads `clean_output_latest.json`, classifies each
/// activity's `Type` and `Duration`, and writes `duration_output_latest.json`.
pub fn run_duration(wd: &WorkingDir) -> AppResult<Value> {
    let cleaned = read_required_object_list(wd, CLEAN_OUTPUT, "clean output")?;
    let enriched = compute_durations(&cleaned)?;
    check_durations_present(&enriched)?;
    let enriched_value = Value::Array(enriched.into_iter().map(Value::Object).collect());

    let ts = timestamp_now();
    wd.write_latest_and_archive(DURATION_OUTPUT, "duration", "output", &ts, &enriched_value)
        .map_err(AppError::from)?;

    let mut files = Map::new();
    files.insert("output".to_string(), json!(file_path_str(wd, DURATION_OUTPUT)));

    let rows = enriched_value.as_array().map(Vec::len).unwrap_or(0);
    Ok(json!({ "rows": rows, "result": enriched_value, "files": files }))
}

/// `/sequence` — reads `duration_output_latest.json` (and the optional
/// `dependency_rules.json`), infers predecessor edges, and writes the
/// ordered node list plus the edge list.
pub fn run_sequence(wd: &WorkingDir) -> AppResult<Value> {
    let enriched = read_required_object_list(wd, DURATION_OUTPUT, "duration output")?;
    let rules = read_dependency_rules(wd)?;

    let edges = compute_edges(&enriched, rules.as_ref());
    let nodes = order_activities(&enriched, &edges);

    let edges_value = serde_json::to_value(&edges).map_err(|e| {
        AppError::Unexpected(anyhow::anyhow!("serializing sequence edges: {e}"))
    })?;
    let nodes_value = serde_json::to_value(&nodes).map_err(|e| {
        AppError::Unexpected(anyhow::anyhow!("serializing sequence nodes: {e}"))
    })?;

    let ts = timestamp_now();
    wd.write_latest_and_archive(SEQUENCE_OUTPUT, "sequence", "output", &ts, &nodes_value)
        .map_err(AppError::from)?;
    wd.write_latest_and_archive(SEQUENCE_EDGES, "sequence", "edges", &ts, &edges_value)
        .map_err(AppError::from)?;

    let mut files = Map::new();
    files.insert("output".to_string(), json!(file_path_str(wd, SEQUENCE_OUTPUT)));
    files.insert("edges".to_string(), json!(file_path_str(wd, SEQUENCE_EDGES)));

    Ok(json!({ "edges": edges_value, "result": nodes_value, "files": files }))
}

/// `/critical` — reads the sequence stage's node and edge lists, merges in
/// any extra activities from the request body, and runs the CPM pass.
pub fn run_critical(wd: &WorkingDir, body: &Value) -> AppResult<Value> {
    let nodes_raw: Value = wd
        .read_json::<Value>(SEQUENCE_OUTPUT)
        .map_err(AppError::from)?
        .ok_or_else(|| {
            AppError::MissingArtifact(format!(
                "sequence output artifact not found at {}; run /sequence first",
                file_path_str(wd, SEQUENCE_OUTPUT)
            ))
        })?;
    let Value::Array(node_items) = nodes_raw else {
        return Err(AppError::InputShape("sequence output artifact must be a list".to_string()));
    };
    let mut base: Vec<ActivityNode> = Vec::with_capacity(node_items.len());
    for item in node_items {
        let node: ActivityNode = serde_json::from_value(item)
            .map_err(|e| AppError::InputShape(format!("invalid sequence node: {e}")))?;
        base.push(node);
    }

    let edges: Vec<Edge> = wd
        .read_json(SEQUENCE_EDGES)
        .map_err(AppError::from)?
        .unwrap_or_default();
    attach_predecessors_from_edges(&mut base, &edges);

    let extra = coerce_critical_body(body)?;
    let merged = merge_activities(base, extra);
    let cpm = compute_critical_path(&merged);

    let cpm_value = serde_json::to_value(&cpm)
        .map_err(|e| AppError::Unexpected(anyhow::anyhow!("serializing CPM result: {e}")))?;

    let ts = timestamp_now();
    wd.write_latest_and_archive(CRITICAL_OUTPUT, "critical", "output", &ts, &cpm_value)
        .map_err(AppError::from)?;

    Ok(json!({ "result": cpm_value }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_pipeline_s1_through_s5() {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkingDir::new(dir.path()).unwrap();

        let body = json!([
            {
                "Element Name": "CWA_ASU-1A01_Install_Concrete",
                "Category/Class": "Layer",
                "GUID": "g-1"
            },
            {
                "Element Name": "CWA_ASU-1A01_Install_Concrete",
                "Category/Class": "3D Solid",
                "AutoCAD Geometry.Position X": 0.0,
                "AutoCAD Geometry.Position Y": 0.0,
                "AutoCAD Geometry.Position Z": 0.0,
                "AutoCAD Geometry.Length": 4.0,
                "AutoCAD Geometry.Width": 4.0,
                "AutoCAD Geometry.Height": 0.5
            },
            {
                "Element Name": "CWA_ASU-1A01_Set_V101",
                "Category/Class": "Layer",
                "GUID": "g-2"
            },
            {
                "Element Name": "CWA_ASU-1A01_Set_V101",
                "Category/Class": "3D Solid",
                "AutoCAD Geometry.Position X": 0.0,
                "AutoCAD Geometry.Position Y": 0.0,
                "AutoCAD Geometry.Position Z": 0.5,
                "AutoCAD Geometry.Length": 1.0,
                "AutoCAD Geometry.Width": 1.0,
                "AutoCAD Geometry.Height": 1.0
            }
        ]);

        let clean_result = run_clean(&wd, &body).unwrap();
        assert_eq!(clean_result["rows"], json!(2));
        assert!(wd.exists(CLEAN_OUTPUT));

        let duration_result = run_duration(&wd).unwrap();
        assert_eq!(duration_result["rows"], json!(2));
        assert!(wd.exists(DURATION_OUTPUT));

        let sequence_result = run_sequence(&wd).unwrap();
        let edges = sequence_result["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0]["Predecessor"], json!("CWA_ASU-1A01_Install_Concrete"));

        let critical_result = run_critical(&wd, &Value::Null).unwrap();
        let cpm = critical_result["result"].as_array().unwrap();
        assert_eq!(cpm.len(), 2);
        let equipment = cpm
            .iter()
            .find(|a| a["ScheduleActivityID"] == json!("CWA_ASU-1A01_Set_V101"))
            .unwrap();
        assert!(equipment["ES"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn duration_without_clean_artifact_is_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkingDir::new(dir.path()).unwrap();
        let err = run_duration(&wd).unwrap_err();
        assert!(matches!(err, AppError::MissingArtifact(_)));
    }

    #[test]
    fn critical_accepts_extra_activity_with_explicit_predecessor() {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkingDir::new(dir.path()).unwrap();
        let nodes = json!([
            {"ScheduleActivityID": "A", "Type": "Concrete", "Duration": 2, "CWA": "1A01", "TaskType": "Construct"}
        ]);
        wd.write_latest_and_archive(SEQUENCE_OUTPUT, "sequence", "output", "20260101_000000", &nodes)
            .unwrap();
        wd.write_latest_and_archive(SEQUENCE_EDGES, "sequence", "edges", "20260101_000000", &json!([]))
            .unwrap();

        let extras = json!([
            {"ScheduleActivityID": "B", "Type": "Equipment", "Duration": 1, "Predecessors": ["A"]}
        ]);
        let result = run_critical(&wd, &extras).unwrap();
        let cpm = result["result"].as_array().unwrap();
        let b = cpm.iter().find(|a| a["ScheduleActivityID"] == json!("B")).unwrap();
        assert_eq!(b["ES"].as_f64().unwrap(), 2.0);
        assert!(b["Critical"].as_bool().unwrap());
    }
}
