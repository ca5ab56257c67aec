//! End-to-end tests driving all four pipeline stages through the public
//! `cadsched::pipeline` functions against a real (tempdir) working
//! directory — the same entry points the HTTP dashboard and CLI use.

use cadsched::pipeline::{run_clean, run_critical, run_duration, run_sequence};
use cadsched::store::WorkingDir;
use serde_json::{json, Value};

fn foundation_pad(cwa: &str, z: f64) -> (Value, Value) {
    let layer = json!({
        "Element Name": format!("CWA_ASU-{cwa}_Install_Concrete"),
        "Category/Class": "Layer",
        "GUID": "pad-layer"
    });
    let solid = json!({
        "Element Name": format!("CWA_ASU-{cwa}_Install_Concrete"),
        "Category/Class": "3D Solid",
        "AutoCAD Geometry.Position X": 10.0,
        "AutoCAD Geometry.Position Y": 10.0,
        "AutoCAD Geometry.Position Z": z,
        "AutoCAD Geometry.Length": 4.0,
        "AutoCAD Geometry.Width": 4.0,
        "AutoCAD Geometry.Height": 1.0
    });
    (layer, solid)
}

#[test]
fn s1_clean_stage_extracts_cwa_and_bounding_box() {
    let dir = tempfile::tempdir().unwrap();
    let wd = WorkingDir::new(dir.path()).unwrap();

    let body = json!([
        {
            "Element Name": "CWA_ASU-1A01_FoundationSlab",
            "Category/Class": "Layer",
            "GUID": "g-1"
        },
        {
            "Element Name": "CWA_ASU-1A01_FoundationSlab",
            "Category/Class": "3D Solid",
            "AutoCAD Geometry.Position X": 10.0,
            "AutoCAD Geometry.Position Y": 0.0,
            "AutoCAD Geometry.Position Z": 0.0,
            "AutoCAD Geometry.Length": 4.0,
            "AutoCAD Geometry.Width": 2.0,
            "AutoCAD Geometry.Height": 1.0
        }
    ]);

    let result = run_clean(&wd, &body).unwrap();
    let rows = result["result"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    let activity = &rows[0];
    assert_eq!(activity["CWA"], json!("1A01"));
    assert_eq!(activity["Volume"], json!(8.0));
    assert_eq!(activity["MinOfMinX"], json!(8.0));
    assert_eq!(activity["MaxOfMaxX"], json!(12.0));
    assert_eq!(activity["MinOfMinZ"], json!(0.0));
    assert_eq!(activity["MaxOfMaxZ"], json!(1.0));

    // Every write lands both at *_latest and under archive/.
    assert!(wd.exists("clean_input_latest.json"));
    assert!(wd.exists("clean_output_latest.json"));
    let archive_dir = dir.path().join("archive");
    let archived: Vec<_> = std::fs::read_dir(&archive_dir).unwrap().collect();
    assert!(!archived.is_empty());
}

#[test]
fn full_pipeline_s1_through_s5_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let wd = WorkingDir::new(dir.path()).unwrap();

    let (slab_layer, slab_solid) = foundation_pad("2B07", 0.0);
    let pump_layer = json!({
        "Element Name": "CWA_ASU-2B07_Set_V205",
        "Category/Class": "Layer",
        "GUID": "pump-layer"
    });
    let pump_solid = json!({
        "Element Name": "CWA_ASU-2B07_Set_V205",
        "Category/Class": "3D Solid",
        "AutoCAD Geometry.Position X": 10.0,
        "AutoCAD Geometry.Position Y": 10.0,
        "AutoCAD Geometry.Position Z": 1.0,
        "AutoCAD Geometry.Length": 1.0,
        "AutoCAD Geometry.Width": 1.0,
        "AutoCAD Geometry.Height": 1.0
    });

    let body = json!([slab_layer, slab_solid, pump_layer, pump_solid]);
    let clean = run_clean(&wd, &body).unwrap();
    assert_eq!(clean["rows"], json!(2));

    let duration = run_duration(&wd).unwrap();
    let enriched = duration["result"].as_array().unwrap();
    assert!(enriched.iter().all(|a| a["Duration"].as_f64().unwrap() >= 1.0));
    assert!(enriched
        .iter()
        .any(|a| a["Type"] == json!("Concrete") || a["Type"] == json!("Equipment")));

    let sequence = run_sequence(&wd).unwrap();
    let edges = sequence["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 1, "valve sits on the slab, same CWA, overlapping footprint");
    assert_eq!(edges[0]["Predecessor"], json!("CWA_ASU-2B07_Install_Concrete"));
    assert_eq!(edges[0]["ScheduleActivityID"], json!("CWA_ASU-2B07_Set_V205"));

    let critical = run_critical(&wd, &Value::Null).unwrap();
    let cpm = critical["result"].as_array().unwrap();
    assert_eq!(cpm.len(), 2);
    let slab = cpm.iter().find(|a| a["ScheduleActivityID"] == json!("CWA_ASU-2B07_Install_Concrete")).unwrap();
    let valve = cpm.iter().find(|a| a["ScheduleActivityID"] == json!("CWA_ASU-2B07_Set_V205")).unwrap();
    assert_eq!(slab["ES"], json!(0.0));
    assert_eq!(valve["ES"], slab["EF"]);
    assert_eq!(valve["EF"].as_f64().unwrap(), valve["ES"].as_f64().unwrap() + valve["Duration"].as_f64().unwrap());

    // Project finish == max(EF) == max(LF), idempotent on rerun.
    let finish = cpm.iter().map(|a| a["EF"].as_f64().unwrap()).fold(0.0_f64, f64::max);
    let lf_max = cpm.iter().map(|a| a["LF"].as_f64().unwrap()).fold(0.0_f64, f64::max);
    assert_eq!(finish, lf_max);

    let critical_again = run_critical(&wd, &Value::Null).unwrap();
    assert_eq!(critical, critical_again, "CPM must be idempotent on identical inputs");
}

#[test]
fn sequence_fails_fast_without_duration_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let wd = WorkingDir::new(dir.path()).unwrap();
    let err = run_sequence(&wd).unwrap_err();
    assert!(matches!(err, cadsched::error::AppError::MissingArtifact(_)));
}

#[test]
fn critical_merges_extra_activity_and_unions_predecessors() {
    let dir = tempfile::tempdir().unwrap();
    let wd = WorkingDir::new(dir.path()).unwrap();

    let (slab_layer, slab_solid) = foundation_pad("3C09", 0.0);
    run_clean(&wd, &json!([slab_layer, slab_solid])).unwrap();
    run_duration(&wd).unwrap();
    run_sequence(&wd).unwrap();

    let extras = json!([
        {
            "ScheduleActivityID": "Punchlist-Walkdown",
            "Type": "",
            "Duration": 1,
            "TaskType": "Construct",
            "Predecessors": ["CWA_ASU-3C09_Install_Concrete"]
        }
    ]);
    let critical = run_critical(&wd, &extras).unwrap();
    let cpm = critical["result"].as_array().unwrap();
    assert_eq!(cpm.len(), 2);
    let walkdown = cpm.iter().find(|a| a["ScheduleActivityID"] == json!("Punchlist-Walkdown")).unwrap();
    assert!(walkdown["Predecessors"]
        .as_array()
        .unwrap()
        .contains(&json!("CWA_ASU-3C09_Install_Concrete")));
    assert!(walkdown["ES"].as_f64().unwrap() > 0.0);
}

#[test]
fn user_dependency_rules_flow_from_clean_through_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let wd = WorkingDir::new(dir.path()).unwrap();

    let elec_layer = json!({
        "Element Name": "CWA_ASU-4D02_Install_Electrical",
        "Category/Class": "Layer"
    });
    let elec_solid = json!({
        "Element Name": "CWA_ASU-4D02_Install_Electrical",
        "Category/Class": "3D Solid",
        "AutoCAD Geometry.Position X": 0.0,
        "AutoCAD Geometry.Position Y": 0.0,
        "AutoCAD Geometry.Position Z": -2.0,
        "AutoCAD Geometry.Length": 10.0,
        "AutoCAD Geometry.Width": 1.0,
        "AutoCAD Geometry.Height": 0.5
    });
    let pipe_layer = json!({
        "Element Name": "CWA_ASU-4D02_Install_Piping",
        "Category/Class": "Layer"
    });
    let pipe_solid = json!({
        "Element Name": "CWA_ASU-4D02_Install_Piping",
        "Category/Class": "3D Solid",
        "AutoCAD Geometry.Position X": 0.0,
        "AutoCAD Geometry.Position Y": 0.0,
        "AutoCAD Geometry.Position Z": -2.0,
        "AutoCAD Geometry.Length": 10.0,
        "AutoCAD Geometry.Width": 1.0,
        "AutoCAD Geometry.Height": 0.5
    });

    let body = json!({
        "activities": [elec_layer, elec_solid, pipe_layer, pipe_solid],
        "dependencies": { "Electrical": ["Piping"] }
    });
    run_clean(&wd, &body).unwrap();
    assert!(wd.exists("dependency_rules.json"));

    run_duration(&wd).unwrap();
    let sequence = run_sequence(&wd).unwrap();
    let edges = sequence["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["Predecessor"], json!("CWA_ASU-4D02_Install_Piping"));
}
