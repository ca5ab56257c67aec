//! Stage 1 — Clean: pairs CAD layers with their first matching solid and
//! flattens the join into a bounding-boxed activity record.
//!
//! See spec.md §4.1.

use crate::error::AppError;
use crate::model::{CleanedActivity, RawRecord};
use crate::normalize::{extract_cwa, join_key, to_float};
use serde_json::{Map, Value};
use std::collections::HashMap;

const AUTO_GEOM_PREFIX: &str = "AutoCAD Geometry.";

const NUMERIC_GEOMETRY_HINTS: &[&str] = &[
    "position x",
    "position y",
    "position z",
    "height",
    "length",
    "width",
];

/// Coerce an HTTP request body into a record array plus an optional
/// dependency-rules object, per spec.md §4.1's input coercion rules.
///
/// Accepts either a bare array of objects, or an object with
/// `activities`/`data` holding one. The dependency-rules object is read
/// from the root under `dependencies`/`dependency_rules`/`dictionary`/
/// `dependencyRules`; failing that, each record is scanned for a nested
/// holder under the same key set plus `DependencyRules`.
pub fn coerce_payload(body: &Value) -> Result<(Vec<RawRecord>, Option<RawRecord>), AppError> {
    let (records, dependencies) = match body {
        Value::Array(items) => {
            let records = as_object_vec(items)
                .ok_or_else(|| AppError::InputShape("Array must contain objects.".to_string()))?;
            (records, None)
        }
        Value::Object(map) => {
            let data = map.get("activities").or_else(|| map.get("data"));
            let records = match data {
                None => Vec::new(),
                Some(Value::Array(items)) => as_object_vec(items).ok_or_else(|| {
                    AppError::InputShape(
                        "Body dict 'activities' or 'data' field must be an array of objects."
                            .to_string(),
                    )
                })?,
                Some(_) => {
                    return Err(AppError::InputShape(
                        "Body dict 'activities' or 'data' field must be an array of objects."
                            .to_string(),
                    ))
                }
            };

            let mut dependencies = map
                .get("dependencies")
                .or_else(|| map.get("dependency_rules"))
                .or_else(|| map.get("dictionary"))
                .or_else(|| map.get("dependencyRules"))
                .cloned();

            if dependencies.is_none() {
                'outer: for item in &records {
                    for key in [
                        "dependencyRules",
                        "DependencyRules",
                        "dependencies",
                        "dependency_rules",
                        "dictionary",
                    ] {
                        if let Some(candidate) = item.get(key) {
                            if candidate.is_object() {
                                dependencies = Some(candidate.clone());
                                break 'outer;
                            }
                        }
                    }
                }
            }

            let dependencies = match dependencies {
                Some(Value::Object(obj)) => Some(obj),
                Some(_) => {
                    return Err(AppError::InputShape(
                        "Dependencies must be an object if provided.".to_string(),
                    ))
                }
                None => None,
            };

            (records, dependencies)
        }
        _ => return Err(AppError::InputShape("Unsupported body format.".to_string())),
    };

    Ok((records, dependencies))
}

fn as_object_vec(items: &[Value]) -> Option<Vec<RawRecord>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(map) => out.push(map.clone()),
            _ => return None,
        }
    }
    Some(out)
}

fn category_class(rec: &RawRecord) -> String {
    match rec.get("Category/Class") {
        Some(Value::String(s)) => s.trim().to_lowercase(),
        Some(other) => other.to_string().trim_matches('"').trim().to_lowercase(),
        None => String::new(),
    }
}

/// Falls through to the next key on `null` *and* on an empty string,
/// matching the original's `or`-chain (Python treats `""` as falsy too).
fn layer_key_from_record(rec: &RawRecord) -> Option<String> {
    for key in ["Item.Layer", "General.Layer", "Item.Name", "General.Name", "Element Name"] {
        if let Some(v) = rec.get(key) {
            if v.is_null() {
                continue;
            }
            if let Some(s) = v.as_str() {
                if s.is_empty() {
                    continue;
                }
            }
            return Some(value_as_string(v));
        }
    }
    None
}

fn value_as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Collect `AutoCAD Geometry.*` fields from a solid record, stripping the
/// prefix and dropping `solid type`/`rotation` keys (including numbered
/// duplicates like `Solid type (2)`). Numeric-looking fields are parsed.
fn collect_geometry(rec: &RawRecord) -> Map<String, Value> {
    let mut geom = Map::new();
    for (k, v) in rec.iter() {
        if let Some(short) = k.strip_prefix(AUTO_GEOM_PREFIX) {
            let short_lower = short.to_lowercase();
            if short_lower.starts_with("solid type") || short_lower.starts_with("rotation") {
                continue;
            }
            if NUMERIC_GEOMETRY_HINTS.iter().any(|hint| short_lower.contains(hint)) {
                let parsed = to_float(v).map(|f| {
                    serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
                });
                geom.insert(short.to_string(), parsed.unwrap_or(Value::Null));
            } else {
                geom.insert(short.to_string(), v.clone());
            }
        }
    }
    geom
}

/// Join layers with their first matching solid and flatten into cleaned
/// activity records.
pub fn clean_data(records: &[RawRecord]) -> Vec<CleanedActivity> {
    let mut layers = Vec::new();
    let mut solids = Vec::new();
    for rec in records {
        match category_class(rec).as_str() {
            "layer" => layers.push(rec),
            "3d solid" => solids.push(rec),
            _ => {}
        }
    }

    let mut solids_by_layer: HashMap<String, Vec<&RawRecord>> = HashMap::new();
    for solid in &solids {
        if let Some(key) = layer_key_from_record(solid) {
            solids_by_layer.entry(join_key(&key)).or_default().push(solid);
        }
    }

    let mut cleaned = Vec::with_capacity(layers.len());
    for layer in &layers {
        let layer_name = layer_key_from_record(layer);
        let layer_name_norm = layer_name.as_deref().map(join_key).unwrap_or_default();

        let cwa = layer_name
            .as_deref()
            .and_then(extract_cwa)
            .or_else(|| layer.get("Element Name").and_then(|v| v.as_str()).and_then(extract_cwa));

        let matched_solids = solids_by_layer.get(&layer_name_norm).cloned().unwrap_or_default();
        let mut first_geom = Map::new();
        for solid in matched_solids {
            let geom = collect_geometry(solid);
            if !geom.is_empty() {
                first_geom = geom;
                break;
            }
        }

        let mut out: CleanedActivity = Map::new();
        if let Some(name) = layer.get("Element Name") {
            out.insert("Element Name".to_string(), name.clone());
        }
        out.insert(
            "CWA".to_string(),
            cwa.map(Value::String).unwrap_or(Value::Null),
        );
        if let Some(guid) = layer.get("GUID") {
            out.insert("GUID".to_string(), guid.clone());
        }
        for coord_key in ["X Coordinate", "Y Coordinate", "Z Coordinate"] {
            if let Some(v) = layer.get(coord_key) {
                let parsed = to_float(v)
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
                out.insert(coord_key.to_string(), parsed);
            }
        }
        for (k, v) in first_geom.iter() {
            out.insert(k.clone(), v.clone());
        }

        let h = first_geom.get("Height").and_then(to_float);
        let l = first_geom.get("Length").and_then(to_float);
        let w = first_geom.get("Width").and_then(to_float);
        if let (Some(h), Some(l), Some(w)) = (h, l, w) {
            out.insert("Volume".to_string(), number(h * l * w));
        }

        let px = first_geom.get("Position X").and_then(to_float);
        let py = first_geom.get("Position Y").and_then(to_float);
        let pz = first_geom.get("Position Z").and_then(to_float);
        if let (Some(px), Some(l)) = (px, l) {
            let half = l / 2.0;
            out.insert("MinOfMinX".to_string(), number(px - half));
            out.insert("MaxOfMaxX".to_string(), number(px + half));
        }
        if let (Some(py), Some(w)) = (py, w) {
            let half = w / 2.0;
            out.insert("MinOfMinY".to_string(), number(py - half));
            out.insert("MaxOfMaxY".to_string(), number(py + half));
        }
        if let (Some(pz), Some(h)) = (pz, h) {
            out.insert("MinOfMinZ".to_string(), number(pz));
            out.insert("MaxOfMaxZ".to_string(), number(pz + h));
        }

        cleaned.push(out);
    }

    cleaned
}

fn number(f: f64) -> Value {
    serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}
