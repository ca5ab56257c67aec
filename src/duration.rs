//! Stage 2 — Duration: assigns each activity a construction `Type` and an
//! integer `Duration` (days) via a median-normalized power law over a
//! geometry-selected metric.
//!
//! See spec.md §4.2.

use crate::error::AppError;
use crate::model::{CleanedActivity, EnrichedActivity};
use crate::normalize::to_float;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

static UNDERSCORE_OR_SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[_\s]+").unwrap());
static INSTALL_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)_Install_([A-Za-z0-9_]+)").unwrap());
static CIVIL_WORKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(^|_)civil[_ ]works($|_)").unwrap());
static SET_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)_Set_([A-Za-z0-9_]+)").unwrap());

/// Extract the construction `Type` from an `Element Name`, per spec.md's
/// three-rule precedence (`_Install_<Type>`, `civil works`, `_Set_<...>` →
/// `Equipment`), falling back to an empty string.
pub fn extract_activity_type(name: &str) -> String {
    let normalized = UNDERSCORE_OR_SPACE_RUN.replace_all(name.trim(), "_");
    if let Some(caps) = INSTALL_TYPE.captures(&normalized) {
        return caps[1].replace('_', " ").trim().to_string();
    }
    if CIVIL_WORKS.is_match(&normalized) {
        return "Civil Works".to_string();
    }
    if SET_TYPE.is_match(&normalized) {
        return "Equipment".to_string();
    }
    String::new()
}

/// Is this activity a `Set_*` equipment placement?
pub fn is_set_activity(name: &str) -> bool {
    let normalized = UNDERSCORE_OR_SPACE_RUN.replace_all(name.trim(), "_");
    SET_TYPE.is_match(&normalized)
}

const VOLUME_TYPES: &[&str] = &["Concrete", "Grout", "Civil Works", "Transformer"];
const RUN_TYPES: &[&str] = &["Piping", "Piping Insulation", "Cable Tray", "UG Conduit"];
const AREA_TYPES: &[&str] = &["Electrical", "Instrumentation"];

fn field_f64(rec: &CleanedActivity, key: &str) -> Option<f64> {
    rec.get(key).and_then(to_float)
}

/// Volume metric: prefer the `Volume` field, falling back to H·L·W, then
/// bounding-box extents.
fn volume_for_record(rec: &CleanedActivity) -> f64 {
    if let Some(v) = field_f64(rec, "Volume") {
        return v.max(0.0);
    }
    if let (Some(h), Some(l), Some(w)) = (
        field_f64(rec, "Height"),
        field_f64(rec, "Length"),
        field_f64(rec, "Width"),
    ) {
        return (h * l * w).max(0.0);
    }
    let bbox = [
        field_f64(rec, "MinOfMinX"),
        field_f64(rec, "MaxOfMaxX"),
        field_f64(rec, "MinOfMinY"),
        field_f64(rec, "MaxOfMaxY"),
        field_f64(rec, "MinOfMinZ"),
        field_f64(rec, "MaxOfMaxZ"),
    ];
    if let [Some(x1), Some(x2), Some(y1), Some(y2), Some(z1), Some(z2)] = bbox {
        let dx = (x2 - x1).max(0.0);
        let dy = (y2 - y1).max(0.0);
        let dz = (z2 - z1).max(0.0);
        return (dx * dy * dz).max(0.0);
    }
    0.0
}

fn run_length_for_record(rec: &CleanedActivity) -> f64 {
    let l = field_f64(rec, "Length").unwrap_or(0.0);
    let w = field_f64(rec, "Width").unwrap_or(0.0);
    l.max(w)
}

fn plan_area_for_record(rec: &CleanedActivity) -> f64 {
    let l = field_f64(rec, "Length").unwrap_or(0.0);
    let w = field_f64(rec, "Width").unwrap_or(0.0);
    (l * w).max(0.0)
}

fn height_for_record(rec: &CleanedActivity) -> f64 {
    field_f64(rec, "Height").unwrap_or(0.0)
}

/// Select the geometry metric used for duration scaling, per spec.md's
/// type → metric table.
pub fn metric_for(act_type: &str, rec: &CleanedActivity) -> f64 {
    if VOLUME_TYPES.contains(&act_type) {
        volume_for_record(rec)
    } else if RUN_TYPES.contains(&act_type) {
        run_length_for_record(rec)
    } else if AREA_TYPES.contains(&act_type) {
        plan_area_for_record(rec)
    } else if act_type == "Piling" {
        height_for_record(rec)
    } else {
        volume_for_record(rec)
    }
}

static INSTALL_EXPONENTS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("Concrete", 0.90),
        ("Grout", 0.80),
        ("Piling", 0.80),
        ("Cable Tray", 0.60),
        ("Electrical", 0.50),
        ("Instrumentation", 0.50),
        ("Piping", 0.70),
        ("Piping Insulation", 0.65),
        ("UG Conduit", 0.70),
        ("Transformer", 0.50),
        ("Civil Works", 0.90),
    ])
});

static INSTALL_BASE_DAYS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("Concrete", 3.0),
        ("Grout", 0.5),
        ("Piling", 2.0),
        ("Cable Tray", 3.0),
        ("Electrical", 5.0),
        ("Instrumentation", 4.0),
        ("Piping", 4.0),
        ("Piping Insulation", 3.0),
        ("UG Conduit", 3.0),
        ("Transformer", 1.5),
        ("Civil Works", 3.0),
    ])
});

static INSTALL_BOUNDS: Lazy<HashMap<&'static str, (f64, f64)>> = Lazy::new(|| {
    HashMap::from([
        ("Concrete", (0.5, 10.0)),
        ("Civil Works", (0.5, 10.0)),
        ("Grout", (0.25, 2.0)),
        ("Piling", (0.5, 8.0)),
        ("Piping", (1.0, 10.0)),
        ("Piping Insulation", (0.5, 8.0)),
        ("Cable Tray", (0.5, 8.0)),
        ("UG Conduit", (1.0, 8.0)),
        ("Electrical", (1.0, 12.0)),
        ("Instrumentation", (1.0, 10.0)),
        ("Transformer", (0.5, 5.0)),
    ])
});

const DEFAULT_BOUNDS: (f64, f64) = (0.25, 15.0);

static EQUIP_SUBTYPE_BASE_DAYS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("module_valve", 0.5),
        ("module_motor_pump_fan", 1.5),
        ("module_ahu", 1.5),
        ("module_transformer", 1.5),
        ("module_switchgear", 2.0),
        ("module_vessel", 2.0),
        ("module_tank", 2.5),
        ("module_vaporizer_heater", 2.0),
        ("module_compressor", 2.5),
        ("module_crane", 1.0),
        ("module_weighscale", 1.0),
        ("module_building_equipment", 3.0),
        ("module_other", 1.5),
    ])
});

static EQUIP_SUBTYPE_EXPONENT: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("module_valve", 0.40),
        ("module_motor_pump_fan", 0.50),
        ("module_ahu", 0.50),
        ("module_transformer", 0.50),
        ("module_switchgear", 0.60),
        ("module_vessel", 0.60),
        ("module_tank", 0.60),
        ("module_vaporizer_heater", 0.60),
        ("module_compressor", 0.60),
        ("module_crane", 0.40),
        ("module_weighscale", 0.40),
        ("module_building_equipment", 0.60),
        ("module_other", 0.50),
    ])
});

const EQUIP_BOUNDS: (f64, f64) = (0.25, 7.0);

static VALVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|[-_])V\d+($|[-_])|FV-\d+|PV-\d+").unwrap());
static AHU: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(AHU)\b").unwrap());
static TRANSFORMER: Lazy<Regex> = Lazy::new(|| Regex::new(r"XFMER|XFMR|TRANSFORMER").unwrap());
static SWITCHGEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SWITCHGEAR|SWGR|GEAR|MCC|PANEL\b|\bMV\b|\bLV\b").unwrap());
static VAPORIZER_HEATER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"VAPORIZ(ER|OR)|HEATER|TRIM HEATER|STEAM SPARGED").unwrap());
static COMPRESSOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"COMPRESSOR|BOOSTER").unwrap());
static TANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"TANK|STORAGE|BUFFER|DUMP").unwrap());
static VESSEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"VESSEL|ADSORBER|SILENCER\b").unwrap());
static CRANE: Lazy<Regex> = Lazy::new(|| Regex::new(r"CRANE").unwrap());
static WEIGHSCALE: Lazy<Regex> = Lazy::new(|| Regex::new(r"WEIGH|SCALE").unwrap());
static MOTOR_PUMP_FAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"MAC|BAC|PUMP|FAN").unwrap());
static BUILDING: Lazy<Regex> = Lazy::new(|| Regex::new(r"BUILDING").unwrap());

/// Classify a `Set_*` equipment placement into one of the fixed module
/// sub-types, evaluated in order — first match wins. Order is semantic: do
/// not reorder, since several patterns overlap (e.g. `PANEL` vs other
/// switchgear terms).
pub fn classify_module_subtype(name: &str) -> &'static str {
    let upper = name.to_uppercase();
    if VALVE.is_match(&upper) {
        "module_valve"
    } else if AHU.is_match(&upper) {
        "module_ahu"
    } else if TRANSFORMER.is_match(&upper) {
        "module_transformer"
    } else if SWITCHGEAR.is_match(&upper) {
        "module_switchgear"
    } else if VAPORIZER_HEATER.is_match(&upper) {
        "module_vaporizer_heater"
    } else if COMPRESSOR.is_match(&upper) {
        "module_compressor"
    } else if TANK.is_match(&upper) {
        "module_tank"
    } else if VESSEL.is_match(&upper) {
        "module_vessel"
    } else if CRANE.is_match(&upper) {
        "module_crane"
    } else if WEIGHSCALE.is_match(&upper) {
        "module_weighscale"
    } else if MOTOR_PUMP_FAN.is_match(&upper) {
        "module_motor_pump_fan"
    } else if BUILDING.is_match(&upper) {
        "module_building_equipment"
    } else {
        "module_other"
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    let mid = n / 2;
    if n % 2 == 1 {
        sorted[mid]
    } else {
        0.5 * (sorted[mid - 1] + sorted[mid])
    }
}

/// Compute `Type` and `Duration` for every cleaned activity, per spec.md
/// §4.2. Fails with `AppError::Config` if any activity's inferred type has
/// no exponent entry in the install table.
pub fn compute_durations(cleaned: &[CleanedActivity]) -> Result<Vec<EnrichedActivity>, AppError> {
    let mut type_metric_values: HashMap<String, Vec<f64>> = HashMap::new();
    for rec in cleaned {
        let name = element_name(rec);
        let act_type = extract_activity_type(&name);
        let metric = metric_for(&act_type, rec);
        type_metric_values.entry(act_type).or_default().push(metric);
    }

    let type_to_median: HashMap<String, f64> = type_metric_values
        .iter()
        .map(|(t, vs)| (t.clone(), median(vs)))
        .collect();

    let mut out = Vec::with_capacity(cleaned.len());
    for rec in cleaned {
        let name = element_name(rec);
        let act_type = extract_activity_type(&name);
        let metric = metric_for(&act_type, rec);
        let denom = type_to_median.get(&act_type).copied().unwrap_or(0.0);
        let denom = if denom > 0.0 { denom } else { 1.0 };

        let mut duration_days = if is_set_activity(&name) {
            let subtype = classify_module_subtype(&name);
            let beta = *EQUIP_SUBTYPE_EXPONENT.get(subtype).unwrap_or(&0.50);
            let base = *EQUIP_SUBTYPE_BASE_DAYS.get(subtype).unwrap_or(&1.5);
            let raw = base * (metric / denom).powf(beta);
            raw.clamp(EQUIP_BOUNDS.0, EQUIP_BOUNDS.1)
        } else {
            let beta = INSTALL_EXPONENTS.get(act_type.as_str()).copied().ok_or_else(|| {
                AppError::Config(format!(
                    "Missing exponent for type '{}'",
                    if act_type.is_empty() { "UNKNOWN" } else { &act_type }
                ))
            })?;
            let base = INSTALL_BASE_DAYS.get(act_type.as_str()).copied().unwrap_or(1.0);
            let raw = base * (metric / denom).powf(beta);
            let (min_d, max_d) = INSTALL_BOUNDS.get(act_type.as_str()).copied().unwrap_or(DEFAULT_BOUNDS);
            raw.clamp(min_d, max_d)
        };

        if act_type == "Concrete" {
            duration_days *= 0.5;
        }

        let duration_days = (duration_days * 1.5).max(1.0).ceil();

        let mut enriched: EnrichedActivity = rec.clone();
        for key in [
            "X Coordinate",
            "Y Coordinate",
            "Z Coordinate",
            "Position X",
            "Position Y",
            "Position Z",
        ] {
            enriched.remove(key);
        }
        enriched.insert("Type".to_string(), Value::String(act_type));
        enriched.insert("Duration".to_string(), Value::Number(
            serde_json::Number::from_f64(duration_days).unwrap(),
        ));
        out.push(enriched);
    }

    Ok(out)
}

fn element_name(rec: &CleanedActivity) -> String {
    match rec.get("Element Name") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
