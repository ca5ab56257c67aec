//! Stage 4 — Critical: merges the sequenced activity list with its edges,
//! then runs the Critical Path Method forward/backward pass.
//!
//! See spec.md §4.4.

use crate::error::AppError;
use crate::model::{ActivityNode, CpmActivity, Edge};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// Coerce a request body's "extra activities" payload into a list of
/// activity nodes. Accepts a bare object (a single activity) as well as an
/// array of them, matching the routes' tolerance for either shape.
pub fn coerce_extra_activities(value: &Value) -> Result<Vec<ActivityNode>, AppError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                serde_json::from_value(item.clone())
                    .map_err(|e| AppError::InputShape(format!("invalid activity: {e}")))
            })
            .collect(),
        Value::Object(_) => {
            let node: ActivityNode = serde_json::from_value(value.clone())
                .map_err(|e| AppError::InputShape(format!("invalid activity: {e}")))?;
            Ok(vec![node])
        }
        _ => Err(AppError::InputShape(
            "extra activities must be an object or array of objects".to_string(),
        )),
    }
}

/// Coerce a `/critical` request body into extra activities, per spec.md
/// §6: a bare array of activities, an object with an `activities` list, or
/// an object with an `output` list (or a JSON-encoded string of one) — in
/// either object case a bare single activity is also accepted directly.
pub fn coerce_critical_body(body: &Value) -> Result<Vec<ActivityNode>, AppError> {
    match body {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => coerce_extra_activities(body),
        Value::Object(map) => {
            if let Some(output) = map.get("output") {
                let resolved = match output {
                    Value::String(s) => serde_json::from_str::<Value>(s).map_err(|e| {
                        AppError::InputShape(format!("output string is not valid JSON: {e}"))
                    })?,
                    other => other.clone(),
                };
                return coerce_extra_activities(&resolved);
            }
            if let Some(activities) = map.get("activities") {
                return coerce_extra_activities(activities);
            }
            coerce_extra_activities(body)
        }
        _ => Err(AppError::InputShape(
            "extras must be an object or array of objects".to_string(),
        )),
    }
}

/// Fill in each node's `Predecessors` from a separate edge list (as
/// produced by the sequence stage), in edge order. Nodes with no matching
/// edges get `Some(vec![])`, not `None` — once this runs, every node
/// carries an explicit predecessor list ready for `merge_activities`.
pub fn attach_predecessors_from_edges(nodes: &mut [ActivityNode], edges: &[Edge]) {
    let mut by_id: HashMap<&str, Vec<String>> = nodes
        .iter()
        .map(|n| (n.schedule_activity_id.as_str(), Vec::new()))
        .collect();
    for edge in edges {
        if let Some(preds) = by_id.get_mut(edge.schedule_activity_id.as_str()) {
            preds.push(edge.predecessor.clone());
        }
    }
    for node in nodes.iter_mut() {
        node.predecessors = by_id.remove(node.schedule_activity_id.as_str());
    }
}

/// Union two predecessor lists, preserving the base order and appending any
/// new entries from `extra` that aren't already present.
fn union_predecessors(base: &[String], extra: &[String]) -> Vec<String> {
    let mut out = base.to_vec();
    let mut seen: std::collections::HashSet<&str> = out.iter().map(String::as_str).collect();
    for p in extra {
        if seen.insert(p.as_str()) {
            out.push(p.clone());
        }
    }
    out
}

/// Merge a base activity list (the sequence stage's nodes, predecessors
/// filled in from its edge list) with extra activities supplied on the
/// request, keyed by `ScheduleActivityID`, per spec.md §4.4.
///
/// For an ID present in both: overwrite `Type`/`Duration`/`CWA`/`TaskType`
/// when the extra record provides them, and union `Predecessors` —
/// preserving base order, appending any new preds the extra names. For a
/// brand-new ID: default `TaskType = "Construct"`, `Predecessors = []`.
pub fn merge_activities(base: Vec<ActivityNode>, extra: Vec<ActivityNode>) -> Vec<ActivityNode> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, ActivityNode> = HashMap::new();
    for mut node in base.into_iter() {
        let id = node.schedule_activity_id.clone();
        if node.predecessors.is_none() {
            node.predecessors = Some(Vec::new());
        }
        order.push(id.clone());
        by_id.insert(id, node);
    }
    for node in extra.into_iter() {
        let id = node.schedule_activity_id.clone();
        match by_id.get_mut(&id) {
            Some(existing) => {
                if node.activity_type.is_some() {
                    existing.activity_type = node.activity_type;
                }
                if node.duration.is_some() {
                    existing.duration = node.duration;
                }
                if node.cwa.is_some() {
                    existing.cwa = node.cwa;
                }
                if !node.task_type.is_empty() {
                    existing.task_type = node.task_type;
                }
                if let Some(extra_preds) = node.predecessors {
                    let base_preds = existing.predecessors.take().unwrap_or_default();
                    existing.predecessors = Some(union_predecessors(&base_preds, &extra_preds));
                }
            }
            None => {
                let mut node = node;
                if node.task_type.is_empty() {
                    node.task_type = "Construct".to_string();
                }
                if node.predecessors.is_none() {
                    node.predecessors = Some(Vec::new());
                }
                order.push(id.clone());
                by_id.insert(id, node);
            }
        }
    }
    order.into_iter().map(|id| by_id.remove(&id).unwrap()).collect()
}

fn duration_days(node: &ActivityNode) -> f64 {
    node.duration
        .as_ref()
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(1.0)
}

/// Topological sort breaking ties lexicographically by `ScheduleActivityID`
/// (unlike the sequence stage's input-order tie-break — CPM only needs a
/// valid forward-pass order, not a stable one). Cyclic or unreachable
/// residual nodes are appended in ID order.
fn toposort(ids: &[String], predecessors: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut indegree: HashMap<&str, usize> = ids.iter().map(|id| (id.as_str(), 0)).collect();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in ids {
        for pred in predecessors.get(id).into_iter().flatten() {
            if indegree.contains_key(pred.as_str()) {
                *indegree.get_mut(id.as_str()).unwrap() += 1;
                successors.entry(pred.as_str()).or_default().push(id.as_str());
            }
        }
    }

    let mut ready: Vec<&str> = indegree.iter().filter(|(_, &d)| d == 0).map(|(&id, _)| id).collect();
    ready.sort_unstable();
    let mut queue: VecDeque<&str> = ready.into();
    let mut visited: HashMap<&str, bool> = ids.iter().map(|id| (id.as_str(), false)).collect();
    let mut order = Vec::with_capacity(ids.len());

    while let Some(id) = queue.pop_front() {
        if visited[id] {
            continue;
        }
        visited.insert(id, true);
        order.push(id.to_string());
        let mut freed: Vec<&str> = Vec::new();
        if let Some(succs) = successors.get(id) {
            for &succ in succs {
                let d = indegree.get_mut(succ).unwrap();
                *d -= 1;
                if *d == 0 {
                    freed.push(succ);
                }
            }
        }
        freed.sort_unstable();
        let mut rest: Vec<&str> = queue.drain(..).collect();
        rest.extend(freed);
        rest.sort_unstable();
        queue = rest.into();
    }

    let mut leftover: Vec<&str> = ids.iter().map(|s| s.as_str()).filter(|id| !visited[id]).collect();
    leftover.sort_unstable();
    order.extend(leftover.into_iter().map(|s| s.to_string()));
    order
}

/// Run the Critical Path Method over the merged activity list, using each
/// node's own `Predecessors` (filled in by the sequence stage's edge list,
/// unioned with any extras — see `merge_activities`).
///
/// Forward pass: `ES = max(EF of predecessors)` (0 for roots), `EF = ES +
/// Duration`. Backward pass walks the topological order in reverse: `LF =
/// min(ES of successors)` (project finish for sinks), `LS = LF - Duration`.
/// `Float = LS - ES`; an activity is critical when `|Float| < 1e-9`.
///
/// `LF` is computed from each successor's `ES`, not its `LS` — spec.md
/// §4.4 states this literally, and it's the rule that keeps a node on a
/// slack path from masking the float of its own predecessor.
pub fn compute_critical_path(activities: &[ActivityNode]) -> Vec<CpmActivity> {
    let ids: Vec<String> = activities.iter().map(|a| a.schedule_activity_id.clone()).collect();
    let known: std::collections::HashSet<&str> = ids.iter().map(String::as_str).collect();

    let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
    for a in activities {
        let preds: Vec<String> = a
            .predecessors
            .iter()
            .flatten()
            .filter(|p| known.contains(p.as_str()))
            .cloned()
            .collect();
        predecessors.insert(a.schedule_activity_id.clone(), preds);
    }

    let order = toposort(&ids, &predecessors);

    let duration: HashMap<&str, f64> = activities
        .iter()
        .map(|a| (a.schedule_activity_id.as_str(), duration_days(a)))
        .collect();

    let mut es: HashMap<String, f64> = HashMap::new();
    let mut ef: HashMap<String, f64> = HashMap::new();
    for id in &order {
        let start = predecessors
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|p| ef.get(p).copied())
            .fold(0.0_f64, f64::max);
        es.insert(id.clone(), start);
        ef.insert(id.clone(), start + duration.get(id.as_str()).copied().unwrap_or(1.0));
    }

    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, preds) in &predecessors {
        for pred in preds {
            successors.entry(pred.as_str()).or_default().push(id.as_str());
        }
    }

    let project_finish = ef.values().cloned().fold(0.0_f64, f64::max);

    let mut lf: HashMap<String, f64> = HashMap::new();
    let mut ls: HashMap<String, f64> = HashMap::new();
    for id in order.iter().rev() {
        let finish = match successors.get(id.as_str()) {
            Some(succs) if !succs.is_empty() => {
                succs.iter().filter_map(|s| es.get(*s).copied()).fold(f64::INFINITY, f64::min)
            }
            _ => project_finish,
        };
        let finish = if finish.is_finite() { finish } else { project_finish };
        lf.insert(id.clone(), finish);
        ls.insert(id.clone(), finish - duration.get(id.as_str()).copied().unwrap_or(1.0));
    }

    activities
        .iter()
        .map(|a| {
            let id = &a.schedule_activity_id;
            let es_v = es.get(id).copied().unwrap_or(0.0);
            let ef_v = ef.get(id).copied().unwrap_or(es_v);
            let ls_v = ls.get(id).copied().unwrap_or(es_v);
            let lf_v = lf.get(id).copied().unwrap_or(ef_v);
            let float = ls_v - es_v;
            CpmActivity {
                schedule_activity_id: id.clone(),
                activity_type: a.activity_type.clone(),
                duration: a.duration.clone().unwrap_or(Value::Number(1.into())),
                cwa: a.cwa.clone(),
                task_type: a.task_type.clone(),
                predecessors: predecessors.get(id).cloned().unwrap_or_default(),
                es: es_v,
                ef: ef_v,
                ls: ls_v,
                lf: lf_v,
                float,
                critical: float.abs() < 1e-9,
            }
        })
        .collect()
}
