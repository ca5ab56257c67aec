//! Stage 3 — Sequence: infers predecessor edges from spatial adjacency
//! within each CWA group, then orders all activities with a stable
//! topological sort.
//!
//! See spec.md §4.3.

use crate::model::{ActivityNode, DependencyRules, Edge, EnrichedActivity, PredecessorRule};
use crate::normalize::{fold, to_float};
use std::collections::{HashMap, HashSet, VecDeque};

type Rule = PredecessorRule;

fn rule(pred_type: &str, horiz: f64, vert: Option<(f64, f64)>) -> Rule {
    PredecessorRule { pred_type: pred_type.to_string(), horiz: Some(horiz), vert }
}

/// Fallback applied to any `(current type, predecessor type)` pair named by
/// a user dependency-rules override but absent from `default_candidates`: a
/// plain 0.8 overlap-ratio threshold and no vertical check.
fn default_rule(pred_type: &str) -> Rule {
    PredecessorRule { pred_type: pred_type.to_string(), horiz: Some(0.8), vert: None }
}

/// Default predecessor types and thresholds per current activity type.
/// `Concrete`, `Piling`, and `Civil Works` have no predecessors by default.
fn default_candidates(current_type: &str) -> Vec<Rule> {
    match current_type {
        "Equipment" => vec![
            rule("Concrete", 0.8, Some((0.5, 0.2))),
            rule("Piling", 0.8, Some((0.5, 0.2))),
            rule("Civil Works", 0.8, Some((0.5, 0.2))),
        ],
        "Grout" => vec![rule("Concrete", 0.8, Some((0.2, 0.2)))],
        "Piping" => vec![rule("Concrete", 0.8, None)],
        "Piping Insulation" => vec![rule("Piping", 0.8, None)],
        "Cable Tray" => vec![rule("Concrete", 0.8, None)],
        "Electrical" => vec![rule("Cable Tray", 0.6, None), rule("UG Conduit", 0.6, None)],
        "Instrumentation" => vec![rule("Piping", 0.6, None)],
        "UG Conduit" => vec![rule("Civil Works", 0.6, None)],
        "Transformer" => vec![rule("Concrete", 0.8, None)],
        _ => Vec::new(),
    }
}

fn rule_for(current_type: &str, pred_type: &str) -> Rule {
    default_candidates(current_type)
        .into_iter()
        .find(|r| r.pred_type == pred_type)
        .unwrap_or_else(|| default_rule(pred_type))
}

/// The allowed predecessor types for `current_type`, in order: a user
/// dependency-rules entry (matched case/whitespace-insensitively, deduped
/// preserving first-seen order) overrides the default candidate list
/// wholesale — thresholds are still looked up per-pair via `rule_for`.
fn candidate_types(current_type: &str, rules: Option<&DependencyRules>) -> Vec<String> {
    if let Some(rules) = rules {
        let key = fold(current_type);
        if let Some((_, list)) = rules.iter().find(|(k, _)| fold(k) == key) {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for t in list {
                if seen.insert(fold(t)) {
                    out.push(t.clone());
                }
            }
            return out;
        }
    }
    default_candidates(current_type)
        .into_iter()
        .map(|r| r.pred_type)
        .collect()
}

/// The 2D footprint (X/Y only) used for the horizontal overlap check.
/// Independent of Z — a missing vertical extent never disqualifies this.
fn xy_box(rec: &EnrichedActivity) -> Option<(f64, f64, f64, f64)> {
    let g = |k: &str| rec.get(k).and_then(to_float);
    Some((g("MinOfMinX")?, g("MaxOfMaxX")?, g("MinOfMinY")?, g("MaxOfMaxY")?))
}

fn min_of_min_z(rec: &EnrichedActivity) -> Option<f64> {
    rec.get("MinOfMinZ").and_then(to_float)
}

fn max_of_max_z(rec: &EnrichedActivity) -> Option<f64> {
    rec.get("MaxOfMaxZ").and_then(to_float)
}

/// 2D footprint overlap ratio: the maximum of `overlap/area1` and
/// `overlap/area2`, so a small box fully inside a larger one still scores
/// 1.0. Zero-area or non-overlapping boxes score 0.
fn area_overlap_ratio(a: (f64, f64, f64, f64), b: (f64, f64, f64, f64)) -> f64 {
    let (ax1, ax2, ay1, ay2) = a;
    let (bx1, bx2, by1, by2) = b;
    let ox = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    let oy = (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let overlap = ox * oy;
    if overlap <= 0.0 {
        return 0.0;
    }
    let area_a = ((ax2 - ax1) * (ay2 - ay1)).max(1e-9);
    let area_b = ((bx2 - bx1) * (by2 - by1)).max(1e-9);
    (overlap / area_a).max(overlap / area_b)
}

fn has_vertical_dependency(current_min_z: f64, pred_max_z: f64, th_low: f64, th_up: f64) -> bool {
    pred_max_z - th_low < current_min_z && current_min_z < pred_max_z + th_up
}

fn activity_type(rec: &EnrichedActivity) -> String {
    rec.get("Type").and_then(|v| v.as_str()).unwrap_or("").to_string()
}

fn cwa(rec: &EnrichedActivity) -> Option<String> {
    rec.get("CWA").and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// `ScheduleActivityID` is the activity's `Element Name` — there is no
/// separate synthetic identifier anywhere upstream.
fn schedule_id(rec: &EnrichedActivity) -> Option<String> {
    rec.get("Element Name").and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Deduplicate activities by `Element Name`, keeping the first occurrence
/// of each and preserving original order otherwise.
fn dedup_by_id(activities: &[EnrichedActivity]) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(activities.len());
    for (i, rec) in activities.iter().enumerate() {
        let id = schedule_id(rec).unwrap_or_else(|| format!("__unnamed_{i}"));
        if seen.insert(id) {
            out.push(i);
        }
    }
    out
}

/// Infer predecessor edges for every activity with a non-blank `CWA`.
/// Within each CWA group and candidate predecessor type, score every
/// eligible match and keep the highest: `score = overlap_ratio` (when the
/// horizontal rule is active) `− |current.MinOfMinZ − pred.MaxOfMaxZ|`
/// (when the vertical rule is active). Ties go to whichever candidate was
/// seen first (original input order).
pub fn compute_edges(
    activities: &[EnrichedActivity],
    dependency_rules: Option<&DependencyRules>,
) -> Vec<Edge> {
    let ids: Vec<Option<String>> = activities.iter().map(schedule_id).collect();

    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, rec) in activities.iter().enumerate() {
        if let Some(c) = cwa(rec) {
            if !c.trim().is_empty() {
                groups.entry(c).or_default().push(i);
            }
        }
    }

    let mut edges = Vec::new();
    for members in groups.values() {
        for &i in members {
            let current_id = match &ids[i] {
                Some(id) => id,
                None => continue,
            };
            let current = &activities[i];
            let current_type = activity_type(current);
            let current_xy = match xy_box(current) {
                Some(b) => b,
                None => continue,
            };
            let current_min_z = min_of_min_z(current);

            for pred_type in candidate_types(&current_type, dependency_rules) {
                let rule = rule_for(&current_type, &pred_type);
                let mut best: Option<(usize, f64)> = None;
                for &j in members {
                    if j == i {
                        continue;
                    }
                    let pred = &activities[j];
                    if ids[j].is_none() {
                        continue;
                    }
                    if activity_type(pred) != pred_type {
                        continue;
                    }
                    let pred_xy = match xy_box(pred) {
                        Some(b) => b,
                        None => continue,
                    };
                    let ratio = area_overlap_ratio(current_xy, pred_xy);
                    if let Some(horiz) = rule.horiz {
                        if ratio < horiz {
                            continue;
                        }
                    }
                    // Z is only consulted when this rule actually runs a
                    // vertical check — a horizontal-only rule must not
                    // reject a candidate just because its Z extent is
                    // missing.
                    let vert_distance = match rule.vert {
                        Some((low, up)) => {
                            let cz = match current_min_z {
                                Some(z) => z,
                                None => continue,
                            };
                            let pz = match max_of_max_z(pred) {
                                Some(z) => z,
                                None => continue,
                            };
                            if !has_vertical_dependency(cz, pz, low, up) {
                                continue;
                            }
                            Some((cz - pz).abs())
                        }
                        None => None,
                    };
                    let mut score = 0.0;
                    if rule.horiz.is_some() {
                        score += ratio;
                    }
                    if let Some(distance) = vert_distance {
                        score -= distance;
                    }
                    let better = match best {
                        None => true,
                        Some((_, best_score)) => score > best_score,
                    };
                    if better {
                        best = Some((j, score));
                    }
                }
                if let Some((j, _)) = best {
                    edges.push(Edge::new(current_id.clone(), ids[j].clone().unwrap()));
                }
            }
        }
    }

    edges
}

/// Build the stable activity node list: deduplicate by `Element Name`
/// (preserving first index), run Kahn's algorithm on the edges with ties
/// broken by original input index, then append any residual (cyclic or
/// disconnected) nodes in original order.
pub fn order_activities(activities: &[EnrichedActivity], edges: &[Edge]) -> Vec<ActivityNode> {
    let kept = dedup_by_id(activities);
    let ids: Vec<String> = kept
        .iter()
        .map(|&i| schedule_id(&activities[i]).unwrap_or_else(|| format!("__unnamed_{i}")))
        .collect();
    let index_of: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

    let mut indegree = vec![0usize; kept.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); kept.len()];
    for edge in edges {
        if let (Some(&cur), Some(&pred)) = (
            index_of.get(edge.schedule_activity_id.as_str()),
            index_of.get(edge.predecessor.as_str()),
        ) {
            successors[pred].push(cur);
            indegree[cur] += 1;
        }
    }

    let mut ready: Vec<usize> = (0..kept.len()).filter(|&i| indegree[i] == 0).collect();
    ready.sort_unstable();
    let mut queue: VecDeque<usize> = ready.into();
    let mut visited = vec![false; kept.len()];
    let mut order = Vec::with_capacity(kept.len());

    while let Some(i) = queue.pop_front() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        order.push(i);
        let mut freed: Vec<usize> = Vec::new();
        for &succ in &successors[i] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                freed.push(succ);
            }
        }
        freed.sort_unstable();
        let mut rest: Vec<usize> = queue.drain(..).collect();
        rest.extend(freed);
        rest.sort_unstable();
        queue = rest.into();
    }

    for i in 0..kept.len() {
        if !visited[i] {
            order.push(i);
        }
    }

    order
        .into_iter()
        .map(|k| {
            let rec = &activities[kept[k]];
            ActivityNode {
                schedule_activity_id: ids[k].clone(),
                activity_type: rec.get("Type").and_then(|v| v.as_str()).map(|s| s.to_string()),
                duration: rec.get("Duration").cloned(),
                cwa: cwa(rec),
                task_type: "Construct".to_string(),
                predecessors: None,
            }
        })
        .collect()
}
