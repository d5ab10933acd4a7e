// map/lanelet2.rs

// Lanelet2 backend. Lanelets are bounded by a left and a right line string;
// turn direction and one-way travel come from lanelet attributes, and stop
// lines are the reference lines of stop-sign traffic signs attached to lanelets.

use super::{AnnotationPolicy, CrossRoadArea, MapBackend, MapBackendKind};
use crate::DecisionError;
use crate::core::geometry::{
    distance, nearest_point_on_segment, normalize_angle, polygon_contains, side_of_line,
};
use crate::core::waypoint::{LaneArray, SteeringState, StopState, Waypoint};
use crate::decision::annotate::{
    StopLineSegment, apply_stopline, mark_goals, match_cross_roads,
};
use log::{debug, info};
use nalgebra::{Point3, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;

/// Heading differences closer than this (radians) count as equally aligned.
const ALIGN_TOLERANCE: f64 = 2.0 * PI / 180.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaneletPoint {
    pub id: i32,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineString {
    pub id: i32,
    pub points: Vec<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lanelet {
    pub id: i32,
    pub left_bound: i32,
    pub right_bound: i32,
    /// `left`, `right` or `straight`; absent means straight.
    #[serde(default)]
    pub turn_direction: Option<String>,
    #[serde(default = "default_one_way")]
    pub one_way: bool,
    /// Ids of traffic signs regulating this lanelet.
    #[serde(default)]
    pub regulatory_elements: Vec<i32>,
}

fn default_one_way() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrafficSign {
    pub id: i32,
    pub sign_type: String,
    /// Line strings where vehicles stop for this sign.
    #[serde(default)]
    pub ref_lines: Vec<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lanelet2Data {
    pub points: Vec<LaneletPoint>,
    pub line_strings: Vec<LineString>,
    pub lanelets: Vec<Lanelet>,
    pub traffic_signs: Vec<TrafficSign>,
    /// Traffic sign type treated as a stop sign.
    pub stop_sign_id: String,
}

impl Default for Lanelet2Data {
    fn default() -> Self {
        Lanelet2Data {
            points: Vec::new(),
            line_strings: Vec::new(),
            lanelets: Vec::new(),
            traffic_signs: Vec::new(),
            stop_sign_id: "stop_sign".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
struct ResolvedLanelet {
    id: i32,
    left: Vec<Point3<f64>>,
    right: Vec<Point3<f64>>,
    polygon: Vec<Point3<f64>>,
    steering: SteeringState,
    one_way: bool,
}

impl ResolvedLanelet {
    /// Travel direction of the lanelet next to `p`: the mean direction of the
    /// nearest segment of each bound.
    fn heading_at(&self, p: &Point3<f64>) -> Option<f64> {
        let dir = [&self.left, &self.right]
            .into_iter()
            .filter_map(|bound| nearest_segment_direction(bound, p))
            .reduce(|a, b| a + b)?;
        (dir.norm() > f64::EPSILON).then(|| dir.y.atan2(dir.x))
    }

    /// Angle between the lanelet and a waypoint travelling along `heading`.
    /// Bidirectional lanelets accept either direction.
    fn misalignment(&self, p: &Point3<f64>, heading: f64) -> f64 {
        let Some(lanelet) = self.heading_at(p) else {
            return PI;
        };
        let diff = normalize_angle(heading - lanelet).abs();
        if self.one_way { diff } else { diff.min(PI - diff) }
    }
}

fn nearest_segment_direction(bound: &[Point3<f64>], p: &Point3<f64>) -> Option<Vector2<f64>> {
    bound
        .windows(2)
        .filter_map(|seg| {
            let d = Vector2::new(seg[1].x - seg[0].x, seg[1].y - seg[0].y);
            let len = d.norm();
            (len > f64::EPSILON).then(|| {
                let gap = distance(p, &nearest_point_on_segment(p, &seg[0], &seg[1]));
                (gap, d / len)
            })
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, dir)| dir)
}

/// Direction of travel at waypoint `i`: towards the next waypoint, from the
/// previous one at the end of the lane, the pose yaw when the lane is a point.
fn travel_heading(waypoints: &[Waypoint], i: usize) -> f64 {
    let (from, to) = match (i.checked_sub(1), waypoints.get(i + 1)) {
        (_, Some(next)) => (&waypoints[i], next),
        (Some(prev), None) => (&waypoints[prev], &waypoints[i]),
        (None, None) => return waypoints[i].pose.yaw,
    };
    let (dx, dy) = (
        to.pose.position.x - from.pose.position.x,
        to.pose.position.y - from.pose.position.y,
    );
    if dx.hypot(dy) < f64::EPSILON {
        waypoints[i].pose.yaw
    } else {
        dy.atan2(dx)
    }
}

/// Ranking of a lanelet candidate for one waypoint.
struct Candidate {
    idx: usize,
    misalignment: f64,
    /// Consecutive waypoints from this one that stay inside the lanelet.
    run: usize,
    turn: bool,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        if (self.misalignment - other.misalignment).abs() > ALIGN_TOLERANCE {
            return self.misalignment < other.misalignment;
        }
        if self.run != other.run {
            return self.run > other.run;
        }
        !self.turn && other.turn
    }
}

#[derive(Clone, Debug)]
pub struct Lanelet2Map {
    lanelets: Vec<ResolvedLanelet>,
    cross_roads: Vec<CrossRoadArea>,
    stop_lines: Vec<StopLineSegment>,
}

fn steering_from_attribute(direction: Option<&str>) -> SteeringState {
    match direction {
        Some("left") => SteeringState::Left,
        Some("right") => SteeringState::Right,
        _ => SteeringState::Straight,
    }
}

impl Lanelet2Map {
    pub fn build(data: Lanelet2Data) -> Result<Self, DecisionError> {
        let points: HashMap<i32, Point3<f64>> = data
            .points
            .iter()
            .map(|p| (p.id, Point3::new(p.x, p.y, p.z)))
            .collect();
        let line_strings: HashMap<i32, &LineString> =
            data.line_strings.iter().map(|ls| (ls.id, ls)).collect();
        let resolve = |id: i32| -> Result<Vec<Point3<f64>>, DecisionError> {
            let ls = line_strings.get(&id).ok_or_else(|| {
                DecisionError::Map(format!("lanelet2 line string {} not found", id))
            })?;
            ls.points
                .iter()
                .map(|pid| {
                    points.get(pid).copied().ok_or_else(|| {
                        DecisionError::Map(format!("lanelet2 point {} not found", pid))
                    })
                })
                .collect()
        };

        let mut lanelets = Vec::with_capacity(data.lanelets.len());
        let mut cross_roads = Vec::new();
        for lanelet in &data.lanelets {
            let left = resolve(lanelet.left_bound)?;
            let right = resolve(lanelet.right_bound)?;
            let mut polygon = left.clone();
            polygon.extend(right.iter().rev());

            // Lanelets carrying a turn direction form the intersection areas.
            if lanelet.turn_direction.is_some() {
                cross_roads.push(CrossRoadArea::new(
                    cross_roads.len() as i32,
                    lanelet.id,
                    polygon.clone(),
                ));
            }
            lanelets.push(ResolvedLanelet {
                id: lanelet.id,
                left,
                right,
                polygon,
                steering: steering_from_attribute(lanelet.turn_direction.as_deref()),
                one_way: lanelet.one_way,
            });
        }

        let stop_signs: HashMap<i32, &TrafficSign> = data
            .traffic_signs
            .iter()
            .filter(|sign| sign.sign_type == data.stop_sign_id)
            .map(|sign| (sign.id, sign))
            .collect();
        let mut seen = HashSet::new();
        let mut stop_lines = Vec::new();
        for lanelet in &data.lanelets {
            for sign in lanelet
                .regulatory_elements
                .iter()
                .filter_map(|id| stop_signs.get(id))
            {
                for line_id in &sign.ref_lines {
                    if !seen.insert(*line_id) {
                        continue;
                    }
                    let line = resolve(*line_id)?;
                    // A line without points cannot be crossed.
                    let (Some(start), Some(end)) = (line.first(), line.last()) else {
                        debug!("skipping empty stop line {}", line_id);
                        continue;
                    };
                    stop_lines.push(StopLineSegment {
                        start: *start,
                        end: *end,
                        stop_state: StopState::Stopline,
                    });
                }
            }
        }

        info!(
            "lanelet2 map ready: {} lanelets, {} turn areas, {} stop lines",
            lanelets.len(),
            cross_roads.len(),
            stop_lines.len()
        );
        Ok(Lanelet2Map {
            lanelets,
            cross_roads,
            stop_lines,
        })
    }

    pub fn stop_lines(&self) -> &[StopLineSegment] {
        &self.stop_lines
    }

    /// Lanelet index of each waypoint, keyed by gid. Where lanelets overlap the
    /// one best aligned with the direction of travel wins, then the one the
    /// lane stays in longest, then a lanelet without a turn direction.
    fn match_waypoints(&self, lanes: &LaneArray) -> HashMap<i32, usize> {
        let mut matched = HashMap::new();
        for lane in &lanes.lanes {
            let wps = &lane.waypoints;
            for (i, wp) in wps.iter().enumerate() {
                let heading = travel_heading(wps, i);
                let best = self
                    .lanelets
                    .iter()
                    .enumerate()
                    .filter(|(_, ll)| polygon_contains(&ll.polygon, &wp.pose.position))
                    .map(|(idx, ll)| Candidate {
                        idx,
                        misalignment: ll.misalignment(&wp.pose.position, heading),
                        run: wps[i..]
                            .iter()
                            .take_while(|next| polygon_contains(&ll.polygon, &next.pose.position))
                            .count(),
                        turn: ll.steering != SteeringState::Straight,
                    })
                    .reduce(|best, c| if c.beats(&best) { c } else { best });
                if let Some(best) = best {
                    debug!("waypoint {} matched lanelet {}", wp.gid, self.lanelets[best.idx].id);
                    matched.insert(wp.gid, best.idx);
                }
            }
        }
        matched
    }
}

impl MapBackend for Lanelet2Map {
    fn kind(&self) -> MapBackendKind {
        MapBackendKind::Lanelet2
    }

    fn annotate(&mut self, lanes: &mut LaneArray, policy: &AnnotationPolicy) {
        // Direction only matters on lanelets travelled both ways.
        let matched = self.match_waypoints(lanes);
        let lanelets = &self.lanelets;
        for lane in &mut lanes.lanes {
            for line in &self.stop_lines {
                apply_stopline(lane, line, policy.insert_stopline_waypoint, |from, to| {
                    let bidirectional = matched
                        .get(&from.gid)
                        .is_some_and(|idx| !lanelets[*idx].one_way);
                    !bidirectional
                        || side_of_line(&line.start, &from.pose.position, &to.pose.position)
                            >= 0.0
                });
            }
        }
        lanes.reindex();

        // Matched again so inserted waypoints are labelled like the rest.
        let matched = self.match_waypoints(lanes);
        match_cross_roads(&mut self.cross_roads, lanes);
        for wp in lanes.waypoints_mut() {
            wp.state.steering_state = matched
                .get(&wp.gid)
                .map(|idx| self.lanelets[*idx].steering)
                .unwrap_or(SteeringState::Straight);
        }

        mark_goals(lanes, policy.goal_marker_count);
    }
}
