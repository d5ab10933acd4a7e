// decision/annotate.rs

// Waypoint annotation steps shared by the map backends: cross-road matching,
// turn labels, stopline application and goal markers. Each step is a pure
// function of the lane array and the map features handed in.

use crate::core::geometry::{distance, segment_intersection, segments_intersect, yaw_diff_deg};
use crate::core::waypoint::{EventState, Lane, LaneArray, SteeringState, StopState, Waypoint};
use crate::map::{AnnotationPolicy, CrossRoadArea};
use log::{debug, info};
use nalgebra::Point3;
use std::collections::HashMap;

// Crossings closer than this to an existing waypoint relabel it instead of inserting.
const COINCIDENT_EPS: f64 = 1e-6;

/// A stopline segment with the stop marker it produces.
#[derive(Clone, Debug, PartialEq)]
pub struct StopLineSegment {
    pub start: Point3<f64>,
    pub end: Point3<f64>,
    pub stop_state: StopState,
}

pub fn reset_annotations(lanes: &mut LaneArray) {
    for wp in lanes.waypoints_mut() {
        wp.state.reset();
    }
}

/// Stamps area ids on waypoints inside cross roads and rebuilds each area's
/// runs of consecutive (by gid) inside waypoints.
pub fn match_cross_roads(areas: &mut [CrossRoadArea], lanes: &mut LaneArray) {
    for area in areas.iter_mut() {
        area.inside_lanes.clear();
    }

    for wp in lanes.waypoints_mut() {
        for area in areas.iter_mut() {
            if !area.contains(&wp.pose.position) {
                continue;
            }
            let continues_run = area
                .inside_lanes
                .last()
                .and_then(|run| run.waypoints.last())
                .is_some_and(|last| last.gid + 1 == wp.gid);
            if !continues_run {
                area.inside_lanes.push(Lane::default());
            }
            wp.state.area_id = area.area_id;
            if let Some(run) = area.inside_lanes.last_mut() {
                run.waypoints.push(wp.clone());
            }
        }
    }
}

/// Turn direction from the entry/exit heading difference in degrees.
pub fn turn_label(angle_deg: f64, policy: &AnnotationPolicy) -> SteeringState {
    if angle_deg <= policy.left_angle_threshold {
        SteeringState::Left
    } else if angle_deg >= policy.right_angle_threshold {
        SteeringState::Right
    } else {
        SteeringState::Straight
    }
}

/// Entry heading minus exit heading of a run, floored to whole degrees.
pub fn run_angle(run: &Lane) -> Option<f64> {
    let first = run.waypoints.first()?;
    let last = run.waypoints.last()?;
    Some(yaw_diff_deg(&first.pose, &last.pose).floor())
}

/// Labels every waypoint of every matched run with the run's turn direction.
pub fn label_turns(areas: &[CrossRoadArea], lanes: &mut LaneArray, policy: &AnnotationPolicy) {
    let mut labels: HashMap<(i32, i32), SteeringState> = HashMap::new();
    for area in areas {
        for run in &area.inside_lanes {
            let Some(angle) = run_angle(run) else {
                continue;
            };
            let label = turn_label(angle, policy);
            debug!(
                "cross road {} run of {} waypoints: {} deg -> {:?}",
                area.area_id,
                run.len(),
                angle,
                label
            );
            for wp in &run.waypoints {
                labels.insert((wp.gid, area.area_id), label);
            }
        }
    }

    for wp in lanes.waypoints_mut() {
        if let Some(label) = labels.get(&(wp.gid, wp.state.area_id)) {
            wp.state.steering_state = *label;
        }
    }
}

/// Unlabelled waypoints drive straight.
pub fn default_straight(lanes: &mut LaneArray) {
    for wp in lanes.waypoints_mut() {
        if wp.state.steering_state == SteeringState::None {
            wp.state.steering_state = SteeringState::Straight;
        }
    }
}

/// Applies a stopline to every segment of `lane` it crosses and for which
/// `applies(from, to)` holds. Returns the number of crossings handled.
pub fn apply_stopline<F>(
    lane: &mut Lane,
    line: &StopLineSegment,
    insert: bool,
    mut applies: F,
) -> usize
where
    F: FnMut(&Waypoint, &Waypoint) -> bool,
{
    let mut handled = 0;
    let mut idx = 0;
    while idx + 1 < lane.waypoints.len() {
        let (from, to) = (&lane.waypoints[idx], &lane.waypoints[idx + 1]);
        let (a, b) = (from.pose.position, to.pose.position);
        if segments_intersect(&a, &b, &line.start, &line.end) && applies(from, to) {
            if let Some(crossing) = segment_intersection(&a, &b, &line.start, &line.end) {
                label_crossing(lane, idx, &crossing, line.stop_state, insert);
                handled += 1;
            }
        }
        idx += 1;
    }
    handled
}

fn label_crossing(
    lane: &mut Lane,
    idx: usize,
    crossing: &Point3<f64>,
    stop_state: StopState,
    insert: bool,
) {
    let back = lane.waypoints[idx].pose.position;
    let front = lane.waypoints[idx + 1].pose.position;
    let dist_back = distance(crossing, &back);
    let dist_front = distance(crossing, &front);

    if !insert || dist_back.min(dist_front) < COINCIDENT_EPS {
        let target = if dist_front < dist_back { idx + 1 } else { idx };
        lane.waypoints[target].state.stop_state = stop_state;
        info!(
            "stopline marker on waypoint #{} ({:.3}, {:.3}, {:.3})",
            target, lane.waypoints[target].pose.position.x,
            lane.waypoints[target].pose.position.y,
            lane.waypoints[target].pose.position.z
        );
        return;
    }

    let next_velocity = lane.waypoints[idx + 1].velocity;
    let mut wp = lane.waypoints[idx].clone();
    wp.pose.position = Point3::new(crossing.x, crossing.y, (back.z + front.z) / 2.0);
    wp.velocity = (wp.velocity + next_velocity) / 2.0;
    wp.state.stop_state = stop_state;
    info!(
        "inserting stopline waypoint #{} ({:.3}, {:.3}, {:.3})",
        idx + 1,
        wp.pose.position.x,
        wp.pose.position.y,
        wp.pose.position.z
    );
    lane.waypoints.insert(idx + 1, wp);
}

/// Marks the last `count` waypoints of each lane (or all, if fewer) as goal.
pub fn mark_goals(lanes: &mut LaneArray, count: usize) {
    for lane in &mut lanes.lanes {
        let start = lane.len().saturating_sub(count);
        for wp in &mut lane.waypoints[start..] {
            wp.state.event_state = EventState::Goal;
        }
    }
}
