//! Decision algorithms evaluated by the contexts at tick time.
//!
//! Everything here is a plain function over route data and the ego state, so the
//! contexts stay thin and the geometry can be tested without a running node.

pub mod annotate;
pub mod mission;

pub use mission::{MissionVerdict, check_mission};

use crate::core::geometry::{Pose, distance};
use crate::core::waypoint::{EventState, Lane, SteeringState, StopState};

/// Tyre-road friction coefficient (dry asphalt).
const MU: f64 = 0.7;
const GRAVITY: f64 = 9.80665;
/// System delay plus a 5 s margin, in seconds.
const REACTION_TIME: f64 = 0.3 + 5.0;
const SAFETY_FACTOR: f64 = 2.0;

/// Distance needed to come to a stop from `velocity` (m/s), with margin.
pub fn required_stop_distance(velocity: f64) -> f64 {
    let v = velocity.abs();
    let free_running = REACTION_TIME * v;
    let braking = v * v / (2.0 * GRAVITY * MU);
    (free_running + braking) * SAFETY_FACTOR
}

/// First stop-annotated waypoint ahead, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopMarker {
    pub state: StopState,
    pub gid: Option<i32>,
}

impl StopMarker {
    pub const NONE: StopMarker = StopMarker {
        state: StopState::None,
        gid: None,
    };

    pub fn is_found(&self) -> bool {
        self.state != StopState::None
    }
}

/// Searches the final path for the next stop marker within stopping distance.
///
/// Index 0 of `path` is the ego pose, so the scan starts at 1 and never looks at
/// the final point. `prev_stopped` is forgotten once the path has moved past it
/// or it lies more than `reset_count` waypoints ahead.
pub fn find_next_stop_marker(
    path: &Lane,
    pose: &Pose,
    velocity: f64,
    prev_stopped: &mut Option<i32>,
    reset_count: i32,
) -> StopMarker {
    let wps = &path.waypoints;
    if wps.len() < 3 {
        return StopMarker::NONE;
    }

    let next_gid = wps[1].gid;
    if let Some(prev) = *prev_stopped {
        if next_gid > prev || prev - next_gid > reset_count {
            *prev_stopped = None;
        }
    }

    let limit = required_stop_distance(velocity);
    let mut travelled = 0.0;
    let mut last = pose.position;
    for wp in &wps[1..wps.len() - 1] {
        travelled += distance(&last, &wp.pose.position);
        if wp.state.stop_state != StopState::None && *prev_stopped != Some(wp.gid) {
            return StopMarker {
                state: wp.state.stop_state,
                gid: Some(wp.gid),
            };
        }
        if travelled > limit {
            break;
        }
        last = wp.pose.position;
    }
    StopMarker::NONE
}

/// Path length from the ego pose to the waypoint `gid`, if it is on the path.
pub fn distance_to_waypoint(path: &Lane, pose: &Pose, gid: i32) -> Option<f64> {
    let mut travelled = 0.0;
    let mut last = pose.position;
    for wp in path.waypoints.iter().skip(1) {
        travelled += distance(&last, &wp.pose.position);
        if wp.gid == gid {
            return Some(travelled);
        }
        last = wp.pose.position;
    }
    None
}

/// True once the vehicle is stopped close to a goal-marked end of the path.
pub fn is_arrived_goal(
    path: &Lane,
    pose: &Pose,
    velocity: f64,
    distance_threshold: f64,
    velocity_threshold: f64,
) -> bool {
    let Some(goal) = path.waypoints.last() else {
        return false;
    };
    goal.state.event_state == EventState::Goal
        && distance(&pose.position, &goal.pose.position) < distance_threshold
        && velocity.abs() <= velocity_threshold
}

/// Steering label of the upcoming manoeuvre: the first turn label within
/// `lookahead` metres, otherwise the label at the lookahead point.
pub fn steering_state_ahead(path: &Lane, pose: &Pose, lookahead: f64) -> SteeringState {
    let mut travelled = 0.0;
    let mut last = pose.position;
    let mut reached = SteeringState::Straight;
    for wp in path.waypoints.iter().skip(1) {
        travelled += distance(&last, &wp.pose.position);
        reached = wp.state.steering_state;
        if matches!(reached, SteeringState::Left | SteeringState::Right) || travelled >= lookahead
        {
            break;
        }
        last = wp.pose.position;
    }
    match reached {
        SteeringState::None => SteeringState::Straight,
        other => other,
    }
}
