// core/waypoint.rs

// Route data: waypoints with their decision annotations, lanes, and lane arrays
// (missions). Lane arrays arrive from the route planner; the mission context
// re-annotates them before they are published for downstream planners.

use super::geometry::Pose;
use serde::{Deserialize, Serialize};

/// Stop marker carried by a waypoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopState {
    #[default]
    None,
    /// Reserved stop: the vehicle halts until an operator clears it.
    Stop,
    /// Stopline: the vehicle halts briefly, then proceeds.
    Stopline,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SteeringState {
    #[default]
    None,
    Straight,
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    #[default]
    None,
    Goal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneChangeState {
    #[default]
    None,
    Left,
    Right,
}

/// Per-waypoint annotation written during mission validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointState {
    pub stop_state: StopState,
    pub steering_state: SteeringState,
    pub event_state: EventState,
    pub lane_change_state: LaneChangeState,
    /// Map area id of the cross road containing the waypoint, 0 if none.
    pub area_id: i32,
}

impl WaypointState {
    /// Clears every annotation back to its null value.
    pub fn reset(&mut self) {
        *self = WaypointState::default();
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    #[serde(default)]
    pub gid: i32,
    #[serde(default)]
    pub lid: i32,
    pub pose: Pose,
    /// Commanded speed in m/s; negative values request reverse motion.
    #[serde(default)]
    pub velocity: f64,
    #[serde(default)]
    pub state: WaypointState,
}

impl Waypoint {
    pub fn new(pose: Pose, velocity: f64) -> Self {
        Waypoint {
            gid: 0,
            lid: 0,
            pose,
            velocity,
            state: WaypointState::default(),
        }
    }
}

/// An ordered sequence of waypoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    #[serde(default)]
    pub waypoints: Vec<Waypoint>,
}

impl Lane {
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        Lane { waypoints }
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }
}

/// A mission: the candidate lanes of a route to a goal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LaneArray {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub lanes: Vec<Lane>,
}

impl LaneArray {
    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(Lane::is_empty)
    }

    pub fn waypoints(&self) -> impl Iterator<Item = &Waypoint> {
        self.lanes.iter().flat_map(|lane| lane.waypoints.iter())
    }

    pub fn waypoints_mut(&mut self) -> impl Iterator<Item = &mut Waypoint> {
        self.lanes.iter_mut().flat_map(|lane| lane.waypoints.iter_mut())
    }

    /// Assigns zero-based gids across the whole array and lids within each lane.
    pub fn reindex(&mut self) {
        let mut gid = 0;
        for lane in &mut self.lanes {
            for (lid, wp) in lane.waypoints.iter_mut().enumerate() {
                wp.gid = gid;
                wp.lid = lid as i32;
                gid += 1;
            }
        }
    }

    /// Gid of the final waypoint of the final lane.
    pub fn last_gid(&self) -> Option<i32> {
        self.lanes
            .last()
            .and_then(|lane| lane.waypoints.last())
            .map(|wp| wp.gid)
    }
}
