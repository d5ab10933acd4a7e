// core/snapshot.rs

// The world snapshot: the single owned aggregate every context reads at tick time.
//
// Each section has exactly one writer. Mutable access to a section requires a
// writer token, and each token type can only be constructed inside the module
// that owns the write:
//
//   SensorInputs  <- interface::subscriber (InputWriter)
//   MissionStatus <- contexts::mission     (MissionWriter)
//   StopTracking  <- contexts::motion      (StopWriter)
//
// Everything else gets shared references only.

use super::geometry::Pose;
use super::waypoint::{Lane, LaneArray};
use crate::contexts::mission::MissionWriter;
use crate::contexts::motion::StopWriter;
use crate::interface::subscriber::InputWriter;

/// Lane change request reported by the lane selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChangeFlag {
    #[default]
    Straight,
    Right,
    Left,
    Unknown,
}

impl From<i32> for ChangeFlag {
    fn from(raw: i32) -> Self {
        match raw {
            0 => ChangeFlag::Straight,
            1 => ChangeFlag::Right,
            2 => ChangeFlag::Left,
            _ => ChangeFlag::Unknown,
        }
    }
}

/// An accepted operator stop order. `seq` increases with every accepted order so a
/// repeated order for the same gid is still distinguishable from a resolved one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopOrder {
    pub gid: i32,
    pub seq: u64,
}

/// Latest values from the inbound data handlers.
#[derive(Clone, Debug, Default)]
pub struct SensorInputs {
    pub pose: Option<Pose>,
    /// Longitudinal speed in m/s.
    pub velocity: f64,
    pub angular_velocity: f64,
    /// Gid of the waypoint closest to the vehicle.
    pub closest_waypoint: Option<i32>,
    /// Local path; index 0 holds the vehicle's own position.
    pub final_waypoints: Lane,
    /// Most recently received route, before validation.
    pub based_lane_array: LaneArray,
    /// Obstacle position, relative to the closest waypoint.
    pub obstacle_waypoint: Option<i32>,
    /// Stopline position reported by the velocity planner, relative to the closest waypoint.
    pub stopline_waypoint: Option<i32>,
    pub change_flag: ChangeFlag,
    pub stop_order: Option<StopOrder>,
}

/// State owned by the mission context.
#[derive(Clone, Debug, Default)]
pub struct MissionStatus {
    /// The accepted, annotated route currently driven.
    pub using_lane_array: Option<LaneArray>,
    /// Set once a mission has been accepted; final-path updates are ignored before that.
    pub final_path_enabled: bool,
    pub accepted_missions: u32,
    /// True while a mission change is being evaluated during driving.
    pub change_in_progress: bool,
}

/// Stop decisions owned by the motion context.
#[derive(Clone, Debug, Default)]
pub struct StopTracking {
    pub found_stopsign_idx: Option<i32>,
    pub prev_stopped_wpidx: Option<i32>,
    /// Sequence number of the last stop order the vehicle has served.
    pub resolved_order_seq: Option<u64>,
    pub prev_ordered_idx: Option<i32>,
}

#[derive(Clone, Debug, Default)]
pub struct WorldSnapshot {
    sensors: SensorInputs,
    mission: MissionStatus,
    stops: StopTracking,
}

impl WorldSnapshot {
    pub fn new() -> Self {
        WorldSnapshot::default()
    }

    pub fn sensors(&self) -> &SensorInputs {
        &self.sensors
    }

    pub fn mission(&self) -> &MissionStatus {
        &self.mission
    }

    pub fn stops(&self) -> &StopTracking {
        &self.stops
    }

    /// Active stop order, unless the motion context has already served it.
    pub fn ordered_stop_idx(&self) -> Option<i32> {
        ordered_stop_idx(&self.sensors, &self.stops)
    }

    pub fn sensors_mut(&mut self, _writer: &InputWriter) -> &mut SensorInputs {
        &mut self.sensors
    }

    pub fn mission_mut(&mut self, _writer: &MissionWriter) -> (&SensorInputs, &mut MissionStatus) {
        (&self.sensors, &mut self.mission)
    }

    pub fn stops_mut(
        &mut self,
        _writer: &StopWriter,
    ) -> (&SensorInputs, &MissionStatus, &mut StopTracking) {
        (&self.sensors, &self.mission, &mut self.stops)
    }
}

pub fn ordered_stop_idx(sensors: &SensorInputs, stops: &StopTracking) -> Option<i32> {
    sensors
        .stop_order
        .filter(|order| stops.resolved_order_seq != Some(order.seq))
        .map(|order| order.gid)
}

/// Converts a wire index (`-1` meaning absent) into an optional index.
pub fn wire_index(raw: i32) -> Option<i32> {
    (raw >= 0).then_some(raw)
}

/// Converts an optional index back into its wire form.
pub fn to_wire(idx: Option<i32>) -> i32 {
    idx.unwrap_or(-1)
}
