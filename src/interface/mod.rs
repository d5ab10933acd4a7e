//! Message interface of the decision maker
//!
//! This module defines everything that crosses the node boundary:
//! - [`Inbound`] messages from localization, planning, perception and the operator
//! - [`Outbound`] messages for downstream planners and the operator console
//! - the [`Publisher`] queue collecting outbound messages between drains
//! - the [`Subscriber`] applying inbound data to the world snapshot
//!
//! Transport is left to the owner of the node; messages are plain serde types.

mod publisher;
pub mod subscriber;

pub use publisher::Publisher;
pub use subscriber::Subscriber;

use crate::DecisionConfig;
use crate::core::geometry::Pose;
use crate::core::waypoint::{Lane, LaneArray};
use crate::map::MapData;
use serde::{Deserialize, Serialize};

/// Measured ego motion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Twist {
    /// Longitudinal speed (m/s)
    pub linear: f64,
    /// Yaw rate (rad/s)
    pub angular: f64,
}

/// Input messages. Indices use `-1` for "none", as on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Inbound {
    CurrentPose(Pose),
    CurrentVelocity(Twist),
    /// Route from the mission planner.
    LaneArray(LaneArray),
    /// Local path from the lane selector.
    FinalWaypoints(Lane),
    ClosestWaypoint(i32),
    /// Obstacle position relative to the closest waypoint.
    ObstacleWaypoint(i32),
    /// Stopline position relative to the closest waypoint.
    StoplineWaypoint(i32),
    LaneChangeFlag(i32),
    /// Operator request to stop at a global waypoint index.
    StopOrder(i32),
    /// Free-text trigger for any of the four state machines.
    StateCmd(String),
    Config(DecisionConfig),
    /// Point cloud for localization is flowing.
    FilteredPoints,
    Map(MapData),
}

impl Inbound {
    pub fn topic(&self) -> &'static str {
        match self {
            Inbound::CurrentPose(_) => "current_pose",
            Inbound::CurrentVelocity(_) => "current_velocity",
            Inbound::LaneArray(_) => "lane_waypoints_array",
            Inbound::FinalWaypoints(_) => "final_waypoints",
            Inbound::ClosestWaypoint(_) => "closest_waypoint",
            Inbound::ObstacleWaypoint(_) => "obstacle_waypoint",
            Inbound::StoplineWaypoint(_) => "stopline_waypoint",
            Inbound::LaneChangeFlag(_) => "lane_change_flag",
            Inbound::StopOrder(_) => "stop_order_wpidx",
            Inbound::StateCmd(_) => "state_cmd",
            Inbound::Config(_) => "config/decision_maker",
            Inbound::FilteredPoints => "filtered_points",
            Inbound::Map(_) => "map",
        }
    }
}

/// Current state of every context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMessage {
    pub vehicle: String,
    pub mission: String,
    pub behavior: String,
    pub motion: String,
}

impl StateMessage {
    /// One state per line, vehicle first.
    pub fn joined(&self) -> String {
        [&self.vehicle, &self.mission, &self.behavior, &self.motion]
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Where the vehicle will stop for an operator order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleLocation {
    pub lane_array_id: i32,
    /// Accepted stop waypoint, `-1` if the order was rejected.
    pub waypoint_index: i32,
}

/// Turn signal request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LampCmd {
    pub left: bool,
    pub right: bool,
}

impl LampCmd {
    pub const OFF: LampCmd = LampCmd {
        left: false,
        right: false,
    };
    pub const LEFT: LampCmd = LampCmd {
        left: true,
        right: false,
    };
    pub const RIGHT: LampCmd = LampCmd {
        left: false,
        right: true,
    };
}

/// Output messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Outbound {
    /// The accepted, annotated mission.
    LaneArray(LaneArray),
    StateName(String),
    StateMessage(StateMessage),
    /// Waypoint the velocity planner should stop at, `-1` for none.
    StoplineWaypoint(i32),
    StopLocation(VehicleLocation),
    OperatorHelp(String),
    AvailableTransitions(String),
    LampCmd(LampCmd),
}

impl Outbound {
    pub fn topic(&self) -> &'static str {
        match self {
            Outbound::LaneArray(_) => "lane_waypoints_array",
            Outbound::StateName(_) => "decision_maker/state",
            Outbound::StateMessage(_) => "decision_maker/state_msg",
            Outbound::StoplineWaypoint(_) => "state/stopline_wpidx",
            Outbound::StopLocation(_) => "state/stop_cmd_location",
            Outbound::OperatorHelp(_) => "state/operator_help_text",
            Outbound::AvailableTransitions(_) => "decision_maker/available_transition",
            Outbound::LampCmd(_) => "lamp_cmd",
        }
    }
}
