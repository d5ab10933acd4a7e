//! Decision maker - behavioral decision core for autonomous driving
//!
//! Four layered state machines (vehicle, mission, behavior, motion) run over a
//! shared world snapshot and decide when the vehicle may drive, which mission it
//! follows, when it turns or changes lanes, and where it stops.
//!
//! The crate is transport agnostic: inputs arrive as [`interface::Inbound`]
//! messages, decisions leave as [`interface::Outbound`] messages, and the
//! [`node::DecisionMakerNode`] dispatcher is ticked by its owner.

#![warn(unused_extern_crates)]

pub mod contexts;
pub mod core;
pub mod decision;
pub mod interface;
pub mod map;
pub mod node;
pub mod state_machine;

// Re-export commonly used items for easier access
pub use crate::core::{EventFlag, EventFlags, LaneArray, Pose, WorldSnapshot};
pub use decision::MissionVerdict;
pub use interface::{Inbound, Outbound};
pub use map::{MapBackend, MapBackendKind, MapData};
pub use node::DecisionMakerNode;
pub use state_machine::StateMachineError;

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Runtime configuration of the decision maker.
///
/// Speeds are in m/s, distances in metres and angles in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Reload the last mission automatically once a mission completes.
    pub auto_mission_reload: bool,
    /// Engage as soon as a mission is accepted.
    pub auto_engage: bool,
    /// Evaluate missions received while driving as mission changes.
    pub auto_mission_change: bool,
    /// Missions and engagement come from an external operator; the automatic
    /// behaviors above are disabled.
    pub use_external_mission_source: bool,
    /// Distance (m) along the local path scanned for an upcoming turn. Also
    /// read from the upstream `steer_behind_count` key.
    #[serde(alias = "steer_behind_count")]
    pub steer_lookahead_distance: f64,
    /// Maximum distance from the vehicle to the nearest waypoint of a new mission.
    pub change_distance_threshold: f64,
    /// Maximum heading difference to the nearest waypoint of a new mission.
    pub change_angle_threshold: f64,
    pub goal_distance_threshold: f64,
    pub goal_velocity_threshold: f64,
    pub stopped_velocity_threshold: f64,
    /// Skip waiting for a map during initialization.
    pub disable_map: bool,
    /// Treat sensors as ready without point clouds.
    pub sim_mode: bool,
    /// Insert interpolated waypoints at stoplines instead of relabelling.
    pub insert_stopline_waypoint: bool,
    pub map_backend: MapBackendKind,
    /// Waypoints ahead beyond which a previously served stop marker is forgotten.
    pub stopline_reset_count: i32,
    pub left_angle_threshold: f64,
    pub right_angle_threshold: f64,
    /// Number of pose displacements averaged to decide localization convergence.
    pub convergence_count: usize,
    /// Average displacement (m) under which localization counts as converged.
    pub convergence_threshold: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        DecisionConfig {
            auto_mission_reload: false,
            auto_engage: false,
            auto_mission_change: false,
            use_external_mission_source: false,
            steer_lookahead_distance: 50.0,
            change_distance_threshold: 1.0,
            change_angle_threshold: 15.0,
            goal_distance_threshold: 3.0,
            goal_velocity_threshold: 0.1,
            stopped_velocity_threshold: 0.1,
            disable_map: false,
            sim_mode: false,
            insert_stopline_waypoint: true,
            map_backend: MapBackendKind::VectorMap,
            stopline_reset_count: 20,
            left_angle_threshold: -40.0,
            right_angle_threshold: 40.0,
            convergence_count: 10,
            convergence_threshold: 0.01,
        }
    }
}

impl DecisionConfig {
    /// Loads a configuration from a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, DecisionError> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }
}

/// Decision maker error types
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),
    #[error("map error: {0}")]
    Map(String),
}
