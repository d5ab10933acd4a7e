//! Map backends used to annotate mission waypoints.
//!
//! Both backends consume an already-built map description ([`MapData`]) and
//! fulfil the same contract through [`MapBackend::annotate`]: match waypoints to
//! cross-road areas, label turn directions, apply stoplines and mark the goal.

pub mod lanelet2;
pub mod vector_map;

pub use lanelet2::{Lanelet, Lanelet2Data, Lanelet2Map, LineString, TrafficSign};
pub use vector_map::{VectorMap, VectorMapData};

use crate::core::flags::EventFlag;
use crate::core::geometry::polygon_contains;
use crate::core::waypoint::{Lane, LaneArray};
use crate::{DecisionConfig, DecisionError};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapBackendKind {
    #[default]
    VectorMap,
    Lanelet2,
}

impl MapBackendKind {
    /// Flag raised once a map of this kind has been installed.
    pub fn loaded_flag(self) -> EventFlag {
        match self {
            MapBackendKind::VectorMap => EventFlag::VectorMapLoaded,
            MapBackendKind::Lanelet2 => EventFlag::Lanelet2MapLoaded,
        }
    }
}

impl fmt::Display for MapBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MapBackendKind::VectorMap => f.write_str("vector_map"),
            MapBackendKind::Lanelet2 => f.write_str("lanelet2"),
        }
    }
}

/// Tunables of an annotation pass, taken from the decision configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationPolicy {
    /// Insert an interpolated waypoint at each stopline crossing instead of
    /// relabelling the nearer endpoint.
    pub insert_stopline_waypoint: bool,
    pub left_angle_threshold: f64,
    pub right_angle_threshold: f64,
    /// Number of trailing waypoints per lane labelled as goal.
    pub goal_marker_count: usize,
}

impl Default for AnnotationPolicy {
    fn default() -> Self {
        AnnotationPolicy {
            insert_stopline_waypoint: false,
            left_angle_threshold: -40.0,
            right_angle_threshold: 40.0,
            goal_marker_count: 3,
        }
    }
}

impl From<&DecisionConfig> for AnnotationPolicy {
    fn from(config: &DecisionConfig) -> Self {
        AnnotationPolicy {
            insert_stopline_waypoint: config.insert_stopline_waypoint,
            left_angle_threshold: config.left_angle_threshold,
            right_angle_threshold: config.right_angle_threshold,
            ..AnnotationPolicy::default()
        }
    }
}

/// A cross road (intersection) of the map.
///
/// The polygon is fixed at map load; `inside_lanes` holds the runs of
/// consecutive waypoints found inside it and is rebuilt on every pass.
#[derive(Clone, Debug, PartialEq)]
pub struct CrossRoadArea {
    pub id: i32,
    /// Map area id written into the waypoints' `area_id`.
    pub area_id: i32,
    pub polygon: Vec<Point3<f64>>,
    pub inside_lanes: Vec<Lane>,
}

impl CrossRoadArea {
    pub fn new(id: i32, area_id: i32, polygon: Vec<Point3<f64>>) -> Self {
        CrossRoadArea {
            id,
            area_id,
            polygon,
            inside_lanes: Vec::new(),
        }
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        polygon_contains(&self.polygon, p)
    }
}

/// Annotation contract shared by the map backends.
#[cfg_attr(test, mockall::automock)]
pub trait MapBackend {
    fn kind(&self) -> MapBackendKind;

    /// Writes area ids, steering, stop and goal annotations into `lanes`.
    /// Stopline waypoints may be inserted; callers re-index afterwards.
    fn annotate(&mut self, lanes: &mut LaneArray, policy: &AnnotationPolicy);
}

/// Map description as delivered by the map loader.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum MapData {
    VectorMap(VectorMapData),
    Lanelet2(Lanelet2Data),
}

impl MapData {
    pub fn kind(&self) -> MapBackendKind {
        match self {
            MapData::VectorMap(_) => MapBackendKind::VectorMap,
            MapData::Lanelet2(_) => MapBackendKind::Lanelet2,
        }
    }

    /// Resolves references and builds the queryable backend.
    pub fn into_backend(self) -> Result<Box<dyn MapBackend>, DecisionError> {
        Ok(match self {
            MapData::VectorMap(data) => Box::new(VectorMap::build(data)?),
            MapData::Lanelet2(data) => Box::new(Lanelet2Map::build(data)?),
        })
    }
}
