// map/vector_map.rs

// Vector map backend. The map arrives as flat tables (points, lines, areas,
// cross roads, stop lines, road signs) keyed by integer ids; `build` resolves the
// references once into cross-road polygons and stopline segments.

use super::{AnnotationPolicy, CrossRoadArea, MapBackend, MapBackendKind};
use crate::DecisionError;
use crate::core::geometry::side_of_line;
use crate::core::waypoint::{LaneArray, StopState};
use crate::decision::annotate::{
    StopLineSegment, apply_stopline, default_straight, label_turns, mark_goals,
    match_cross_roads,
};
use log::{info, warn};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub pid: i32,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Directed line from `bpid` to `fpid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLine {
    pub lid: i32,
    pub bpid: i32,
    pub fpid: i32,
}

/// Closed area outlined by the lines `slid..=elid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapArea {
    pub aid: i32,
    pub slid: i32,
    pub elid: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossRoad {
    pub id: i32,
    pub aid: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLine {
    pub id: i32,
    pub lid: i32,
    pub signid: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadSignType {
    Stop,
    Stopline,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoadSign {
    pub id: i32,
    pub sign_type: RoadSignType,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorMapData {
    pub points: Vec<MapPoint>,
    pub lines: Vec<MapLine>,
    pub areas: Vec<MapArea>,
    pub cross_roads: Vec<CrossRoad>,
    pub stop_lines: Vec<StopLine>,
    pub road_signs: Vec<RoadSign>,
}

#[derive(Clone, Debug)]
pub struct VectorMap {
    cross_roads: Vec<CrossRoadArea>,
    stop_lines: Vec<StopLineSegment>,
}

impl VectorMap {
    pub fn build(data: VectorMapData) -> Result<Self, DecisionError> {
        let points: HashMap<i32, Point3<f64>> = data
            .points
            .iter()
            .map(|p| (p.pid, Point3::new(p.x, p.y, p.z)))
            .collect();
        let point = |pid: i32| {
            points
                .get(&pid)
                .copied()
                .ok_or_else(|| DecisionError::Map(format!("vector map point {} not found", pid)))
        };
        let lines: HashMap<i32, MapLine> = data.lines.iter().map(|l| (l.lid, *l)).collect();
        let areas: HashMap<i32, MapArea> = data.areas.iter().map(|a| (a.aid, *a)).collect();

        let mut cross_roads = Vec::with_capacity(data.cross_roads.len());
        for (index, cross_road) in data.cross_roads.iter().enumerate() {
            let area = areas.get(&cross_road.aid).ok_or_else(|| {
                DecisionError::Map(format!(
                    "cross road {} refers to missing area {}",
                    cross_road.id, cross_road.aid
                ))
            })?;
            let mut outline: Vec<&MapLine> = data
                .lines
                .iter()
                .filter(|l| area.slid <= l.lid && l.lid <= area.elid)
                .collect();
            outline.sort_by_key(|l| l.lid);
            let polygon = outline
                .iter()
                .map(|l| point(l.bpid))
                .collect::<Result<Vec<_>, _>>()?;
            cross_roads.push(CrossRoadArea::new(index as i32, area.aid, polygon));
        }

        let signs: HashMap<i32, RoadSignType> =
            data.road_signs.iter().map(|s| (s.id, s.sign_type)).collect();
        let mut stop_lines = Vec::new();
        for stop_line in &data.stop_lines {
            let stop_state = match signs.get(&stop_line.signid) {
                Some(RoadSignType::Stop) => StopState::Stop,
                Some(RoadSignType::Stopline) => StopState::Stopline,
                Some(RoadSignType::Other) => continue,
                None => {
                    warn!(
                        "stop line {} refers to missing road sign {}",
                        stop_line.id, stop_line.signid
                    );
                    continue;
                }
            };
            let line = lines.get(&stop_line.lid).ok_or_else(|| {
                DecisionError::Map(format!(
                    "stop line {} refers to missing line {}",
                    stop_line.id, stop_line.lid
                ))
            })?;
            stop_lines.push(StopLineSegment {
                start: point(line.bpid)?,
                end: point(line.fpid)?,
                stop_state,
            });
        }

        info!(
            "vector map ready: {} cross roads, {} stop lines",
            cross_roads.len(),
            stop_lines.len()
        );
        Ok(VectorMap {
            cross_roads,
            stop_lines,
        })
    }

    pub fn cross_roads(&self) -> &[CrossRoadArea] {
        &self.cross_roads
    }

    pub fn stop_lines(&self) -> &[StopLineSegment] {
        &self.stop_lines
    }
}

impl MapBackend for VectorMap {
    fn kind(&self) -> MapBackendKind {
        MapBackendKind::VectorMap
    }

    fn annotate(&mut self, lanes: &mut LaneArray, policy: &AnnotationPolicy) {
        // Stoplines go first so inserted waypoints get area and turn labels
        // from the same rules as every other waypoint.
        for lane in &mut lanes.lanes {
            for line in &self.stop_lines {
                // Only stoplines whose start lies to the left of the travel direction.
                let center = Point3::new(
                    (line.start.x * 2.0 + line.end.x) / 3.0,
                    (line.start.y * 2.0 + line.end.y) / 3.0,
                    (line.start.z + line.end.z) / 2.0,
                );
                apply_stopline(lane, line, policy.insert_stopline_waypoint, |from, to| {
                    side_of_line(&center, &from.pose.position, &to.pose.position) >= 0.0
                });
            }
        }
        lanes.reindex();

        match_cross_roads(&mut self.cross_roads, lanes);
        label_turns(&self.cross_roads, lanes, policy);
        default_straight(lanes);
        mark_goals(lanes, policy.goal_marker_count);
    }
}
