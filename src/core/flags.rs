// core/flags.rs

// Process-wide event flags. Input handlers raise them when data arrives and the
// context update handlers read them as transition guards. Last writer wins.

use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventFlag {
    ReceivedBasedLaneWaypoint,
    ReceivedFinalWaypoints,
    ReceivedBackStateWaypoint,
    ReceivedCurrentPose,
    ReceivedPointcloudForNdt,
    VectorMapLoaded,
    Lanelet2MapLoaded,
}

impl EventFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            EventFlag::ReceivedBasedLaneWaypoint => "received_based_lane_waypoint",
            EventFlag::ReceivedFinalWaypoints => "received_finalwaypoints",
            EventFlag::ReceivedBackStateWaypoint => "received_back_state_waypoint",
            EventFlag::ReceivedCurrentPose => "received_current_pose",
            EventFlag::ReceivedPointcloudForNdt => "received_pointcloud_for_NDT",
            EventFlag::VectorMapLoaded => "vector_map_loaded",
            EventFlag::Lanelet2MapLoaded => "lanelet2_map_loaded",
        }
    }
}

impl fmt::Display for EventFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named boolean store; every flag reads `false` until set.
#[derive(Debug, Default, Clone)]
pub struct EventFlags {
    flags: HashMap<EventFlag, bool>,
}

impl EventFlags {
    pub fn new() -> Self {
        EventFlags::default()
    }

    pub fn set(&mut self, flag: EventFlag, value: bool) {
        log::debug!("event flag {} = {}", flag, value);
        self.flags.insert(flag, value);
    }

    pub fn is_set(&self, flag: EventFlag) -> bool {
        self.flags.get(&flag).copied().unwrap_or(false)
    }

    /// Reads a flag and lowers it.
    pub fn take(&mut self, flag: EventFlag) -> bool {
        self.flags.insert(flag, false).unwrap_or(false)
    }

    pub fn map_loaded(&self) -> bool {
        self.is_set(EventFlag::VectorMapLoaded) || self.is_set(EventFlag::Lanelet2MapLoaded)
    }
}
