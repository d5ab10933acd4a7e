// interface/subscriber.rs
// Applies inbound sensor and planner data to the world snapshot.
//
// The subscriber is the only writer of the snapshot's sensor inputs: it holds
// the `InputWriter` token, which cannot be constructed outside this module.

use super::{Publisher, Twist, VehicleLocation};
use crate::core::flags::{EventFlag, EventFlags};
use crate::core::geometry::Pose;
use crate::core::snapshot::{ChangeFlag, StopOrder, WorldSnapshot, wire_index};
use crate::core::waypoint::{Lane, LaneArray};
use log::{debug, info, warn};

/// Write access to `SensorInputs`.
#[derive(Debug)]
pub struct InputWriter {
    _private: (),
}

#[derive(Debug)]
pub struct Subscriber {
    writer: InputWriter,
    order_seq: u64,
}

impl Default for Subscriber {
    fn default() -> Self {
        Subscriber::new()
    }
}

impl Subscriber {
    pub fn new() -> Self {
        Subscriber {
            writer: InputWriter { _private: () },
            order_seq: 0,
        }
    }

    pub fn on_current_pose(&self, world: &mut WorldSnapshot, flags: &mut EventFlags, pose: Pose) {
        world.sensors_mut(&self.writer).pose = Some(pose);
        flags.set(EventFlag::ReceivedCurrentPose, true);
    }

    pub fn on_current_velocity(&self, world: &mut WorldSnapshot, twist: Twist) {
        let sensors = world.sensors_mut(&self.writer);
        sensors.velocity = twist.linear;
        sensors.angular_velocity = twist.angular;
    }

    pub fn on_lane_array(&self, world: &mut WorldSnapshot, flags: &mut EventFlags, lanes: LaneArray) {
        info!(
            "received lane array {} with {} lanes",
            lanes.id,
            lanes.lanes.len()
        );
        world.sensors_mut(&self.writer).based_lane_array = lanes;
        flags.set(EventFlag::ReceivedBasedLaneWaypoint, true);
    }

    /// Local path updates are only taken once a mission has been accepted.
    pub fn on_final_waypoints(&self, world: &mut WorldSnapshot, flags: &mut EventFlags, lane: Lane) {
        if !world.mission().final_path_enabled {
            debug!("final waypoints ignored: no accepted mission yet");
            return;
        }
        world.sensors_mut(&self.writer).final_waypoints = lane;
        flags.set(EventFlag::ReceivedFinalWaypoints, true);
    }

    pub fn on_closest_waypoint(&self, world: &mut WorldSnapshot, raw: i32) {
        world.sensors_mut(&self.writer).closest_waypoint = wire_index(raw);
    }

    pub fn on_obstacle_waypoint(&self, world: &mut WorldSnapshot, raw: i32) {
        world.sensors_mut(&self.writer).obstacle_waypoint = wire_index(raw);
    }

    pub fn on_stopline_waypoint(&self, world: &mut WorldSnapshot, raw: i32) {
        world.sensors_mut(&self.writer).stopline_waypoint = wire_index(raw);
    }

    pub fn on_lane_change_flag(&self, world: &mut WorldSnapshot, raw: i32) {
        world.sensors_mut(&self.writer).change_flag = ChangeFlag::from(raw);
    }

    pub fn on_filtered_points(&self, flags: &mut EventFlags) {
        flags.set(EventFlag::ReceivedPointcloudForNdt, true);
    }

    /// Accepts a stop order strictly between the closest waypoint and the end of
    /// the current mission; any other order cancels the active one. The outcome
    /// is always reported as a stop location.
    pub fn on_stop_order(&mut self, world: &mut WorldSnapshot, publisher: &mut Publisher, gid: i32) {
        let lane_array_id = world
            .mission()
            .using_lane_array
            .as_ref()
            .map(|lanes| lanes.id)
            .unwrap_or(0);
        let last_gid = world
            .mission()
            .using_lane_array
            .as_ref()
            .and_then(LaneArray::last_gid);
        let closest = world.sensors().closest_waypoint.unwrap_or(-1);

        let accepted = last_gid.is_some_and(|last| closest < gid && gid < last);
        let sensors = world.sensors_mut(&self.writer);
        if accepted {
            self.order_seq += 1;
            sensors.stop_order = Some(StopOrder {
                gid,
                seq: self.order_seq,
            });
            info!("stop order accepted at waypoint {}", gid);
        } else {
            sensors.stop_order = None;
            warn!(
                "stop order {} rejected (closest {}, last {:?})",
                gid, closest, last_gid
            );
        }

        publisher.publish_stop_location(VehicleLocation {
            lane_array_id,
            waypoint_index: if accepted { gid } else { -1 },
        });
    }
}
