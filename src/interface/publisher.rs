// interface/publisher.rs
// Queues outbound messages produced during handling and ticking until the
// owner of the node drains them.

use super::{LampCmd, Outbound, StateMessage, VehicleLocation};
use crate::core::snapshot::to_wire;
use crate::core::waypoint::LaneArray;
use log::{debug, info};
use std::collections::VecDeque;

/// Outbound message queue with one typed method per output topic.
#[derive(Debug, Default)]
pub struct Publisher {
    queue: VecDeque<Outbound>,
}

impl Publisher {
    pub fn new() -> Self {
        Publisher::default()
    }

    fn publish(&mut self, message: Outbound) {
        debug!("publish {}: {:?}", message.topic(), message);
        self.queue.push_back(message);
    }

    pub fn publish_lane_array(&mut self, lanes: &LaneArray) {
        self.publish(Outbound::LaneArray(lanes.clone()));
    }

    pub fn publish_state(&mut self, state: StateMessage) {
        self.publish(Outbound::StateName(state.joined()));
        self.publish(Outbound::StateMessage(state));
    }

    /// Stop target for the velocity planner; `None` releases it.
    pub fn publish_stopline_waypoint(&mut self, gid: Option<i32>) {
        self.publish(Outbound::StoplineWaypoint(to_wire(gid)));
    }

    pub fn publish_stop_location(&mut self, location: VehicleLocation) {
        self.publish(Outbound::StopLocation(location));
    }

    /// Operator-facing text; also logged.
    pub fn publish_operator_help(&mut self, text: &str) {
        info!("operator: {}", text);
        self.publish(Outbound::OperatorHelp(text.to_string()));
    }

    pub fn publish_available_transitions(&mut self, text: String) {
        self.publish(Outbound::AvailableTransitions(text));
    }

    pub fn publish_lamp_cmd(&mut self, cmd: LampCmd) {
        self.publish(Outbound::LampCmd(cmd));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Removes and returns everything published so far, oldest first.
    pub fn drain(&mut self) -> Vec<Outbound> {
        self.queue.drain(..).collect()
    }
}
