// contexts/motion.rs

// Motion context: decides go / stop while driving. It tracks the stop marker
// it is heading for, serves operator stop orders, and reports goal arrival or
// a lost route back to the mission context.
//
// Every driving sub-state first runs the drive-level checks (goal reached,
// closest waypoint lost); only then does its own logic run.

use super::{BehaviorEvent, Channel, Context, MotionEvent};
use crate::DecisionConfig;
use crate::core::snapshot::{SensorInputs, WorldSnapshot};
use crate::core::throttle::Throttle;
use crate::core::waypoint::StopState;
use crate::decision::{
    StopMarker, distance_to_waypoint, find_next_stop_marker, is_arrived_goal,
    required_stop_distance,
};
use crate::interface::Publisher;
use crate::state_machine::{StateHandler, StateId, StateMachineError, TransitionTable};
use log::{debug, info, warn};
use std::time::Duration;

/// How long the vehicle rests at a stopline before moving on.
pub const STOPLINE_DWELL: Duration = Duration::from_millis(500);

/// Write access to `StopTracking`.
#[derive(Debug)]
pub struct StopWriter {
    _private: (),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MotionState {
    WaitDriveReady,
    WaitEngage,
    Drive,
    Go,
    Wait,
    Stop,
    StopLine,
    OrderedStop,
    ReservedStop,
    MotionEmergency,
}

impl MotionState {
    pub const DRIVING: &'static [MotionState] = &[
        MotionState::Drive,
        MotionState::Go,
        MotionState::Wait,
        MotionState::Stop,
        MotionState::StopLine,
        MotionState::OrderedStop,
        MotionState::ReservedStop,
    ];

    pub fn is_driving(self) -> bool {
        MotionState::DRIVING.contains(&self)
    }
}

impl StateId for MotionState {
    const ALL: &'static [Self] = &[
        MotionState::WaitDriveReady,
        MotionState::WaitEngage,
        MotionState::Drive,
        MotionState::Go,
        MotionState::Wait,
        MotionState::Stop,
        MotionState::StopLine,
        MotionState::OrderedStop,
        MotionState::ReservedStop,
        MotionState::MotionEmergency,
    ];

    fn name(self) -> &'static str {
        match self {
            MotionState::WaitDriveReady => "WaitDriveReady",
            MotionState::WaitEngage => "WaitEngage",
            MotionState::Drive => "Drive",
            MotionState::Go => "Go",
            MotionState::Wait => "Wait",
            MotionState::Stop => "Stop",
            MotionState::StopLine => "StopLine",
            MotionState::OrderedStop => "OrderedStop",
            MotionState::ReservedStop => "ReservedStop",
            MotionState::MotionEmergency => "MotionEmergency",
        }
    }
}

pub fn motion_table() -> Result<TransitionTable<MotionState>, StateMachineError> {
    use MotionState::*;
    TransitionTable::builder("motion")
        .states(MotionState::ALL)
        .initial(super::START_TRIGGER, WaitDriveReady)
        .transition(WaitDriveReady, "drive_ready", WaitEngage)
        .transition(WaitEngage, "engage", Drive)
        .transition(Drive, "found_stop_decision", Go)
        .transition(Drive, "clear", Go)
        .transition(Go, "found_stop_decision", Stop)
        .transition(Go, "wait", Wait)
        .transition(Stop, "clear", Go)
        .transition(Stop, "found_stopline", StopLine)
        .transition(Stop, "found_reserved_stop", ReservedStop)
        .transition(Stop, "received_stop_order", OrderedStop)
        .transition(StopLine, "received_stop_order", OrderedStop)
        .transitions(&[Wait, StopLine, OrderedStop, ReservedStop], "clear", Go)
        .transitions(MotionState::DRIVING, "arrived_goal", WaitDriveReady)
        .transitions(MotionState::DRIVING, "mission_aborted", WaitDriveReady)
        .transitions(MotionState::DRIVING, "operation_end", WaitDriveReady)
        .transitions(&[WaitDriveReady, WaitEngage], "emergency", MotionEmergency)
        .transitions(MotionState::DRIVING, "emergency", MotionEmergency)
        .transition(MotionEmergency, "return_from_emergency", WaitDriveReady)
        .build()
}

pub struct MotionEnv<'a> {
    pub config: &'a DecisionConfig,
    pub world: &'a mut WorldSnapshot,
    pub publisher: &'a mut Publisher,
    pub behavior_events: &'a mut Channel<BehaviorEvent>,
    /// Feedback for the mission context, read on its next step.
    pub feedback: &'a mut Channel<MotionEvent>,
    pub now: Duration,
}

/// Global index of the reported obstacle. An offset that overflows is
/// treated as no obstacle.
fn obstacle_gid(sensors: &SensorInputs) -> Option<i32> {
    sensors
        .obstacle_waypoint?
        .checked_add(sensors.closest_waypoint.unwrap_or(0))
}

#[derive(Debug)]
pub struct MotionLogic {
    writer: StopWriter,
    /// When the vehicle may leave the current stopline.
    stopline_deadline: Option<Duration>,
    empty_path_warning: Throttle,
}

impl Default for MotionLogic {
    fn default() -> Self {
        MotionLogic {
            writer: StopWriter { _private: () },
            stopline_deadline: None,
            empty_path_warning: Throttle::new(Duration::from_secs(1)),
        }
    }
}

impl MotionLogic {
    /// Runs the stop marker search and remembers a hit as the found stop.
    fn search_stop(&self, env: &mut MotionEnv) -> StopMarker {
        let (sensors, _, stops) = env.world.stops_mut(&self.writer);
        let Some(pose) = sensors.pose.as_ref() else {
            return StopMarker::NONE;
        };
        let marker = find_next_stop_marker(
            &sensors.final_waypoints,
            pose,
            sensors.velocity,
            &mut stops.prev_stopped_wpidx,
            env.config.stopline_reset_count,
        );
        if marker.is_found() {
            stops.found_stopsign_idx = marker.gid;
        }
        marker
    }

    fn drive_checks(&mut self, env: &mut MotionEnv) -> Option<&'static str> {
        let sensors = env.world.sensors();
        let arrived = sensors.pose.as_ref().is_some_and(|pose| {
            is_arrived_goal(
                &sensors.final_waypoints,
                pose,
                sensors.velocity,
                env.config.goal_distance_threshold,
                env.config.goal_velocity_threshold,
            )
        });
        if arrived {
            info!("arrived at goal");
            env.feedback.push(MotionEvent::ArrivedGoal);
            return Some("arrived_goal");
        }
        if sensors.closest_waypoint.is_none() {
            env.publisher.publish_operator_help(
                "The vehicle passed last waypoint or waypoint does not exist near the vehicle.",
            );
            env.feedback.push(MotionEvent::MissionAborted);
            return Some("mission_aborted");
        }
        if sensors.final_waypoints.is_empty() && self.empty_path_warning.ready(env.now) {
            warn!("final waypoints contain no waypoints");
        }
        None
    }

    fn update_go(&self, env: &mut MotionEnv) -> Option<&'static str> {
        let marker = self.search_stop(env);
        let sensors = env.world.sensors();
        let obstacle = obstacle_gid(sensors);
        let before_obstacle = |gid: i32| obstacle.is_none_or(|o| gid <= o);

        let found = env.world.stops().found_stopsign_idx;
        if marker.is_found() && found.is_some_and(before_obstacle) {
            return Some("found_stop_decision");
        }

        let order = env.world.ordered_stop_idx()?;
        let pose = sensors.pose.as_ref()?;
        let within_reach = distance_to_waypoint(&sensors.final_waypoints, pose, order)
            .is_some_and(|d| required_stop_distance(sensors.velocity) > d);
        (within_reach && before_obstacle(order)).then_some("found_stop_decision")
    }

    fn update_stop(&self, env: &mut MotionEnv) -> Option<&'static str> {
        let marker = self.search_stop(env);
        let found = env.world.stops().found_stopsign_idx;
        let order = env.world.ordered_stop_idx();

        if let Some(obstacle) = obstacle_gid(env.world.sensors()) {
            let beyond = |gid: Option<i32>| gid.is_some_and(|g| g >= obstacle);
            if beyond(found) || beyond(order) {
                return Some("clear");
            }
        }

        if let Some(found) = found.filter(|_| marker.is_found()) {
            if order.is_none_or(|g| found < g) {
                return match marker.state {
                    StopState::Stopline => Some("found_stopline"),
                    StopState::Stop => Some("found_reserved_stop"),
                    StopState::None => None,
                };
            }
        }

        if let Some(order) = order {
            if found.is_none_or(|f| order <= f) {
                return Some("received_stop_order");
            }
        }
        // Nothing pending: hold the stop.
        None
    }

    fn update_stopline(&mut self, env: &mut MotionEnv) -> Option<&'static str> {
        let found = env.world.stops().found_stopsign_idx;
        env.publisher.publish_stopline_waypoint(found);

        if let Some(deadline) = self.stopline_deadline {
            if env.now < deadline {
                return None;
            }
            self.stopline_deadline = None;
            let (_, _, stops) = env.world.stops_mut(&self.writer);
            stops.prev_stopped_wpidx = stops.found_stopsign_idx.take();
            return Some(if env.world.ordered_stop_idx().is_some() {
                "received_stop_order"
            } else {
                "clear"
            });
        }

        let sensors = env.world.sensors();
        let at_line = match (sensors.stopline_waypoint, sensors.closest_waypoint) {
            (Some(offset), Some(closest)) => {
                found.is_some() && found == offset.checked_add(closest)
            }
            _ => false,
        };
        if at_line && sensors.velocity.abs() <= env.config.stopped_velocity_threshold {
            debug!("stopped at stopline {:?}", found);
            self.stopline_deadline = Some(env.now + STOPLINE_DWELL);
        }
        None
    }

    fn update_ordered_stop(&self, env: &mut MotionEnv) -> Option<&'static str> {
        let closest = env.world.sensors().closest_waypoint;
        match env.world.ordered_stop_idx() {
            Some(order) if closest.is_none_or(|c| c <= order) => {
                env.publisher.publish_stopline_waypoint(Some(order));
                None
            }
            _ => Some("clear"),
        }
    }
}

impl<'a> StateHandler<MotionState, MotionEnv<'a>> for MotionLogic {
    fn on_entry(&mut self, state: MotionState, env: &mut MotionEnv<'a>) -> Option<&'static str> {
        match state {
            MotionState::Drive => {
                self.search_stop(env);
                let pending = env.world.stops().found_stopsign_idx.is_some()
                    || env.world.ordered_stop_idx().is_some();
                Some(if pending { "found_stop_decision" } else { "clear" })
            }
            MotionState::Go => {
                env.publisher.publish_stopline_waypoint(None);
                None
            }
            MotionState::StopLine => {
                self.stopline_deadline = None;
                None
            }
            _ => None,
        }
    }

    fn on_update(&mut self, state: MotionState, env: &mut MotionEnv<'a>) -> Option<&'static str> {
        if state.is_driving() {
            if let Some(trigger) = self.drive_checks(env) {
                return Some(trigger);
            }
        }
        match state {
            MotionState::Go => self.update_go(env),
            MotionState::Wait => {
                if let Some(gid) = env.world.sensors().final_waypoints.waypoints.get(2).map(|wp| wp.gid) {
                    env.publisher.publish_stopline_waypoint(Some(gid));
                }
                None
            }
            MotionState::Stop => self.update_stop(env),
            MotionState::StopLine => self.update_stopline(env),
            MotionState::OrderedStop => self.update_ordered_stop(env),
            MotionState::ReservedStop => {
                let found = env.world.stops().found_stopsign_idx;
                env.publisher.publish_stopline_waypoint(found);
                None
            }
            _ => None,
        }
    }

    fn on_exit(&mut self, state: MotionState, env: &mut MotionEnv<'a>) {
        match state {
            MotionState::OrderedStop => {
                let (sensors, _, stops) = env.world.stops_mut(&self.writer);
                let active = sensors
                    .stop_order
                    .filter(|order| stops.resolved_order_seq != Some(order.seq));
                if let Some(order) = active {
                    if stops.found_stopsign_idx.is_none_or(|found| order.gid < found) {
                        stops.resolved_order_seq = Some(order.seq);
                        stops.prev_ordered_idx = Some(order.gid);
                    }
                }
            }
            MotionState::ReservedStop => {
                let (_, _, stops) = env.world.stops_mut(&self.writer);
                stops.prev_stopped_wpidx = stops.found_stopsign_idx.take();
            }
            MotionState::StopLine => self.stopline_deadline = None,
            _ => {}
        }
    }
}

pub type MotionContext = Context<MotionState, MotionLogic>;

impl Context<MotionState, MotionLogic> {
    pub fn build() -> Result<Self, StateMachineError> {
        Ok(Context::new(motion_table()?, MotionLogic::default()))
    }

    /// Applies behavior events, then ticks.
    pub fn step(&mut self, env: &mut MotionEnv) {
        while let Some(event) = env.behavior_events.pop() {
            let trigger = match event {
                BehaviorEvent::DriveReady => "drive_ready",
                BehaviorEvent::Engaged => "engage",
                BehaviorEvent::Disengaged => "operation_end",
                BehaviorEvent::Emergency => "emergency",
                BehaviorEvent::EmergencyCleared => "return_from_emergency",
            };
            self.relay(trigger, env);
        }
        self.tick(env);
    }
}
