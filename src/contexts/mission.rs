// contexts/mission.rs

// Mission context: waits for the vehicle, validates received routes, adopts the
// accepted one and follows it to completion. It is the only writer of the
// snapshot's mission section.

use super::{Channel, Context, MissionEvent, MotionEvent, VehicleEvent};
use crate::DecisionConfig;
use crate::core::flags::{EventFlag, EventFlags};
use crate::core::snapshot::WorldSnapshot;
use crate::core::throttle::Throttle;
use crate::decision::{MissionVerdict, check_mission};
use crate::interface::Publisher;
use crate::map::MapBackend;
use crate::state_machine::{StateHandler, StateId, StateMachineError, TransitionTable};
use log::{info, warn};
use std::time::Duration;

/// Write access to `MissionStatus`.
#[derive(Debug)]
pub struct MissionWriter {
    _private: (),
}

impl MissionWriter {
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        MissionWriter { _private: () }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MissionState {
    MissionInit,
    WaitOrder,
    MissionCheck,
    DriveReady,
    Driving,
    DrivingMissionChange,
    MissionChangeSucceeded,
    MissionChangeFailed,
    MissionComplete,
    MissionAborted,
}

impl StateId for MissionState {
    const ALL: &'static [Self] = &[
        MissionState::MissionInit,
        MissionState::WaitOrder,
        MissionState::MissionCheck,
        MissionState::DriveReady,
        MissionState::Driving,
        MissionState::DrivingMissionChange,
        MissionState::MissionChangeSucceeded,
        MissionState::MissionChangeFailed,
        MissionState::MissionComplete,
        MissionState::MissionAborted,
    ];

    fn name(self) -> &'static str {
        match self {
            MissionState::MissionInit => "MissionInit",
            MissionState::WaitOrder => "WaitOrder",
            MissionState::MissionCheck => "MissionCheck",
            MissionState::DriveReady => "DriveReady",
            MissionState::Driving => "Driving",
            MissionState::DrivingMissionChange => "DrivingMissionChange",
            MissionState::MissionChangeSucceeded => "MissionChangeSucceeded",
            MissionState::MissionChangeFailed => "MissionChangeFailed",
            MissionState::MissionComplete => "MissionComplete",
            MissionState::MissionAborted => "MissionAborted",
        }
    }
}

pub fn mission_table() -> Result<TransitionTable<MissionState>, StateMachineError> {
    use MissionState::*;
    TransitionTable::builder("mission")
        .states(MissionState::ALL)
        .initial(super::START_TRIGGER, MissionInit)
        .transition(MissionInit, "state_mission_initialized", WaitOrder)
        .transition(WaitOrder, "received_mission_order", MissionCheck)
        .transition(MissionCheck, "mission_is_compatible", DriveReady)
        .transition(MissionCheck, "mission_is_incompatible", WaitOrder)
        .transition(DriveReady, "received_mission_order", MissionCheck)
        .transition(DriveReady, "engage", Driving)
        .transition(Driving, "request_mission_change", DrivingMissionChange)
        .transition(Driving, "arrived_goal", MissionComplete)
        .transition(Driving, "mission_aborted", MissionAborted)
        .transition(DrivingMissionChange, "mission_is_compatible", MissionChangeSucceeded)
        .transition(DrivingMissionChange, "mission_is_incompatible", MissionChangeFailed)
        .transitions(
            &[MissionChangeSucceeded, MissionChangeFailed],
            "return_to_driving",
            Driving,
        )
        .transitions(&[MissionComplete, MissionAborted], "goto_wait_order", WaitOrder)
        .build()
}

pub struct MissionEnv<'a> {
    pub config: &'a DecisionConfig,
    pub flags: &'a mut EventFlags,
    pub world: &'a mut WorldSnapshot,
    pub map: Option<&'a mut (dyn MapBackend + 'static)>,
    pub publisher: &'a mut Publisher,
    pub vehicle_events: &'a mut Channel<VehicleEvent>,
    pub motion_events: &'a mut Channel<MotionEvent>,
    pub events: &'a mut Channel<MissionEvent>,
    pub now: Duration,
}

impl MissionEnv<'_> {
    /// Auto engage, reload and change are operator conveniences that an external
    /// mission source takes over.
    fn automatic(&self, enabled: bool) -> bool {
        enabled && !self.config.use_external_mission_source
    }
}

#[derive(Debug)]
pub struct MissionLogic {
    writer: MissionWriter,
    vehicle_ready: bool,
    /// Set by a vehicle recovery; the layers below are re-synchronized once
    /// the vehicle is ready again.
    resume_pending: bool,
    back_waypoint_reported: bool,
    deferred_warning: Throttle,
    change_notice: Throttle,
}

impl Default for MissionLogic {
    fn default() -> Self {
        MissionLogic {
            writer: MissionWriter { _private: () },
            vehicle_ready: false,
            resume_pending: false,
            back_waypoint_reported: false,
            deferred_warning: Throttle::new(Duration::from_secs(2)),
            change_notice: Throttle::new(Duration::from_secs(5)),
        }
    }
}

impl MissionLogic {
    /// Validates a copy of the latest received route and adopts it when accepted.
    fn validate(&mut self, env: &mut MissionEnv) -> MissionVerdict {
        let mut candidate = env.world.sensors().based_lane_array.clone();
        let pose = env.world.sensors().pose;
        let verdict = check_mission(
            &mut candidate,
            pose.as_ref(),
            env.map.as_deref_mut(),
            env.config,
            env.flags,
        );

        if env.flags.is_set(EventFlag::ReceivedBackStateWaypoint) {
            if !self.back_waypoint_reported {
                env.publisher.publish_operator_help("Received back waypoint.");
                self.back_waypoint_reported = true;
            }
        } else {
            self.back_waypoint_reported = false;
        }

        match &verdict {
            MissionVerdict::Accepted => {
                env.publisher.publish_lane_array(&candidate);
                let (_, mission) = env.world.mission_mut(&self.writer);
                info!("mission {} accepted", candidate.id);
                mission.using_lane_array = Some(candidate);
                mission.final_path_enabled = true;
                mission.accepted_missions += 1;
            }
            MissionVerdict::Rejected { reason } => {
                env.publisher
                    .publish_operator_help(&format!("Mission rejected: {}", reason));
            }
            MissionVerdict::Deferred { reason } => {
                if self.deferred_warning.ready(env.now) {
                    warn!("mission check deferred: {}", reason);
                }
            }
        }
        verdict
    }

    fn begin_check(&mut self, env: &mut MissionEnv) {
        env.flags.take(EventFlag::ReceivedBasedLaneWaypoint);
        env.publisher
            .publish_operator_help("Received new mission, checking now...");
    }
}

impl<'a> StateHandler<MissionState, MissionEnv<'a>> for MissionLogic {
    fn on_entry(&mut self, state: MissionState, env: &mut MissionEnv<'a>) -> Option<&'static str> {
        match state {
            MissionState::MissionCheck => self.begin_check(env),
            MissionState::DriveReady => env.events.push(MissionEvent::DriveReady),
            MissionState::Driving => env.events.push(MissionEvent::Driving),
            MissionState::DrivingMissionChange => {
                env.world.mission_mut(&self.writer).1.change_in_progress = true;
                self.begin_check(env);
            }
            MissionState::MissionChangeSucceeded => {
                env.publisher.publish_operator_help("Mission change succeeded.");
            }
            MissionState::MissionChangeFailed => {
                env.publisher
                    .publish_operator_help("Mission change failed, keeping current mission.");
            }
            MissionState::MissionComplete => {
                env.events.push(MissionEvent::Ended);
                env.publisher.publish_operator_help("Mission complete.");
                if env.automatic(env.config.auto_mission_reload)
                    && !env.world.sensors().based_lane_array.is_empty()
                {
                    info!("reloading the last mission");
                    env.flags.set(EventFlag::ReceivedBasedLaneWaypoint, true);
                }
            }
            MissionState::MissionAborted => {
                env.events.push(MissionEvent::Ended);
                env.publisher.publish_operator_help("Mission aborted.");
            }
            _ => {}
        }
        None
    }

    fn on_update(&mut self, state: MissionState, env: &mut MissionEnv<'a>) -> Option<&'static str> {
        let new_mission = env.flags.is_set(EventFlag::ReceivedBasedLaneWaypoint);
        match state {
            MissionState::MissionInit => self.vehicle_ready.then_some("state_mission_initialized"),
            MissionState::WaitOrder => new_mission.then_some("received_mission_order"),
            MissionState::MissionCheck => match self.validate(env) {
                MissionVerdict::Accepted => Some("mission_is_compatible"),
                MissionVerdict::Rejected { .. } => Some("mission_is_incompatible"),
                MissionVerdict::Deferred { .. } => None,
            },
            MissionState::DriveReady => {
                if new_mission {
                    Some("received_mission_order")
                } else if env.automatic(env.config.auto_engage) {
                    Some("engage")
                } else {
                    None
                }
            }
            MissionState::Driving => {
                if !new_mission {
                    return None;
                }
                if env.automatic(env.config.auto_mission_change) {
                    return Some("request_mission_change");
                }
                if self.change_notice.ready(env.now) {
                    info!("new mission received while driving; waiting for request_mission_change");
                }
                None
            }
            // Deferral is not an option while the vehicle is moving.
            MissionState::DrivingMissionChange => match self.validate(env) {
                MissionVerdict::Accepted => Some("mission_is_compatible"),
                _ => Some("mission_is_incompatible"),
            },
            MissionState::MissionChangeSucceeded | MissionState::MissionChangeFailed => {
                Some("return_to_driving")
            }
            MissionState::MissionComplete | MissionState::MissionAborted => Some("goto_wait_order"),
        }
    }

    fn on_exit(&mut self, state: MissionState, env: &mut MissionEnv<'a>) {
        if state == MissionState::DrivingMissionChange {
            env.world.mission_mut(&self.writer).1.change_in_progress = false;
        }
    }
}

pub type MissionContext = Context<MissionState, MissionLogic>;

impl Context<MissionState, MissionLogic> {
    pub fn build() -> Result<Self, StateMachineError> {
        Ok(Context::new(mission_table()?, MissionLogic::default()))
    }

    /// Applies vehicle events and last tick's motion feedback, then ticks.
    pub fn step(&mut self, env: &mut MissionEnv) {
        while let Some(event) = env.vehicle_events.pop() {
            match event {
                VehicleEvent::Ready => {
                    self.logic.vehicle_ready = true;
                    if std::mem::take(&mut self.logic.resume_pending) {
                        self.reannounce(env);
                    }
                }
                VehicleEvent::Emergency => env.events.push(MissionEvent::Emergency),
                VehicleEvent::Recovered => {
                    self.logic.vehicle_ready = false;
                    self.logic.resume_pending = true;
                    env.events.push(MissionEvent::EmergencyCleared);
                }
            }
        }
        while let Some(event) = env.motion_events.pop() {
            match event {
                MotionEvent::ArrivedGoal => self.relay("arrived_goal", env),
                MotionEvent::MissionAborted => self.relay("mission_aborted", env),
            };
        }
        self.tick(env);
    }

    /// Replays the events that brought behavior and motion into the current
    /// mission state. Recovery leaves both at their initial states.
    fn reannounce(&mut self, env: &mut MissionEnv) {
        use MissionState::*;
        match self.current() {
            Some(DriveReady) => env.events.push(MissionEvent::DriveReady),
            Some(Driving | DrivingMissionChange | MissionChangeSucceeded | MissionChangeFailed) => {
                info!("resuming mission after recovery");
                env.events.push(MissionEvent::DriveReady);
                env.events.push(MissionEvent::Driving);
            }
            _ => {}
        }
    }
}
