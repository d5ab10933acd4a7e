// contexts/behavior.rs

// Behavior context: picks the manoeuvre for the stretch of road ahead (turns,
// reversing, lane changes) and drives the turn signals.

use super::{BehaviorEvent, Channel, Context, MissionEvent};
use crate::DecisionConfig;
use crate::core::snapshot::{ChangeFlag, WorldSnapshot};
use crate::core::waypoint::SteeringState;
use crate::decision::steering_state_ahead;
use crate::interface::{LampCmd, Publisher};
use crate::state_machine::{StateHandler, StateId, StateMachineError, TransitionTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BehaviorState {
    Stopping,
    Cruise,
    LeftTurn,
    RightTurn,
    Straight,
    Back,
    CheckLeftLane,
    CheckRightLane,
    ChangeToLeft,
    ChangeToRight,
    BehaviorEmergency,
}

impl StateId for BehaviorState {
    const ALL: &'static [Self] = &[
        BehaviorState::Stopping,
        BehaviorState::Cruise,
        BehaviorState::LeftTurn,
        BehaviorState::RightTurn,
        BehaviorState::Straight,
        BehaviorState::Back,
        BehaviorState::CheckLeftLane,
        BehaviorState::CheckRightLane,
        BehaviorState::ChangeToLeft,
        BehaviorState::ChangeToRight,
        BehaviorState::BehaviorEmergency,
    ];

    fn name(self) -> &'static str {
        match self {
            BehaviorState::Stopping => "Stopping",
            BehaviorState::Cruise => "Cruise",
            BehaviorState::LeftTurn => "LeftTurn",
            BehaviorState::RightTurn => "RightTurn",
            BehaviorState::Straight => "Straight",
            BehaviorState::Back => "Back",
            BehaviorState::CheckLeftLane => "CheckLeftLane",
            BehaviorState::CheckRightLane => "CheckRightLane",
            BehaviorState::ChangeToLeft => "ChangeToLeft",
            BehaviorState::ChangeToRight => "ChangeToRight",
            BehaviorState::BehaviorEmergency => "BehaviorEmergency",
        }
    }
}

const MOVING: &[BehaviorState] = &[
    BehaviorState::Cruise,
    BehaviorState::LeftTurn,
    BehaviorState::RightTurn,
    BehaviorState::Straight,
    BehaviorState::Back,
    BehaviorState::CheckLeftLane,
    BehaviorState::CheckRightLane,
    BehaviorState::ChangeToLeft,
    BehaviorState::ChangeToRight,
];

pub fn behavior_table() -> Result<TransitionTable<BehaviorState>, StateMachineError> {
    use BehaviorState::*;
    TransitionTable::builder("behavior")
        .states(BehaviorState::ALL)
        .initial(super::START_TRIGGER, Stopping)
        .transition(Stopping, "operation_start", Cruise)
        .transition(Cruise, "on_left_turn", LeftTurn)
        .transition(Cruise, "on_right_turn", RightTurn)
        .transition(Cruise, "on_straight", Straight)
        .transition(Cruise, "on_back", Back)
        .transitions(
            &[LeftTurn, RightTurn, Straight, Back, CheckLeftLane, CheckRightLane],
            "clear",
            Cruise,
        )
        .transition(Cruise, "lane_change_left", CheckLeftLane)
        .transition(Cruise, "lane_change_right", CheckRightLane)
        .transition(CheckLeftLane, "left_lane_is_safe", ChangeToLeft)
        .transition(CheckRightLane, "right_lane_is_safe", ChangeToRight)
        .transitions(&[ChangeToLeft, ChangeToRight], "done_lane_change", Cruise)
        .transitions(MOVING, "operation_end", Stopping)
        .transitions(&[Stopping], "emergency", BehaviorEmergency)
        .transitions(MOVING, "emergency", BehaviorEmergency)
        .transition(BehaviorEmergency, "return_from_emergency", Stopping)
        .build()
}

pub struct BehaviorEnv<'a> {
    pub config: &'a DecisionConfig,
    pub world: &'a WorldSnapshot,
    pub publisher: &'a mut Publisher,
    pub mission_events: &'a mut Channel<MissionEvent>,
    pub events: &'a mut Channel<BehaviorEvent>,
}

impl BehaviorEnv<'_> {
    fn steering_ahead(&self) -> Option<SteeringState> {
        let sensors = self.world.sensors();
        let pose = sensors.pose.as_ref()?;
        if sensors.final_waypoints.len() < 2 {
            return None;
        }
        Some(steering_state_ahead(
            &sensors.final_waypoints,
            pose,
            self.config.steer_lookahead_distance,
        ))
    }

    /// The local path asks for reverse motion.
    fn reversing(&self) -> bool {
        self.world
            .sensors()
            .final_waypoints
            .waypoints
            .get(1)
            .is_some_and(|wp| wp.velocity < 0.0)
    }

    fn change_flag(&self) -> ChangeFlag {
        self.world.sensors().change_flag
    }

    fn lane_is_safe(&self) -> bool {
        self.world.sensors().obstacle_waypoint.is_none()
    }
}

#[derive(Debug, Default)]
pub struct BehaviorLogic;

impl<'a> StateHandler<BehaviorState, BehaviorEnv<'a>> for BehaviorLogic {
    fn on_entry(&mut self, state: BehaviorState, env: &mut BehaviorEnv<'a>) -> Option<&'static str> {
        match state {
            BehaviorState::LeftTurn | BehaviorState::ChangeToLeft => {
                env.publisher.publish_lamp_cmd(LampCmd::LEFT)
            }
            BehaviorState::RightTurn | BehaviorState::ChangeToRight => {
                env.publisher.publish_lamp_cmd(LampCmd::RIGHT)
            }
            _ => {}
        }
        None
    }

    fn on_update(&mut self, state: BehaviorState, env: &mut BehaviorEnv<'a>) -> Option<&'static str> {
        match state {
            BehaviorState::Cruise => match env.change_flag() {
                ChangeFlag::Left => Some("lane_change_left"),
                ChangeFlag::Right => Some("lane_change_right"),
                _ if env.reversing() => Some("on_back"),
                _ => match env.steering_ahead()? {
                    SteeringState::Left => Some("on_left_turn"),
                    SteeringState::Right => Some("on_right_turn"),
                    _ => Some("on_straight"),
                },
            },
            BehaviorState::LeftTurn => turn_cleared(env, SteeringState::Left),
            BehaviorState::RightTurn => turn_cleared(env, SteeringState::Right),
            BehaviorState::Straight => {
                let flag = env.change_flag();
                let lane_change = matches!(flag, ChangeFlag::Left | ChangeFlag::Right);
                let turning = matches!(
                    env.steering_ahead(),
                    Some(SteeringState::Left | SteeringState::Right)
                );
                (lane_change || turning || env.reversing()).then_some("clear")
            }
            BehaviorState::Back => (!env.reversing()).then_some("clear"),
            BehaviorState::CheckLeftLane => check_lane(env, ChangeFlag::Left, "left_lane_is_safe"),
            BehaviorState::CheckRightLane => {
                check_lane(env, ChangeFlag::Right, "right_lane_is_safe")
            }
            BehaviorState::ChangeToLeft | BehaviorState::ChangeToRight => {
                (env.change_flag() == ChangeFlag::Straight).then_some("done_lane_change")
            }
            BehaviorState::Stopping | BehaviorState::BehaviorEmergency => None,
        }
    }

    fn on_exit(&mut self, state: BehaviorState, env: &mut BehaviorEnv<'a>) {
        if matches!(
            state,
            BehaviorState::LeftTurn
                | BehaviorState::RightTurn
                | BehaviorState::ChangeToLeft
                | BehaviorState::ChangeToRight
        ) {
            env.publisher.publish_lamp_cmd(LampCmd::OFF);
        }
    }
}

fn turn_cleared(env: &BehaviorEnv, turn: SteeringState) -> Option<&'static str> {
    (env.steering_ahead() != Some(turn)).then_some("clear")
}

/// Requested side still wanted and free: go. Request withdrawn: back to cruise.
fn check_lane(env: &BehaviorEnv, side: ChangeFlag, safe: &'static str) -> Option<&'static str> {
    if env.change_flag() != side {
        Some("clear")
    } else if env.lane_is_safe() {
        Some(safe)
    } else {
        None
    }
}

pub type BehaviorContext = Context<BehaviorState, BehaviorLogic>;

impl Context<BehaviorState, BehaviorLogic> {
    pub fn build() -> Result<Self, StateMachineError> {
        Ok(Context::new(behavior_table()?, BehaviorLogic))
    }

    /// Applies mission events, forwards what motion needs, then ticks.
    pub fn step(&mut self, env: &mut BehaviorEnv) {
        while let Some(event) = env.mission_events.pop() {
            match event {
                MissionEvent::DriveReady => env.events.push(BehaviorEvent::DriveReady),
                MissionEvent::Driving => {
                    self.relay("operation_start", env);
                    env.events.push(BehaviorEvent::Engaged);
                }
                MissionEvent::Ended => {
                    self.relay("operation_end", env);
                    env.events.push(BehaviorEvent::Disengaged);
                }
                MissionEvent::Emergency => {
                    self.relay("emergency", env);
                    env.events.push(BehaviorEvent::Emergency);
                }
                MissionEvent::EmergencyCleared => {
                    self.relay("return_from_emergency", env);
                    env.events.push(BehaviorEvent::EmergencyCleared);
                }
            }
        }
        self.tick(env);
    }
}
