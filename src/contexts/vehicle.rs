// contexts/vehicle.rs

// Vehicle context: brings the platform up (sensors, map, localization,
// planning, vehicle interface) and reports readiness and emergencies to the
// mission context.

use super::{Channel, Context, VehicleEvent};
use crate::DecisionConfig;
use crate::core::flags::{EventFlag, EventFlags};
use crate::core::snapshot::WorldSnapshot;
use crate::core::throttle::Throttle;
use crate::core::geometry::distance;
use crate::state_machine::{StateHandler, StateId, StateMachineError, TransitionTable};
use log::{info, warn};
use nalgebra::Point3;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VehicleState {
    Init,
    SensorInit,
    MapInit,
    LocalizationInit,
    PlanningInit,
    VehicleInit,
    VehicleReady,
    BatteryCharging,
    VehicleEmergency,
}

impl StateId for VehicleState {
    const ALL: &'static [Self] = &[
        VehicleState::Init,
        VehicleState::SensorInit,
        VehicleState::MapInit,
        VehicleState::LocalizationInit,
        VehicleState::PlanningInit,
        VehicleState::VehicleInit,
        VehicleState::VehicleReady,
        VehicleState::BatteryCharging,
        VehicleState::VehicleEmergency,
    ];

    fn name(self) -> &'static str {
        match self {
            VehicleState::Init => "Init",
            VehicleState::SensorInit => "SensorInit",
            VehicleState::MapInit => "MapInit",
            VehicleState::LocalizationInit => "LocalizationInit",
            VehicleState::PlanningInit => "PlanningInit",
            VehicleState::VehicleInit => "VehicleInit",
            VehicleState::VehicleReady => "VehicleReady",
            VehicleState::BatteryCharging => "BatteryCharging",
            VehicleState::VehicleEmergency => "VehicleEmergency",
        }
    }
}

pub fn vehicle_table() -> Result<TransitionTable<VehicleState>, StateMachineError> {
    use VehicleState::*;
    TransitionTable::builder("vehicle")
        .states(VehicleState::ALL)
        .initial(super::START_TRIGGER, Init)
        .transition(Init, "init_start", SensorInit)
        .transition(SensorInit, "sensor_is_ready", MapInit)
        .transition(MapInit, "map_is_ready", LocalizationInit)
        .transition(LocalizationInit, "localization_is_ready", PlanningInit)
        .transition(PlanningInit, "planning_is_ready", VehicleInit)
        .transition(VehicleInit, "vehicle_is_ready", VehicleReady)
        .transition(VehicleReady, "charging_start", BatteryCharging)
        .transition(BatteryCharging, "charging_end", VehicleReady)
        .transitions(
            &[
                Init,
                SensorInit,
                MapInit,
                LocalizationInit,
                PlanningInit,
                VehicleInit,
                VehicleReady,
                BatteryCharging,
            ],
            "emergency",
            VehicleEmergency,
        )
        .transition(VehicleEmergency, "return_from_emergency", Init)
        .build()
}

pub struct VehicleEnv<'a> {
    pub config: &'a DecisionConfig,
    pub flags: &'a EventFlags,
    pub world: &'a WorldSnapshot,
    pub events: &'a mut Channel<VehicleEvent>,
    pub now: Duration,
}

#[derive(Debug)]
pub struct VehicleLogic {
    last_position: Option<Point3<f64>>,
    displacements: VecDeque<f64>,
    sensor_warning: Throttle,
    map_warning: Throttle,
}

impl Default for VehicleLogic {
    fn default() -> Self {
        VehicleLogic {
            last_position: None,
            displacements: VecDeque::new(),
            sensor_warning: Throttle::new(Duration::from_secs(5)),
            map_warning: Throttle::new(Duration::from_secs(2)),
        }
    }
}

impl VehicleLogic {
    /// Feeds the latest pose into the displacement window and reports whether
    /// the pose has settled.
    fn localization_converged(&mut self, env: &VehicleEnv) -> bool {
        let Some(pose) = env.world.sensors().pose else {
            return false;
        };
        if let Some(last) = self.last_position {
            self.displacements.push_back(distance(&last, &pose.position));
            while self.displacements.len() > env.config.convergence_count {
                self.displacements.pop_front();
            }
        }
        self.last_position = Some(pose.position);

        if self.displacements.is_empty() || self.displacements.len() < env.config.convergence_count {
            return false;
        }
        let average = self.displacements.iter().sum::<f64>() / self.displacements.len() as f64;
        average <= env.config.convergence_threshold
    }
}

impl<'a> StateHandler<VehicleState, VehicleEnv<'a>> for VehicleLogic {
    fn on_entry(&mut self, state: VehicleState, env: &mut VehicleEnv<'a>) -> Option<&'static str> {
        match state {
            VehicleState::LocalizationInit => {
                self.last_position = None;
                self.displacements.clear();
            }
            VehicleState::VehicleReady => env.events.push(VehicleEvent::Ready),
            VehicleState::VehicleEmergency => {
                warn!("vehicle emergency");
                env.events.push(VehicleEvent::Emergency);
            }
            _ => {}
        }
        None
    }

    fn on_update(&mut self, state: VehicleState, env: &mut VehicleEnv<'a>) -> Option<&'static str> {
        match state {
            VehicleState::Init => Some("init_start"),
            VehicleState::SensorInit => {
                if env.config.sim_mode || env.flags.is_set(EventFlag::ReceivedPointcloudForNdt) {
                    return Some("sensor_is_ready");
                }
                if self.sensor_warning.ready(env.now) {
                    warn!("waiting for filtered points");
                }
                None
            }
            VehicleState::MapInit => {
                if env.config.disable_map || env.flags.map_loaded() {
                    return Some("map_is_ready");
                }
                if self.map_warning.ready(env.now) {
                    warn!("waiting for {} map", env.config.map_backend);
                }
                None
            }
            VehicleState::LocalizationInit => {
                if self.localization_converged(env) {
                    info!("localization converged");
                    Some("localization_is_ready")
                } else {
                    None
                }
            }
            VehicleState::PlanningInit => Some("planning_is_ready"),
            VehicleState::VehicleInit => Some("vehicle_is_ready"),
            _ => None,
        }
    }

    fn on_exit(&mut self, state: VehicleState, env: &mut VehicleEnv<'a>) {
        if state == VehicleState::VehicleEmergency {
            info!("vehicle recovered from emergency");
            env.events.push(VehicleEvent::Recovered);
        }
    }
}

pub type VehicleContext = Context<VehicleState, VehicleLogic>;

impl Context<VehicleState, VehicleLogic> {
    pub fn build() -> Result<Self, StateMachineError> {
        Ok(Context::new(vehicle_table()?, VehicleLogic::default()))
    }

    pub fn step(&mut self, env: &mut VehicleEnv) {
        self.tick(env);
    }
}
