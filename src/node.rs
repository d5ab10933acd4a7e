// node.rs

// The decision maker node: owns the world snapshot, the flag store, the map
// backend and the four contexts. Its owner feeds it inbound messages, ticks it
// at a fixed rate and drains the outbound messages it produced.
//
// One message or one tick is processed at a time. Ticks run the contexts in a
// fixed order: vehicle, mission, behavior, motion.

use crate::contexts::{
    BehaviorContext, BehaviorEnv, Channel, MissionContext, MissionEnv, MotionContext, MotionEnv,
    VehicleContext, VehicleEnv,
};
use crate::contexts::{BehaviorEvent, MissionEvent, MotionEvent, VehicleEvent};
use crate::core::flags::EventFlags;
use crate::core::snapshot::WorldSnapshot;
use crate::interface::{Inbound, Outbound, Publisher, StateMessage, Subscriber};
use crate::map::{MapBackend, MapData};
use crate::state_machine::StateId;
use crate::{DecisionConfig, DecisionError};
use log::{error, info, warn};
use std::time::Duration;

pub struct DecisionMakerNode {
    config: DecisionConfig,
    flags: EventFlags,
    world: WorldSnapshot,
    map: Option<Box<dyn MapBackend>>,
    subscriber: Subscriber,
    publisher: Publisher,

    vehicle: VehicleContext,
    mission: MissionContext,
    behavior: BehaviorContext,
    motion: MotionContext,

    vehicle_events: Channel<VehicleEvent>,
    mission_events: Channel<MissionEvent>,
    behavior_events: Channel<BehaviorEvent>,
    motion_feedback: Channel<MotionEvent>,

    now: Duration,
    last_state: Option<StateMessage>,
}

impl DecisionMakerNode {
    /// Builds the contexts and starts them. A map backend given here counts as
    /// loaded before the first tick.
    pub fn new(
        config: DecisionConfig,
        map: Option<Box<dyn MapBackend>>,
    ) -> Result<Self, DecisionError> {
        let mut node = DecisionMakerNode {
            config,
            flags: EventFlags::new(),
            world: WorldSnapshot::new(),
            map: None,
            subscriber: Subscriber::new(),
            publisher: Publisher::new(),
            vehicle: VehicleContext::build()?,
            mission: MissionContext::build()?,
            behavior: BehaviorContext::build()?,
            motion: MotionContext::build()?,
            vehicle_events: Channel::new(),
            mission_events: Channel::new(),
            behavior_events: Channel::new(),
            motion_feedback: Channel::new(),
            now: Duration::ZERO,
            last_state: None,
        };
        if let Some(map) = map {
            node.install_map(map);
        }
        node.start();
        Ok(node)
    }

    fn start(&mut self) {
        self.vehicle.start(&mut VehicleEnv {
            config: &self.config,
            flags: &self.flags,
            world: &self.world,
            events: &mut self.vehicle_events,
            now: self.now,
        });
        self.mission.start(&mut MissionEnv {
            config: &self.config,
            flags: &mut self.flags,
            world: &mut self.world,
            map: self.map.as_deref_mut(),
            publisher: &mut self.publisher,
            vehicle_events: &mut self.vehicle_events,
            motion_events: &mut self.motion_feedback,
            events: &mut self.mission_events,
            now: self.now,
        });
        self.behavior.start(&mut BehaviorEnv {
            config: &self.config,
            world: &self.world,
            publisher: &mut self.publisher,
            mission_events: &mut self.mission_events,
            events: &mut self.behavior_events,
        });
        self.motion.start(&mut MotionEnv {
            config: &self.config,
            world: &mut self.world,
            publisher: &mut self.publisher,
            behavior_events: &mut self.behavior_events,
            feedback: &mut self.motion_feedback,
            now: self.now,
        });
        self.publish_state_if_changed();
    }

    fn install_map(&mut self, map: Box<dyn MapBackend>) {
        let kind = map.kind();
        if kind != self.config.map_backend {
            warn!(
                "installed {} map while configured for {}",
                kind, self.config.map_backend
            );
        }
        info!("{} map installed", kind);
        self.flags.set(kind.loaded_flag(), true);
        self.map = Some(map);
    }

    /// Applies one inbound message. Only map data can fail; the previous map
    /// stays installed in that case.
    pub fn handle(&mut self, message: Inbound) -> Result<(), DecisionError> {
        match message {
            Inbound::CurrentPose(pose) => {
                self.subscriber
                    .on_current_pose(&mut self.world, &mut self.flags, pose)
            }
            Inbound::CurrentVelocity(twist) => {
                self.subscriber.on_current_velocity(&mut self.world, twist)
            }
            Inbound::LaneArray(lanes) => {
                self.subscriber
                    .on_lane_array(&mut self.world, &mut self.flags, lanes)
            }
            Inbound::FinalWaypoints(lane) => {
                self.subscriber
                    .on_final_waypoints(&mut self.world, &mut self.flags, lane)
            }
            Inbound::ClosestWaypoint(raw) => self.subscriber.on_closest_waypoint(&mut self.world, raw),
            Inbound::ObstacleWaypoint(raw) => {
                self.subscriber.on_obstacle_waypoint(&mut self.world, raw)
            }
            Inbound::StoplineWaypoint(raw) => {
                self.subscriber.on_stopline_waypoint(&mut self.world, raw)
            }
            Inbound::LaneChangeFlag(raw) => {
                self.subscriber.on_lane_change_flag(&mut self.world, raw)
            }
            Inbound::StopOrder(gid) => {
                self.subscriber
                    .on_stop_order(&mut self.world, &mut self.publisher, gid)
            }
            Inbound::StateCmd(trigger) => {
                self.state_cmd(trigger.trim());
            }
            Inbound::Config(config) => {
                info!("configuration updated");
                self.config = config;
            }
            Inbound::FilteredPoints => self.subscriber.on_filtered_points(&mut self.flags),
            Inbound::Map(data) => self.load_map(data)?,
        }
        Ok(())
    }

    pub fn load_map(&mut self, data: MapData) -> Result<(), DecisionError> {
        match data.into_backend() {
            Ok(map) => {
                self.install_map(map);
                Ok(())
            }
            Err(e) => {
                error!("map rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Fires an operator trigger in every context that has an edge for it.
    /// Returns whether any context moved.
    pub fn state_cmd(&mut self, trigger: &str) -> bool {
        let mut fired = false;
        if self.vehicle.accepts(trigger) {
            fired |= self.vehicle.try_next_state(
                trigger,
                &mut VehicleEnv {
                    config: &self.config,
                    flags: &self.flags,
                    world: &self.world,
                    events: &mut self.vehicle_events,
                    now: self.now,
                },
            );
        }
        if self.mission.accepts(trigger) {
            fired |= self.mission.try_next_state(
                trigger,
                &mut MissionEnv {
                    config: &self.config,
                    flags: &mut self.flags,
                    world: &mut self.world,
                    map: self.map.as_deref_mut(),
                    publisher: &mut self.publisher,
                    vehicle_events: &mut self.vehicle_events,
                    motion_events: &mut self.motion_feedback,
                    events: &mut self.mission_events,
                    now: self.now,
                },
            );
        }
        if self.behavior.accepts(trigger) {
            fired |= self.behavior.try_next_state(
                trigger,
                &mut BehaviorEnv {
                    config: &self.config,
                    world: &self.world,
                    publisher: &mut self.publisher,
                    mission_events: &mut self.mission_events,
                    events: &mut self.behavior_events,
                },
            );
        }
        if self.motion.accepts(trigger) {
            fired |= self.motion.try_next_state(
                trigger,
                &mut MotionEnv {
                    config: &self.config,
                    world: &mut self.world,
                    publisher: &mut self.publisher,
                    behavior_events: &mut self.behavior_events,
                    feedback: &mut self.motion_feedback,
                    now: self.now,
                },
            );
        }

        if fired {
            self.publish_state_if_changed();
        } else {
            warn!("state command {:?} matches no transition", trigger);
        }
        fired
    }

    /// Advances the node clock to `now` and steps every context once.
    pub fn tick(&mut self, now: Duration) {
        self.now = now;
        self.vehicle.step(&mut VehicleEnv {
            config: &self.config,
            flags: &self.flags,
            world: &self.world,
            events: &mut self.vehicle_events,
            now,
        });
        self.mission.step(&mut MissionEnv {
            config: &self.config,
            flags: &mut self.flags,
            world: &mut self.world,
            map: self.map.as_deref_mut(),
            publisher: &mut self.publisher,
            vehicle_events: &mut self.vehicle_events,
            motion_events: &mut self.motion_feedback,
            events: &mut self.mission_events,
            now,
        });
        self.behavior.step(&mut BehaviorEnv {
            config: &self.config,
            world: &self.world,
            publisher: &mut self.publisher,
            mission_events: &mut self.mission_events,
            events: &mut self.behavior_events,
        });
        self.motion.step(&mut MotionEnv {
            config: &self.config,
            world: &mut self.world,
            publisher: &mut self.publisher,
            behavior_events: &mut self.behavior_events,
            feedback: &mut self.motion_feedback,
            now,
        });
        self.publish_state_if_changed();
    }

    pub fn state(&self) -> StateMessage {
        StateMessage {
            vehicle: self.vehicle.state_name().to_string(),
            mission: self.mission.state_name().to_string(),
            behavior: self.behavior.state_name().to_string(),
            motion: self.motion.state_name().to_string(),
        }
    }

    /// One line per available edge: `context: trigger -> target`.
    pub fn available_transitions(&self) -> String {
        fn lines<S: StateId>(context: &str, edges: Vec<(&'static str, S)>) -> Vec<String> {
            edges
                .into_iter()
                .map(|(trigger, target)| format!("{}: {} -> {}", context, trigger, target.name()))
                .collect()
        }
        let mut all = lines(self.vehicle.name(), self.vehicle.available_triggers());
        all.extend(lines(self.mission.name(), self.mission.available_triggers()));
        all.extend(lines(self.behavior.name(), self.behavior.available_triggers()));
        all.extend(lines(self.motion.name(), self.motion.available_triggers()));
        all.join("\n")
    }

    fn publish_state_if_changed(&mut self) {
        let state = self.state();
        if self.last_state.as_ref() == Some(&state) {
            return;
        }
        self.publisher.publish_state(state.clone());
        let transitions = self.available_transitions();
        self.publisher.publish_available_transitions(transitions);
        self.last_state = Some(state);
    }

    /// Everything published since the last drain, oldest first.
    pub fn drain_outputs(&mut self) -> Vec<Outbound> {
        self.publisher.drain()
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn flags(&self) -> &EventFlags {
        &self.flags
    }

    pub fn world(&self) -> &WorldSnapshot {
        &self.world
    }

    pub fn has_map(&self) -> bool {
        self.map.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flags::EventFlag;
    use crate::map::{MapBackendKind, MockMapBackend};

    #[test]
    fn test_new_node_publishes_initial_state() {
        let mut node = DecisionMakerNode::new(DecisionConfig::default(), None).unwrap();
        let state = node.state();
        assert_eq!(state.vehicle, "Init");
        assert_eq!(state.mission, "MissionInit");
        assert_eq!(state.behavior, "Stopping");
        assert_eq!(state.motion, "WaitDriveReady");

        let out = node.drain_outputs();
        assert!(matches!(&out[0], Outbound::StateName(name) if name.starts_with("Init\n")));
        assert!(matches!(&out[2], Outbound::AvailableTransitions(text)
            if text.contains("vehicle: init_start -> SensorInit")));
    }

    #[test]
    fn test_state_published_only_on_change() {
        let mut node = DecisionMakerNode::new(DecisionConfig::default(), None).unwrap();
        node.drain_outputs();

        node.tick(Duration::from_millis(100));
        assert_eq!(node.drain_outputs().len(), 3);

        // Waiting in SensorInit: nothing new.
        node.tick(Duration::from_millis(200));
        assert!(node.drain_outputs().is_empty());
    }

    #[test]
    fn test_map_at_construction_sets_flag() {
        let mut map = MockMapBackend::new();
        map.expect_kind().return_const(MapBackendKind::Lanelet2);
        let node = DecisionMakerNode::new(DecisionConfig::default(), Some(Box::new(map))).unwrap();
        assert!(node.flags().is_set(EventFlag::Lanelet2MapLoaded));
        assert!(node.has_map());
    }

    #[test]
    fn test_state_cmd_reaches_every_context() {
        let mut node = DecisionMakerNode::new(DecisionConfig::default(), None).unwrap();
        assert!(node.state_cmd("emergency"));
        let state = node.state();
        assert_eq!(state.vehicle, "VehicleEmergency");
        assert_eq!(state.behavior, "BehaviorEmergency");
        assert_eq!(state.motion, "MotionEmergency");
        assert_eq!(state.mission, "MissionInit");

        assert!(!node.state_cmd("no_such_trigger"));
    }

    #[test]
    fn test_config_message_replaces_config() {
        let mut node = DecisionMakerNode::new(DecisionConfig::default(), None).unwrap();
        let config = DecisionConfig {
            auto_engage: true,
            ..DecisionConfig::default()
        };
        node.handle(Inbound::Config(config.clone())).unwrap();
        assert_eq!(node.config(), &config);
    }
}
