// End-to-end scenarios through the node: inbound messages in, ticks, outbound
// messages out.

use decision_maker::core::geometry::Pose;
use decision_maker::core::waypoint::{Lane, LaneArray, StopState, Waypoint};
use decision_maker::interface::{Inbound, Outbound, Twist};
use decision_maker::map::MapData;
use decision_maker::{DecisionConfig, DecisionMakerNode, EventFlag, MapBackendKind};
use rstest::rstest;
use std::time::Duration;

const VECTOR_MAP: &str = r#"
format: vector_map
points:
  - { pid: 1, x: 30.0, y: 3.0 }
  - { pid: 2, x: 30.0, y: -3.0 }
lines:
  - { lid: 1, bpid: 1, fpid: 2 }
stop_lines:
  - { id: 1, lid: 1, signid: 1 }
road_signs:
  - { id: 1, sign_type: stopline }
"#;

const LANELET2_MAP: &str = r#"
format: lanelet2
points:
  - { id: 1, x: -5.0, y: 2.0 }
  - { id: 2, x: 120.0, y: 2.0 }
  - { id: 3, x: -5.0, y: -2.0 }
  - { id: 4, x: 120.0, y: -2.0 }
line_strings:
  - { id: 10, points: [1, 2] }
  - { id: 11, points: [3, 4] }
lanelets:
  - { id: 100, left_bound: 10, right_bound: 11 }
"#;

fn route(id: i32, n: i32, y: f64) -> LaneArray {
    LaneArray {
        id,
        lanes: vec![Lane::new(
            (0..n)
                .map(|x| Waypoint::new(Pose::new(x as f64, y, 0.0, 0.0), 5.0))
                .collect(),
        )],
    }
}

/// Drives a node the way the surrounding stack would: the lane selector feeds
/// the local path cut from the accepted mission at the closest waypoint.
struct Sim {
    node: DecisionMakerNode,
    now: Duration,
    closest: i32,
    outputs: Vec<Outbound>,
}

impl Sim {
    fn new(config: DecisionConfig, map: Option<&str>) -> Self {
        let map = map.map(|yaml| {
            let data: MapData = serde_yaml::from_str(yaml).unwrap();
            data.into_backend().unwrap()
        });
        Sim {
            node: DecisionMakerNode::new(config, map).unwrap(),
            now: Duration::ZERO,
            closest: 0,
            outputs: Vec::new(),
        }
    }

    fn send(&mut self, message: Inbound) {
        self.node.handle(message).unwrap();
    }

    /// Vehicle on the x axis at waypoint `gid`.
    fn place(&mut self, gid: i32, velocity: f64) {
        self.closest = gid;
        self.send(Inbound::CurrentPose(Pose::new(gid as f64, 0.0, 0.0, 0.0)));
        self.send(Inbound::CurrentVelocity(Twist {
            linear: velocity,
            angular: 0.0,
        }));
        self.send(Inbound::ClosestWaypoint(gid));
    }

    fn feed_path(&mut self) {
        let Some(lanes) = self.node.world().mission().using_lane_array.clone() else {
            return;
        };
        let path: Vec<Waypoint> = lanes
            .waypoints()
            .skip_while(|wp| wp.gid < self.closest)
            .take(60)
            .cloned()
            .collect();
        self.send(Inbound::FinalWaypoints(Lane::new(path)));
    }

    fn tick(&mut self) {
        self.now += Duration::from_millis(100);
        self.feed_path();
        self.node.tick(self.now);
        self.outputs.extend(self.node.drain_outputs());
    }

    fn run_until(&mut self, max_ticks: usize, done: impl Fn(&DecisionMakerNode) -> bool) -> bool {
        for _ in 0..max_ticks {
            if done(&self.node) {
                return true;
            }
            self.tick();
        }
        done(&self.node)
    }

    fn help_texts(&self) -> Vec<&str> {
        self.outputs
            .iter()
            .filter_map(|out| match out {
                Outbound::OperatorHelp(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn using_id(&self) -> Option<i32> {
        self.node
            .world()
            .mission()
            .using_lane_array
            .as_ref()
            .map(|lanes| lanes.id)
    }
}

fn sim_config() -> DecisionConfig {
    DecisionConfig {
        sim_mode: true,
        auto_engage: true,
        ..DecisionConfig::default()
    }
}

#[test]
fn test_drive_through_stopline_to_goal() {
    let mut sim = Sim::new(sim_config(), Some(VECTOR_MAP));
    sim.place(0, 5.0);
    sim.send(Inbound::LaneArray(route(7, 100, 0.0)));

    assert!(sim.run_until(60, |n| n.state().mission == "Driving"));
    let published = sim.outputs.iter().find_map(|out| match out {
        Outbound::LaneArray(lanes) => Some(lanes.clone()),
        _ => None,
    });
    let published = published.expect("accepted mission is published");
    assert_eq!(published.id, 7);
    let stops: Vec<i32> = published
        .waypoints()
        .filter(|wp| wp.state.stop_state == StopState::Stopline)
        .map(|wp| wp.gid)
        .collect();
    assert_eq!(stops, vec![30]);

    assert!(sim.run_until(5, |n| n.state().motion == "StopLine"));

    // Stopped two waypoints short of the line, as reported by the planner.
    sim.place(28, 0.0);
    sim.send(Inbound::StoplineWaypoint(2));
    assert!(sim.run_until(10, |n| n.state().motion == "Go"));
    assert!(sim.outputs.contains(&Outbound::StoplineWaypoint(30)));
    assert_eq!(sim.node.world().stops().prev_stopped_wpidx, Some(30));

    sim.place(29, 5.0);
    sim.send(Inbound::StoplineWaypoint(-1));
    for _ in 0..5 {
        sim.tick();
        assert_eq!(sim.node.state().motion, "Go");
    }

    sim.place(99, 0.0);
    assert!(sim.run_until(5, |n| n.state().mission == "WaitOrder"));
    let state = sim.node.state();
    assert_eq!(state.behavior, "Stopping");
    assert_eq!(state.motion, "WaitDriveReady");
    assert!(sim.help_texts().contains(&"Mission complete."));
}

#[test]
fn test_rejected_mission_keeps_current_one() {
    let config = DecisionConfig {
        sim_mode: true,
        disable_map: true,
        ..DecisionConfig::default()
    };
    let mut sim = Sim::new(config, None);
    sim.place(0, 0.0);
    sim.send(Inbound::LaneArray(route(1, 50, 0.0)));
    assert!(sim.run_until(60, |n| n.state().mission == "DriveReady"));

    // Parallel route three metres to the side: too far away.
    sim.send(Inbound::LaneArray(route(2, 50, 3.0)));
    assert!(sim.run_until(5, |n| n.state().mission == "WaitOrder"));
    assert_eq!(sim.using_id(), Some(1));
    assert!(
        sim.help_texts()
            .iter()
            .any(|text| text.starts_with("Mission rejected"))
    );
    assert_eq!(sim.node.world().mission().accepted_missions, 1);
}

#[test]
fn test_operator_stop_order() {
    let config = DecisionConfig {
        disable_map: true,
        ..sim_config()
    };
    let mut sim = Sim::new(config, None);
    sim.place(0, 5.0);
    sim.send(Inbound::LaneArray(route(1, 100, 0.0)));
    assert!(sim.run_until(60, |n| n.state().motion == "Go"));

    sim.send(Inbound::StopOrder(25));
    assert_eq!(sim.node.world().ordered_stop_idx(), Some(25));
    assert!(sim.run_until(5, |n| n.state().motion == "OrderedStop"));
    sim.tick();
    assert!(sim.outputs.contains(&Outbound::StoplineWaypoint(25)));

    sim.send(Inbound::StateCmd("clear".to_string()));
    assert_eq!(sim.node.state().motion, "Go");
    assert_eq!(sim.node.world().ordered_stop_idx(), None);

    for _ in 0..5 {
        sim.tick();
        assert_eq!(sim.node.state().motion, "Go");
    }
}

#[test]
fn test_emergency_recovery_resumes_driving() {
    let config = DecisionConfig {
        disable_map: true,
        ..sim_config()
    };
    let mut sim = Sim::new(config, None);
    sim.place(0, 5.0);
    sim.send(Inbound::LaneArray(route(1, 100, 0.0)));
    assert!(sim.run_until(60, |n| n.state().motion == "Go"));

    sim.send(Inbound::StateCmd("emergency".to_string()));
    let state = sim.node.state();
    assert_eq!(state.vehicle, "VehicleEmergency");
    assert_eq!(state.behavior, "BehaviorEmergency");
    assert_eq!(state.motion, "MotionEmergency");
    sim.tick();

    sim.send(Inbound::StateCmd("return_from_emergency".to_string()));
    assert!(sim.run_until(60, |n| n.state().motion == "Go"));
    let state = sim.node.state();
    assert_eq!(state.vehicle, "VehicleReady");
    assert_eq!(state.mission, "Driving");
    assert_ne!(state.behavior, "Stopping");

    // The goal checks run again, so the mission can complete.
    sim.place(99, 0.0);
    assert!(sim.run_until(5, |n| n.state().mission == "WaitOrder"));
    assert_eq!(sim.node.state().motion, "WaitDriveReady");
}

#[test]
fn test_stop_order_outside_mission_is_rejected() {
    let config = DecisionConfig {
        disable_map: true,
        ..sim_config()
    };
    let mut sim = Sim::new(config, None);
    sim.place(10, 0.0);
    sim.send(Inbound::LaneArray(route(1, 100, 0.0)));
    assert!(sim.run_until(60, |n| n.world().mission().using_lane_array.is_some()));

    sim.send(Inbound::StopOrder(5));
    sim.outputs.extend(sim.node.drain_outputs());
    let location = sim.outputs.iter().rev().find_map(|out| match out {
        Outbound::StopLocation(location) => Some(*location),
        _ => None,
    });
    assert_eq!(location.map(|l| l.waypoint_index), Some(-1));
    assert_eq!(sim.node.world().ordered_stop_idx(), None);
}

#[test]
fn test_lanelet2_map_arrives_at_runtime() {
    let config = DecisionConfig {
        map_backend: MapBackendKind::Lanelet2,
        ..sim_config()
    };
    let mut sim = Sim::new(config, None);
    sim.place(0, 0.0);
    for _ in 0..10 {
        sim.tick();
    }
    assert_eq!(sim.node.state().vehicle, "MapInit");

    let data: MapData = serde_yaml::from_str(LANELET2_MAP).unwrap();
    sim.send(Inbound::Map(data));
    assert!(sim.node.flags().is_set(EventFlag::Lanelet2MapLoaded));
    assert!(sim.run_until(30, |n| n.state().vehicle == "VehicleReady"));

    sim.send(Inbound::LaneArray(route(3, 100, 0.0)));
    assert!(sim.run_until(10, |n| n.state().mission == "Driving"));
    assert_eq!(sim.using_id(), Some(3));
}

#[test]
fn test_broken_map_is_reported() {
    let mut node = DecisionMakerNode::new(DecisionConfig::default(), None).unwrap();
    let data: MapData = serde_yaml::from_str(
        "format: vector_map\ncross_roads:\n  - { id: 1, aid: 99 }\n",
    )
    .unwrap();
    assert!(node.handle(Inbound::Map(data)).is_err());
    assert!(!node.has_map());
    assert!(!node.flags().map_loaded());
}

#[rstest]
#[case("init_start", true, "SensorInit")]
#[case("emergency", true, "VehicleEmergency")]
#[case("charging_start", false, "Init")]
#[case("engage", false, "Init")]
fn test_state_cmd_on_fresh_node(
    #[case] trigger: &str,
    #[case] moved: bool,
    #[case] vehicle: &str,
) {
    let mut node = DecisionMakerNode::new(DecisionConfig::default(), None).unwrap();
    assert_eq!(node.state_cmd(trigger), moved);
    assert_eq!(node.state().vehicle, vehicle);
}

#[test]
fn test_state_output_format() {
    let mut node = DecisionMakerNode::new(DecisionConfig::default(), None).unwrap();
    let out = node.drain_outputs();
    assert_eq!(
        out[0],
        Outbound::StateName("Init\nMissionInit\nStopping\nWaitDriveReady".to_string())
    );
    let Outbound::AvailableTransitions(text) = &out[2] else {
        panic!("expected available transitions, got {:?}", out[2]);
    };
    assert!(text.contains("motion: drive_ready -> WaitEngage"));
    assert!(text.contains("behavior: operation_start -> Cruise"));
}
