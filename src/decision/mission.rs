// decision/mission.rs

// Mission validation. A received lane array is reset, re-indexed, annotated
// through the map backend and then accepted only if the vehicle is close to and
// aligned with it. Validation works on the caller's copy; nothing is adopted
// here.

use super::annotate::{default_straight, mark_goals, reset_annotations};
use crate::DecisionConfig;
use crate::core::flags::{EventFlag, EventFlags};
use crate::core::geometry::{Pose, distance, yaw_diff_deg};
use crate::core::waypoint::LaneArray;
use crate::map::{AnnotationPolicy, MapBackend};
use log::{info, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum MissionVerdict {
    Accepted,
    Rejected { reason: String },
    /// Not enough data to decide yet.
    Deferred { reason: String },
}

impl MissionVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MissionVerdict::Accepted)
    }
}

/// Validates `lanes` in place against the current pose.
///
/// On return the array carries fresh annotations and contiguous gids/lids,
/// whatever the verdict. `received_back_state_waypoint` is raised when the
/// route contains reverse segments.
pub fn check_mission(
    lanes: &mut LaneArray,
    pose: Option<&Pose>,
    map: Option<&mut (dyn MapBackend + '_)>,
    config: &DecisionConfig,
    flags: &mut EventFlags,
) -> MissionVerdict {
    let Some(pose) = pose else {
        return MissionVerdict::Deferred {
            reason: "current pose not received".to_string(),
        };
    };
    if lanes.is_empty() {
        return MissionVerdict::Deferred {
            reason: "mission has no waypoints".to_string(),
        };
    }

    reset_annotations(lanes);
    lanes.reindex();
    let reverse = lanes.waypoints().any(|wp| wp.velocity < 0.0);
    flags.set(EventFlag::ReceivedBackStateWaypoint, reverse);

    let policy = AnnotationPolicy::from(config);
    match map {
        Some(map) => map.annotate(lanes, &policy),
        None => {
            warn!("no map backend installed; annotating goal markers only");
            default_straight(lanes);
            mark_goals(lanes, policy.goal_marker_count);
        }
    }
    lanes.reindex();

    let Some((min_dist, nearest)) = lanes
        .waypoints()
        .map(|wp| (distance(&pose.position, &wp.pose.position), wp.pose))
        .min_by(|a, b| a.0.total_cmp(&b.0))
    else {
        return MissionVerdict::Deferred {
            reason: "mission has no waypoints".to_string(),
        };
    };
    let angle_diff = yaw_diff_deg(pose, &nearest).abs();

    if min_dist > config.change_distance_threshold {
        return MissionVerdict::Rejected {
            reason: format!(
                "nearest waypoint is {:.2} m away (limit {:.2} m)",
                min_dist, config.change_distance_threshold
            ),
        };
    }
    if angle_diff > config.change_angle_threshold {
        return MissionVerdict::Rejected {
            reason: format!(
                "heading differs by {:.1} deg from the nearest waypoint (limit {:.1} deg)",
                angle_diff, config.change_angle_threshold
            ),
        };
    }

    info!(
        "mission {} accepted: nearest waypoint {:.2} m, heading diff {:.1} deg",
        lanes.id, min_dist, angle_diff
    );
    MissionVerdict::Accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::waypoint::{EventState, Lane, SteeringState, StopState, Waypoint};
    use crate::map::{MapBackendKind, MapData, MockMapBackend};
    use rstest::rstest;

    // A cross road spanning x 10..20 and a diagonal stopline crossing the x
    // axis at x = 6.
    const VECTOR_MAP: &str = r#"
format: vector_map
points:
  - { pid: 1, x: 10.0, y: -5.0 }
  - { pid: 2, x: 20.0, y: -5.0 }
  - { pid: 3, x: 20.0, y: 5.0 }
  - { pid: 4, x: 10.0, y: 5.0 }
  - { pid: 5, x: 5.0, y: 3.0 }
  - { pid: 6, x: 7.0, y: -3.0 }
lines:
  - { lid: 1, bpid: 1, fpid: 2 }
  - { lid: 2, bpid: 2, fpid: 3 }
  - { lid: 3, bpid: 3, fpid: 4 }
  - { lid: 4, bpid: 4, fpid: 1 }
  - { lid: 5, bpid: 5, fpid: 6 }
areas:
  - { aid: 7, slid: 1, elid: 4 }
cross_roads:
  - { id: 1, aid: 7 }
stop_lines:
  - { id: 1, lid: 5, signid: 1 }
road_signs:
  - { id: 1, sign_type: stopline }
"#;

    // A straight lanelet with a stop sign on the same diagonal line, and a
    // left-turn lanelet overlapping its start.
    const LANELET2_MAP: &str = r#"
format: lanelet2
points:
  - { id: 1, x: -2.0, y: 2.0 }
  - { id: 2, x: 40.0, y: 2.0 }
  - { id: 3, x: -2.0, y: -2.0 }
  - { id: 4, x: 40.0, y: -2.0 }
  - { id: 5, x: 5.0, y: 3.0 }
  - { id: 6, x: 7.0, y: -3.0 }
  - { id: 7, x: 0.0, y: 2.5 }
  - { id: 8, x: 10.0, y: 6.0 }
  - { id: 9, x: 0.0, y: -2.5 }
  - { id: 10, x: 13.0, y: 3.0 }
line_strings:
  - { id: 20, points: [1, 2] }
  - { id: 21, points: [3, 4] }
  - { id: 22, points: [5, 6] }
  - { id: 23, points: [7, 8] }
  - { id: 24, points: [9, 10] }
lanelets:
  - { id: 200, left_bound: 23, right_bound: 24, turn_direction: left }
  - { id: 100, left_bound: 20, right_bound: 21, regulatory_elements: [300] }
traffic_signs:
  - { id: 300, sign_type: stop_sign, ref_lines: [22] }
"#;

    fn route(n: usize) -> LaneArray {
        LaneArray {
            id: 5,
            lanes: vec![
                Lane::new(
                    (0..n)
                        .map(|i| Waypoint::new(Pose::new(i as f64, 0.0, 0.0, 0.0), 5.0))
                        .collect(),
                ),
                Lane::new(
                    (0..n)
                        .map(|i| Waypoint::new(Pose::new(i as f64, 3.5, 0.0, 0.0), 5.0))
                        .collect(),
                ),
            ],
        }
    }

    #[test]
    fn test_deferred_without_pose() {
        let mut lanes = route(5);
        let verdict = check_mission(
            &mut lanes,
            None,
            None,
            &DecisionConfig::default(),
            &mut EventFlags::new(),
        );
        assert!(matches!(verdict, MissionVerdict::Deferred { .. }));
    }

    #[test]
    fn test_deferred_on_empty_route() {
        let mut lanes = LaneArray::default();
        let pose = Pose::default();
        let verdict = check_mission(
            &mut lanes,
            Some(&pose),
            None,
            &DecisionConfig::default(),
            &mut EventFlags::new(),
        );
        assert!(matches!(verdict, MissionVerdict::Deferred { .. }));
    }

    #[test]
    fn test_annotations_reset_and_reindexed() {
        let mut lanes = route(6);
        for wp in lanes.waypoints_mut() {
            wp.gid = 99;
            wp.state.stop_state = StopState::Stop;
            wp.state.steering_state = SteeringState::Left;
            wp.state.area_id = 4;
        }
        let pose = Pose::new(0.2, 0.0, 0.0, 0.0);
        let verdict = check_mission(
            &mut lanes,
            Some(&pose),
            None,
            &DecisionConfig::default(),
            &mut EventFlags::new(),
        );
        assert!(verdict.is_accepted());

        let gids: Vec<i32> = lanes.waypoints().map(|wp| wp.gid).collect();
        assert_eq!(gids, (0..12).collect::<Vec<_>>());
        for lane in &lanes.lanes {
            let lids: Vec<i32> = lane.waypoints.iter().map(|wp| wp.lid).collect();
            assert_eq!(lids, (0..6).collect::<Vec<_>>());
        }
        assert!(lanes.waypoints().all(|wp| wp.state.stop_state == StopState::None
            && wp.state.area_id == 0
            && wp.state.steering_state == SteeringState::Straight));
        assert_eq!(lanes.lanes[0].waypoints[5].state.event_state, EventState::Goal);
    }

    #[rstest]
    // Exactly on the distance limit: accepted.
    #[case(1.0, 14.9, true)]
    #[case(1.01, 0.0, false)]
    #[case(0.0, 15.5, false)]
    #[case(0.5, -10.0, true)]
    fn test_acceptance_boundary(
        #[case] offset: f64,
        #[case] heading_deg: f64,
        #[case] accepted: bool,
    ) {
        let mut lanes = route(6);
        let pose = Pose::new(2.0, -offset, 0.0, heading_deg.to_radians());
        let verdict = check_mission(
            &mut lanes,
            Some(&pose),
            None,
            &DecisionConfig::default(),
            &mut EventFlags::new(),
        );
        assert_eq!(verdict.is_accepted(), accepted, "{:?}", verdict);
    }

    #[test]
    fn test_reverse_segment_raises_flag() {
        let mut lanes = route(4);
        lanes.lanes[1].waypoints[2].velocity = -1.0;
        let mut flags = EventFlags::new();
        let pose = Pose::default();
        check_mission(&mut lanes, Some(&pose), None, &DecisionConfig::default(), &mut flags);
        assert!(flags.is_set(EventFlag::ReceivedBackStateWaypoint));

        let mut forward = route(4);
        check_mission(&mut forward, Some(&pose), None, &DecisionConfig::default(), &mut flags);
        assert!(!flags.is_set(EventFlag::ReceivedBackStateWaypoint));
    }

    #[test]
    fn test_backend_annotates_and_insertions_are_reindexed() {
        let mut map = MockMapBackend::new();
        map.expect_kind().return_const(MapBackendKind::VectorMap);
        map.expect_annotate()
            .times(1)
            .returning(|lanes: &mut LaneArray, policy: &AnnotationPolicy| {
                assert!(policy.insert_stopline_waypoint);
                let mut extra = lanes.lanes[0].waypoints[1].clone();
                extra.pose.position.x = 1.5;
                extra.state.stop_state = StopState::Stopline;
                lanes.lanes[0].waypoints.insert(2, extra);
            });

        let mut lanes = route(4);
        let pose = Pose::default();
        let verdict = check_mission(
            &mut lanes,
            Some(&pose),
            Some(&mut map),
            &DecisionConfig::default(),
            &mut EventFlags::new(),
        );
        assert!(verdict.is_accepted());
        assert_eq!(lanes.lanes[0].len(), 5);
        assert_eq!(lanes.lanes[0].waypoints[2].gid, 2);
        assert_eq!(lanes.lanes[0].waypoints[2].state.stop_state, StopState::Stopline);
        assert_eq!(lanes.last_gid(), Some(8));
    }

    #[test]
    fn test_rejected_route_still_annotated() {
        let mut map = MockMapBackend::new();
        map.expect_annotate().times(1).return_const(());
        let mut lanes = route(4);
        let pose = Pose::new(50.0, 50.0, 0.0, 0.0);
        let verdict = check_mission(
            &mut lanes,
            Some(&pose),
            Some(&mut map),
            &DecisionConfig::default(),
            &mut EventFlags::new(),
        );
        assert!(matches!(verdict, MissionVerdict::Rejected { .. }));
    }

    #[rstest]
    #[case::vector_map(VECTOR_MAP)]
    #[case::lanelet2(LANELET2_MAP)]
    fn test_revalidation_is_idempotent(#[case] yaml: &str) {
        let data: MapData = serde_yaml::from_str(yaml).unwrap();
        let mut map = data.into_backend().unwrap();
        let mut lanes = LaneArray {
            id: 3,
            lanes: vec![Lane::new(
                (0..40)
                    .map(|i| Waypoint::new(Pose::new(i as f64 * 0.7, 0.0, 0.0, 0.0), 5.0))
                    .collect(),
            )],
        };
        let config = DecisionConfig::default();
        assert!(config.insert_stopline_waypoint);
        let pose = Pose::default();
        let mut flags = EventFlags::new();

        let verdict = check_mission(&mut lanes, Some(&pose), Some(map.as_mut()), &config, &mut flags);
        assert!(verdict.is_accepted());
        // One waypoint inserted where the stopline crosses x = 6.
        assert_eq!(lanes.lanes[0].len(), 41);
        let stop = lanes
            .waypoints()
            .find(|wp| wp.state.stop_state == StopState::Stopline)
            .unwrap();
        assert!((stop.pose.position.x - 6.0).abs() < 1e-9);
        assert!(lanes.waypoints().any(|wp| wp.state.area_id != 0));
        assert!(
            lanes
                .waypoints()
                .all(|wp| wp.state.steering_state == SteeringState::Straight)
        );

        let once = lanes.clone();
        let verdict = check_mission(&mut lanes, Some(&pose), Some(map.as_mut()), &config, &mut flags);
        assert!(verdict.is_accepted());
        assert_eq!(once, lanes);
    }
}
