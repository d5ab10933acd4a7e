// core/mod.rs

// Shared data of the decision core: geometry, route types, the event flag store
// and the world snapshot that every context reads at tick time.

pub mod flags;
pub mod geometry;
pub mod snapshot;
pub mod throttle;
pub mod waypoint;

pub use flags::{EventFlag, EventFlags};
pub use geometry::Pose;
pub use snapshot::{
    ChangeFlag, MissionStatus, SensorInputs, StopOrder, StopTracking, WorldSnapshot,
};
pub use throttle::Throttle;
pub use waypoint::{
    EventState, Lane, LaneArray, LaneChangeState, SteeringState, StopState, Waypoint,
    WaypointState,
};
