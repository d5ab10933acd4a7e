//! The four layered decision contexts.
//!
//! Vehicle, Mission, Behavior and Motion each own one state machine. They are
//! ticked in that order and talk downwards through typed event channels; the
//! motion context reports back to the mission context through a feedback
//! channel that is drained on the next tick.

pub mod behavior;
pub mod mission;
pub mod motion;
pub mod vehicle;

pub use behavior::{BehaviorContext, BehaviorEnv, BehaviorState};
pub use mission::{MissionContext, MissionEnv, MissionState};
pub use motion::{MotionContext, MotionEnv, MotionState};
pub use vehicle::{VehicleContext, VehicleEnv, VehicleState};

use crate::state_machine::{StateHandler, StateId, StateMachine, TransitionTable};
use log::debug;
use std::collections::VecDeque;

/// Trigger that leaves the unstarted pseudo-state of every context.
pub const START_TRIGGER: &str = "started";

/// Vehicle -> Mission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VehicleEvent {
    Ready,
    Emergency,
    Recovered,
}

/// Mission -> Behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissionEvent {
    DriveReady,
    Driving,
    Ended,
    Emergency,
    EmergencyCleared,
}

/// Behavior -> Motion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BehaviorEvent {
    DriveReady,
    Engaged,
    Disengaged,
    Emergency,
    EmergencyCleared,
}

/// Motion -> Mission feedback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionEvent {
    ArrivedGoal,
    MissionAborted,
}

/// FIFO event queue between two contexts.
#[derive(Debug)]
pub struct Channel<T> {
    queue: VecDeque<T>,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Channel {
            queue: VecDeque::new(),
        }
    }
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Channel::default()
    }

    pub fn push(&mut self, event: T) {
        self.queue.push_back(event);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// A state machine together with the logic driving its callbacks.
#[derive(Debug)]
pub struct Context<S: StateId, H> {
    machine: StateMachine<S>,
    logic: H,
}

impl<S: StateId, H> Context<S, H> {
    pub fn new(table: TransitionTable<S>, logic: H) -> Self {
        Context {
            machine: StateMachine::new(table),
            logic,
        }
    }

    pub fn start<E>(&mut self, env: &mut E) -> bool
    where
        H: StateHandler<S, E>,
    {
        self.machine.start(START_TRIGGER, &mut self.logic, env)
    }

    /// Runs UPDATE of the current state once.
    pub fn tick<E>(&mut self, env: &mut E)
    where
        H: StateHandler<S, E>,
    {
        self.machine.tick(&mut self.logic, env);
    }

    pub fn try_next_state<E>(&mut self, trigger: &str, env: &mut E) -> bool
    where
        H: StateHandler<S, E>,
    {
        self.machine.try_next_state(trigger, &mut self.logic, env)
    }

    /// Fires `trigger` only when the current state has an edge for it. Events
    /// relayed from another context are often meaningless in the current state
    /// and are dropped quietly.
    pub fn relay<E>(&mut self, trigger: &str, env: &mut E) -> bool
    where
        H: StateHandler<S, E>,
    {
        if !self.accepts(trigger) {
            debug!(
                "{}: {} ignored in {}",
                self.name(),
                trigger,
                self.state_name()
            );
            return false;
        }
        self.machine.try_next_state(trigger, &mut self.logic, env)
    }

    pub fn accepts(&self, trigger: &str) -> bool {
        self.available_triggers()
            .iter()
            .any(|(candidate, _)| *candidate == trigger)
    }

    pub fn current(&self) -> Option<S> {
        self.machine.current()
    }

    pub fn is_in(&self, state: S) -> bool {
        self.machine.is_in(state)
    }

    pub fn state_name(&self) -> &'static str {
        self.machine.current_name()
    }

    pub fn name(&self) -> &'static str {
        self.machine.name()
    }

    pub fn available_triggers(&self) -> Vec<(&'static str, S)> {
        self.machine.available_triggers()
    }

    pub fn logic(&self) -> &H {
        &self.logic
    }
}
