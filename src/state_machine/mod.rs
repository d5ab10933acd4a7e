//! Finite state machine engine shared by the four decision contexts.
//!
//! A context owns a [`StateMachine`] built from an immutable [`TransitionTable`]
//! and implements [`StateHandler`] for its closed state enum. The machine calls
//! the handler's lifecycle methods:
//!
//! - `on_entry` once when a state is entered,
//! - `on_update` once per [`StateMachine::tick`] while the state is current,
//! - `on_exit` once when the state is left.
//!
//! `on_entry` and `on_update` may return a trigger name; the machine fires it
//! before returning to the caller, so a transition requested during a tick has
//! completed by the time `tick` returns.

mod table;

pub use table::{TransitionTable, TransitionTableBuilder};

use log::{debug, info, warn};
use std::fmt;
use std::hash::Hash;
use thiserror::Error;

/// Upper bound on transitions fired back-to-back from ENTRY requests in one call.
pub const MAX_CHAINED_TRANSITIONS: usize = 8;

/// Identifier of a state within one context.
pub trait StateId: Copy + Eq + Hash + fmt::Debug + 'static {
    /// Every state of the context, in registration order.
    const ALL: &'static [Self];

    fn name(self) -> &'static str;
}

/// Lifecycle callbacks of a context. Unimplemented phases are empty handlers.
pub trait StateHandler<S, E> {
    fn on_entry(&mut self, _state: S, _env: &mut E) -> Option<&'static str> {
        None
    }

    fn on_update(&mut self, _state: S, _env: &mut E) -> Option<&'static str> {
        None
    }

    fn on_exit(&mut self, _state: S, _env: &mut E) {}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("{machine}: state {state} registered twice")]
    DuplicateState {
        machine: &'static str,
        state: &'static str,
    },
    #[error("{machine}: transition {state} --{trigger}--> registered twice")]
    DuplicateTransition {
        machine: &'static str,
        state: &'static str,
        trigger: &'static str,
    },
    #[error("{machine}: state {state} is not registered")]
    UnknownState {
        machine: &'static str,
        state: &'static str,
    },
    #[error("{machine}: no initial transition registered")]
    NoInitialState { machine: &'static str },
}

// Trigger requested by an ENTRY or UPDATE callback.
type Request = Option<&'static str>;

#[derive(Debug)]
pub struct StateMachine<S: StateId> {
    table: TransitionTable<S>,
    current: Option<S>,
}

impl<S: StateId> StateMachine<S> {
    pub fn new(table: TransitionTable<S>) -> Self {
        StateMachine {
            table,
            current: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.table.name()
    }

    /// `None` until [`StateMachine::start`] succeeds.
    pub fn current(&self) -> Option<S> {
        self.current
    }

    pub fn is_in(&self, state: S) -> bool {
        self.current == Some(state)
    }

    /// Name of the current state, or an empty string before start.
    pub fn current_name(&self) -> &'static str {
        self.current.map(StateId::name).unwrap_or("")
    }

    /// Leaves the unstarted pseudo-state through `trigger` and runs the first ENTRY.
    pub fn start<E, H: StateHandler<S, E>>(
        &mut self,
        trigger: &str,
        handler: &mut H,
        env: &mut E,
    ) -> bool {
        if let Some(state) = self.current {
            warn!("{}: already started in {}", self.name(), state.name());
            return false;
        }
        let Some(first) = self.table.initial(trigger) else {
            warn!("{}: no initial transition for {}", self.name(), trigger);
            return false;
        };

        info!("{}: start --{}--> {}", self.name(), trigger, first.name());
        self.current = Some(first);
        let requested = handler.on_entry(first, env);
        self.settle(requested, handler, env);
        true
    }

    /// Fires `trigger` from the current state. Without a matching edge nothing
    /// happens: no callbacks run and `false` is returned.
    pub fn try_next_state<E, H: StateHandler<S, E>>(
        &mut self,
        trigger: &str,
        handler: &mut H,
        env: &mut E,
    ) -> bool {
        match self.transition(trigger, handler, env) {
            Some(requested) => {
                self.settle(requested, handler, env);
                true
            }
            None => false,
        }
    }

    /// Runs UPDATE of the current state exactly once, plus whatever it triggers.
    pub fn tick<E, H: StateHandler<S, E>>(&mut self, handler: &mut H, env: &mut E) {
        let Some(state) = self.current else {
            debug!("{}: tick before start", self.name());
            return;
        };
        let requested = handler.on_update(state, env);
        self.settle(requested, handler, env);
    }

    /// Outgoing edges of the current state, ordered by trigger name.
    pub fn available_triggers(&self) -> Vec<(&'static str, S)> {
        self.current
            .map(|state| self.table.triggers_from(state))
            .unwrap_or_default()
    }

    fn transition<E, H: StateHandler<S, E>>(
        &mut self,
        trigger: &str,
        handler: &mut H,
        env: &mut E,
    ) -> Option<Request> {
        let Some(from) = self.current else {
            warn!("{}: {} received before start", self.name(), trigger);
            return None;
        };
        let Some(to) = self.table.target(from, trigger) else {
            warn!(
                "{}: no transition from {} on {}",
                self.name(),
                from.name(),
                trigger
            );
            return None;
        };

        info!(
            "{}: {} --{}--> {}",
            self.name(),
            from.name(),
            trigger,
            to.name()
        );
        handler.on_exit(from, env);
        self.current = Some(to);
        Some(handler.on_entry(to, env))
    }

    fn settle<E, H: StateHandler<S, E>>(
        &mut self,
        mut requested: Request,
        handler: &mut H,
        env: &mut E,
    ) {
        let mut hops = 0;
        while let Some(trigger) = requested {
            if hops == MAX_CHAINED_TRANSITIONS {
                warn!(
                    "{}: dropped {} after {} chained transitions",
                    self.name(),
                    trigger,
                    hops
                );
                return;
            }
            hops += 1;
            requested = self.transition(trigger, handler, env).flatten();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Light {
        Red,
        Green,
        Yellow,
        Blink,
    }

    impl StateId for Light {
        const ALL: &'static [Self] = &[Light::Red, Light::Green, Light::Yellow, Light::Blink];

        fn name(self) -> &'static str {
            match self {
                Light::Red => "Red",
                Light::Green => "Green",
                Light::Yellow => "Yellow",
                Light::Blink => "Blink",
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        request_on_update: Option<&'static str>,
        // Blink re-enters itself forever when set.
        blink_loops: bool,
    }

    impl StateHandler<Light, u32> for Recorder {
        fn on_entry(&mut self, state: Light, env: &mut u32) -> Option<&'static str> {
            *env += 1;
            self.calls.push(format!("entry:{}", state.name()));
            match state {
                Light::Yellow => Some("expire"),
                Light::Blink if self.blink_loops => Some("again"),
                _ => None,
            }
        }

        fn on_update(&mut self, state: Light, _env: &mut u32) -> Option<&'static str> {
            self.calls.push(format!("update:{}", state.name()));
            self.request_on_update.take()
        }

        fn on_exit(&mut self, state: Light, _env: &mut u32) {
            self.calls.push(format!("exit:{}", state.name()));
        }
    }

    // Uses only the default callbacks.
    struct Silent;
    impl StateHandler<Light, u32> for Silent {}

    fn table() -> TransitionTable<Light> {
        TransitionTable::builder("light")
            .states(Light::ALL)
            .initial("power_on", Light::Red)
            .transition(Light::Red, "go", Light::Green)
            .transition(Light::Green, "slow", Light::Yellow)
            .transition(Light::Yellow, "expire", Light::Red)
            .transitions(&[Light::Red, Light::Green], "fault", Light::Blink)
            .transition(Light::Blink, "again", Light::Blink)
            .build()
            .unwrap()
    }

    fn started(handler: &mut Recorder, env: &mut u32) -> StateMachine<Light> {
        let mut machine = StateMachine::new(table());
        assert!(machine.start("power_on", handler, env));
        handler.calls.clear();
        machine
    }

    #[test]
    fn test_start_runs_entry() {
        let mut handler = Recorder::default();
        let mut env = 0;
        let mut machine = StateMachine::new(table());
        assert_eq!(machine.current(), None);
        assert_eq!(machine.current_name(), "");

        assert!(machine.start("power_on", &mut handler, &mut env));
        assert_eq!(machine.current(), Some(Light::Red));
        assert_eq!(handler.calls, vec!["entry:Red"]);
        assert!(!machine.start("power_on", &mut handler, &mut env));
    }

    #[test]
    fn test_unknown_trigger_is_noop() {
        let mut handler = Recorder::default();
        let mut env = 0;
        let mut machine = started(&mut handler, &mut env);

        assert!(!machine.try_next_state("slow", &mut handler, &mut env));
        assert!(!machine.try_next_state("no_such_trigger", &mut handler, &mut env));
        assert!(machine.is_in(Light::Red));
        assert!(handler.calls.is_empty());
    }

    #[test]
    fn test_transition_order() {
        let mut handler = Recorder::default();
        let mut env = 0;
        let mut machine = started(&mut handler, &mut env);

        assert!(machine.try_next_state("go", &mut handler, &mut env));
        assert_eq!(handler.calls, vec!["exit:Red", "entry:Green"]);
        assert_eq!(machine.current_name(), "Green");
    }

    #[test]
    fn test_tick_runs_update_once_and_completes_requests() {
        let mut handler = Recorder::default();
        let mut env = 0;
        let mut machine = started(&mut handler, &mut env);
        machine.try_next_state("go", &mut handler, &mut env);
        handler.calls.clear();

        handler.request_on_update = Some("slow");
        machine.tick(&mut handler, &mut env);

        // Yellow's ENTRY chains straight back to Red inside the same tick.
        assert_eq!(
            handler.calls,
            vec![
                "update:Green",
                "exit:Green",
                "entry:Yellow",
                "exit:Yellow",
                "entry:Red"
            ]
        );
        assert!(machine.is_in(Light::Red));
    }

    #[test]
    fn test_chained_entries_are_bounded() {
        let mut handler = Recorder {
            blink_loops: true,
            ..Recorder::default()
        };
        let mut env = 0;
        let mut machine = started(&mut handler, &mut env);

        assert!(machine.try_next_state("fault", &mut handler, &mut env));
        assert!(machine.is_in(Light::Blink));
        let entries = handler
            .calls
            .iter()
            .filter(|c| c.as_str() == "entry:Blink")
            .count();
        assert_eq!(entries, MAX_CHAINED_TRANSITIONS + 1);
    }

    #[test]
    fn test_missing_callbacks_are_tolerated() {
        let mut env = 0;
        let mut machine = StateMachine::new(table());
        assert!(machine.start("power_on", &mut Silent, &mut env));
        machine.tick(&mut Silent, &mut env);
        assert!(machine.try_next_state("go", &mut Silent, &mut env));
        assert!(machine.is_in(Light::Green));
    }

    #[test]
    fn test_tick_before_start_does_nothing() {
        let mut handler = Recorder::default();
        let mut env = 0;
        let mut machine = StateMachine::new(table());
        machine.tick(&mut handler, &mut env);
        assert!(!machine.try_next_state("go", &mut handler, &mut env));
        assert!(handler.calls.is_empty());
    }

    #[test]
    fn test_available_triggers() {
        let mut handler = Recorder::default();
        let mut env = 0;
        let machine = started(&mut handler, &mut env);
        assert_eq!(
            machine.available_triggers(),
            vec![("fault", Light::Blink), ("go", Light::Green)]
        );
    }

    #[test]
    fn test_duplicate_state_rejected() {
        let err = TransitionTable::builder("light")
            .states(&[Light::Red, Light::Red])
            .initial("power_on", Light::Red)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            StateMachineError::DuplicateState {
                machine: "light",
                state: "Red"
            }
        );
    }

    #[test]
    fn test_duplicate_transition_rejected() {
        let err = TransitionTable::builder("light")
            .states(Light::ALL)
            .initial("power_on", Light::Red)
            .transition(Light::Red, "go", Light::Green)
            .transition(Light::Red, "go", Light::Yellow)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            StateMachineError::DuplicateTransition { trigger: "go", .. }
        ));
    }

    #[test]
    fn test_unregistered_state_rejected() {
        let err = TransitionTable::builder("light")
            .states(&[Light::Red])
            .initial("power_on", Light::Red)
            .transition(Light::Red, "go", Light::Green)
            .build()
            .unwrap_err();
        assert!(matches!(err, StateMachineError::UnknownState { state: "Green", .. }));
    }

    #[test]
    fn test_missing_initial_rejected() {
        let err = TransitionTable::<Light>::builder("light")
            .states(Light::ALL)
            .build()
            .unwrap_err();
        assert_eq!(err, StateMachineError::NoInitialState { machine: "light" });
    }
}
