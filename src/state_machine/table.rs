// state_machine/table.rs

// Immutable transition tables. A table is assembled once at configuration time
// with `TransitionTable::builder`; registration mistakes (duplicate states,
// duplicate edges, edges naming unregistered states) surface from `build()`
// instead of silently overwriting an earlier registration.

use super::{StateId, StateMachineError};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug)]
pub struct TransitionTable<S: StateId> {
    name: &'static str,
    states: Vec<S>,
    initial: BTreeMap<&'static str, S>,
    edges: HashMap<S, BTreeMap<&'static str, S>>,
}

impl<S: StateId> TransitionTable<S> {
    pub fn builder(name: &'static str) -> TransitionTableBuilder<S> {
        TransitionTableBuilder {
            name,
            states: Vec::new(),
            initial: BTreeMap::new(),
            edges: HashMap::new(),
            error: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn states(&self) -> &[S] {
        &self.states
    }

    /// First state reached from the unstarted pseudo-state by `trigger`.
    pub fn initial(&self, trigger: &str) -> Option<S> {
        self.initial.get(trigger).copied()
    }

    pub fn target(&self, from: S, trigger: &str) -> Option<S> {
        self.edges.get(&from).and_then(|out| out.get(trigger)).copied()
    }

    /// Outgoing edges of `from`, ordered by trigger name.
    pub fn triggers_from(&self, from: S) -> Vec<(&'static str, S)> {
        self.edges
            .get(&from)
            .map(|out| out.iter().map(|(trigger, to)| (*trigger, *to)).collect())
            .unwrap_or_default()
    }
}

pub struct TransitionTableBuilder<S: StateId> {
    name: &'static str,
    states: Vec<S>,
    initial: BTreeMap<&'static str, S>,
    edges: HashMap<S, BTreeMap<&'static str, S>>,
    error: Option<StateMachineError>,
}

impl<S: StateId> TransitionTableBuilder<S> {
    pub fn state(mut self, state: S) -> Self {
        if self.states.contains(&state) {
            self.fail(StateMachineError::DuplicateState {
                machine: self.name,
                state: state.name(),
            });
        } else {
            self.states.push(state);
        }
        self
    }

    pub fn states(self, states: &[S]) -> Self {
        states.iter().fold(self, |builder, state| builder.state(*state))
    }

    pub fn initial(mut self, trigger: &'static str, state: S) -> Self {
        self.check_registered(state);
        if self.initial.insert(trigger, state).is_some() {
            self.fail(StateMachineError::DuplicateTransition {
                machine: self.name,
                state: "(unstarted)",
                trigger,
            });
        }
        self
    }

    pub fn transition(mut self, from: S, trigger: &'static str, to: S) -> Self {
        self.check_registered(from);
        self.check_registered(to);
        if self.edges.entry(from).or_default().insert(trigger, to).is_some() {
            self.fail(StateMachineError::DuplicateTransition {
                machine: self.name,
                state: from.name(),
                trigger,
            });
        }
        self
    }

    /// Registers the same edge out of several source states.
    pub fn transitions(self, from: &[S], trigger: &'static str, to: S) -> Self {
        from.iter()
            .fold(self, |builder, source| builder.transition(*source, trigger, to))
    }

    pub fn build(self) -> Result<TransitionTable<S>, StateMachineError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.initial.is_empty() {
            return Err(StateMachineError::NoInitialState { machine: self.name });
        }
        Ok(TransitionTable {
            name: self.name,
            states: self.states,
            initial: self.initial,
            edges: self.edges,
        })
    }

    fn check_registered(&mut self, state: S) {
        if !self.states.contains(&state) {
            self.fail(StateMachineError::UnknownState {
                machine: self.name,
                state: state.name(),
            });
        }
    }

    // Keeps the first error; later ones are usually consequences of it.
    fn fail(&mut self, err: StateMachineError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}
