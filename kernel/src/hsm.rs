// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A small hierarchical state machine helper.
//!
//! Each active object's internal states form a tree, with a handful of
//! substates nested under one top state. `StateMachine::ancestors` walks a state up to its root;
//! `transition_to` finds the lowest common ancestor between the current
//! and target state and runs exit handlers down to it, then entry
//! handlers back out to the target, the same order HSM frameworks like
//! QP (which the original firmware's active objects were modeled on)
//! use.

/// A concrete state in a hierarchical state machine. `S` is typically a
/// small `Copy` enum owned by the active object.
pub trait HsmState: Copy + Eq {
    /// This state's immediate parent, or `None` for the root.
    fn parent(&self) -> Option<Self>;
}

/// The result of handling an event in one state.
pub enum HandlerResult<S> {
    /// The event was consumed; no transition.
    Handled,
    /// Transition to a new state, running exit/entry actions along the
    /// way.
    Transition(S),
    /// Not handled here; bubble up to the parent state.
    Super,
}

/// Returns `state`'s ancestor chain, starting with `state` itself and
/// ending at the root.
pub fn ancestors<S: HsmState>(state: S) -> Vec<S> {
    let mut chain = vec![state];
    let mut cur = state;
    while let Some(parent) = cur.parent() {
        chain.push(parent);
        cur = parent;
    }
    chain
}

/// Computes the exit chain (from `from`, exclusive of the LCA) and the
/// entry chain (to `to`, exclusive of the LCA, outermost first) for a
/// transition between two states in the same tree.
///
/// Returns `(exits, entries)` where `exits` should be run in order (the
/// state being left first, walking up) and `entries` run in order
/// afterward (walking back down to `to`).
pub fn transition_path<S: HsmState>(from: S, to: S) -> (Vec<S>, Vec<S>) {
    let from_chain = ancestors(from);
    let to_chain = ancestors(to);

    let lca = from_chain
        .iter()
        .find(|candidate| to_chain.contains(candidate))
        .copied();

    let exits: Vec<S> = match lca {
        Some(lca) => from_chain.into_iter().take_while(|s| *s != lca).collect(),
        None => from_chain,
    };
    let mut entries: Vec<S> = match lca {
        Some(lca) => to_chain.into_iter().take_while(|s| *s != lca).collect(),
        None => to_chain,
    };
    entries.reverse();

    (exits, entries)
}

/// An active object's internal state machine. Implementors provide the
/// per-state event handler; [`StateMachine::dispatch`] walks from the
/// current state up through its ancestors until a handler consumes the
/// event or the root is reached, running exit/entry actions on any
/// resulting transition.
pub trait StateMachine {
    type State: HsmState;
    type Event;

    fn current(&self) -> Self::State;
    fn set_current(&mut self, state: Self::State);

    /// Handle `event` while logically in `state` (not necessarily
    /// `self.current()` -- used for the bubble-up walk).
    fn handle_in(&mut self, state: Self::State, event: &Self::Event) -> HandlerResult<Self::State>;

    /// Called when `state` is exited, outermost exit last.
    fn on_exit(&mut self, _state: Self::State) {}
    /// Called when `state` is entered, outermost entry first.
    fn on_enter(&mut self, _state: Self::State) {}

    /// Dispatches `event` from the current state, bubbling to ancestors
    /// as needed, and performs any resulting transition.
    fn dispatch(&mut self, event: &Self::Event) {
        let start = self.current();
        for state in ancestors(start) {
            match self.handle_in(state, event) {
                HandlerResult::Handled => return,
                HandlerResult::Super => continue,
                HandlerResult::Transition(target) => {
                    self.transition_to(target);
                    return;
                }
            }
        }
    }

    /// Runs the exit/entry chain between the current state and `target`
    /// and updates the current state.
    fn transition_to(&mut self, target: Self::State) {
        let (exits, entries) = transition_path(self.current(), target);
        for s in exits {
            self.on_exit(s);
        }
        for s in entries {
            self.on_enter(s);
        }
        self.set_current(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum S {
        Top,
        Idle,
        Busy,
        BusyValidating,
    }

    impl HsmState for S {
        fn parent(&self) -> Option<Self> {
            match self {
                S::Top => None,
                S::Idle | S::Busy => Some(S::Top),
                S::BusyValidating => Some(S::Busy),
            }
        }
    }

    #[test]
    fn ancestors_walks_to_root() {
        assert_eq!(ancestors(S::BusyValidating), vec![S::BusyValidating, S::Busy, S::Top]);
    }

    #[test]
    fn transition_path_finds_lowest_common_ancestor() {
        let (exits, entries) = transition_path(S::BusyValidating, S::Idle);
        assert_eq!(exits, vec![S::BusyValidating, S::Busy]);
        assert_eq!(entries, vec![S::Idle]);
    }

    #[test]
    fn transition_path_within_same_parent() {
        let (exits, entries) = transition_path(S::Idle, S::Busy);
        assert_eq!(exits, vec![S::Idle]);
        assert_eq!(entries, vec![S::Busy]);
    }

    struct Machine {
        state: S,
        log: Vec<String>,
    }

    impl StateMachine for Machine {
        type State = S;
        type Event = ();

        fn current(&self) -> S {
            self.state
        }
        fn set_current(&mut self, state: S) {
            self.state = state;
        }
        fn handle_in(&mut self, state: S, _event: &()) -> HandlerResult<S> {
            match state {
                S::Idle => HandlerResult::Transition(S::BusyValidating),
                _ => HandlerResult::Super,
            }
        }
        fn on_exit(&mut self, state: S) {
            self.log.push(format!("exit {state:?}"));
        }
        fn on_enter(&mut self, state: S) {
            self.log.push(format!("enter {state:?}"));
        }
    }

    #[test]
    fn dispatch_runs_exit_then_entry_chain() {
        let mut m = Machine {
            state: S::Idle,
            log: vec![],
        };
        m.dispatch(&());
        assert_eq!(m.current(), S::BusyValidating);
        assert_eq!(m.log, vec!["exit Idle", "enter Busy", "enter BusyValidating"]);
    }
}
