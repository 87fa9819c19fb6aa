use purge_core::state_machine::{allowed_transitions, validate_transition};
use purge_core::RoundState;
use proptest::prelude::*;

#[test]
fn test_dispatching_transitions() {
    assert!(validate_transition(RoundState::Dispatching, RoundState::Evaluating).is_ok());
    assert!(validate_transition(RoundState::Dispatching, RoundState::Failed).is_ok());
    assert!(validate_transition(RoundState::Dispatching, RoundState::Cancelled).is_ok());

    // A round must be evaluated before the loop can finish or wait
    assert!(validate_transition(RoundState::Dispatching, RoundState::Done).is_err());
    assert!(validate_transition(RoundState::Dispatching, RoundState::Waiting).is_err());
}

#[test]
fn test_waiting_transitions() {
    assert!(validate_transition(RoundState::Waiting, RoundState::Dispatching).is_ok());
    assert!(validate_transition(RoundState::Waiting, RoundState::Cancelled).is_ok());

    assert!(validate_transition(RoundState::Waiting, RoundState::Done).is_err());
    assert!(validate_transition(RoundState::Waiting, RoundState::Evaluating).is_err());
}

#[test]
fn test_terminal_states_are_sinks() {
    for from in RoundState::ALL.into_iter().filter(|s| s.is_terminal()) {
        for to in RoundState::ALL {
            assert!(validate_transition(from, to).is_err(), "{from:?} -> {to:?}");
        }
    }
}

fn any_state() -> impl Strategy<Value = RoundState> {
    prop::sample::select(RoundState::ALL.to_vec())
}

proptest! {
    #[test]
    fn prop_all_transitions_are_subset_of_allowed(from in any_state(), to in any_state()) {
        let res = validate_transition(from, to);
        let allowed = allowed_transitions(from);

        if res.is_ok() {
            assert!(allowed.contains(&to));
        } else {
            assert!(!allowed.contains(&to));
        }
    }

    #[test]
    fn prop_every_walk_can_reach_a_terminal_state(
        choices in prop::collection::vec(any::<prop::sample::Index>(), 0..32)
    ) {
        let mut state = RoundState::Dispatching;
        for choice in choices {
            let next = allowed_transitions(state);
            if next.is_empty() {
                break;
            }
            state = next[choice.index(next.len())];
        }
        // From wherever the walk stopped, a terminal state stays one or two hops away.
        let reachable = state.is_terminal()
            || allowed_transitions(state).iter().any(|s| s.is_terminal())
            || allowed_transitions(state)
                .iter()
                .any(|s| allowed_transitions(*s).iter().any(|t| t.is_terminal()));
        prop_assert!(reachable);
    }
}
