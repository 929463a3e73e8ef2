//! Service lifecycle as a pure state machine.
//!
//! [`transition`] decides the next state and the ordered side effects; the
//! service control loop executes the effects. Nothing here touches I/O.

use std::fmt;

use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Started,
    AwaitingExtras,
    Configured,
    EngineInitialized,
    Stopped,
}

impl LifecycleState {
    /// Name broadcast to components.
    pub fn name(self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::AwaitingExtras => "WAITING_FOR_EXTRAS",
            Self::Configured => "CONFIGURED",
            Self::EngineInitialized => "ENGINE_INITIALIZED",
            Self::Stopped => "STOPPED",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }

    /// Effects run on entering this state.
    fn entry_effects(self) -> Vec<Effect> {
        match self {
            Self::Started => vec![Effect::OpenReceivers, Effect::SpawnEngineWorker],
            Self::AwaitingExtras => Vec::new(),
            Self::Configured => vec![Effect::StartEngine],
            Self::EngineInitialized => vec![Effect::InitialPropertySync],
            Self::Stopped => vec![Effect::Teardown],
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleInput {
    /// Host start request. `config_saved` reports whether a persisted
    /// configuration exists.
    Launch { new_config: bool, config_saved: bool },
    /// A configuration message was processed.
    Configuration { persisted: bool, extras_pending: bool },
    ExtrasDelivered,
    EngineStarted,
    EngineFailed,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    NotifyObservers,
    Broadcast(LifecycleState),
    OpenReceivers,
    SpawnEngineWorker,
    StartEngine,
    InitialPropertySync,
    Teardown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: LifecycleState,
    pub effects: Vec<Effect>,
}

impl Transition {
    /// Entering `state`: observers, broadcast, then the entry effects.
    pub fn enter(state: LifecycleState) -> Self {
        let mut effects = vec![Effect::NotifyObservers, Effect::Broadcast(state)];
        effects.extend(state.entry_effects());
        Self {
            next: state,
            effects,
        }
    }
}

/// `None` means the input is ignored in `state`.
pub fn transition(state: LifecycleState, input: LifecycleInput) -> Option<Transition> {
    use LifecycleInput as I;
    use LifecycleState as S;

    let next = match (state, input) {
        (S::Stopped, _) => return None,
        (_, I::Stop) => S::Stopped,
        (
            S::Started,
            I::Launch {
                new_config: false,
                config_saved: true,
            },
        ) => S::Configured,
        (
            S::Started,
            I::Configuration {
                persisted: true,
                extras_pending,
            },
        ) => {
            if extras_pending {
                S::AwaitingExtras
            } else {
                S::Configured
            }
        }
        (S::AwaitingExtras, I::ExtrasDelivered) => S::Configured,
        (S::Configured, I::EngineStarted) => S::EngineInitialized,
        _ => return None,
    };
    Some(Transition::enter(next))
}

/// Delivered to in-process observers on every state change.
#[derive(Clone, Debug)]
pub struct LifecycleEvent {
    pub previous: Option<LifecycleState>,
    pub state: LifecycleState,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleInput as I;
    use LifecycleState as S;

    const ALL_STATES: [S; 5] = [
        S::Started,
        S::AwaitingExtras,
        S::Configured,
        S::EngineInitialized,
        S::Stopped,
    ];

    fn all_inputs() -> Vec<I> {
        let mut inputs = vec![I::ExtrasDelivered, I::EngineStarted, I::EngineFailed, I::Stop];
        for a in [false, true] {
            for b in [false, true] {
                inputs.push(I::Launch {
                    new_config: a,
                    config_saved: b,
                });
                inputs.push(I::Configuration {
                    persisted: a,
                    extras_pending: b,
                });
            }
        }
        inputs
    }

    fn next(state: S, input: I) -> Option<S> {
        transition(state, input).map(|t| t.next)
    }

    #[test]
    fn launch_with_saved_config_configures() {
        let launch = |new_config, config_saved| I::Launch {
            new_config,
            config_saved,
        };
        assert_eq!(next(S::Started, launch(false, true)), Some(S::Configured));
        assert_eq!(next(S::Started, launch(true, true)), None);
        assert_eq!(next(S::Started, launch(false, false)), None);
    }

    #[test]
    fn configuration_paths() {
        let config = |persisted, extras_pending| I::Configuration {
            persisted,
            extras_pending,
        };
        assert_eq!(next(S::Started, config(true, false)), Some(S::Configured));
        assert_eq!(next(S::Started, config(true, true)), Some(S::AwaitingExtras));
        assert_eq!(next(S::Started, config(false, false)), None);
        assert_eq!(next(S::AwaitingExtras, I::ExtrasDelivered), Some(S::Configured));
        assert_eq!(next(S::Configured, config(true, false)), None);
    }

    #[test]
    fn engine_start_only_from_configured() {
        for state in ALL_STATES {
            let expected = (state == S::Configured).then_some(S::EngineInitialized);
            assert_eq!(next(state, I::EngineStarted), expected, "from {state}");
        }
        assert_eq!(next(S::Configured, I::EngineFailed), None);
    }

    #[test]
    fn stopped_is_terminal_and_reachable_from_everywhere() {
        for state in ALL_STATES {
            if state == S::Stopped {
                for input in all_inputs() {
                    assert_eq!(next(state, input), None);
                }
            } else {
                assert_eq!(next(state, I::Stop), Some(S::Stopped));
            }
        }
    }

    #[test]
    fn no_input_leads_back_from_stopped_to_initialized() {
        for input in all_inputs() {
            assert_ne!(next(S::Stopped, input), Some(S::EngineInitialized));
        }
    }

    #[test]
    fn effects_start_with_notification_then_entry() {
        let t = transition(S::Configured, I::EngineStarted).unwrap();
        assert_eq!(
            t.effects,
            vec![
                Effect::NotifyObservers,
                Effect::Broadcast(S::EngineInitialized),
                Effect::InitialPropertySync
            ]
        );

        let start = Transition::enter(S::Started);
        assert_eq!(
            start.effects[2..],
            [Effect::OpenReceivers, Effect::SpawnEngineWorker]
        );

        let stop = transition(S::AwaitingExtras, I::Stop).unwrap();
        assert_eq!(stop.effects.last(), Some(&Effect::Teardown));
    }

    #[test]
    fn state_names() {
        assert_eq!(S::AwaitingExtras.name(), "WAITING_FOR_EXTRAS");
        assert_eq!(S::EngineInitialized.to_string(), "ENGINE_INITIALIZED");
        assert!(S::Stopped.is_terminal());
    }
}
