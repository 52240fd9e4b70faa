use std::fmt;

use serde::{Deserialize, Serialize};

/// The five phases of the supervised process lifecycle.
///
/// The normal path is STOPPED -> STARTING -> RUNNING -> STOPPING -> STOPPED.
/// ERROR is entered when the child dies or misbehaves before becoming
/// healthy, or when a stop sequence fails; a fresh start is always possible
/// from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "STOPPED"),
            ProcessState::Starting => write!(f, "STARTING"),
            ProcessState::Running => write!(f, "RUNNING"),
            ProcessState::Stopping => write!(f, "STOPPING"),
            ProcessState::Error => write!(f, "ERROR"),
        }
    }
}

impl ProcessState {
    /// Whether moving from `self` to `next` is part of the lifecycle table.
    pub fn allows(self, next: ProcessState) -> bool {
        use ProcessState::{Error, Running, Starting, Stopped, Stopping};
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Error, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Error)
        )
    }

    /// `start()` is accepted only from these states.
    pub fn can_start(self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Error)
    }

    /// `stop()` is accepted only from these states.
    pub fn can_stop(self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ProcessState; 5] = [
        ProcessState::Stopped,
        ProcessState::Starting,
        ProcessState::Running,
        ProcessState::Stopping,
        ProcessState::Error,
    ];

    #[test]
    fn transition_table_is_exact() {
        use ProcessState::{Error, Running, Starting, Stopped, Stopping};
        let allowed = [
            (Stopped, Starting),
            (Error, Starting),
            (Starting, Running),
            (Starting, Error),
            (Starting, Stopping),
            (Running, Stopping),
            (Stopping, Stopped),
            (Stopping, Error),
        ];
        for old in ALL {
            for new in ALL {
                let expected = allowed.contains(&(old, new));
                assert_eq!(
                    old.allows(new),
                    expected,
                    "transition {old} -> {new} should be {expected}"
                );
            }
        }
    }

    #[test]
    fn start_accepted_only_from_stopped_or_error() {
        for state in ALL {
            let expected = matches!(state, ProcessState::Stopped | ProcessState::Error);
            assert_eq!(state.can_start(), expected, "can_start from {state}");
        }
    }

    #[test]
    fn stop_accepted_only_from_starting_or_running() {
        for state in ALL {
            let expected = matches!(state, ProcessState::Starting | ProcessState::Running);
            assert_eq!(state.can_stop(), expected, "can_stop from {state}");
        }
    }

    #[test]
    fn state_display() {
        assert_eq!(ProcessState::Stopped.to_string(), "STOPPED");
        assert_eq!(ProcessState::Starting.to_string(), "STARTING");
        assert_eq!(ProcessState::Running.to_string(), "RUNNING");
        assert_eq!(ProcessState::Stopping.to_string(), "STOPPING");
        assert_eq!(ProcessState::Error.to_string(), "ERROR");
    }
}
