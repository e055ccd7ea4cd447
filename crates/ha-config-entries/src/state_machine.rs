//! Config Entry State Machine
//!
//! Lifecycle states of a config entry and the transitions between them:
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress (retry)
//!                            ↘ SetupRetry → SetupInProgress (retry)
//!                            ↘ MigrationError (terminal)
//!
//! Loaded/SetupError/SetupRetry → UnloadInProgress → NotLoaded
//!                                                 ↘ FailedUnload (terminal)
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Initial state, not yet set up
    #[default]
    NotLoaded,
    /// Migration and setup are running
    SetupInProgress,
    /// Successfully set up
    Loaded,
    /// Setup failed
    SetupError,
    /// Waiting to retry setup
    SetupRetry,
    /// Version migration failed
    MigrationError,
    /// Currently unloading
    UnloadInProgress,
    /// Unload failed
    FailedUnload,
}

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
}

impl ConfigEntryState {
    /// States reachable from this one in a single step
    pub fn next_states(self) -> &'static [ConfigEntryState] {
        use ConfigEntryState::*;

        match self {
            NotLoaded => &[SetupInProgress],
            SetupInProgress => &[Loaded, SetupError, SetupRetry, MigrationError],
            Loaded => &[UnloadInProgress],
            SetupError | SetupRetry => &[SetupInProgress, UnloadInProgress],
            UnloadInProgress => &[NotLoaded, FailedUnload],
            MigrationError | FailedUnload => &[],
        }
    }

    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.next_states().contains(&to)
    }

    /// Validate a transition, returning the target state
    pub fn try_transition(self, to: ConfigEntryState) -> Result<ConfigEntryState, InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    /// Whether the entry can be unloaded or reloaded from this state
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ConfigEntryState::NotLoaded
                | ConfigEntryState::Loaded
                | ConfigEntryState::SetupError
                | ConfigEntryState::SetupRetry
        )
    }

    /// Terminal states have no way out short of removing the entry
    pub fn is_terminal(self) -> bool {
        self.next_states().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ConfigEntryState::*;
    use super::*;

    #[test]
    fn test_setup_path() {
        assert_eq!(NotLoaded.try_transition(SetupInProgress), Ok(SetupInProgress));
        assert_eq!(SetupInProgress.try_transition(Loaded), Ok(Loaded));
        assert_eq!(SetupInProgress.try_transition(MigrationError), Ok(MigrationError));
    }

    #[test]
    fn test_no_shortcuts() {
        assert_eq!(
            NotLoaded.try_transition(Loaded),
            Err(InvalidTransition {
                from: NotLoaded,
                to: Loaded
            })
        );
        assert!(!Loaded.can_transition_to(NotLoaded));
        assert!(!Loaded.can_transition_to(SetupInProgress));
        assert!(!UnloadInProgress.can_transition_to(Loaded));
    }

    #[test]
    fn test_retry_from_failed_setup() {
        assert!(SetupError.can_transition_to(SetupInProgress));
        assert!(SetupRetry.can_transition_to(UnloadInProgress));
    }

    #[test]
    fn test_terminal_states() {
        assert!(MigrationError.is_terminal());
        assert!(FailedUnload.is_terminal());
        assert!(!Loaded.is_terminal());
        assert!(!MigrationError.is_recoverable());
        assert!(!UnloadInProgress.is_recoverable());
        assert!(SetupError.is_recoverable());
    }
}
