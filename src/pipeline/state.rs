//! Recorder state management

use std::time::Instant;

/// Recording session state machine
///
/// Exclusively owned by the coordinator worker and transitioned only in
/// response to serialized commands, so it is never read and written from
/// two contexts at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Session created but not started
    Idle,

    /// `start()` accepted, worker is allocating resources
    Starting,

    /// Capture, encode and mux are live
    Running {
        /// When the session entered `Running`
        started_at: Instant,
    },

    /// End-of-stream observed or quit requested; draining in-flight buffers
    Stopping,

    /// All resources freed. Terminal; the session cannot be restarted.
    Released,
}

impl RecorderState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &RecorderState) -> bool {
        use RecorderState::*;

        match (self, target) {
            (Idle, Starting) => true,

            (Starting, Running { .. }) => true,
            // startup failure releases directly
            (Starting, Released) => true,

            (Running { .. }, Stopping) => true,

            (Stopping, Released) => true,

            // quit() before start() releases immediately
            (Idle, Released) => true,

            (Released, _) => false,

            // Self-transitions
            (a, b) if a == b => true,

            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RecorderState::Idle => "Idle",
            RecorderState::Starting => "Starting",
            RecorderState::Running { .. } => "Running",
            RecorderState::Stopping => "Stopping",
            RecorderState::Released => "Released",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RecorderState::Running { .. })
    }

    pub fn is_released(&self) -> bool {
        matches!(self, RecorderState::Released)
    }

    /// Get the duration since the session started (if running)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let RecorderState::Running { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let idle = RecorderState::Idle;
        let starting = RecorderState::Starting;
        let running = RecorderState::Running {
            started_at: Instant::now(),
        };
        let stopping = RecorderState::Stopping;
        let released = RecorderState::Released;

        assert!(idle.can_transition_to(&starting));
        assert!(starting.can_transition_to(&running));
        assert!(running.can_transition_to(&stopping));
        assert!(stopping.can_transition_to(&released));

        // startup failure and quit-before-start shortcuts
        assert!(starting.can_transition_to(&released));
        assert!(idle.can_transition_to(&released));

        // Self-transitions
        assert!(idle.can_transition_to(&idle));
        assert!(running.can_transition_to(&running));
    }

    #[test]
    fn test_invalid_transitions() {
        let idle = RecorderState::Idle;
        let running = RecorderState::Running {
            started_at: Instant::now(),
        };
        let released = RecorderState::Released;

        // Must go through Starting
        assert!(!idle.can_transition_to(&running));
        // Terminal state
        assert!(!released.can_transition_to(&idle));
        assert!(!released.can_transition_to(&running));
        // Cannot stop what never ran
        assert!(!idle.can_transition_to(&RecorderState::Stopping));
    }

    #[test]
    fn test_state_checks() {
        let running = RecorderState::Running {
            started_at: Instant::now(),
        };
        assert!(running.is_running());
        assert!(running.running_duration().is_some());
        assert!(!running.is_released());

        let released = RecorderState::Released;
        assert!(released.is_released());
        assert!(released.running_duration().is_none());
    }
}
