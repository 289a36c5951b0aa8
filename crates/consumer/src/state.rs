//! Consumer state machine.

/// The state of the order consumer.
///
/// State transitions:
/// ```text
/// Connecting ──► Subscribed ──► Processing ──┬──► Acknowledged ──► Subscribed
///     ▲              │                       └──► Rejected ─────► Subscribed
///     └──────────────┘ (connection lost)
///
/// any state ──► Stopped (shutdown)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConsumerState {
    /// Establishing the queue connection and durable subscription.
    #[default]
    Connecting,

    /// Waiting for the next delivery.
    Subscribed,

    /// A message is being applied to the catalog.
    Processing,

    /// The last message was acknowledged.
    Acknowledged,

    /// The last message was negatively acknowledged or dead-lettered.
    Rejected,

    /// The consumer has shut down (terminal state).
    Stopped,
}

impl ConsumerState {
    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: ConsumerState) -> bool {
        use ConsumerState::*;
        match (self, next) {
            (Stopped, _) => false,
            (_, Stopped) | (_, Connecting) => true,
            (Connecting, Subscribed) => true,
            (Subscribed, Processing) => true,
            (Processing, Acknowledged | Rejected) => true,
            (Acknowledged | Rejected, Subscribed) => true,
            _ => false,
        }
    }

    /// Returns true while a subscription is established.
    pub fn is_subscribed(&self) -> bool {
        matches!(
            self,
            ConsumerState::Subscribed
                | ConsumerState::Processing
                | ConsumerState::Acknowledged
                | ConsumerState::Rejected
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Connecting => "Connecting",
            ConsumerState::Subscribed => "Subscribed",
            ConsumerState::Processing => "Processing",
            ConsumerState::Acknowledged => "Acknowledged",
            ConsumerState::Rejected => "Rejected",
            ConsumerState::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_connecting() {
        assert_eq!(ConsumerState::default(), ConsumerState::Connecting);
    }

    #[test]
    fn test_happy_path_transitions() {
        use ConsumerState::*;
        assert!(Connecting.can_transition_to(Subscribed));
        assert!(Subscribed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Acknowledged));
        assert!(Processing.can_transition_to(Rejected));
        assert!(Acknowledged.can_transition_to(Subscribed));
        assert!(Rejected.can_transition_to(Subscribed));
    }

    #[test]
    fn test_illegal_transitions() {
        use ConsumerState::*;
        assert!(!Connecting.can_transition_to(Processing));
        assert!(!Subscribed.can_transition_to(Acknowledged));
        assert!(!Acknowledged.can_transition_to(Processing));
        assert!(!Stopped.can_transition_to(Connecting));
    }

    #[test]
    fn test_connection_loss_and_shutdown_from_anywhere() {
        use ConsumerState::*;
        for state in [Subscribed, Processing, Acknowledged, Rejected] {
            assert!(state.can_transition_to(Connecting));
            assert!(state.can_transition_to(Stopped));
        }
    }

    #[test]
    fn test_is_subscribed() {
        assert!(!ConsumerState::Connecting.is_subscribed());
        assert!(ConsumerState::Subscribed.is_subscribed());
        assert!(ConsumerState::Processing.is_subscribed());
        assert!(!ConsumerState::Stopped.is_subscribed());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConsumerState::Connecting.to_string(), "Connecting");
        assert_eq!(ConsumerState::Acknowledged.to_string(), "Acknowledged");
        assert_eq!(ConsumerState::Stopped.to_string(), "Stopped");
    }
}
