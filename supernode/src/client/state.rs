use std::fmt;

/// The connection state of a node with respect to its aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    AwaitingInstruction,
    Training,
    Sending,
    Terminated,
}

impl ConnectionState {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    ///
    /// ```text
    /// Disconnected -> Connected -> AwaitingInstruction -> Training -> Sending
    ///                                      ^                            |
    ///                                      +----------------------------+
    /// any (but Terminated) -> Terminated
    /// ```
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connected)
                | (Connected, AwaitingInstruction)
                | (AwaitingInstruction, Training)
                | (Training, Sending)
                | (Sending, AwaitingInstruction)
        ) || (self != Terminated && next == Terminated)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::AwaitingInstruction => "awaiting_instruction",
            ConnectionState::Training => "training",
            ConnectionState::Sending => "sending",
            ConnectionState::Terminated => "terminated",
        };

        f.write_str(s)
    }
}

/// How a node's session ended. There is exactly one per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The aggregator signalled there are no further rounds.
    Completed,
    /// Transport exhaustion, a decode or training error, or a protocol violation.
    Failed { reason: String },
    /// The node was asked to stop from the outside.
    Cancelled,
}

impl Termination {
    /// The status reported in the metrics artifact.
    pub fn status(&self) -> &'static str {
        match self {
            Termination::Completed => "completed",
            Termination::Failed { .. } => "failed",
            Termination::Cancelled => "cancelled",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Termination::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Termination::Failed { .. })
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Failed { reason } => write!(f, "failed: {reason}"),
            other => f.write_str(other.status()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionState::*, *};

    const ALL: [ConnectionState; 6] = [
        Disconnected,
        Connected,
        AwaitingInstruction,
        Training,
        Sending,
        Terminated,
    ];

    #[test]
    fn transition_table() {
        let allowed = [
            (Disconnected, Connected),
            (Connected, AwaitingInstruction),
            (AwaitingInstruction, Training),
            (Training, Sending),
            (Sending, AwaitingInstruction),
        ];

        for from in ALL {
            for to in ALL {
                let expected = allowed.contains(&(from, to)) || (from != Terminated && to == Terminated);
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn training_is_only_entered_from_awaiting_instruction() {
        for from in ALL {
            assert_eq!(from.can_transition_to(Training), from == AwaitingInstruction);
        }
    }

    #[test]
    fn terminated_is_absorbing() {
        for to in ALL {
            assert!(!Terminated.can_transition_to(to));
        }
    }

    #[test]
    fn termination_status() {
        assert_eq!(Termination::Completed.status(), "completed");
        assert_eq!(Termination::Cancelled.message(), None);

        let failed = Termination::Failed {
            reason: "boom".into(),
        };
        assert_eq!(failed.status(), "failed");
        assert_eq!(failed.message(), Some("boom"));
        assert!(failed.is_failure());
    }
}
