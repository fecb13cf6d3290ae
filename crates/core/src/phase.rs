#![forbid(unsafe_code)]

/// Launcher lifecycle. `NoBackend` is initial, `ShuttingDown` is terminal and reachable from
/// every other phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SupervisorPhase {
    NoBackend,
    ProbingExisting,
    Reuse,
    StartingBackend,
    BackendHealthy,
    Running,
    ShuttingDown,
}

impl SupervisorPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoBackend => "no_backend",
            Self::ProbingExisting => "probing_existing",
            Self::Reuse => "reuse",
            Self::StartingBackend => "starting_backend",
            Self::BackendHealthy => "backend_healthy",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ShuttingDown)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use SupervisorPhase::*;
        if next == ShuttingDown {
            return self != ShuttingDown;
        }
        matches!(
            (self, next),
            (NoBackend, ProbingExisting)
                | (NoBackend, StartingBackend)
                | (ProbingExisting, Reuse)
                | (ProbingExisting, StartingBackend)
                | (Reuse, BackendHealthy)
                | (StartingBackend, BackendHealthy)
                | (BackendHealthy, Running)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SupervisorPhase,
    pub to: SupervisorPhase,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid supervisor transition {} -> {}",
            self.from.as_str(),
            self.to.as_str()
        )
    }
}

impl std::error::Error for InvalidTransition {}

impl SupervisorPhase {
    pub fn advance(&mut self, next: Self) -> Result<(), InvalidTransition> {
        if !self.can_transition_to(next) {
            return Err(InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}
