#![forbid(unsafe_code)]

pub mod phase;
pub mod pids;
pub mod retry;

pub mod health {
    /// Result of one liveness decision. Computed fresh for every probe and never cached.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum HealthStatus {
        Healthy,
        Unhealthy,
        Exhausted,
    }

    impl HealthStatus {
        pub fn is_healthy(self) -> bool {
            matches!(self, Self::Healthy)
        }

        pub fn as_str(self) -> &'static str {
            match self {
                Self::Healthy => "healthy",
                Self::Unhealthy => "unhealthy",
                Self::Exhausted => "exhausted",
            }
        }
    }
}
