/// Errors surfaced by the engine, its schedule validation, and the profile.
///
/// Validation variants are reported from [`crate::Engine::new`] and are never
/// retriable; runtime per-call failures are recorded in stats and the error
/// ring instead of being returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("either a gun or a virtual user implementation must be provided")]
    NoImpl,

    #[error("no schedule segments were provided")]
    NoSchedule,

    #[error("rate load selected but no gun implementation was provided")]
    NoGun,

    #[error("virtual user load selected but no virtual user implementation was provided")]
    NoVu,

    #[error("schedule segment start level must be at least 1")]
    InvalidStart,

    #[error("schedule segment must define both steps and step duration")]
    InvalidSteps,

    /// Synthetic per-call timeout. The display string is the exact error
    /// recorded on timed-out call results.
    #[error("CallTimeout")]
    CallTimeout,

    #[error("virtual user setup failed: {0}")]
    Setup(String),

    #[error("peer sync barrier failed: {0}")]
    Barrier(String),

    #[error("invalid environment variable {name}: {reason}")]
    Env { name: String, reason: String },

    #[error("sink rejected payload: {0}")]
    Sink(String),

    #[error("{count} alert(s) fired during the run")]
    AlertsFired { count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_timeout_display_is_the_wire_string() {
        assert_eq!(Error::CallTimeout.to_string(), "CallTimeout");
    }

    #[test]
    fn validation_errors_display() {
        assert_eq!(
            Error::NoSchedule.to_string(),
            "no schedule segments were provided"
        );
        assert_eq!(
            Error::InvalidStart.to_string(),
            "schedule segment start level must be at least 1"
        );
    }

    #[test]
    fn env_error_carries_variable_name() {
        let err = Error::Env {
            name: "WASP_JOBS".to_string(),
            reason: "not a number".to_string(),
        };
        assert!(err.to_string().contains("WASP_JOBS"));
    }

    #[test]
    fn errors_are_comparable() {
        assert_eq!(Error::NoGun, Error::NoGun);
        assert_ne!(Error::NoGun, Error::NoVu);
    }
}
