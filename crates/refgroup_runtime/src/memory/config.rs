//! Ownership subsystem configuration

use serde::{Deserialize, Serialize};

/// What happens once a broken ownership invariant has been logged
///
/// Defaults to [`ViolationAction::Abort`]; this crate's own unit tests default
/// to [`ViolationAction::Panic`] so fatal paths can be asserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationAction {
    /// Panic with the violation message. The panic unwinds unless the final
    /// binary is built with `panic = "abort"`, so it can be caught with
    /// `catch_unwind` or end only the current thread, leaving the group behind.
    Panic,
    /// Terminate the process immediately
    Abort,
}

impl Default for ViolationAction {
    fn default() -> Self {
        if cfg!(test) {
            ViolationAction::Panic
        } else {
            ViolationAction::Abort
        }
    }
}

impl std::str::FromStr for ViolationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "panic" => Ok(ViolationAction::Panic),
            "abort" | "exit" => Ok(ViolationAction::Abort),
            _ => Err(format!("Unknown violation action: {}", s)),
        }
    }
}

/// Ownership subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Reaction to invariant violations
    pub on_violation: ViolationAction,
    /// Record group block allocations in the global profiler
    pub track_allocations: bool,
    /// Events kept per history kind by the profiler
    pub max_history: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            on_violation: ViolationAction::default(),
            track_allocations: cfg!(debug_assertions),
            max_history: 10_000,
        }
    }
}

impl MemoryConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(action) = std::env::var("REFGROUP_ON_VIOLATION")
            && let Ok(action) = action.parse()
        {
            config.on_violation = action;
        }

        if let Ok(track) = std::env::var("REFGROUP_TRACK_ALLOCATIONS")
            && let Some(track) = parse_flag(&track)
        {
            config.track_allocations = track;
        }

        if let Ok(history) = std::env::var("REFGROUP_TRACK_HISTORY")
            && let Ok(history) = history.parse::<usize>()
        {
            config.max_history = history;
        }

        config
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_violation_actions() {
        assert_eq!("panic".parse(), Ok(ViolationAction::Panic));
        assert_eq!("ABORT".parse(), Ok(ViolationAction::Abort));
        assert!("ignore".parse::<ViolationAction>().is_err());
    }

    #[test]
    fn parses_flags() {
        assert_eq!(parse_flag("On"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn default_panics_on_violation() {
        let config = MemoryConfig::default();
        assert_eq!(config.on_violation, ViolationAction::Panic);
        assert_eq!(config.max_history, 10_000);
    }
}
