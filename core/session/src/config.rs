//! Timing knobs for probes and daemon startup.
//!
//! A probe against an orphaned socket file or a wedged peer must give up
//! within these bounds.

use std::env;
use std::time::Duration;

pub const READY_TIMEOUT_ENV: &str = "SHINEYSHOT_READY_TIMEOUT_MS";

const PROBE_DEADLINE_MS: u64 = 2000;
const READY_POLL_MS: u64 = 50;
const READY_TIMEOUT_MS: u64 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Overall budget for one READY/PING/PONG probe.
    pub probe_deadline: Duration,
    /// Sleep between readiness probes while a daemon starts.
    pub ready_poll: Duration,
    /// How long `start` waits for the daemon to answer a probe.
    pub ready_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            probe_deadline: Duration::from_millis(PROBE_DEADLINE_MS),
            ready_poll: Duration::from_millis(READY_POLL_MS),
            ready_timeout: Duration::from_millis(READY_TIMEOUT_MS),
        }
    }
}

impl Timings {
    /// Defaults, with the readiness deadline overridable from the environment.
    pub fn from_env() -> Self {
        let mut timings = Self::default();
        if let Some(ms) = env::var(READY_TIMEOUT_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            timings.ready_timeout = Duration::from_millis(ms);
        }
        timings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_budget() {
        let timings = Timings::default();
        assert_eq!(timings.probe_deadline, Duration::from_secs(2));
        assert_eq!(timings.ready_poll, Duration::from_millis(50));
        assert_eq!(timings.ready_timeout, Duration::from_secs(3));
    }
}
