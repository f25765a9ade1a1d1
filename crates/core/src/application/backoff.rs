// Crash-respawn backoff policy

use std::time::Duration;

use crate::application::constants::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_FACTOR, DEFAULT_BACKOFF_MAX,
};

/// Exponential backoff for same-cycle respawns after a crash.
///
/// The delay for respawn `attempt` (0-indexed) is
/// `base * factor^attempt`, clamped to `max`, with a deterministic
/// ±10% jitter seeded by the job name and attempt number. The base is
/// derived from the attempt alone, so jitter never feeds back into
/// later delays.
#[derive(Debug, Clone, Copy)]
pub struct RestartBackoff {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
}

impl Default for RestartBackoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            factor: DEFAULT_BACKOFF_FACTOR,
            max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl RestartBackoff {
    pub fn delay(&self, job: &str, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let raw = self.base.as_secs_f64() * self.factor.powi(exp);
        let base = if !raw.is_finite() || raw < 0.0 || raw > max_secs {
            max_secs
        } else {
            raw
        };

        // Deterministic jitter in [0.9, 1.1), seeded per job and attempt.
        let seed = job
            .bytes()
            .fold(attempt, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        let jitter = 0.9 + (seed % 21) as f64 / 100.0;

        Duration::from_secs_f64((base * jitter).min(max_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RestartBackoff {
        RestartBackoff {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(10),
        }
    }

    #[test]
    fn first_attempt_is_near_base() {
        let d = policy().delay("collector", 0);
        assert!(d >= Duration::from_millis(90), "{:?}", d);
        assert!(d <= Duration::from_millis(110), "{:?}", d);
    }

    #[test]
    fn delays_grow_then_cap() {
        let p = policy();
        let early = p.delay("collector", 1);
        let later = p.delay("collector", 5);
        assert!(later > early);
        assert!(p.delay("collector", 30) <= Duration::from_secs(10));
    }

    #[test]
    fn jitter_is_deterministic() {
        let p = policy();
        assert_eq!(p.delay("collector", 2), p.delay("collector", 2));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let d = policy().delay("collector", u32::MAX);
        assert!(d <= Duration::from_secs(10));
    }
}
