//! Shared exponential backoff with jitter, used by the webhook-config watch
//! reopen loop and the readiness prober's poll loops.
use std::time::Duration;

use rand::Rng;

/// Backoff parameters: base 1s, factor 2, jitter fraction 0.1, capped at 10
/// steps (~17 minutes worst case before a caller's own cancellation takes
/// over).
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    jitter: f64,
    max_steps: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            jitter: 0.1,
            max_steps: 10,
        }
    }
}

impl Backoff {
    /// A shorter-cap variant for the readiness probe's server-reachability
    /// check, which should give up sooner than a long-lived watch loop.
    pub fn for_readiness_probe() -> Self {
        Self {
            max_steps: 6,
            ..Self::default()
        }
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Delay before retry attempt `step` (0-indexed), with jitter applied.
    pub fn delay(&self, step: u32) -> Duration {
        let step = step.min(self.max_steps.saturating_sub(1));
        let unjittered = self.base.as_secs_f64() * self.factor.powi(step as i32);
        let jitter_span = unjittered * self.jitter;
        let jittered = rand::rng().random_range((unjittered - jitter_span)..=(unjittered + jitter_span));
        Duration::from_secs_f64(jittered.max(0.0))
    }
}
