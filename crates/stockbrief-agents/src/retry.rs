//! Retry policy and per-request attempt state machine.
//!
//! A request moves `Pending → InFlight → {Succeeded | RetryScheduled → InFlight | Failed}`.
//! The machine is pure: callers feed it outcomes and a jitter sample and act on the
//! returned state, which keeps the backoff schedule testable without a network or a
//! real clock.

use std::time::Duration;

use async_trait::async_trait;
use stockbrief_models::config::RetryConfig;

/// Sleeps between attempts. Injected so tests can observe delays without waiting.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the step delay added as jitter, clamped to `[0, 1]`.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: finite_unit(config.jitter_ratio),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_ratio: 0.0,
        }
    }

    /// Delay before retry number `retry` (1-based): `base · 2^(retry-1)` plus up to
    /// `jitter_ratio` of that step, capped at `max_delay`. `jitter_unit` is a sample
    /// from `[0, 1)`.
    ///
    /// With `jitter_ratio ≤ 1` the worst jittered step never exceeds the next
    /// unjittered step, so successive delays are non-decreasing.
    pub fn delay_for(&self, retry: u32, jitter_unit: f64) -> Duration {
        let exponent = retry.saturating_sub(1).min(20);
        let step = self.base_delay.as_secs_f64() * f64::from(1u32 << exponent);
        let jitter = step * finite_unit(self.jitter_ratio) * finite_unit(jitter_unit);
        Duration::try_from_secs_f64(step + jitter)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Clamp to `[0, 1]`, mapping NaN and infinities to 0.
fn finite_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState {
    Pending,
    InFlight { attempt: u32 },
    RetryScheduled { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Attempt bookkeeping for one logical request.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: AttemptState,
    /// Last scheduled delay. Later delays never drop below it.
    last_delay: Duration,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: AttemptState::Pending,
            last_delay: Duration::ZERO,
        }
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// Move to `InFlight` and return the 1-based attempt number.
    ///
    /// Only valid from `Pending` or `RetryScheduled`; calling it in any other state
    /// leaves the state unchanged.
    pub fn begin(&mut self) -> u32 {
        let attempt = match self.state {
            AttemptState::Pending => 1,
            AttemptState::RetryScheduled { attempt, .. } => attempt + 1,
            AttemptState::InFlight { attempt } => return attempt,
            AttemptState::Succeeded { attempts } | AttemptState::Failed { attempts } => {
                return attempts
            }
        };
        self.state = AttemptState::InFlight { attempt };
        attempt
    }

    pub fn succeed(&mut self) -> &AttemptState {
        if let AttemptState::InFlight { attempt } = self.state {
            self.state = AttemptState::Succeeded { attempts: attempt };
        }
        &self.state
    }

    /// Record a failed attempt. Transient failures schedule a retry while attempts
    /// remain; everything else is terminal. A provider `retry_after` hint raises the
    /// delay to at least that value.
    pub fn fail(
        &mut self,
        transient: bool,
        retry_after: Option<Duration>,
        jitter_unit: f64,
    ) -> &AttemptState {
        let AttemptState::InFlight { attempt } = self.state else {
            return &self.state;
        };

        self.state = if transient && attempt < self.policy.max_attempts {
            let mut delay = self
                .policy
                .delay_for(attempt, jitter_unit)
                .max(self.last_delay);
            if let Some(hint) = retry_after {
                delay = delay.max(hint);
            }
            self.last_delay = delay;
            AttemptState::RetryScheduled { attempt, delay }
        } else {
            AttemptState::Failed { attempts: attempt }
        };
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.5,
        }
    }

    #[test]
    fn default_policy_from_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn zero_attempts_clamped_to_one() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert_eq!(RetryPolicy::from(&config).max_attempts, 1);
    }

    #[test]
    fn delay_doubles_without_jitter() {
        let p = policy(5);
        assert_eq!(p.delay_for(1, 0.0), Duration::from_secs(1));
        assert_eq!(p.delay_for(2, 0.0), Duration::from_secs(2));
        assert_eq!(p.delay_for(3, 0.0), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped() {
        let p = policy(10);
        assert_eq!(p.delay_for(8, 0.99), Duration::from_secs(30));
    }

    #[test]
    fn jittered_delays_never_decrease() {
        let p = RetryPolicy {
            jitter_ratio: 1.0,
            ..policy(10)
        };
        // worst case: maximal jitter followed by none
        for retry in 1..8 {
            assert!(p.delay_for(retry, 0.999) <= p.delay_for(retry + 1, 0.0));
        }
    }

    #[test]
    fn transient_failures_until_exhausted() {
        let mut machine = RetryMachine::new(policy(3));
        assert_eq!(machine.state(), &AttemptState::Pending);

        assert_eq!(machine.begin(), 1);
        assert_eq!(
            machine.fail(true, None, 0.0),
            &AttemptState::RetryScheduled {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(machine.begin(), 2);
        assert_eq!(
            machine.fail(true, None, 0.0),
            &AttemptState::RetryScheduled {
                attempt: 2,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(machine.begin(), 3);
        assert_eq!(
            machine.fail(true, None, 0.0),
            &AttemptState::Failed { attempts: 3 }
        );
        assert!(machine.state().is_terminal());
    }

    #[test]
    fn permanent_failure_is_immediate() {
        let mut machine = RetryMachine::new(policy(3));
        machine.begin();
        assert_eq!(
            machine.fail(false, None, 0.0),
            &AttemptState::Failed { attempts: 1 }
        );
    }

    #[test]
    fn success_after_retry() {
        let mut machine = RetryMachine::new(policy(3));
        machine.begin();
        machine.fail(true, None, 0.0);
        machine.begin();
        assert_eq!(machine.succeed(), &AttemptState::Succeeded { attempts: 2 });
    }

    #[test]
    fn retry_after_hint_extends_delay() {
        let mut machine = RetryMachine::new(policy(3));
        machine.begin();
        assert_eq!(
            machine.fail(true, Some(Duration::from_secs(20)), 0.0),
            &AttemptState::RetryScheduled {
                attempt: 1,
                delay: Duration::from_secs(20)
            }
        );
    }

    #[test]
    fn hinted_delay_is_a_floor_for_later_retries() {
        let mut machine = RetryMachine::new(policy(4));
        machine.begin();
        machine.fail(true, Some(Duration::from_secs(20)), 0.0);
        machine.begin();
        assert_eq!(
            machine.fail(true, None, 0.0),
            &AttemptState::RetryScheduled {
                attempt: 2,
                delay: Duration::from_secs(20)
            }
        );
    }

    #[test]
    fn nan_jitter_ratio_is_ignored() {
        let config: stockbrief_models::config::StockbriefConfig =
            toml::from_str("[gateway.retry]\njitter_ratio = nan").unwrap();
        assert!(config.gateway.retry.jitter_ratio.is_nan());

        let p = RetryPolicy::from(&config.gateway.retry);
        assert_eq!(p.jitter_ratio, 0.0);
        assert_eq!(p.delay_for(1, 0.5), Duration::from_secs(1));
        assert_eq!(p.delay_for(2, f64::NAN), Duration::from_secs(2));
    }

    #[test]
    fn huge_base_delay_caps_instead_of_panicking() {
        let config = RetryConfig {
            base_delay_ms: u64::MAX,
            max_delay_ms: 60_000,
            ..RetryConfig::default()
        };
        let p = RetryPolicy::from(&config);
        assert_eq!(p.delay_for(20, 0.5), Duration::from_secs(60));

        let unchecked = RetryPolicy {
            jitter_ratio: f64::INFINITY,
            ..policy(3)
        };
        assert_eq!(unchecked.delay_for(1, 0.5), Duration::from_secs(1));
    }

    #[test]
    fn outcomes_ignored_outside_in_flight() {
        let mut machine = RetryMachine::new(policy(3));
        assert_eq!(machine.fail(true, None, 0.0), &AttemptState::Pending);
        assert_eq!(machine.succeed(), &AttemptState::Pending);
    }
}
