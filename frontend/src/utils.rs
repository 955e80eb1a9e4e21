use shared::{BackoffConfig, RetrySection};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maps the current retry interval to the next one.
pub type IntervalModifier = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("condition not met after {attempts} retries")]
    RetryExhausted { attempts: u32 },
}

/// How long and how often [`until_ready`] keeps checking.
#[derive(Clone)]
pub struct RetryPolicy {
    /// `None` retries until the condition holds.
    pub max_attempts: Option<u32>,
    pub interval: Duration,
    pub modifier: IntervalModifier,
}

impl RetryPolicy {
    pub fn new(max_attempts: Option<u32>, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            modifier: constant(),
        }
    }

    pub fn with_modifier(
        mut self,
        modifier: impl Fn(Duration) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.modifier = Arc::new(modifier);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySection::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        // Any negative budget means "forever"; -1 is the documented spelling.
        let max_attempts = u32::try_from(section.max_attempts).ok();
        let modifier = match section.backoff {
            BackoffConfig::Constant => constant(),
            BackoffConfig::Linear { step_ms } => linear(Duration::from_millis(step_ms)),
            BackoffConfig::Exponential {
                factor,
                max_interval_ms,
            } => exponential(factor, Duration::from_millis(max_interval_ms)),
        };
        Self {
            max_attempts,
            interval: Duration::from_millis(section.interval_ms),
            modifier,
        }
    }
}

pub fn constant() -> IntervalModifier {
    Arc::new(|interval| interval)
}

pub fn linear(step: Duration) -> IntervalModifier {
    Arc::new(move |interval: Duration| interval.saturating_add(step))
}

/// Multiplies the interval by `factor`, never exceeding `max`.
pub fn exponential(factor: f64, max: Duration) -> IntervalModifier {
    Arc::new(move |interval: Duration| {
        let next = interval.as_secs_f64() * factor;
        if !next.is_finite() || next >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(next.max(0.0))
        }
    })
}

struct RetryState {
    attempt: u32,
    interval: Duration,
}

/// Resolves once `is_ready` returns true.
///
/// The condition is checked before any sleep, so an already-satisfied
/// condition resolves without suspending. Each failed check bumps the attempt
/// counter, fails once the budget is exceeded and otherwise sleeps for the
/// next interval produced by the policy's modifier.
///
/// There is no cancellation token; dropping the returned future stops polling.
pub async fn until_ready<F>(mut is_ready: F, policy: &RetryPolicy) -> Result<(), PollError>
where
    F: FnMut() -> bool,
{
    let mut state = RetryState {
        attempt: 0,
        interval: policy.interval,
    };
    while !is_ready() {
        state.attempt += 1;
        if let Some(max_attempts) = policy.max_attempts {
            if state.attempt > max_attempts {
                return Err(PollError::RetryExhausted {
                    attempts: max_attempts,
                });
            }
        }
        state.interval = (policy.modifier)(state.interval);
        log::trace!(
            "condition not ready, attempt {} sleeping {:?}",
            state.attempt,
            state.interval
        );
        tokio::time::sleep(state.interval).await;
    }
    Ok(())
}
