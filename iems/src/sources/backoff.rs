use std::time::Duration;

use serde::Deserialize;

/// Decides how long the link waits after a failed connection attempt.
pub trait Backoff: Send {
    /// Delay before the next attempt. Called once per failure.
    fn next_delay(&mut self) -> Duration;

    /// Called once a session is established.
    fn reset(&mut self);
}

/// The same delay after every failure.
#[derive(Clone, Debug)]
pub struct ConstantBackoff {
    delay: Duration,
}

impl ConstantBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Backoff for ConstantBackoff {
    fn next_delay(&mut self) -> Duration {
        self.delay
    }

    fn reset(&mut self) {}
}

/// Doubles the delay with every consecutive failure, starting at `base` and
/// never exceeding `max`.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        // keeps the shift in range, the cap takes over long before that anyway
        let shift = self.attempt.min(30);
        self.attempt = self.attempt.saturating_add(1);

        self.base
            .checked_mul(1 << shift)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn default_delay_ms() -> u64 {
    3_000
}

fn default_base_ms() -> u64 {
    500
}

fn default_max_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum BackoffConfig {
    Constant {
        #[serde(default = "default_delay_ms")]
        delay_ms: u64,
    },
    Exponential {
        #[serde(default = "default_base_ms")]
        base_ms: u64,
        #[serde(default = "default_max_ms")]
        max_ms: u64,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Constant {
            delay_ms: default_delay_ms(),
        }
    }
}

impl BackoffConfig {
    pub fn build(&self) -> Box<dyn Backoff> {
        match *self {
            BackoffConfig::Constant { delay_ms } => {
                Box::new(ConstantBackoff::new(Duration::from_millis(delay_ms)))
            }
            BackoffConfig::Exponential { base_ms, max_ms } => Box::new(ExponentialBackoff::new(
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_constant() {
        let mut backoff = ConstantBackoff::new(Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(1_000));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_does_not_overflow() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(60));
        }
    }

    #[test]
    fn test_config_defaults() {
        let conf: BackoffConfig = toml::from_str(r#"policy = "exponential""#).unwrap();
        assert_eq!(
            conf,
            BackoffConfig::Exponential {
                base_ms: 500,
                max_ms: 30_000
            }
        );

        let mut backoff = BackoffConfig::default().build();
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }
}
