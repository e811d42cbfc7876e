use std::time::Duration;

/// Exponential backoff between attempts of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry `retry` (1-based): `initial * multiplier^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1, 5)]
    #[case(2, 10)]
    #[case(3, 20)]
    #[case(4, 40)]
    #[case(5, 60)]
    #[case(40, 60)]
    #[case(u32::MAX, 60)]
    fn default_policy_doubles_up_to_a_minute(#[case] retry: u32, #[case] secs: u64) {
        assert_eq!(RetryPolicy::default().delay_for(retry), Duration::from_secs(secs));
    }

    #[test]
    fn unit_multiplier_is_a_fixed_delay() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            multiplier: 1.0,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(9), Duration::from_millis(250));
    }

    #[test]
    fn delays_never_shrink() {
        let policy = RetryPolicy::default();
        let delays: Vec<Duration> = (1..12).map(|k| policy.delay_for(k)).collect();

        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }
}
