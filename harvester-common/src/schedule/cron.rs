use chrono::{DateTime, Utc};
use croner::Cron;

use crate::error::Error;

/// A parsed cron expression.
/// ---
/// Accepts the classic 5-field form and the 6-field form with a leading
/// seconds field. `?` is read as `*`.
#[derive(Clone, Debug)]
pub struct CronSchedule {
    expression: String,
    cron: Cron,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, Error> {
        let normalized = expression.trim().replace('?', "*");

        let field_count = normalized.split_whitespace().count();
        if !(5..=6).contains(&field_count) {
            return Err(Error::InvalidCronExpression {
                expression: expression.to_string(),
                reason: format!("expected 5 or 6 fields, found {field_count}"),
            });
        }

        let cron = Cron::new(&normalized)
            .with_seconds_optional()
            .parse()
            .map_err(|e| Error::InvalidCronExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.trim().to_string(),
            cron,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Earliest matching instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, Error> {
        self.cron
            .find_next_occurrence(&after, false)
            .map_err(|e| Error::InvalidCronExpression {
                expression: self.expression.clone(),
                reason: format!("no future occurrence: {e}"),
            })
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.cron.is_time_matching(&at).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Timelike};
    use rstest::rstest;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, s).single().expect("valid time")
    }

    #[rstest]
    #[case("0 * * * *", at(10, 15, 30), at(11, 0, 0))]
    #[case("0 * * * *", at(11, 0, 0), at(12, 0, 0))]
    #[case("*/15 * * * *", at(10, 14, 59), at(10, 15, 0))]
    #[case("30 * * * * *", at(10, 0, 10), at(10, 0, 30))]
    #[case("0 0 12 ? * *", at(10, 0, 0), at(12, 0, 0))]
    fn next_after_is_first_match_strictly_later(
        #[case] expr: &str,
        #[case] now: DateTime<Utc>,
        #[case] expected: DateTime<Utc>,
    ) {
        let schedule = CronSchedule::parse(expr).expect("valid cron");
        assert_eq!(schedule.next_after(now).expect("next"), expected);
    }

    #[rstest]
    #[case("")]
    #[case("* * *")]
    #[case("61 * * * *")]
    #[case("a b c d e")]
    #[case("* * * * * * * *")]
    fn malformed_expressions_are_rejected(#[case] expr: &str) {
        assert!(matches!(
            CronSchedule::parse(expr),
            Err(Error::InvalidCronExpression { .. })
        ));
    }

    #[rstest]
    #[case("*/7 * * * *")]
    #[case("5 4 * * *")]
    #[case("0 9-17 * * 1-5")]
    fn no_matching_minute_is_skipped(#[case] expr: &str) {
        let schedule = CronSchedule::parse(expr).expect("valid cron");
        let now = at(8, 3, 27);
        let next = schedule.next_after(now).expect("next");
        assert!(next > now);

        let mut probe = now.with_second(0).expect("valid second") + Duration::minutes(1);
        while probe < next {
            assert!(!schedule.matches(probe), "{expr} matched {probe} before {next}");
            probe += Duration::minutes(1);
        }
        assert!(schedule.matches(next));
    }
}
