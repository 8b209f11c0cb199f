//! GET_METRIC handler

use super::{HandlerContext, LocalResult};
use crate::dispatch::metrics::{age_between, MetricType};
use crate::error::DispatchError;
use bert_shared::keys;

/// Handle a GET_METRIC request
pub fn handle_get_metric(ctx: &HandlerContext, metric: Option<&str>) -> LocalResult {
    let result = metric
        .ok_or(DispatchError::MissingProperty(keys::METRIC))
        .and_then(|name| answer_metric(ctx, name));

    match result {
        Ok(text) => LocalResult::Answered { text },
        Err(error) => LocalResult::Rejected { error },
    }
}

/// Describe a metric in words
pub fn answer_metric(ctx: &HandlerContext, name: &str) -> Result<String, DispatchError> {
    let metric: MetricType = name.parse()?;
    let m = &ctx.metrics;

    Ok(match metric {
        MetricType::Age => {
            let (years, months, days) = age_between(ctx.identity.birth_date, ctx.today);
            format!(
                "My age is {} years, {} months and {} days",
                years, months, days
            )
        }
        MetricType::Cadence => format!("The cadence is {} milliseconds", m.cadence_ms()),
        MetricType::CycleCount => format!("I've processed {} requests", m.cycle_count()),
        MetricType::CycleTime => {
            format!("The average cycle time is {:.1} milliseconds", m.cycle_time_ms())
        }
        MetricType::DutyCycle => {
            format!("The current duty cycle is {:.1} percent", m.duty_cycle() * 100.0)
        }
        MetricType::Height => format!("I am {} centimeters tall", ctx.identity.height_cm),
        MetricType::Name => format!("My name is {}", ctx.identity.name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handlers::RobotIdentity;
    use crate::dispatch::metrics::CycleMetrics;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn ctx() -> HandlerContext {
        let mut metrics = CycleMetrics::new(1000, 0.5);
        metrics.record_cycle(Duration::from_millis(100));
        HandlerContext {
            identity: RobotIdentity {
                name: "bert".into(),
                height_cm: 83,
                birth_date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            },
            metrics,
            today: NaiveDate::from_ymd_opt(2021, 4, 11).unwrap(),
        }
    }

    #[test]
    fn test_cadence() {
        assert_eq!(
            answer_metric(&ctx(), "CADENCE").unwrap(),
            "The cadence is 1000 milliseconds"
        );
    }

    #[test]
    fn test_identity_metrics() {
        let ctx = ctx();
        assert_eq!(answer_metric(&ctx, "name").unwrap(), "My name is bert");
        assert_eq!(answer_metric(&ctx, "HEIGHT").unwrap(), "I am 83 centimeters tall");
        assert_eq!(
            answer_metric(&ctx, "AGE").unwrap(),
            "My age is 2 years, 3 months and 10 days"
        );
    }

    #[test]
    fn test_cycle_metrics() {
        let ctx = ctx();
        assert_eq!(answer_metric(&ctx, "CYCLECOUNT").unwrap(), "I've processed 1 requests");
        assert_eq!(
            answer_metric(&ctx, "CYCLETIME").unwrap(),
            "The average cycle time is 50.0 milliseconds"
        );
        assert_eq!(
            answer_metric(&ctx, "DUTYCYCLE").unwrap(),
            "The current duty cycle is 5.0 percent"
        );
    }

    #[test]
    fn test_unknown_and_missing_metric() {
        assert_eq!(
            handle_get_metric(&ctx(), Some("WEIGHT")),
            LocalResult::Rejected {
                error: DispatchError::UnknownMetric("WEIGHT".into())
            }
        );
        assert_eq!(
            handle_get_metric(&ctx(), None),
            LocalResult::Rejected {
                error: DispatchError::MissingProperty("metric")
            }
        );
    }
}
