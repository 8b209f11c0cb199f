//! Dispatch loop metrics
//!
//! Cycle time and duty cycle are exponentially weighted moving averages:
//! `avg = (1 - weight) * sample + weight * avg`.

use crate::error::DispatchError;
use chrono::{Datelike, Months, NaiveDate};
use std::str::FromStr;
use std::time::Duration;

/// Metrics a client can ask for with GET_METRIC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Age,
    Cadence,
    CycleCount,
    CycleTime,
    DutyCycle,
    Height,
    Name,
}

impl FromStr for MetricType {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AGE" => Ok(MetricType::Age),
            "CADENCE" => Ok(MetricType::Cadence),
            "CYCLECOUNT" => Ok(MetricType::CycleCount),
            "CYCLETIME" => Ok(MetricType::CycleTime),
            "DUTYCYCLE" => Ok(MetricType::DutyCycle),
            "HEIGHT" => Ok(MetricType::Height),
            "NAME" => Ok(MetricType::Name),
            _ => Err(DispatchError::UnknownMetric(s.to_string())),
        }
    }
}

/// Counters and averages updated once per dispatch cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleMetrics {
    cadence_ms: u64,
    weight: f64,
    cycle_count: u64,
    cycle_time_ms: f64,
    duty_cycle: f64,
}

impl CycleMetrics {
    pub fn new(cadence_ms: u64, weight: f64) -> Self {
        Self {
            cadence_ms,
            weight,
            cycle_count: 0,
            cycle_time_ms: 0.0,
            duty_cycle: 0.0,
        }
    }

    /// Fold one cycle's processing time into the averages
    pub fn record_cycle(&mut self, elapsed: Duration) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let w = self.weight;

        self.cycle_count += 1;
        self.cycle_time_ms = (1.0 - w) * elapsed_ms + w * self.cycle_time_ms;
        self.duty_cycle = (1.0 - w) * (elapsed_ms / self.cadence_ms as f64) + w * self.duty_cycle;
    }

    pub fn cadence_ms(&self) -> u64 {
        self.cadence_ms
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Smoothed cycle processing time
    pub fn cycle_time_ms(&self) -> f64 {
        self.cycle_time_ms
    }

    /// Smoothed fraction of the cadence spent processing, 0.0 - 1.0+
    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle
    }
}

/// Calendar age between two dates as (years, months, days)
///
/// Returns zeros if `today` is before `birth`.
pub fn age_between(birth: NaiveDate, today: NaiveDate) -> (u32, u32, u32) {
    if today <= birth {
        return (0, 0, 0);
    }

    let mut months = (today.year() - birth.year()) * 12 + today.month() as i32 - birth.month() as i32;
    if today.day() < birth.day() {
        months -= 1;
    }
    let months = months.max(0) as u32;

    let anchor = birth
        .checked_add_months(Months::new(months))
        .unwrap_or(birth);
    let days = (today - anchor).num_days().max(0) as u32;

    (months / 12, months % 12, days)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_metric_names() {
        assert_eq!("cadence".parse::<MetricType>(), Ok(MetricType::Cadence));
        assert_eq!("DutyCycle".parse::<MetricType>(), Ok(MetricType::DutyCycle));
        assert_eq!(
            "WEIGHT".parse::<MetricType>(),
            Err(DispatchError::UnknownMetric("WEIGHT".into()))
        );
    }

    #[test]
    fn test_first_cycle() {
        let mut metrics = CycleMetrics::new(1000, 0.5);
        metrics.record_cycle(Duration::from_millis(100));

        assert_eq!(metrics.cycle_count(), 1);
        assert!((metrics.cycle_time_ms() - 50.0).abs() < 1e-9);
        assert!((metrics.duty_cycle() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_ewma_converges_to_constant_sample() {
        for initial in [0.0, 10_000.0] {
            let mut metrics = CycleMetrics::new(1000, 0.5);
            metrics.cycle_time_ms = initial;

            for _ in 0..60 {
                metrics.record_cycle(Duration::from_millis(40));
            }

            assert!(
                (metrics.cycle_time_ms() - 40.0).abs() < 1e-6,
                "from {} got {}",
                initial,
                metrics.cycle_time_ms()
            );
            assert!((metrics.duty_cycle() - 0.04).abs() < 1e-6);
        }
    }

    #[test]
    fn test_zero_weight_tracks_last_sample() {
        let mut metrics = CycleMetrics::new(200, 0.0);
        metrics.record_cycle(Duration::from_millis(10));
        metrics.record_cycle(Duration::from_millis(50));
        assert!((metrics.cycle_time_ms() - 50.0).abs() < 1e-9);
        assert!((metrics.duty_cycle() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_age_between() {
        assert_eq!(age_between(date(2019, 1, 1), date(2019, 1, 1)), (0, 0, 0));
        assert_eq!(age_between(date(2019, 1, 1), date(2021, 4, 11)), (2, 3, 10));
        assert_eq!(age_between(date(2019, 1, 31), date(2019, 3, 1)), (0, 1, 1));
        assert_eq!(age_between(date(2020, 5, 20), date(2021, 5, 19)), (0, 11, 29));
        assert_eq!(age_between(date(2030, 1, 1), date(2020, 1, 1)), (0, 0, 0));
    }
}
