use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{Metric, ObservationRow, StateCode};

/// Metrics summarized by default
pub const SUMMARY_METRICS: [Metric; 4] = [
    Metric::RealIncome,
    Metric::RentBurdenPct,
    Metric::OwnerBurdenPct,
    Metric::QolScore,
];

/// Descriptive statistics for one metric over a group of rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStatistics {
    pub metric: &'static str,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; unset below two values
    pub std_dev: Option<f64>,
    pub min: f64,
    pub max: f64,
}

impl SummaryStatistics {
    /// Compute statistics for a metric; `None` when no row has a value
    pub fn compute<'a, I>(rows: I, metric: Metric) -> Option<Self>
    where
        I: IntoIterator<Item = &'a ObservationRow>,
    {
        let mut values: Vec<f64> = rows.into_iter().filter_map(|row| metric.value(row)).collect();
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 1 {
            values[count / 2]
        } else {
            (values[count / 2 - 1] + values[count / 2]) / 2.0
        };
        let std_dev = (count > 1).then(|| {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (count - 1) as f64).sqrt()
        });

        Some(Self {
            metric: metric.name(),
            count,
            mean,
            median,
            std_dev,
            min: values[0],
            max: values[count - 1],
        })
    }
}

/// Summary tables per state and across all rows
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryTable {
    pub by_state: BTreeMap<StateCode, Vec<SummaryStatistics>>,
    pub overall: Vec<SummaryStatistics>,
}

pub fn summarize(rows: &[ObservationRow], metrics: &[Metric]) -> SummaryTable {
    let mut grouped: BTreeMap<StateCode, Vec<&ObservationRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.state).or_default().push(row);
    }

    let by_state = grouped
        .into_iter()
        .map(|(state, group)| {
            let stats = metrics
                .iter()
                .filter_map(|&m| SummaryStatistics::compute(group.iter().copied(), m))
                .collect();
            (state, stats)
        })
        .collect();
    let overall = metrics
        .iter()
        .filter_map(|&m| SummaryStatistics::compute(rows, m))
        .collect();

    SummaryTable { by_state, overall }
}

fn write_stats(f: &mut fmt::Formatter<'_>, stats: &[SummaryStatistics]) -> fmt::Result {
    for s in stats {
        let std = s.std_dev.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"));
        writeln!(
            f,
            "    {:<18} n={:<3} mean={:>12.3} median={:>12.3} std={:>10} min={:>12.3} max={:>12.3}",
            s.metric, s.count, s.mean, s.median, std, s.min, s.max
        )?;
    }
    Ok(())
}

impl fmt::Display for SummaryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (state, stats) in &self.by_state {
            writeln!(f, "  {} ({})", state, state.name())?;
            write_stats(f, stats)?;
        }
        writeln!(f, "  All states")?;
        write_stats(f, &self.overall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<ObservationRow> {
        [(StateCode::CA, 2022, 10.0), (StateCode::CA, 2023, 20.0), (StateCode::CA, 2024, 60.0), (StateCode::UT, 2024, 40.0)]
            .iter()
            .map(|&(state, year, v)| {
                let mut row = ObservationRow::new(state, year);
                row.real_income = Some(v);
                row
            })
            .collect()
    }

    #[test]
    fn test_statistics_compute() {
        let stats = SummaryStatistics::compute(&rows(), Metric::RealIncome).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, 32.5);
        assert_eq!(stats.median, 30.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 60.0);
        let expected_std = ((22.5f64.powi(2) + 12.5f64.powi(2) + 27.5f64.powi(2) + 7.5f64.powi(2)) / 3.0).sqrt();
        assert!((stats.std_dev.unwrap() - expected_std).abs() < 1e-12);
    }

    #[test]
    fn test_statistics_missing_metric() {
        assert!(SummaryStatistics::compute(&rows(), Metric::QolScore).is_none());
    }

    #[test]
    fn test_single_value_has_no_std() {
        let data = rows();
        let stats = SummaryStatistics::compute(data.iter().filter(|r| r.state == StateCode::UT), Metric::RealIncome).unwrap();
        assert_eq!(stats.std_dev, None);
        assert_eq!(stats.median, 40.0);
    }

    #[test]
    fn test_summarize_groups_by_state() {
        let table = summarize(&rows(), &SUMMARY_METRICS);
        assert_eq!(table.by_state.len(), 2);
        assert_eq!(table.by_state[&StateCode::CA][0].count, 3);
        assert_eq!(table.overall.len(), 1);
        assert!(table.to_string().contains("Utah"));
    }
}
