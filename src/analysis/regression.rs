//! Ordinary least squares fits of the QoL score on its components.
//!
//! The score is a fixed linear combination of z-scored predictors, so a
//! fit on the same predictors recovers it almost exactly. Reports always
//! carry [`QOL_CAVEAT`] to make that explicit.

use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::error::{QolError, Result};
use crate::types::{Metric, ObservationRow};

pub const QOL_CAVEAT: &str = "The QoL score is a deterministic linear combination of z-scored predictors; \
a near-perfect fit is a mathematical identity, not evidence of predictive validity.";

pub const PRIMARY_PREDICTORS: [Metric; 3] = [Metric::RealIncome, Metric::RentBurdenPct, Metric::OwnerBurdenPct];
pub const ALTERNATIVE_PREDICTORS: [Metric; 3] =
    [Metric::DisposableIncome, Metric::RentBurdenPct, Metric::OwnerBurdenPct];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficient {
    pub predictor: &'static str,
    pub value: f64,
    /// Coefficient × sd(predictor) / sd(target)
    pub standardized: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionResult {
    pub target: &'static str,
    pub coefficients: Vec<Coefficient>,
    pub intercept: f64,
    pub r_squared: f64,
    /// Unset when n − p − 1 ≤ 0
    pub adj_r_squared: Option<f64>,
    pub rmse: f64,
    pub n_samples: usize,
    pub dominant_predictor: &'static str,
    pub caveat: &'static str,
}

fn sample_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

/// Fit `target ~ predictors` over rows where every value is present
pub fn fit_ols(rows: &[ObservationRow], target: Metric, predictors: &[Metric]) -> Result<RegressionResult> {
    let p = predictors.len();
    let complete: Vec<(Vec<f64>, f64)> = rows
        .iter()
        .filter_map(|row| {
            let y = target.value(row)?;
            let x = predictors.iter().map(|m| m.value(row)).collect::<Option<Vec<f64>>>()?;
            Some((x, y))
        })
        .collect();

    let n = complete.len();
    if n < p + 1 {
        return Err(QolError::InsufficientData(format!(
            "regression of {} needs at least {} complete rows, found {}",
            target.name(),
            p + 1,
            n
        )));
    }

    let flat: Vec<f64> = complete.iter().flat_map(|(x, _)| x.iter().copied()).collect();
    let x = Array2::from_shape_vec((n, p), flat)
        .map_err(|e| QolError::Model(format!("failed to build design matrix: {e}")))?;
    let y: Array1<f64> = complete.iter().map(|(_, y)| *y).collect();

    let y_mean = y.mean().unwrap_or_default();
    let ss_tot: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    if ss_tot <= f64::EPSILON {
        return Err(QolError::InsufficientData(format!("{} has no variance", target.name())));
    }

    let dataset = Dataset::new(x.clone(), y.clone());
    let model = LinearRegression::default()
        .fit(&dataset)
        .map_err(|e| QolError::Model(format!("linear regression failed: {e}")))?;
    let params = model.params().clone();
    let intercept = model.intercept();

    let fitted = x.dot(&params) + intercept;
    let ss_res: f64 = (&y - &fitted).iter().map(|r| r * r).sum();
    let r_squared = 1.0 - ss_res / ss_tot;
    let dof = n as i64 - p as i64 - 1;
    let adj_r_squared = (dof > 0).then(|| 1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / dof as f64);
    let rmse = (ss_res / n as f64).sqrt();

    let y_values = y.to_vec();
    let sd_y = sample_std(&y_values);
    let coefficients: Vec<Coefficient> = predictors
        .iter()
        .enumerate()
        .map(|(j, metric)| {
            let column = x.column(j).to_vec();
            Coefficient {
                predictor: metric.name(),
                value: params[j],
                standardized: params[j] * sample_std(&column) / sd_y,
            }
        })
        .collect();
    let dominant_predictor = coefficients
        .iter()
        .filter(|c| c.standardized.is_finite())
        .max_by(|a, b| a.standardized.abs().total_cmp(&b.standardized.abs()))
        .map(|c| c.predictor)
        .unwrap_or("none");

    debug!(target = target.name(), n, r_squared, "OLS fitted");
    Ok(RegressionResult {
        target: target.name(),
        coefficients,
        intercept,
        r_squared,
        adj_r_squared,
        rmse,
        n_samples: n,
        dominant_predictor,
        caveat: QOL_CAVEAT,
    })
}

impl fmt::Display for RegressionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let adj = self.adj_r_squared.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"));
        writeln!(
            f,
            "  {} ~ {}  (n={}, R²={:.4}, adj R²={}, RMSE={:.4})",
            self.target,
            self.coefficients.iter().map(|c| c.predictor).collect::<Vec<_>>().join(" + "),
            self.n_samples,
            self.r_squared,
            adj,
            self.rmse
        )?;
        writeln!(f, "    intercept            {:>14.6}", self.intercept)?;
        for c in &self.coefficients {
            writeln!(f, "    {:<20} {:>14.6e}  (standardized {:>8.4})", c.predictor, c.value, c.standardized)?;
        }
        writeln!(f, "    dominant predictor: {}", self.dominant_predictor)?;
        write!(f, "    note: {}", self.caveat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StateCode;

    fn row(year: u16, income: f64, rent: f64, owner: f64, score: f64) -> ObservationRow {
        let mut row = ObservationRow::new(StateCode::CA, year);
        row.real_income = Some(income);
        row.rent_burden_pct = Some(rent);
        row.owner_burden_pct = Some(owner);
        row.qol_score = Some(score);
        row
    }

    fn linear_rows() -> Vec<ObservationRow> {
        // score = 0.0001·income − 0.05·rent − 0.02·owner + 1
        [
            (80_000.0, 50.0, 55.0),
            (95_000.0, 45.0, 52.0),
            (70_000.0, 53.0, 57.0),
            (100_000.0, 48.0, 50.0),
            (88_000.0, 51.0, 58.0),
            (76_000.0, 44.0, 53.0),
        ]
        .iter()
        .map(|&(i, r, o)| row(2024, i, r, o, 0.0001 * i - 0.05 * r - 0.02 * o + 1.0))
        .collect()
    }

    #[test]
    fn test_exact_linear_relationship_recovered() {
        let result = fit_ols(&linear_rows(), Metric::QolScore, &PRIMARY_PREDICTORS).unwrap();
        assert_eq!(result.n_samples, 6);
        assert!((result.r_squared - 1.0).abs() < 1e-6);
        assert!((result.coefficients[0].value - 0.0001).abs() < 1e-6);
        assert!((result.coefficients[1].value + 0.05).abs() < 1e-4);
        assert!((result.intercept - 1.0).abs() < 1e-2);
        assert_eq!(result.dominant_predictor, "real_income");
        assert_eq!(result.caveat, QOL_CAVEAT);
        assert!(result.adj_r_squared.is_some());
    }

    #[test]
    fn test_incomplete_rows_skipped_and_minimum_enforced() {
        let mut rows = linear_rows();
        rows.truncate(3);
        rows.push(ObservationRow::new(StateCode::UT, 2024));
        let err = fit_ols(&rows, Metric::QolScore, &PRIMARY_PREDICTORS).unwrap_err();
        assert!(matches!(err, QolError::InsufficientData(_)));
    }

    #[test]
    fn test_adjusted_r_squared_unset_without_degrees_of_freedom() {
        let mut rows = linear_rows();
        rows.truncate(4);
        let result = fit_ols(&rows, Metric::QolScore, &PRIMARY_PREDICTORS).unwrap();
        assert_eq!(result.n_samples, 4);
        assert_eq!(result.adj_r_squared, None);
    }

    #[test]
    fn test_display_prints_caveat() {
        let result = fit_ols(&linear_rows(), Metric::QolScore, &PRIMARY_PREDICTORS).unwrap();
        let rendered = result.to_string();
        assert!(rendered.contains("mathematical identity"));
        assert!(rendered.contains("dominant predictor: real_income"));
    }
}
