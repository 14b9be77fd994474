// Analysis: summary tables and regressions over the processed rows

pub mod regression;
pub mod summary;

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, instrument, warn};

use crate::error::{QolError, Result};
use crate::types::{Metric, ObservationRow};
pub use regression::{fit_ols, RegressionResult, ALTERNATIVE_PREDICTORS, PRIMARY_PREDICTORS, QOL_CAVEAT};
pub use summary::{summarize, SummaryStatistics, SummaryTable, SUMMARY_METRICS};

#[derive(Debug, Clone, Serialize)]
pub struct YearRegression {
    pub year: u16,
    pub result: RegressionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub summary: SummaryTable,
    pub primary: RegressionResult,
    /// Disposable income in place of real income, when tax data exists
    pub alternative: Option<RegressionResult>,
    pub by_year: Vec<YearRegression>,
    /// Fits that were skipped and why
    pub notes: Vec<String>,
}

fn optional_fit(rows: &[ObservationRow], predictors: &[Metric], label: &str, notes: &mut Vec<String>) -> Result<Option<RegressionResult>> {
    match fit_ols(rows, Metric::QolScore, predictors) {
        Ok(result) => Ok(Some(result)),
        Err(QolError::InsufficientData(reason)) => {
            warn!("Skipping {} regression: {}", label, reason);
            notes.push(format!("{label}: {reason}"));
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Summaries, the primary regression, the disposable-income variant and
/// one regression per year
#[instrument(skip_all, fields(rows = rows.len()))]
pub fn analyze(rows: &[ObservationRow]) -> Result<AnalysisReport> {
    let summary = summarize(rows, &SUMMARY_METRICS);
    let primary = fit_ols(rows, Metric::QolScore, &PRIMARY_PREDICTORS)?;
    info!(r_squared = primary.r_squared, n = primary.n_samples, "Primary regression fitted");

    let mut notes = Vec::new();
    let alternative = if rows.iter().any(|r| r.disposable_income.is_some()) {
        optional_fit(rows, &ALTERNATIVE_PREDICTORS, "disposable income", &mut notes)?
    } else {
        notes.push("disposable income: no tax data".to_string());
        None
    };

    let years: BTreeSet<u16> = rows.iter().map(|r| r.year).collect();
    let mut by_year = Vec::new();
    for year in years {
        let subset: Vec<ObservationRow> = rows.iter().filter(|r| r.year == year).cloned().collect();
        if let Some(result) = optional_fit(&subset, &PRIMARY_PREDICTORS, &format!("year {year}"), &mut notes)? {
            by_year.push(YearRegression { year, result });
        }
    }

    Ok(AnalysisReport {
        summary,
        primary,
        alternative,
        by_year,
        notes,
    })
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Summary statistics")?;
        write!(f, "{}", self.summary)?;
        writeln!(f)?;
        writeln!(f, "Regression (all rows)")?;
        writeln!(f, "{}", self.primary)?;
        if let Some(alt) = &self.alternative {
            writeln!(f, "Regression (disposable income)")?;
            writeln!(f, "{alt}")?;
        }
        for yr in &self.by_year {
            writeln!(f, "Regression ({})", yr.year)?;
            writeln!(f, "{}", yr.result)?;
        }
        for note in &self.notes {
            writeln!(f, "Skipped: {note}")?;
        }
        Ok(())
    }
}
