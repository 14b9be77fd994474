use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::types::ObservationRow;

const TAX_BURDEN_RANGE_PCT: (f64, f64) = (0.0, 30.0);
const ABS_TOLERANCE: f64 = 1e-6;
const REL_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckStatus {
    Ok,
    Info,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Info => "INFO",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub outcomes: Vec<CheckOutcome>,
}

impl ValidationReport {
    fn push(&mut self, status: CheckStatus, message: impl Into<String>) {
        self.outcomes.push(CheckOutcome {
            status,
            message: message.into(),
        });
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status == CheckStatus::Fail).count()
    }

    pub fn warnings(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status == CheckStatus::Warn).count()
    }

    pub fn passed(&self) -> bool {
        self.failures() == 0
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "[{}] {}", outcome.status, outcome.message)?;
        }
        Ok(())
    }
}

fn approx_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= ABS_TOLERANCE.max(REL_TOLERANCE * a.abs().max(b.abs()))
}

/// Compare a stored derived value with its recomputation. Only rows where
/// every input and the stored value are present are checked.
fn check_derived(
    report: &mut ValidationReport,
    rows: &[ObservationRow],
    field: &str,
    stored: fn(&ObservationRow) -> Option<f64>,
    expected: fn(&ObservationRow) -> Option<f64>,
) {
    let mut checked = 0;
    let mut mismatched = 0;
    for row in rows {
        let (Some(got), Some(want)) = (stored(row), expected(row)) else {
            continue;
        };
        checked += 1;
        if !approx_equal(got, want) {
            mismatched += 1;
            report.push(
                CheckStatus::Fail,
                format!("{field} mismatch for {} {}: got {got}, expected {want}", row.state, row.year),
            );
        }
    }
    if mismatched == 0 && checked > 0 {
        report.push(CheckStatus::Ok, format!("{field} consistent on {checked} rows"));
    }
}

/// QA checks on a processed table
pub fn validate_rows(rows: &[ObservationRow]) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mut seen = HashSet::new();
    let duplicates = rows.iter().filter(|r| !seen.insert(r.key())).count();
    if duplicates > 0 {
        report.push(CheckStatus::Fail, format!("Duplicate (state, year) rows: {duplicates}"));
    } else {
        report.push(CheckStatus::Ok, "Unique (state, year) combinations");
    }

    let out_of_range = rows
        .iter()
        .flat_map(|r| [r.rent_burden_pct, r.owner_burden_pct])
        .flatten()
        .filter(|p| !(0.0..=100.0).contains(p))
        .count();
    if out_of_range > 0 {
        report.push(CheckStatus::Fail, format!("Burden percentages outside 0–100%: {out_of_range}"));
    } else {
        report.push(CheckStatus::Ok, "Burden percentages within 0–100%");
    }

    let taxes: Vec<f64> = rows.iter().filter_map(|r| r.tax_burden_pct).collect();
    if !taxes.is_empty() {
        let (lo, hi) = TAX_BURDEN_RANGE_PCT;
        let bad = taxes.iter().filter(|t| **t < lo || **t > hi).count();
        if bad > 0 {
            report.push(CheckStatus::Warn, format!("Tax burden out of expected range (0–30%): {bad} rows"));
        } else {
            report.push(CheckStatus::Ok, "Tax burden within 0–30%");
        }
    }

    check_derived(&mut report, rows, "annual_rent", |r| r.annual_rent, |r| {
        r.median_rent_monthly.map(|m| m * 12.0)
    });
    check_derived(&mut report, rows, "rent_burden_ratio", |r| r.rent_burden_ratio, |r| {
        match (r.annual_rent, r.median_income) {
            (Some(rent), Some(income)) if income != 0.0 => Some(rent / income),
            _ => None,
        }
    });
    check_derived(&mut report, rows, "price_to_income_ratio", |r| r.price_to_income_ratio, |r| {
        match (r.median_home_value, r.median_income) {
            (Some(value), Some(income)) if income != 0.0 => Some(value / income),
            _ => None,
        }
    });
    check_derived(&mut report, rows, "disposable_income", |r| r.disposable_income, |r| {
        Some(r.real_income? * (1.0 - r.tax_burden_rate?))
    });

    let cpi_index: Vec<f64> = rows.iter().filter_map(|r| r.cpi_index).collect();
    if !cpi_index.is_empty() {
        let min = cpi_index.iter().copied().fold(f64::INFINITY, f64::min);
        let max = cpi_index.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        report.push(CheckStatus::Info, format!("cpi_index range: {min:.2} – {max:.2}"));
    }

    report
}
