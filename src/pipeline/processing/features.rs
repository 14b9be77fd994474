//! Feature engineering: housing ratios, burden percentages, CPI-adjusted
//! income, disposable income and the composite QoL score.
//!
//! Everything here is a per-row function except the sample-mean CPI
//! baseline and the z-score normalization, which look at the comparison
//! population.

use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

use crate::constants::{WEIGHT_OWNER_BURDEN, WEIGHT_REAL_INCOME, WEIGHT_RENT_BURDEN};
use crate::error::{QolError, Result};
use crate::types::{BaselinePolicy, NormalizationScope, ObservationRow};

/// Per-run feature policies
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureSettings {
    pub baseline: BaselinePolicy,
    pub scope: NormalizationScope,
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d).filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Annual rent, rent-to-income and price-to-income
pub fn add_housing_ratios(rows: &mut [ObservationRow]) {
    for row in rows.iter_mut() {
        row.annual_rent = row.median_rent_monthly.map(|m| m * 12.0);
        row.rent_burden_ratio = ratio(row.annual_rent, row.median_income);
        row.price_to_income_ratio = ratio(row.median_home_value, row.median_income);
    }
}

/// Share of households at or above 30% of income, in percent.
/// Returns the value and whether it had to be clamped into [0, 100].
pub fn burden_pct(count: Option<f64>, total: Option<f64>) -> (Option<f64>, bool) {
    let (Some(count), Some(total)) = (count, total) else {
        return (None, false);
    };
    if total <= 0.0 {
        return (None, false);
    }
    let pct = count / total * 100.0;
    if !pct.is_finite() {
        return (None, false);
    }
    let clamped = pct.clamp(0.0, 100.0);
    (Some(clamped), clamped != pct)
}

pub fn add_burden_percentages(rows: &mut [ObservationRow]) {
    for row in rows.iter_mut() {
        let (rent, rent_clamped) = burden_pct(row.rent_burden_30plus, row.rent_burden_total);
        let (owner, owner_clamped) = burden_pct(row.owner_burden_30plus, row.owner_burden_total);
        row.rent_burden_pct = rent;
        row.owner_burden_pct = owner;
        if rent_clamped {
            row.quality_flags.insert("inconsistent_counts:rent_burden".to_string());
        }
        if owner_clamped {
            row.quality_flags.insert("inconsistent_counts:owner_burden".to_string());
        }
    }
}

/// Resolve the CPI baseline for the run
pub fn resolve_baseline(rows: &[ObservationRow], policy: BaselinePolicy) -> Result<f64> {
    match policy {
        BaselinePolicy::Fixed(value) if value > 0.0 && value.is_finite() => Ok(value),
        BaselinePolicy::Fixed(value) => Err(QolError::Config(format!("CPI baseline must be positive, got {value}"))),
        BaselinePolicy::SampleMean => {
            let values: Vec<f64> = rows.iter().filter_map(|r| r.cpi).filter(|c| *c > 0.0).collect();
            if values.is_empty() {
                return Err(QolError::InsufficientData(
                    "no CPI values to build a sample-mean baseline".to_string(),
                ));
            }
            Ok(values.iter().sum::<f64>() / values.len() as f64)
        }
    }
}

/// Real income = nominal × baseline / CPI, plus the CPI index and the
/// baseline columns. Returns the baseline used.
pub fn adjust_for_inflation(rows: &mut [ObservationRow], policy: BaselinePolicy) -> Result<f64> {
    let baseline = resolve_baseline(rows, policy)?;
    for row in rows.iter_mut() {
        row.cpi_baseline = Some(baseline);
        row.cpi_base_note = Some(policy.note().to_string());
        let cpi = row.cpi.filter(|c| *c > 0.0);
        row.cpi_index = cpi.map(|c| c / baseline * 100.0);
        row.real_income = match (row.median_income, cpi) {
            (Some(income), Some(c)) if c == baseline => Some(income),
            (Some(income), Some(c)) => Some(income * (baseline / c)),
            _ => None,
        };
    }
    debug!(baseline, note = policy.note(), "CPI baseline applied");
    Ok(baseline)
}

/// Disposable income = real income × (1 − tax rate); unset without a tax rate
pub fn add_disposable_income(rows: &mut [ObservationRow]) {
    for row in rows.iter_mut() {
        row.tax_burden_pct = row.tax_burden_rate.map(|r| r * 100.0);
        row.disposable_income = match (row.real_income, row.tax_burden_rate) {
            (Some(income), Some(rate)) => Some(income * (1.0 - rate)),
            _ => None,
        };
    }
}

/// Z-scores against the population standard deviation
pub fn zscores(values: &[f64], metric: &str, population: &str) -> Result<Vec<f64>> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    if values.len() < 2 || !std.is_finite() || std <= f64::EPSILON * mean.abs().max(1.0) {
        return Err(QolError::DegenerateNormalization {
            metric: metric.to_string(),
            population: population.to_string(),
        });
    }
    Ok(values.iter().map(|v| (v - mean) / std).collect())
}

/// Composite score over each comparison population. Rows lacking any
/// component are left out of the population and stay unscored.
/// Returns the number of scored rows.
pub fn compute_qol_scores(rows: &mut [ObservationRow], scope: NormalizationScope) -> Result<usize> {
    let mut populations: BTreeMap<Option<u16>, Vec<usize>> = BTreeMap::new();
    for (idx, row) in rows.iter_mut().enumerate() {
        row.qol_scope = Some(scope);
        row.z_real_income = None;
        row.z_rent_burden = None;
        row.z_owner_burden = None;
        row.qol_score = None;
        if row.real_income.is_some() && row.rent_burden_pct.is_some() && row.owner_burden_pct.is_some() {
            let key = match scope {
                NormalizationScope::PerYear => Some(row.year),
                NormalizationScope::AllYears => None,
            };
            populations.entry(key).or_default().push(idx);
        }
    }

    let mut scored = 0;
    for (key, members) in populations {
        let label = match key {
            Some(year) => format!("year {year}"),
            None => "all years".to_string(),
        };
        let column = |f: fn(&ObservationRow) -> Option<f64>| -> Vec<f64> {
            members.iter().filter_map(|&i| f(&rows[i])).collect()
        };
        let z_income = zscores(&column(|r| r.real_income), "real_income", &label)?;
        let z_rent = zscores(&column(|r| r.rent_burden_pct), "rent_burden_pct", &label)?;
        let z_owner = zscores(&column(|r| r.owner_burden_pct), "owner_burden_pct", &label)?;

        for (pos, &idx) in members.iter().enumerate() {
            let row = &mut rows[idx];
            row.z_real_income = Some(z_income[pos]);
            row.z_rent_burden = Some(z_rent[pos]);
            row.z_owner_burden = Some(z_owner[pos]);
            row.qol_score = Some(
                WEIGHT_REAL_INCOME * z_income[pos] - WEIGHT_RENT_BURDEN * z_rent[pos] - WEIGHT_OWNER_BURDEN * z_owner[pos],
            );
        }
        scored += members.len();
    }

    crate::metrics::pipeline::rows_scored(scored);
    Ok(scored)
}

/// Run every feature step in order. Returns the CPI baseline used.
#[instrument(skip(rows), fields(rows = rows.len()))]
pub fn engineer_features(rows: &mut [ObservationRow], settings: &FeatureSettings) -> Result<f64> {
    add_housing_ratios(rows);
    add_burden_percentages(rows);
    let baseline = adjust_for_inflation(rows, settings.baseline)?;
    add_disposable_income(rows);
    let scored = compute_qol_scores(rows, settings.scope)?;
    info!("Scored {} of {} rows ({})", scored, rows.len(), settings.scope);
    Ok(baseline)
}
