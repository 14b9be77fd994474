//! Cleaning stage: merge the source tables on (state, year) and fill gaps.
//!
//! The merge is a left join anchored on the ACS table, so every ACS record
//! survives even when its CPI or tax counterpart is missing. Imputation runs
//! afterwards on rows sorted by (state, year):
//!
//! - time-series fields (CPI and the ACS estimates) carry the last known
//!   value forward within a state
//! - the tax rate is cross-sectional and takes the mean of the states that
//!   report a value for the same year
//!
//! Leading gaps stay unset. Every filled field is named in `imputed_fields`.

use crate::error::{QolError, Result};
use crate::types::{AcsRecord, CpiRecord, ObservationRow, StateCode, TaxRecord};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, instrument};

/// Fields imputed by last-known-value carry-forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CarryForwardField {
    Cpi,
    MedianIncome,
    MedianRentMonthly,
    MedianHomeValue,
    RentBurdenTotal,
    RentBurden30Plus,
    OwnerBurdenTotal,
    OwnerBurden30Plus,
}

impl CarryForwardField {
    pub const ALL: [CarryForwardField; 8] = [
        CarryForwardField::Cpi,
        CarryForwardField::MedianIncome,
        CarryForwardField::MedianRentMonthly,
        CarryForwardField::MedianHomeValue,
        CarryForwardField::RentBurdenTotal,
        CarryForwardField::RentBurden30Plus,
        CarryForwardField::OwnerBurdenTotal,
        CarryForwardField::OwnerBurden30Plus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CarryForwardField::Cpi => "cpi",
            CarryForwardField::MedianIncome => "median_income",
            CarryForwardField::MedianRentMonthly => "median_rent_monthly",
            CarryForwardField::MedianHomeValue => "median_home_value",
            CarryForwardField::RentBurdenTotal => "rent_burden_total",
            CarryForwardField::RentBurden30Plus => "rent_burden_30plus",
            CarryForwardField::OwnerBurdenTotal => "owner_burden_total",
            CarryForwardField::OwnerBurden30Plus => "owner_burden_30plus",
        }
    }

    fn slot<'a>(&self, row: &'a mut ObservationRow) -> &'a mut Option<f64> {
        match self {
            CarryForwardField::Cpi => &mut row.cpi,
            CarryForwardField::MedianIncome => &mut row.median_income,
            CarryForwardField::MedianRentMonthly => &mut row.median_rent_monthly,
            CarryForwardField::MedianHomeValue => &mut row.median_home_value,
            CarryForwardField::RentBurdenTotal => &mut row.rent_burden_total,
            CarryForwardField::RentBurden30Plus => &mut row.rent_burden_30plus,
            CarryForwardField::OwnerBurdenTotal => &mut row.owner_burden_total,
            CarryForwardField::OwnerBurden30Plus => &mut row.owner_burden_30plus,
        }
    }
}

pub const TAX_RATE_FIELD: &str = "tax_burden_rate";

fn ensure_unique<K, I>(table: &str, keys: I) -> Result<()>
where
    K: std::hash::Hash + Eq + std::fmt::Debug,
    I: IntoIterator<Item = K>,
{
    let mut seen = HashSet::new();
    for key in keys {
        if let Some(dup) = seen.replace(key) {
            return Err(QolError::DuplicateKey {
                table: table.to_string(),
                key: format!("{dup:?}"),
            });
        }
    }
    Ok(())
}

/// Left-join CPI and (optional) tax records onto the ACS rows.
/// Output is sorted by (state, year).
#[instrument(skip_all, fields(acs = acs.len(), cpi = cpi.len()))]
pub fn merge_sources(acs: &[AcsRecord], cpi: &[CpiRecord], tax: Option<&[TaxRecord]>) -> Result<Vec<ObservationRow>> {
    ensure_unique("census_acs", acs.iter().map(|r| (r.state, r.year)))?;
    ensure_unique("bls_cpi", cpi.iter().map(|r| (r.state, r.year)))?;
    if let Some(tax) = tax {
        ensure_unique("tax_file", tax.iter().map(|r| (r.state, r.year)))?;
    }

    let cpi_by_key: HashMap<(StateCode, u16), &CpiRecord> = cpi.iter().map(|r| ((r.state, r.year), r)).collect();
    // A yearly tax value wins over a yearless one for the same state, unless
    // the yearly value is unreadable
    let tax_by_key: HashMap<(StateCode, Option<u16>), Option<f64>> = tax
        .unwrap_or_default()
        .iter()
        .map(|r| ((r.state, r.year), r.tax_burden_rate))
        .collect();

    let mut rows: Vec<ObservationRow> = acs
        .iter()
        .map(|record| {
            let mut row = ObservationRow::from_acs(record);
            match cpi_by_key.get(&row.key()) {
                Some(c) => {
                    row.cpi = c.cpi;
                    row.cpi_series_id = Some(c.series_id.clone());
                }
                None => row.cpi_series_id = Some(row.state.cpi_series().to_string()),
            }
            row.tax_burden_rate = tax_by_key
                .get(&(row.state, Some(row.year)))
                .copied()
                .flatten()
                .or_else(|| tax_by_key.get(&(row.state, None)).copied().flatten());
            row
        })
        .collect();
    rows.sort_by_key(|r| r.key());

    info!("Merged {} state-year rows", rows.len());
    crate::metrics::pipeline::rows_merged(rows.len());
    Ok(rows)
}

/// Fill missing values in place; rows must be sorted by (state, year).
/// Returns the number of values filled.
#[instrument(skip_all)]
pub fn impute_missing(rows: &mut [ObservationRow]) -> usize {
    let mut per_field: BTreeMap<&'static str, usize> = BTreeMap::new();

    let mut last_known: HashMap<(StateCode, CarryForwardField), f64> = HashMap::new();
    for row in rows.iter_mut() {
        for field in CarryForwardField::ALL {
            let key = (row.state, field);
            let current = *field.slot(row);
            match current {
                Some(value) => {
                    last_known.insert(key, value);
                }
                None => {
                    if let Some(&value) = last_known.get(&key) {
                        *field.slot(row) = Some(value);
                        row.imputed_fields.insert(field.name().to_string());
                        *per_field.entry(field.name()).or_default() += 1;
                        debug!(state = %row.state, year = row.year, field = field.name(), value, "Carried forward");
                    }
                }
            }
        }
    }

    let mut year_totals: BTreeMap<u16, (f64, usize)> = BTreeMap::new();
    for row in rows.iter() {
        if let Some(rate) = row.tax_burden_rate {
            let entry = year_totals.entry(row.year).or_insert((0.0, 0));
            entry.0 += rate;
            entry.1 += 1;
        }
    }
    for row in rows.iter_mut().filter(|r| r.tax_burden_rate.is_none()) {
        if let Some(&(sum, n)) = year_totals.get(&row.year) {
            let mean = sum / n as f64;
            row.tax_burden_rate = Some(mean);
            row.imputed_fields.insert(TAX_RATE_FIELD.to_string());
            *per_field.entry(TAX_RATE_FIELD).or_default() += 1;
            debug!(state = %row.state, year = row.year, mean, "Tax rate filled with year mean");
        }
    }

    for (field, count) in &per_field {
        crate::metrics::pipeline::values_imputed(field, *count);
    }
    let total = per_field.values().sum();
    if total > 0 {
        info!("Imputed {} missing values", total);
    }
    total
}
