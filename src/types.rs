use crate::error::{QolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The fixed set of states the pipeline covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StateCode {
    CA,
    NY,
    TX,
    UT,
}

impl StateCode {
    pub const ALL: [StateCode; 4] = [StateCode::CA, StateCode::NY, StateCode::TX, StateCode::UT];

    pub fn abbreviation(&self) -> &'static str {
        match self {
            StateCode::CA => "CA",
            StateCode::NY => "NY",
            StateCode::TX => "TX",
            StateCode::UT => "UT",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StateCode::CA => "California",
            StateCode::NY => "New York",
            StateCode::TX => "Texas",
            StateCode::UT => "Utah",
        }
    }

    /// Two-digit federal (FIPS) state code
    pub fn fips(&self) -> &'static str {
        match self {
            StateCode::CA => "06",
            StateCode::NY => "36",
            StateCode::TX => "48",
            StateCode::UT => "49",
        }
    }

    /// Five-digit GeoFips used by the BEA regional tables
    pub fn bea_geo_fips(&self) -> String {
        format!("{}000", self.fips())
    }

    /// Regional CPI-U series covering this state
    pub fn cpi_series(&self) -> &'static str {
        match self {
            StateCode::CA | StateCode::UT => "CUUR0400SA0", // West
            StateCode::TX => "CUUR0300SA0",                 // South
            StateCode::NY => "CUUR0100SA0",                 // Northeast
        }
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

impl FromStr for StateCode {
    type Err = QolError;

    /// Accepts abbreviations and names in any case, and FIPS codes with or
    /// without the leading zero or the BEA `000` suffix.
    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
            let digits = if trimmed.len() == 5 && trimmed.ends_with("000") {
                &trimmed[..2]
            } else {
                trimmed
            };
            if let Ok(code) = digits.parse::<u32>() {
                for state in StateCode::ALL {
                    if state.fips().parse::<u32>().ok() == Some(code) {
                        return Ok(state);
                    }
                }
            }
            return Err(QolError::UnknownState(raw.to_string()));
        }

        StateCode::ALL
            .into_iter()
            .find(|s| {
                s.abbreviation().eq_ignore_ascii_case(trimmed) || s.name().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| QolError::UnknownState(raw.to_string()))
    }
}

/// Parse a comma-separated state list such as `"CA,ny,49"`
pub fn parse_state_list(list: &str) -> Result<Vec<StateCode>> {
    let mut states: Vec<StateCode> = list
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(StateCode::from_str)
        .collect::<Result<_>>()?;
    states.sort();
    states.dedup();
    Ok(states)
}

/// Parse a comma-separated year list such as `"2022,2023,2024"`
pub fn parse_year_list(list: &str) -> Result<Vec<u16>> {
    let mut years: Vec<u16> = list
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim()
                .parse::<u16>()
                .map_err(|e| QolError::Config(format!("invalid year '{}': {}", s.trim(), e)))
        })
        .collect::<Result<_>>()?;
    years.sort_unstable();
    years.dedup();
    Ok(years)
}

/// A survey estimate with its optional margin of error
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub value: Option<f64>,
    pub moe: Option<f64>,
}

impl Estimate {
    pub fn new(value: Option<f64>, moe: Option<f64>) -> Self {
        Self { value, moe }
    }

    /// Sum of several estimates. The MOE of a sum is approximated by the
    /// root-sum-of-squares of the component MOEs.
    pub fn sum(parts: &[Estimate]) -> Self {
        let value = parts.iter().map(|p| p.value).sum::<Option<f64>>();
        let moe = parts
            .iter()
            .map(|p| p.moe.map(|m| m * m))
            .sum::<Option<f64>>()
            .map(f64::sqrt);
        Self { value, moe }
    }

    /// MOE as a fraction of the estimate's magnitude
    pub fn relative_moe(&self) -> Option<f64> {
        match (self.value, self.moe) {
            (Some(v), Some(m)) if v != 0.0 => Some(m.abs() / v.abs()),
            _ => None,
        }
    }
}

/// One state-year of Census ACS 1-year estimates
#[derive(Debug, Clone, PartialEq)]
pub struct AcsRecord {
    pub state: StateCode,
    pub year: u16,
    pub median_income: Estimate,
    pub median_rent_monthly: Estimate,
    pub median_home_value: Estimate,
    pub rent_burden_total: Estimate,
    pub rent_burden_30plus: Estimate,
    pub owner_burden_total: Estimate,
    pub owner_burden_30plus: Estimate,
}

/// Regional price index for one state-year
#[derive(Debug, Clone, PartialEq)]
pub struct CpiRecord {
    pub state: StateCode,
    pub year: u16,
    pub series_id: String,
    pub cpi: Option<f64>,
}

/// Tax burden as a fraction of income. A missing year applies to every year.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxRecord {
    pub state: StateCode,
    pub year: Option<u16>,
    pub tax_burden_rate: Option<f64>,
}

/// How the CPI baseline for real income is chosen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselinePolicy {
    /// Mean CPI across every loaded row
    SampleMean,
    /// Caller-supplied index value
    Fixed(f64),
}

impl BaselinePolicy {
    pub fn note(&self) -> &'static str {
        match self {
            BaselinePolicy::SampleMean => "mean_of_sample",
            BaselinePolicy::Fixed(_) => "fixed",
        }
    }
}

impl Default for BaselinePolicy {
    fn default() -> Self {
        BaselinePolicy::SampleMean
    }
}

/// Comparison population for the QoL z-scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationScope {
    /// Rows sharing the same year
    PerYear,
    /// Every row of the run
    AllYears,
}

impl Default for NormalizationScope {
    fn default() -> Self {
        NormalizationScope::AllYears
    }
}

impl fmt::Display for NormalizationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationScope::PerYear => f.write_str("per_year"),
            NormalizationScope::AllYears => f.write_str("all_years"),
        }
    }
}

impl FromStr for NormalizationScope {
    type Err = QolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_year" => Ok(NormalizationScope::PerYear),
            "all_years" => Ok(NormalizationScope::AllYears),
            other => Err(QolError::Config(format!(
                "unknown normalization scope '{other}' (expected per_year or all_years)"
            ))),
        }
    }
}

/// One row of the merged state × year table: raw, cleaned and derived fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    pub state: StateCode,
    pub year: u16,

    pub median_income: Option<f64>,
    pub median_income_moe: Option<f64>,
    pub median_income_rel_moe: Option<f64>,
    pub median_rent_monthly: Option<f64>,
    pub median_rent_monthly_moe: Option<f64>,
    pub median_rent_monthly_rel_moe: Option<f64>,
    pub median_home_value: Option<f64>,
    pub median_home_value_moe: Option<f64>,
    pub median_home_value_rel_moe: Option<f64>,
    pub rent_burden_total: Option<f64>,
    pub rent_burden_total_moe: Option<f64>,
    pub rent_burden_30plus: Option<f64>,
    pub rent_burden_30plus_moe: Option<f64>,
    pub owner_burden_total: Option<f64>,
    pub owner_burden_total_moe: Option<f64>,
    pub owner_burden_30plus: Option<f64>,
    pub owner_burden_30plus_moe: Option<f64>,

    pub cpi_series_id: Option<String>,
    pub cpi: Option<f64>,
    pub tax_burden_rate: Option<f64>,

    pub annual_rent: Option<f64>,
    pub rent_burden_ratio: Option<f64>,
    pub price_to_income_ratio: Option<f64>,
    pub rent_burden_pct: Option<f64>,
    pub owner_burden_pct: Option<f64>,

    pub cpi_baseline: Option<f64>,
    pub cpi_base_note: Option<String>,
    pub cpi_index: Option<f64>,
    pub real_income: Option<f64>,
    pub tax_burden_pct: Option<f64>,
    pub disposable_income: Option<f64>,

    pub z_real_income: Option<f64>,
    pub z_rent_burden: Option<f64>,
    pub z_owner_burden: Option<f64>,
    pub qol_score: Option<f64>,
    pub qol_scope: Option<NormalizationScope>,

    pub high_moe_flag: bool,
    #[serde(with = "field_list")]
    pub quality_flags: BTreeSet<String>,
    #[serde(with = "field_list")]
    pub imputed_fields: BTreeSet<String>,
}

impl ObservationRow {
    pub fn new(state: StateCode, year: u16) -> Self {
        Self {
            state,
            year,
            median_income: None,
            median_income_moe: None,
            median_income_rel_moe: None,
            median_rent_monthly: None,
            median_rent_monthly_moe: None,
            median_rent_monthly_rel_moe: None,
            median_home_value: None,
            median_home_value_moe: None,
            median_home_value_rel_moe: None,
            rent_burden_total: None,
            rent_burden_total_moe: None,
            rent_burden_30plus: None,
            rent_burden_30plus_moe: None,
            owner_burden_total: None,
            owner_burden_total_moe: None,
            owner_burden_30plus: None,
            owner_burden_30plus_moe: None,
            cpi_series_id: None,
            cpi: None,
            tax_burden_rate: None,
            annual_rent: None,
            rent_burden_ratio: None,
            price_to_income_ratio: None,
            rent_burden_pct: None,
            owner_burden_pct: None,
            cpi_baseline: None,
            cpi_base_note: None,
            cpi_index: None,
            real_income: None,
            tax_burden_pct: None,
            disposable_income: None,
            z_real_income: None,
            z_rent_burden: None,
            z_owner_burden: None,
            qol_score: None,
            qol_scope: None,
            high_moe_flag: false,
            quality_flags: BTreeSet::new(),
            imputed_fields: BTreeSet::new(),
        }
    }

    /// Build the primary row from an ACS record
    pub fn from_acs(record: &AcsRecord) -> Self {
        let mut row = Self::new(record.state, record.year);
        row.median_income = record.median_income.value;
        row.median_income_moe = record.median_income.moe;
        row.median_rent_monthly = record.median_rent_monthly.value;
        row.median_rent_monthly_moe = record.median_rent_monthly.moe;
        row.median_home_value = record.median_home_value.value;
        row.median_home_value_moe = record.median_home_value.moe;
        row.rent_burden_total = record.rent_burden_total.value;
        row.rent_burden_total_moe = record.rent_burden_total.moe;
        row.rent_burden_30plus = record.rent_burden_30plus.value;
        row.rent_burden_30plus_moe = record.rent_burden_30plus.moe;
        row.owner_burden_total = record.owner_burden_total.value;
        row.owner_burden_total_moe = record.owner_burden_total.moe;
        row.owner_burden_30plus = record.owner_burden_30plus.value;
        row.owner_burden_30plus_moe = record.owner_burden_30plus.moe;
        row
    }

    pub fn key(&self) -> (StateCode, u16) {
        (self.state, self.year)
    }
}

/// Numeric columns that analysis and reporting can select by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    RealIncome,
    RentBurdenPct,
    OwnerBurdenPct,
    DisposableIncome,
    QolScore,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::RealIncome => "real_income",
            Metric::RentBurdenPct => "rent_burden_pct",
            Metric::OwnerBurdenPct => "owner_burden_pct",
            Metric::DisposableIncome => "disposable_income",
            Metric::QolScore => "qol_score",
        }
    }

    pub fn value(&self, row: &ObservationRow) -> Option<f64> {
        match self {
            Metric::RealIncome => row.real_income,
            Metric::RentBurdenPct => row.rent_burden_pct,
            Metric::OwnerBurdenPct => row.owner_burden_pct,
            Metric::DisposableIncome => row.disposable_income,
            Metric::QolScore => row.qol_score,
        }
        .filter(|v| v.is_finite())
    }
}

/// Flag and imputation sets travel through CSV as `;`-joined strings.
mod field_list {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeSet;

    pub fn serialize<S: Serializer>(set: &BTreeSet<String>, serializer: S) -> Result<S::Ok, S::Error> {
        let joined = set.iter().map(String::as_str).collect::<Vec<_>>().join(";");
        serializer.serialize_str(&joined)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeSet<String>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(raw
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }
}
