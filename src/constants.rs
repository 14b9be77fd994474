/// Source names used in logs, metrics and error messages
pub const SOURCE_CENSUS_ACS: &str = "census_acs";
pub const SOURCE_BLS_CPI: &str = "bls_cpi";
pub const SOURCE_TAX_FILE: &str = "tax_file";
pub const SOURCE_BEA_REGIONAL: &str = "bea_regional";

// Endpoints
pub const CENSUS_API_BASE_URL: &str = "https://api.census.gov/data";
pub const BLS_TIMESERIES_URL: &str = "https://api.bls.gov/publicAPI/v2/timeseries/data/";
pub const BEA_API_URL: &str = "https://apps.bea.gov/api/data";

// Credential environment variables
pub const CENSUS_API_KEY_ENV: &str = "CENSUS_API_KEY";
pub const BLS_API_KEY_ENV: &str = "BLS_API_KEY";
pub const BEA_API_KEY_ENV: &str = "BEA_API_KEY";

pub const DEFAULT_YEARS: [u16; 3] = [2022, 2023, 2024];
pub const DEFAULT_CONFIG_PATH: &str = "qol.toml";
pub const DEFAULT_TAX_PATH: &str = "data/raw/state_tax_metrics.csv";
pub const DEFAULT_OUTPUT_PATH: &str = "data/processed/qol_with_real_income_peryear.csv";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Relative margin of error above which an estimate is flagged
pub const DEFAULT_MOE_THRESHOLD: f64 = 0.15;

// Composite QoL weights. Burdens enter with a negative sign.
pub const WEIGHT_REAL_INCOME: f64 = 0.5;
pub const WEIGHT_RENT_BURDEN: f64 = 0.25;
pub const WEIGHT_OWNER_BURDEN: f64 = 0.25;

// ACS table ids (without the E/M suffix)
pub const ACS_MEDIAN_INCOME: &str = "B19013_001";
pub const ACS_MEDIAN_RENT: &str = "B25064_001";
pub const ACS_MEDIAN_HOME_VALUE: &str = "B25077_001";
pub const ACS_RENTER_TOTAL: &str = "B25070_001";
pub const ACS_OWNER_TOTAL: &str = "B25091_001";

/// Renters paying 30-34.9%, 35-39.9%, 40-49.9% and 50%+ of income on rent
pub const ACS_RENTER_BURDEN_SLICES: [&str; 4] =
    ["B25070_007", "B25070_008", "B25070_009", "B25070_010"];

/// Owners paying 30-34.9%, 35-39.9%, 40-49.9% and 50%+ of income on owner costs
pub const ACS_OWNER_BURDEN_SLICES: [&str; 4] =
    ["B25091_012", "B25091_013", "B25091_014", "B25091_015"];

pub const BLS_REQUEST_SUCCEEDED: &str = "REQUEST_SUCCEEDED";
pub const BLS_ANNUAL_AVERAGE_PERIOD: &str = "M13";

// BEA regional tables: personal income and personal current taxes
pub const BEA_PERSONAL_INCOME_TABLE: (&str, &str) = ("SAINC1", "1");
pub const BEA_PERSONAL_TAXES_TABLE: (&str, &str) = ("SAINC50", "15");

/// Every ACS table id requested, in request order
pub fn acs_tables() -> Vec<&'static str> {
    let mut tables = vec![
        ACS_MEDIAN_INCOME,
        ACS_MEDIAN_RENT,
        ACS_MEDIAN_HOME_VALUE,
        ACS_RENTER_TOTAL,
    ];
    tables.extend(ACS_RENTER_BURDEN_SLICES);
    tables.push(ACS_OWNER_TOTAL);
    tables.extend(ACS_OWNER_BURDEN_SLICES);
    tables
}

/// Estimate and margin-of-error variable names for the ACS `get=` parameter
pub fn acs_variables() -> Vec<String> {
    let tables = acs_tables();
    let mut vars: Vec<String> = tables.iter().map(|t| format!("{t}E")).collect();
    vars.extend(tables.iter().map(|t| format!("{t}M")));
    vars
}
