use crate::apis::{decode_json, json_number, DataSource, FetchRequest};
use crate::app::ports::HttpClientPort;
use crate::constants::{
    acs_variables, ACS_MEDIAN_HOME_VALUE, ACS_MEDIAN_INCOME, ACS_MEDIAN_RENT, ACS_OWNER_BURDEN_SLICES,
    ACS_OWNER_TOTAL, ACS_RENTER_BURDEN_SLICES, ACS_RENTER_TOTAL, SOURCE_CENSUS_ACS,
};
use crate::error::{QolError, Result};
use crate::types::{AcsRecord, Estimate, StateCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Census American Community Survey 1-year estimates
pub struct CensusAcsSource {
    http: Arc<dyn HttpClientPort>,
    base_url: String,
    api_key: Option<String>,
}

impl CensusAcsSource {
    pub fn new(http: Arc<dyn HttpClientPort>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Query URL without the API key, safe to log
    fn query_url(&self, year: u16, state: StateCode) -> String {
        format!(
            "{}/{}/acs/acs1?get={}&for=state:{}",
            self.base_url.trim_end_matches('/'),
            year,
            acs_variables().join(","),
            state.fips()
        )
    }

    #[instrument(skip(self), fields(source = SOURCE_CENSUS_ACS))]
    pub async fn fetch_one(&self, year: u16, state: StateCode) -> Result<AcsRecord> {
        let url = self.query_url(year, state);
        debug!("GET {}", url);
        let full_url = match &self.api_key {
            Some(key) => format!("{url}&key={key}"),
            None => url,
        };

        let started = Instant::now();
        let body = decode_json(SOURCE_CENSUS_ACS, started, self.http.get(&full_url).await)?;
        parse_acs_response(&body, year, state)
    }
}

#[async_trait::async_trait]
impl DataSource for CensusAcsSource {
    type Record = AcsRecord;

    fn source_name(&self) -> &'static str {
        SOURCE_CENSUS_ACS
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<AcsRecord>> {
        let mut records = Vec::with_capacity(request.years.len() * request.states.len());
        for &year in &request.years {
            for &state in &request.states {
                records.push(self.fetch_one(year, state).await?);
            }
        }
        info!("Fetched {} ACS records", records.len());
        crate::metrics::sources::records_fetched(SOURCE_CENSUS_ACS, records.len());
        Ok(records)
    }
}

/// Decode the header-row + value-row array the Census API returns.
pub fn parse_acs_response(body: &Value, year: u16, requested: StateCode) -> Result<AcsRecord> {
    let rows = body
        .as_array()
        .ok_or_else(|| QolError::source_unavailable(SOURCE_CENSUS_ACS, "expected a JSON array"))?;
    let (header, values) = match rows.as_slice() {
        [header, values, ..] => (header, values),
        _ => {
            return Err(QolError::source_unavailable(
                SOURCE_CENSUS_ACS,
                format!("no data row for {requested} {year}"),
            ))
        }
    };
    let header = header
        .as_array()
        .ok_or_else(|| QolError::source_unavailable(SOURCE_CENSUS_ACS, "header row is not an array"))?;
    let values = values
        .as_array()
        .ok_or_else(|| QolError::source_unavailable(SOURCE_CENSUS_ACS, "value row is not an array"))?;

    let columns: HashMap<&str, &Value> = header
        .iter()
        .zip(values.iter())
        .filter_map(|(name, value)| name.as_str().map(|n| (n, value)))
        .collect();

    // The echoed geography may be a FIPS code; it must resolve to what we asked for
    let returned = columns
        .get("state")
        .and_then(|v| v.as_str())
        .ok_or_else(|| QolError::MissingField(format!("state column in ACS response for {requested} {year}")))?
        .parse::<StateCode>()?;
    if returned != requested {
        return Err(QolError::source_unavailable(
            SOURCE_CENSUS_ACS,
            format!("requested {requested} but response was for {returned}"),
        ));
    }

    let estimate = |table: &str| -> Estimate {
        Estimate::new(
            census_value(columns.get(format!("{table}E").as_str()).copied()),
            census_value(columns.get(format!("{table}M").as_str()).copied()),
        )
    };
    let sum_of = |tables: &[&str]| -> Estimate {
        let parts: Vec<Estimate> = tables.iter().map(|t| estimate(*t)).collect();
        Estimate::sum(&parts)
    };

    Ok(AcsRecord {
        state: returned,
        year,
        median_income: estimate(ACS_MEDIAN_INCOME),
        median_rent_monthly: estimate(ACS_MEDIAN_RENT),
        median_home_value: estimate(ACS_MEDIAN_HOME_VALUE),
        rent_burden_total: estimate(ACS_RENTER_TOTAL),
        rent_burden_30plus: sum_of(&ACS_RENTER_BURDEN_SLICES),
        owner_burden_total: estimate(ACS_OWNER_TOTAL),
        owner_burden_30plus: sum_of(&ACS_OWNER_BURDEN_SLICES),
    })
}

/// Census encodes unavailable values as large negative sentinels
/// (-666666666, -999999999, ...), so negatives count as missing.
fn census_value(value: Option<&Value>) -> Option<f64> {
    value.and_then(json_number).filter(|v| *v >= 0.0)
}
