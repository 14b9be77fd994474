use crate::apis::{decode_json, json_number, DataSource, FetchRequest};
use crate::app::ports::HttpClientPort;
use crate::constants::{BLS_ANNUAL_AVERAGE_PERIOD, BLS_REQUEST_SUCCEEDED, SOURCE_BLS_CPI};
use crate::error::{QolError, Result};
use crate::types::CpiRecord;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// BLS public time-series API, regional CPI-U series
pub struct BlsCpiSource {
    http: Arc<dyn HttpClientPort>,
    url: String,
    api_key: Option<String>,
}

impl BlsCpiSource {
    pub fn new(http: Arc<dyn HttpClientPort>, url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            url: url.into(),
            api_key,
        }
    }

    fn payload(&self, request: &FetchRequest) -> Value {
        let series: BTreeSet<&str> = request.states.iter().map(|s| s.cpi_series()).collect();
        let mut payload = json!({
            "seriesid": series.into_iter().collect::<Vec<_>>(),
            "startyear": request.first_year().to_string(),
            "endyear": request.last_year().to_string(),
            "annualaverage": true,
        });
        if let Some(key) = &self.api_key {
            payload["registrationkey"] = json!(key);
        }
        payload
    }
}

#[async_trait::async_trait]
impl DataSource for BlsCpiSource {
    type Record = CpiRecord;

    fn source_name(&self) -> &'static str {
        SOURCE_BLS_CPI
    }

    #[instrument(skip(self, request), fields(source = SOURCE_BLS_CPI))]
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<CpiRecord>> {
        let payload = self.payload(request);
        debug!("POST {} for {} series", self.url, payload["seriesid"].as_array().map_or(0, |a| a.len()));

        let started = Instant::now();
        let body = decode_json(SOURCE_BLS_CPI, started, self.http.post_json(&self.url, &payload).await)?;
        let records = parse_bls_response(&body, request)?;

        let missing = records.iter().filter(|r| r.cpi.is_none()).count();
        if missing > 0 {
            warn!("{} state-year CPI values missing from BLS response", missing);
        }
        info!("Fetched {} CPI records", records.len());
        crate::metrics::sources::records_fetched(SOURCE_BLS_CPI, records.len());
        Ok(records)
    }
}

/// Annual CPI per series and year: the `M13` annual average when published,
/// otherwise the mean of the available monthly values.
pub fn annual_values(body: &Value) -> Result<BTreeMap<(String, u16), f64>> {
    let status = body["status"].as_str().unwrap_or_default();
    if status != BLS_REQUEST_SUCCEEDED {
        let detail = body["message"]
            .as_array()
            .map(|m| m.iter().filter_map(Value::as_str).collect::<Vec<_>>().join("; "))
            .unwrap_or_default();
        return Err(QolError::source_unavailable(
            SOURCE_BLS_CPI,
            format!("status '{status}' {detail}").trim_end().to_string(),
        ));
    }

    let series = body["Results"]["series"]
        .as_array()
        .ok_or_else(|| QolError::source_unavailable(SOURCE_BLS_CPI, "missing Results.series"))?;

    #[derive(Default)]
    struct YearAccumulator {
        annual: Option<f64>,
        monthly: Vec<f64>,
    }

    let mut acc: BTreeMap<(String, u16), YearAccumulator> = BTreeMap::new();
    for item in series {
        let Some(series_id) = item["seriesID"].as_str() else {
            continue;
        };
        for point in item["data"].as_array().into_iter().flatten() {
            let year = point["year"].as_str().and_then(|y| y.parse::<u16>().ok());
            let period = point["period"].as_str().unwrap_or_default();
            let value = json_number(&point["value"]);
            let (Some(year), Some(value)) = (year, value) else {
                continue;
            };
            let slot = acc.entry((series_id.to_string(), year)).or_default();
            if period == BLS_ANNUAL_AVERAGE_PERIOD {
                slot.annual = Some(value);
            } else if is_monthly_period(period) {
                slot.monthly.push(value);
            }
        }
    }

    Ok(acc
        .into_iter()
        .filter_map(|(key, slot)| {
            let value = slot.annual.or_else(|| {
                (!slot.monthly.is_empty()).then(|| slot.monthly.iter().sum::<f64>() / slot.monthly.len() as f64)
            })?;
            Some((key, value))
        })
        .collect())
}

fn is_monthly_period(period: &str) -> bool {
    period
        .strip_prefix('M')
        .and_then(|m| m.parse::<u8>().ok())
        .map_or(false, |m| (1..=12).contains(&m))
}

/// Expand series-level values onto every requested state × year
pub fn parse_bls_response(body: &Value, request: &FetchRequest) -> Result<Vec<CpiRecord>> {
    let annual = annual_values(body)?;
    let mut records = Vec::with_capacity(request.years.len() * request.states.len());
    for &state in &request.states {
        for &year in &request.years {
            let series_id = state.cpi_series().to_string();
            let cpi = annual.get(&(series_id.clone(), year)).copied();
            records.push(CpiRecord { state, year, series_id, cpi });
        }
    }
    Ok(records)
}
