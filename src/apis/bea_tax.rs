use crate::apis::{decode_json, json_number, DataSource, FetchRequest};
use crate::app::ports::HttpClientPort;
use crate::constants::{BEA_PERSONAL_INCOME_TABLE, BEA_PERSONAL_TAXES_TABLE, SOURCE_BEA_REGIONAL};
use crate::error::{QolError, Result};
use crate::types::StateCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Personal income, personal current taxes and their ratio for a state-year.
/// Serializes to the CSV layout the tax file loader reads back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxMetricsRow {
    pub state: StateCode,
    pub year: u16,
    pub personal_income: f64,
    pub personal_taxes: f64,
    pub tax_burden_pct: f64,
}

/// BEA Regional dataset (SAINC1 / SAINC50)
pub struct BeaTaxSource {
    http: Arc<dyn HttpClientPort>,
    url: String,
    api_key: String,
}

impl BeaTaxSource {
    pub fn new(http: Arc<dyn HttpClientPort>, url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| QolError::Config("BEA_API_KEY is required to fetch tax metrics".to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
            api_key,
        })
    }

    async fn fetch_line(&self, table: (&str, &str), request: &FetchRequest) -> Result<BTreeMap<(StateCode, u16), f64>> {
        let (table_name, line_code) = table;
        let years = request.years.iter().map(u16::to_string).collect::<Vec<_>>().join(",");
        let query = format!(
            "method=GetData&DataSetName=Regional&TableName={table_name}&LineCode={line_code}&GeoFIPS=STATE&Year={years}&ResultFormat=json"
        );
        debug!("GET {}?{}", self.url, query);
        let full_url = format!("{}?UserID={}&{}", self.url, self.api_key, query);

        let started = Instant::now();
        let body = decode_json(SOURCE_BEA_REGIONAL, started, self.http.get(&full_url).await)?;
        parse_bea_data(&body, table_name, request)
    }
}

#[async_trait::async_trait]
impl DataSource for BeaTaxSource {
    type Record = TaxMetricsRow;

    fn source_name(&self) -> &'static str {
        SOURCE_BEA_REGIONAL
    }

    #[instrument(skip(self, request), fields(source = SOURCE_BEA_REGIONAL))]
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<TaxMetricsRow>> {
        let income = self.fetch_line(BEA_PERSONAL_INCOME_TABLE, request).await?;
        let taxes = self.fetch_line(BEA_PERSONAL_TAXES_TABLE, request).await?;
        let rows = join_tax_metrics(&income, &taxes);
        info!("Built {} tax metric rows", rows.len());
        crate::metrics::sources::records_fetched(SOURCE_BEA_REGIONAL, rows.len());
        Ok(rows)
    }
}

/// Extract `BEAAPI.Results.Data` values for the requested states and years,
/// scaled by `UNIT_MULT`.
pub fn parse_bea_data(body: &Value, table: &str, request: &FetchRequest) -> Result<BTreeMap<(StateCode, u16), f64>> {
    let data = body["BEAAPI"]["Results"]["Data"].as_array().ok_or_else(|| {
        let detail = body["BEAAPI"]["Results"]["Error"]["APIErrorDescription"]
            .as_str()
            .or_else(|| body["BEAAPI"]["Error"]["APIErrorDescription"].as_str())
            .unwrap_or("missing Results.Data");
        QolError::source_unavailable(SOURCE_BEA_REGIONAL, format!("{table}: {detail}"))
    })?;

    let mut values = BTreeMap::new();
    for entry in data {
        let Ok(state) = entry["GeoFips"].as_str().unwrap_or_default().parse::<StateCode>() else {
            continue;
        };
        let Some(year) = entry["TimePeriod"].as_str().and_then(|y| y.parse::<u16>().ok()) else {
            continue;
        };
        if !request.states.contains(&state) || !request.years.contains(&year) {
            continue;
        }
        let Some(value) = json_number(&entry["DataValue"]) else {
            warn!(%state, year, table, "Non-numeric BEA DataValue");
            continue;
        };
        let unit_mult = json_number(&entry["UNIT_MULT"]).unwrap_or(0.0) as i32;
        values.insert((state, year), value * 10f64.powi(unit_mult));
    }
    Ok(values)
}

/// Inner join on (state, year); rows come out sorted by key.
pub fn join_tax_metrics(
    income: &BTreeMap<(StateCode, u16), f64>,
    taxes: &BTreeMap<(StateCode, u16), f64>,
) -> Vec<TaxMetricsRow> {
    income
        .iter()
        .filter_map(|(&(state, year), &personal_income)| {
            let personal_taxes = *taxes.get(&(state, year))?;
            if personal_income <= 0.0 {
                return None;
            }
            Some(TaxMetricsRow {
                state,
                year,
                personal_income: round2(personal_income),
                personal_taxes: round2(personal_taxes),
                tax_burden_pct: round2(personal_taxes / personal_income * 100.0),
            })
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> FetchRequest {
        FetchRequest::new(vec![2023, 2024], StateCode::ALL.to_vec()).unwrap()
    }

    #[test]
    fn test_parse_bea_data_scales_and_filters() {
        let body = json!({"BEAAPI": {"Results": {"Data": [
            {"GeoFips": "06000", "TimePeriod": "2024", "DataValue": "3,245,117", "UNIT_MULT": "3"},
            {"GeoFips": "53000", "TimePeriod": "2024", "DataValue": "900,000", "UNIT_MULT": "3"},
            {"GeoFips": "49000", "TimePeriod": "2019", "DataValue": "100", "UNIT_MULT": "3"},
            {"GeoFips": "49000", "TimePeriod": "2024", "DataValue": "(NA)", "UNIT_MULT": "3"}
        ]}}});
        let values = parse_bea_data(&body, "SAINC1", &request()).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[&(StateCode::CA, 2024)], 3_245_117_000.0);
    }

    #[test]
    fn test_parse_bea_data_reports_api_error() {
        let body = json!({"BEAAPI": {"Results": {"Error": {"APIErrorDescription": "Invalid UserID"}}}});
        let err = parse_bea_data(&body, "SAINC50", &request()).unwrap_err();
        assert!(matches!(err, QolError::SourceUnavailable { .. }));
        assert!(err.to_string().contains("Invalid UserID"));
    }

    #[test]
    fn test_join_is_inner_and_rounded() {
        let income = BTreeMap::from([((StateCode::UT, 2024), 300_000.0), ((StateCode::TX, 2024), 1_000.0)]);
        let taxes = BTreeMap::from([((StateCode::UT, 2024), 31_234.0)]);
        let rows = join_tax_metrics(&income, &taxes);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, StateCode::UT);
        assert_eq!(rows[0].tax_burden_pct, 10.41);
    }

    #[test]
    fn test_missing_key_is_config_error() {
        struct NoHttp;
        #[async_trait::async_trait]
        impl HttpClientPort for NoHttp {
            async fn get(&self, _url: &str) -> std::result::Result<crate::app::ports::HttpResponse, String> {
                Err("offline".into())
            }
            async fn post_json(
                &self,
                _url: &str,
                _body: &Value,
            ) -> std::result::Result<crate::app::ports::HttpResponse, String> {
                Err("offline".into())
            }
        }
        let result = BeaTaxSource::new(Arc::new(NoHttp), "http://bea.test", None);
        assert!(matches!(result, Err(QolError::Config(_))));
    }
}
