pub mod bea_tax;
pub mod bls_cpi;
pub mod census_acs;
pub mod tax_file;

use crate::app::ports::HttpResponse;
use crate::error::{QolError, Result};
use crate::types::StateCode;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

/// The state × year grid a fetch should cover. Years and states are kept
/// sorted and unique so each (state, year) is requested once.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub years: Vec<u16>,
    pub states: Vec<StateCode>,
}

impl FetchRequest {
    pub fn new(mut years: Vec<u16>, mut states: Vec<StateCode>) -> Result<Self> {
        years.sort_unstable();
        years.dedup();
        states.sort_unstable();
        states.dedup();
        if years.is_empty() {
            return Err(QolError::Config("at least one year is required".to_string()));
        }
        if states.is_empty() {
            return Err(QolError::Config("at least one state is required".to_string()));
        }
        Ok(Self { years, states })
    }

    pub fn first_year(&self) -> u16 {
        self.years.iter().copied().min().unwrap_or_default()
    }

    pub fn last_year(&self) -> u16 {
        self.years.iter().copied().max().unwrap_or_default()
    }
}

/// Core trait every data source implements
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    type Record: Send;

    /// Stable identifier used in logs, metrics and errors
    fn source_name(&self) -> &'static str;

    /// Fetch all records for the request
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Self::Record>>;
}

/// Check the status of an HTTP exchange and decode its JSON body.
/// Transport errors and non-2xx statuses both surface as `SourceUnavailable`.
pub(crate) fn decode_json(
    origin: &str,
    started: Instant,
    exchange: std::result::Result<HttpResponse, String>,
) -> Result<Value> {
    let response = match exchange {
        Ok(resp) => resp,
        Err(message) => {
            warn!(source = origin, "Request failed: {}", message);
            crate::metrics::sources::request_error(origin);
            return Err(QolError::source_unavailable(origin, message));
        }
    };

    if !response.is_success() {
        warn!(source = origin, status = response.status, "Non-success status");
        crate::metrics::sources::request_error(origin);
        return Err(QolError::source_unavailable(
            origin,
            format!("HTTP status {}", response.status),
        ));
    }

    let body: Value = serde_json::from_slice(&response.bytes).map_err(|e| {
        crate::metrics::sources::request_error(origin);
        QolError::source_unavailable(origin, format!("invalid JSON payload: {e}"))
    })?;

    let elapsed = started.elapsed().as_secs_f64();
    crate::metrics::sources::request_success(origin, elapsed);
    debug!(source = origin, bytes = response.bytes.len(), elapsed, "Response decoded");
    Ok(body)
}

/// Read a numeric field that may arrive as a JSON number or a string.
pub(crate) fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}
