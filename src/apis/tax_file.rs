use crate::apis::{DataSource, FetchRequest};
use crate::constants::SOURCE_TAX_FILE;
use crate::error::{QolError, Result};
use crate::types::{StateCode, TaxRecord};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

const STATE_COLUMNS: [&str; 3] = ["state", "state_name", "st"];
const BURDEN_COLUMNS: [&str; 6] = [
    "tax_burden_pct",
    "tax burden",
    "tax burden %",
    "tax_burden",
    "burden_pct",
    "tax_burden_rate",
];

/// State tax burden table exported as CSV (Tax Foundation sheet or the
/// output of `fetch-tax`)
pub struct TaxFileSource {
    path: PathBuf,
}

impl TaxFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl DataSource for TaxFileSource {
    type Record = TaxRecord;

    fn source_name(&self) -> &'static str {
        SOURCE_TAX_FILE
    }

    #[instrument(skip(self, request), fields(source = SOURCE_TAX_FILE, path = %self.path.display()))]
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<TaxRecord>> {
        if !self.path.exists() {
            crate::metrics::sources::optional_missing(SOURCE_TAX_FILE);
            return Err(QolError::MissingOptionalSource {
                path: self.path.display().to_string(),
            });
        }
        let records = read_tax_file(&self.path, request)?;
        info!("Loaded {} tax records", records.len());
        crate::metrics::sources::records_fetched(SOURCE_TAX_FILE, records.len());
        Ok(records)
    }
}

/// Read the tax table, keeping only requested states and years.
pub fn read_tax_file(path: &Path, request: &FetchRequest) -> Result<Vec<TaxRecord>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if matches!(extension.as_str(), "xlsx" | "xls" | "xlsm") {
        return Err(QolError::Config(format!(
            "{} is a spreadsheet; export the tax sheet to CSV first",
            path.display()
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_ascii_lowercase()).collect();
    let rows: Vec<csv::StringRecord> = reader.records().collect::<std::result::Result<_, _>>()?;

    let find = |candidates: &[&str]| candidates.iter().find_map(|c| headers.iter().position(|h| h == c));
    let state_idx = find(&STATE_COLUMNS)
        .ok_or_else(|| QolError::MissingField(format!("state column in {}", path.display())))?;
    let year_idx = find(&["year"]);
    let burden_idx = find(&BURDEN_COLUMNS)
        .or_else(|| first_numeric_column(&rows, headers.len(), &[Some(state_idx), year_idx]))
        .ok_or_else(|| QolError::MissingField(format!("tax burden column in {}", path.display())))?;
    debug!(column = %headers[burden_idx], "Using tax burden column");

    let mut parsed: Vec<(StateCode, Option<u16>, Option<f64>)> = Vec::new();
    for row in &rows {
        let raw_state = row.get(state_idx).unwrap_or_default();
        let state = match raw_state.parse::<StateCode>() {
            Ok(s) => s,
            Err(_) => {
                debug!("Skipping tax row for '{}'", raw_state);
                continue;
            }
        };
        if !request.states.contains(&state) {
            continue;
        }
        let year = match year_idx.and_then(|i| row.get(i)).filter(|y| !y.is_empty()) {
            Some(y) => Some(y.parse::<u16>().map_err(|e| {
                QolError::Config(format!("invalid year '{}' in {}: {}", y, path.display(), e))
            })?),
            None => None,
        };
        if year.map_or(false, |y| !request.years.contains(&y)) {
            continue;
        }
        let value = row
            .get(burden_idx)
            .and_then(|v| v.trim_end_matches('%').trim().parse::<f64>().ok())
            .filter(|v| v.is_finite());
        parsed.push((state, year, value));
    }

    // A column whose largest value exceeds 1.0 holds percentages
    let max = parsed.iter().filter_map(|(_, _, v)| *v).fold(f64::NEG_INFINITY, f64::max);
    let is_percent = max > 1.0;
    if parsed.iter().all(|(_, _, v)| v.is_none()) {
        warn!("Tax file {} has no usable burden values", path.display());
    }

    Ok(parsed
        .into_iter()
        .map(|(state, year, value)| TaxRecord {
            state,
            year,
            tax_burden_rate: value.map(|v| if is_percent { v / 100.0 } else { v }),
        })
        .collect())
}

fn first_numeric_column(rows: &[csv::StringRecord], width: usize, skip: &[Option<usize>]) -> Option<usize> {
    (0..width).filter(|i| !skip.contains(&Some(*i))).find(|&i| {
        let mut cells = rows.iter().filter_map(|r| r.get(i)).filter(|c| !c.is_empty()).peekable();
        cells.peek().is_some() && cells.all(|c| c.trim_end_matches('%').trim().parse::<f64>().is_ok())
    })
}
