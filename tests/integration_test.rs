use anyhow::Result;
use async_trait::async_trait;
use qol_pipeline::analysis::analyze;
use qol_pipeline::app::ports::{HttpClientPort, HttpResponse};
use qol_pipeline::config::{Config, Credentials};
use qol_pipeline::constants::acs_variables;
use qol_pipeline::error::QolError;
use qol_pipeline::pipeline::Pipeline;
use qol_pipeline::storage;
use qol_pipeline::types::{BaselinePolicy, NormalizationScope, StateCode};
use qol_pipeline::validate::validate_rows;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

/// One state-year of fixture data
#[derive(Clone, Copy)]
struct Fixture {
    income: f64,
    rent_monthly: f64,
    home_value: f64,
    rent_burden_pct: f64,
    owner_burden_pct: f64,
}

const HOUSEHOLDS: f64 = 10_000.0;

fn fixture_2024(state: StateCode) -> Fixture {
    match state {
        StateCode::CA => Fixture { income: 100_149.0, rent_monthly: 2_109.0, home_value: 785_300.0, rent_burden_pct: 53.0, owner_burden_pct: 54.4 },
        StateCode::NY => Fixture { income: 85_820.0, rent_monthly: 1_730.0, home_value: 456_900.0, rent_burden_pct: 51.8, owner_burden_pct: 53.1 },
        StateCode::TX => Fixture { income: 76_292.0, rent_monthly: 1_430.0, home_value: 315_600.0, rent_burden_pct: 52.6, owner_burden_pct: 56.9 },
        StateCode::UT => Fixture { income: 96_658.0, rent_monthly: 1_560.0, home_value: 541_200.0, rent_burden_pct: 45.7, owner_burden_pct: 55.6 },
    }
}

fn fixture(state: StateCode, year: u16) -> Fixture {
    let base = fixture_2024(state);
    let scale = match year {
        2022 => 0.93,
        2023 => 0.97,
        _ => 1.0,
    };
    Fixture {
        income: (base.income * scale).round(),
        rent_monthly: (base.rent_monthly * scale).round(),
        home_value: (base.home_value * scale).round(),
        ..base
    }
}

fn acs_body(state: StateCode, year: u16) -> Value {
    let f = fixture(state, year);
    let estimates: HashMap<&str, f64> = HashMap::from([
        ("B19013_001", f.income),
        ("B25064_001", f.rent_monthly),
        ("B25077_001", f.home_value),
        ("B25070_001", HOUSEHOLDS),
        ("B25070_007", (f.rent_burden_pct * HOUSEHOLDS / 100.0).round()),
        ("B25091_001", HOUSEHOLDS),
        ("B25091_012", (f.owner_burden_pct * HOUSEHOLDS / 100.0).round()),
    ]);

    let vars = acs_variables();
    let mut header: Vec<Value> = vars.iter().map(|v| json!(v)).collect();
    header.push(json!("state"));
    let mut values: Vec<Value> = vars
        .iter()
        .map(|var| {
            let (table, suffix) = var.split_at(var.len() - 1);
            let estimate = estimates.get(table).copied().unwrap_or(0.0);
            let value = if suffix == "E" { estimate } else { (estimate * 0.01).round() };
            json!(value.to_string())
        })
        .collect();
    values.push(json!(state.fips()));
    json!([header, values])
}

/// Annual CPI per (series, year); years not listed are absent from the response
fn bls_body(cpi: &[(&str, u16, f64)]) -> Value {
    let mut by_series: HashMap<&str, Vec<Value>> = HashMap::new();
    for &(series, year, value) in cpi {
        by_series
            .entry(series)
            .or_default()
            .push(json!({"year": year.to_string(), "period": "M13", "periodName": "Annual", "value": value.to_string()}));
    }
    let series: Vec<Value> = by_series
        .into_iter()
        .map(|(id, data)| json!({"seriesID": id, "data": data}))
        .collect();
    json!({"status": "REQUEST_SUCCEEDED", "Results": {"series": series}})
}

fn default_cpi() -> Vec<(&'static str, u16, f64)> {
    vec![
        ("CUUR0400SA0", 2022, 310.0),
        ("CUUR0400SA0", 2024, 336.0),
        ("CUUR0100SA0", 2022, 300.0),
        ("CUUR0100SA0", 2023, 312.0),
        ("CUUR0100SA0", 2024, 324.0),
        ("CUUR0300SA0", 2022, 282.0),
        ("CUUR0300SA0", 2023, 294.0),
        ("CUUR0300SA0", 2024, 303.0),
    ]
}

/// Serves canned Census and BLS payloads and records every request
struct StubHttp {
    bls: Value,
    failing_state: Option<StateCode>,
    requests: Mutex<Vec<String>>,
}

impl StubHttp {
    fn new(cpi: &[(&str, u16, f64)]) -> Self {
        Self {
            bls: bls_body(cpi),
            failing_state: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn ok(body: &Value) -> HttpResponse {
        HttpResponse {
            status: 200,
            bytes: serde_json::to_vec(body).unwrap(),
            content_type: "application/json".to_string(),
        }
    }
}

fn parse_census_url(url: &str) -> Option<(u16, StateCode)> {
    let path = url.split('?').next()?;
    let year = path.split('/').find_map(|s| s.parse::<u16>().ok())?;
    let fips = url.split("for=state:").nth(1)?.split('&').next()?;
    Some((year, fips.parse().ok()?))
}

#[async_trait]
impl HttpClientPort for StubHttp {
    async fn get(&self, url: &str) -> std::result::Result<HttpResponse, String> {
        self.requests.lock().unwrap().push(url.to_string());
        let (year, state) = parse_census_url(url).ok_or_else(|| format!("unexpected url {url}"))?;
        if Some(state) == self.failing_state {
            return Ok(HttpResponse {
                status: 503,
                bytes: b"Service Unavailable".to_vec(),
                content_type: "text/plain".to_string(),
            });
        }
        Ok(Self::ok(&acs_body(state, year)))
    }

    async fn post_json(&self, url: &str, _body: &Value) -> std::result::Result<HttpResponse, String> {
        self.requests.lock().unwrap().push(url.to_string());
        Ok(Self::ok(&self.bls))
    }
}

fn test_config(years: &[u16], tax_path: &Path) -> Config {
    let mut config = Config::default();
    config.pipeline.years = years.to_vec();
    config.sources.census_base_url = "http://census.test/data".to_string();
    config.sources.bls_url = "http://bls.test/timeseries/".to_string();
    config.sources.tax_path = tax_path.to_path_buf();
    config
}

#[tokio::test]
async fn test_end_to_end_ranking_2024() -> Result<()> {
    let dir = tempdir()?;
    let config = test_config(&[2024], &dir.path().join("missing_tax.csv"));
    let http = Arc::new(StubHttp::new(&default_cpi()));
    let pipeline = Pipeline::new(http.clone(), &config, &Credentials::default())?;

    let result = pipeline.run().await?;

    assert_eq!(result.rows.len(), 4);
    assert_eq!(http.requests.lock().unwrap().len(), 5);
    assert!((result.baseline_cpi - 324.75).abs() < 1e-9);

    let score = |state: StateCode| result.rows.iter().find(|r| r.state == state).and_then(|r| r.qol_score).unwrap();
    assert!(score(StateCode::UT) > score(StateCode::CA));
    assert!(score(StateCode::CA) > score(StateCode::NY));
    assert!(score(StateCode::NY) > score(StateCode::TX));
    assert!((score(StateCode::UT) - 0.6527).abs() < 1e-3);

    let ca = &result.rows[0];
    assert_eq!(ca.state, StateCode::CA);
    assert!((ca.rent_burden_pct.unwrap() - 53.0).abs() < 1e-9);
    assert!((ca.owner_burden_pct.unwrap() - 54.4).abs() < 1e-9);
    assert_eq!(ca.annual_rent, Some(2_109.0 * 12.0));
    assert_eq!(ca.cpi_base_note.as_deref(), Some("mean_of_sample"));
    assert!(result.warnings.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_repeated_year_in_config_fetched_once() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config(&[2024, 2024], &dir.path().join("missing_tax.csv"));
    config.pipeline.states.push(StateCode::CA);
    let http = Arc::new(StubHttp::new(&default_cpi()));
    let pipeline = Pipeline::new(http.clone(), &config, &Credentials::default())?;

    let result = pipeline.run().await?;

    assert_eq!(result.rows.len(), 4);
    assert_eq!(http.requests.lock().unwrap().len(), 5);
    assert!(result.rows.iter().all(|r| r.year == 2024 && r.qol_score.is_some()));
    Ok(())
}

#[tokio::test]
async fn test_missing_cpi_year_is_carried_forward() -> Result<()> {
    let dir = tempdir()?;
    let config = test_config(&[2022, 2023, 2024], &dir.path().join("missing_tax.csv"));
    let pipeline = Pipeline::new(Arc::new(StubHttp::new(&default_cpi())), &config, &Credentials::default())?;

    let result = pipeline.run().await?;
    assert_eq!(result.rows.len(), 12);

    for state in [StateCode::CA, StateCode::UT] {
        let row = result.rows.iter().find(|r| r.state == state && r.year == 2023).unwrap();
        assert_eq!(row.cpi, Some(310.0));
        assert!(row.imputed_fields.contains("cpi"));
    }
    let ny = result.rows.iter().find(|r| r.state == StateCode::NY && r.year == 2023).unwrap();
    assert_eq!(ny.cpi, Some(312.0));
    assert!(ny.imputed_fields.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_tax_file_leaves_disposable_income_unset() -> Result<()> {
    let dir = tempdir()?;
    let config = test_config(&[2024], &dir.path().join("missing_tax.csv"));
    let pipeline = Pipeline::new(Arc::new(StubHttp::new(&default_cpi())), &config, &Credentials::default())?;

    let result = pipeline.run().await?;
    assert!(!result.tax_available);
    assert!(result.rows.iter().all(|r| r.tax_burden_rate.is_none() && r.disposable_income.is_none()));
    assert!(result.rows.iter().all(|r| r.qol_score.is_some()));
    Ok(())
}

#[tokio::test]
async fn test_tax_file_feeds_disposable_income() -> Result<()> {
    let dir = tempdir()?;
    let tax_path = dir.path().join("state_tax_metrics.csv");
    std::fs::write(
        &tax_path,
        "state,year,personal_income,personal_taxes,tax_burden_pct\n\
         CA,2024,1,1,13.5\n\
         NY,2024,1,1,14.2\n\
         TX,2024,1,1,8.6\n",
    )?;
    let mut config = test_config(&[2024], &tax_path);
    config.features.baseline = BaselinePolicy::Fixed(324.0);
    let pipeline = Pipeline::new(Arc::new(StubHttp::new(&default_cpi())), &config, &Credentials::default())?;

    let result = pipeline.run().await?;
    assert!(result.tax_available);

    let ny = result.rows.iter().find(|r| r.state == StateCode::NY).unwrap();
    assert_eq!(ny.real_income, Some(85_820.0));
    assert!((ny.disposable_income.unwrap() - 85_820.0 * (1.0 - 0.142)).abs() < 1e-6);

    // UT has no tax row; it takes the 2024 mean of the other states
    let ut = result.rows.iter().find(|r| r.state == StateCode::UT).unwrap();
    let mean = (0.135 + 0.142 + 0.086) / 3.0;
    assert!((ut.tax_burden_rate.unwrap() - mean).abs() < 1e-12);
    assert!(ut.imputed_fields.contains("tax_burden_rate"));

    let report = analyze(&result.rows)?;
    assert!(report.alternative.is_some());
    Ok(())
}

#[tokio::test]
async fn test_identical_runs_write_identical_bytes() -> Result<()> {
    let dir = tempdir()?;
    let config = test_config(&[2022, 2023, 2024], &dir.path().join("missing_tax.csv"));

    let mut digests = Vec::new();
    for name in ["first.csv", "second.csv"] {
        let pipeline = Pipeline::new(Arc::new(StubHttp::new(&default_cpi())), &config, &Credentials::default())?;
        let result = pipeline.run().await?;
        digests.push(storage::write_observations(&dir.path().join(name), &result.rows)?);
    }

    assert_eq!(digests[0], digests[1]);
    assert_eq!(std::fs::read(dir.path().join("first.csv"))?, std::fs::read(dir.path().join("second.csv"))?);
    Ok(())
}

#[tokio::test]
async fn test_output_round_trips_through_validation() -> Result<()> {
    let dir = tempdir()?;
    let config = test_config(&[2022, 2023, 2024], &dir.path().join("missing_tax.csv"));
    let pipeline = Pipeline::new(Arc::new(StubHttp::new(&default_cpi())), &config, &Credentials::default())?;
    let result = pipeline.run().await?;

    let path = dir.path().join("out/qol.csv");
    storage::write_observations(&path, &result.rows)?;
    let rows = storage::read_observations(&path)?;
    assert_eq!(rows.len(), 12);
    assert_eq!(rows[0].qol_scope, Some(NormalizationScope::AllYears));

    let report = validate_rows(&rows);
    assert!(report.passed(), "{report}");
    Ok(())
}

#[tokio::test]
async fn test_per_year_scope_scores_each_year() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config(&[2022, 2024], &dir.path().join("missing_tax.csv"));
    config.features.normalization_scope = NormalizationScope::PerYear;
    let pipeline = Pipeline::new(Arc::new(StubHttp::new(&default_cpi())), &config, &Credentials::default())?;

    let result = pipeline.run().await?;
    for year in [2022, 2024] {
        let scores: Vec<f64> = result.rows.iter().filter(|r| r.year == year).filter_map(|r| r.qol_score).collect();
        assert_eq!(scores.len(), 4);
        // Weighted z-scores sum to zero within each population
        assert!(scores.iter().sum::<f64>().abs() < 1e-9);
    }
    Ok(())
}

#[tokio::test]
async fn test_census_failure_is_source_unavailable() -> Result<()> {
    let dir = tempdir()?;
    let config = test_config(&[2024], &dir.path().join("missing_tax.csv"));
    let mut stub = StubHttp::new(&default_cpi());
    stub.failing_state = Some(StateCode::TX);
    let pipeline = Pipeline::new(Arc::new(stub), &config, &Credentials::default())?;

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, QolError::SourceUnavailable { ref origin, .. } if origin == "census_acs"));
    Ok(())
}
