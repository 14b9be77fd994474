// Data pipeline: fetch the sources, then clean, check and derive features

pub mod processing;

use crate::apis::bls_cpi::BlsCpiSource;
use crate::apis::census_acs::CensusAcsSource;
use crate::apis::tax_file::TaxFileSource;
use crate::apis::{DataSource, FetchRequest};
use crate::app::ports::HttpClientPort;
use crate::config::{Config, Credentials};
use crate::error::{QolError, Result};
use crate::types::{AcsRecord, BaselinePolicy, CpiRecord, NormalizationScope, ObservationRow, TaxRecord};
use processing::{engineer_features, impute_missing, merge_sources, FeatureSettings, QualityGate, QualityGateConfig, QualityWarning};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Policies applied while processing one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingSettings {
    pub baseline: BaselinePolicy,
    pub scope: NormalizationScope,
    pub moe_threshold: f64,
}

impl ProcessingSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            baseline: config.features.baseline,
            scope: config.features.normalization_scope,
            moe_threshold: config.quality.moe_threshold,
        }
    }
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Raw records from every source. `tax` is `None` when the optional
/// tax file is absent.
#[derive(Debug, Clone, Default)]
pub struct SourceTables {
    pub acs: Vec<AcsRecord>,
    pub cpi: Vec<CpiRecord>,
    pub tax: Option<Vec<TaxRecord>>,
}

/// Result of a complete pipeline run
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Final table sorted by (state, year)
    pub rows: Vec<ObservationRow>,
    pub warnings: Vec<QualityWarning>,
    pub tax_available: bool,
    pub baseline_cpi: f64,
    pub scope: NormalizationScope,
    pub imputed_values: usize,
}

impl PipelineResult {
    pub fn scored_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.qol_score.is_some()).count()
    }
}

/// Merge, impute, quality-check and feature-engineer the source tables.
/// Pure: the same tables and settings always give the same rows.
#[instrument(skip_all, fields(scope = %settings.scope))]
pub fn process(tables: &SourceTables, settings: &ProcessingSettings) -> Result<PipelineResult> {
    if tables.acs.is_empty() {
        return Err(QolError::InsufficientData("no ACS records to process".to_string()));
    }

    info!("🔧 Merging {} ACS, {} CPI records", tables.acs.len(), tables.cpi.len());
    let mut rows = merge_sources(&tables.acs, &tables.cpi, tables.tax.as_deref())?;
    let imputed_values = impute_missing(&mut rows);

    let gate = QualityGate::with_config(QualityGateConfig {
        moe_threshold: settings.moe_threshold,
    });
    let warnings = gate.assess(&mut rows);
    if !warnings.is_empty() {
        warn!("{} high-MOE estimates flagged", warnings.len());
    }

    let feature_settings = FeatureSettings {
        baseline: settings.baseline,
        scope: settings.scope,
    };
    let baseline_cpi = engineer_features(&mut rows, &feature_settings)?;

    Ok(PipelineResult {
        rows,
        warnings,
        tax_available: tables.tax.is_some(),
        baseline_cpi,
        scope: settings.scope,
        imputed_values,
    })
}

pub struct Pipeline {
    request: FetchRequest,
    census: CensusAcsSource,
    bls: BlsCpiSource,
    tax: TaxFileSource,
    settings: ProcessingSettings,
}

impl Pipeline {
    pub fn new(http: Arc<dyn HttpClientPort>, config: &Config, credentials: &Credentials) -> Result<Self> {
        config.validate()?;
        let request = FetchRequest::new(config.pipeline.years.clone(), config.pipeline.states.clone())?;
        Ok(Self {
            request,
            census: CensusAcsSource::new(
                http.clone(),
                config.sources.census_base_url.clone(),
                credentials.census_api_key.clone(),
            ),
            bls: BlsCpiSource::new(http, config.sources.bls_url.clone(), credentials.bls_api_key.clone()),
            tax: TaxFileSource::new(config.sources.tax_path.clone()),
            settings: ProcessingSettings::from_config(config),
        })
    }

    /// Fetch every source in sequence. Required sources fail the run; a
    /// missing tax file only downgrades it.
    #[instrument(skip(self))]
    pub async fn fetch_sources(&self) -> Result<SourceTables> {
        info!("📡 Fetching {}...", self.census.source_name());
        let acs = self.census.fetch(&self.request).await?;

        info!("📡 Fetching {}...", self.bls.source_name());
        let cpi = self.bls.fetch(&self.request).await?;

        let tax = match self.tax.fetch(&self.request).await {
            Ok(records) => Some(records),
            Err(QolError::MissingOptionalSource { path }) => {
                warn!("Tax file not found at {}; tax-derived fields stay unset", path);
                None
            }
            Err(e) => return Err(e),
        };

        Ok(SourceTables { acs, cpi, tax })
    }

    /// Run the complete pipeline
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<PipelineResult> {
        info!(
            "🚀 Starting pipeline for {} states × {} years",
            self.request.states.len(),
            self.request.years.len()
        );
        let started = Instant::now();

        let tables = self.fetch_sources().await?;
        let result = process(&tables, &self.settings)?;

        let secs = started.elapsed().as_secs_f64();
        crate::metrics::pipeline::completed(secs);
        info!(
            "✅ Pipeline finished: {} rows, {} scored, {} imputed values, {} quality warnings ({:.2}s)",
            result.rows.len(),
            result.scored_rows(),
            result.imputed_values,
            result.warnings.len(),
            secs
        );
        Ok(result)
    }
}
