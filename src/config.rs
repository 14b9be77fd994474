use crate::constants::{
    BEA_API_KEY_ENV, BEA_API_URL, BLS_API_KEY_ENV, BLS_TIMESERIES_URL, CENSUS_API_BASE_URL, CENSUS_API_KEY_ENV,
    DEFAULT_CONFIG_PATH, DEFAULT_MOE_THRESHOLD, DEFAULT_OUTPUT_PATH, DEFAULT_TAX_PATH, DEFAULT_TIMEOUT_SECS,
    DEFAULT_YEARS,
};
use crate::error::{QolError, Result};
use crate::types::{BaselinePolicy, NormalizationScope, StateCode};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub features: FeaturesConfig,
    pub quality: QualityConfig,
    pub sources: SourcesConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub years: Vec<u16>,
    pub states: Vec<StateCode>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            years: DEFAULT_YEARS.to_vec(),
            states: StateCode::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// `"sample_mean"` or `{ fixed = 300.0 }`
    pub baseline: BaselinePolicy,
    pub normalization_scope: NormalizationScope,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub moe_threshold: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            moe_threshold: DEFAULT_MOE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub census_base_url: String,
    pub bls_url: String,
    pub bea_url: String,
    pub tax_path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            census_base_url: CENSUS_API_BASE_URL.to_string(),
            bls_url: BLS_TIMESERIES_URL.to_string(),
            bea_url: BEA_API_URL.to_string(),
            tax_path: PathBuf::from(DEFAULT_TAX_PATH),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_OUTPUT_PATH),
        }
    }
}

impl Config {
    /// Load from `path`, or from `qol.toml` when no path is given. A missing
    /// default file means built-in defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        if !explicit && !config_path.exists() {
            debug!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            QolError::Config(format!("Failed to read config file '{}': {}", config_path.display(), e))
        })?;
        let config = Self::from_toml(&config_content)?;
        info!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.years.is_empty() {
            return Err(QolError::Config("pipeline.years must not be empty".to_string()));
        }
        if self.pipeline.states.is_empty() {
            return Err(QolError::Config("pipeline.states must not be empty".to_string()));
        }
        if !(self.quality.moe_threshold > 0.0) {
            return Err(QolError::Config(format!(
                "quality.moe_threshold must be positive, got {}",
                self.quality.moe_threshold
            )));
        }
        if let BaselinePolicy::Fixed(value) = self.features.baseline {
            if !(value.is_finite() && value > 0.0) {
                return Err(QolError::Config(format!("fixed CPI baseline must be positive, got {value}")));
            }
        }
        Ok(())
    }
}

/// API keys read from the environment (after `.env` is loaded)
#[derive(Clone, Default)]
pub struct Credentials {
    pub census_api_key: Option<String>,
    pub bls_api_key: Option<String>,
    pub bea_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            census_api_key: read(CENSUS_API_KEY_ENV),
            bls_api_key: read(BLS_API_KEY_ENV),
            bea_api_key: read(BEA_API_KEY_ENV),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |k: &Option<String>| if k.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("census_api_key", &mask(&self.census_api_key))
            .field("bls_api_key", &mask(&self.bls_api_key))
            .field("bea_api_key", &mask(&self.bea_api_key))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.pipeline.years, vec![2022, 2023, 2024]);
        assert_eq!(config.pipeline.states.len(), 4);
        assert_eq!(config.features.baseline, BaselinePolicy::SampleMean);
        assert_eq!(config.features.normalization_scope, NormalizationScope::AllYears);
        assert_eq!(config.quality.moe_threshold, 0.15);
        assert_eq!(config.sources.tax_path, PathBuf::from(DEFAULT_TAX_PATH));
    }

    #[test]
    fn test_partial_sections_override() {
        let config = Config::from_toml(
            r#"
            [pipeline]
            years = [2023, 2024]
            states = ["UT", "CA"]

            [features]
            baseline = { fixed = 300.0 }
            normalization_scope = "per_year"

            [sources]
            timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.years, vec![2023, 2024]);
        assert_eq!(config.pipeline.states, vec![StateCode::UT, StateCode::CA]);
        assert_eq!(config.features.baseline, BaselinePolicy::Fixed(300.0));
        assert_eq!(config.features.normalization_scope, NormalizationScope::PerYear);
        assert_eq!(config.sources.timeout_secs, 5);
        assert_eq!(config.sources.bls_url, BLS_TIMESERIES_URL);
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let config = Config::from_toml(include_str!("../qol.toml.example")).unwrap();
        let defaults = Config::default();
        assert_eq!(config.pipeline.years, defaults.pipeline.years);
        assert_eq!(config.features.baseline, defaults.features.baseline);
        assert_eq!(config.sources.census_base_url, defaults.sources.census_base_url);
        assert_eq!(config.output.path, defaults.output.path);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_toml("[pipeline]\nyears = []").is_err());
        assert!(Config::from_toml("[quality]\nmoe_threshold = 0.0").is_err());
        assert!(Config::from_toml("[features]\nbaseline = { fixed = -1.0 }").is_err());
        assert!(matches!(Config::from_toml("[pipeline]\nyears = \"x\""), Err(QolError::Toml(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = Config::load(Some(Path::new("/nope/qol.toml"))).unwrap_err();
        assert!(matches!(err, QolError::Config(_)));
    }

    #[test]
    fn test_credentials_debug_masks_keys() {
        let creds = Credentials {
            census_api_key: Some("secret".to_string()),
            ..Default::default()
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<set>"));
    }
}
