use serde::Serialize;
use tracing::{instrument, warn};

use crate::constants::DEFAULT_MOE_THRESHOLD;
use crate::types::{Estimate, ObservationRow, StateCode};

/// A high margin-of-error finding for one field of one row.
/// Informational only: flagged rows stay in every computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityWarning {
    pub state: StateCode,
    pub year: u16,
    /// Estimate that triggered the warning
    pub field: &'static str,
    /// MOE divided by the estimate's magnitude
    pub relative_moe: f64,
    pub threshold: f64,
}

impl std::fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}: {} relative MOE {:.1}% exceeds {:.1}%",
            self.state,
            self.year,
            self.field,
            self.relative_moe * 100.0,
            self.threshold * 100.0
        )
    }
}

/// Configuration for the margin-of-error gate
#[derive(Debug, Clone)]
pub struct QualityGateConfig {
    /// Relative MOE above which an estimate is flagged
    pub moe_threshold: f64,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            moe_threshold: DEFAULT_MOE_THRESHOLD,
        }
    }
}

/// Flags survey estimates whose margin of error is large relative to the estimate
pub struct QualityGate {
    pub config: QualityGateConfig,
}

impl QualityGate {
    pub fn new() -> Self {
        Self {
            config: QualityGateConfig::default(),
        }
    }

    pub fn with_config(config: QualityGateConfig) -> Self {
        Self { config }
    }

    /// Write the relative-MOE columns, set `high_moe_flag` and
    /// `quality_flags`, and return one warning per offending estimate.
    #[instrument(skip_all, fields(threshold = self.config.moe_threshold))]
    pub fn assess(&self, rows: &mut [ObservationRow]) -> Vec<QualityWarning> {
        let mut warnings = Vec::new();
        for row in rows.iter_mut() {
            row.median_income_rel_moe = Estimate::new(row.median_income, row.median_income_moe).relative_moe();
            row.median_rent_monthly_rel_moe =
                Estimate::new(row.median_rent_monthly, row.median_rent_monthly_moe).relative_moe();
            row.median_home_value_rel_moe =
                Estimate::new(row.median_home_value, row.median_home_value_moe).relative_moe();

            let checks = [
                ("median_income", row.median_income_rel_moe),
                ("median_rent_monthly", row.median_rent_monthly_rel_moe),
                ("median_home_value", row.median_home_value_rel_moe),
                (
                    "rent_burden_30plus",
                    Estimate::new(row.rent_burden_30plus, row.rent_burden_30plus_moe).relative_moe(),
                ),
                (
                    "owner_burden_30plus",
                    Estimate::new(row.owner_burden_30plus, row.owner_burden_30plus_moe).relative_moe(),
                ),
            ];

            for (field, relative) in checks {
                let Some(relative_moe) = relative.filter(|r| *r > self.config.moe_threshold) else {
                    continue;
                };
                let warning = QualityWarning {
                    state: row.state,
                    year: row.year,
                    field,
                    relative_moe,
                    threshold: self.config.moe_threshold,
                };
                warn!("Data quality: {}", warning);
                row.high_moe_flag = true;
                row.quality_flags.insert(format!("high_moe:{field}"));
                warnings.push(warning);
            }
        }

        crate::metrics::pipeline::quality_flags(warnings.len());
        warnings
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new()
    }
}
