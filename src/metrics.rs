//! Metrics for pipeline runs.
//!
//! Recording goes through the `metrics` facade; the CLI installs a Prometheus
//! recorder and can dump the rendered snapshot to a file when a run ends.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
pub use metrics_exporter_prometheus::PrometheusHandle;
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::error::{QolError, Result};

/// All metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    SourcesRequestsSuccess,
    SourcesRequestsError,
    SourcesRequestDuration,
    SourcesRecordsFetched,
    OptionalSourceMissing,
    CleanRowsMerged,
    CleanValuesImputed,
    QualityFlagsRaised,
    FeaturesRowsScored,
    PipelineDuration,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::SourcesRequestsSuccess => "qol_sources_requests_success_total",
            MetricName::SourcesRequestsError => "qol_sources_requests_error_total",
            MetricName::SourcesRequestDuration => "qol_sources_request_duration_seconds",
            MetricName::SourcesRecordsFetched => "qol_sources_records_fetched_total",
            MetricName::OptionalSourceMissing => "qol_optional_source_missing_total",
            MetricName::CleanRowsMerged => "qol_clean_rows_merged_total",
            MetricName::CleanValuesImputed => "qol_clean_values_imputed_total",
            MetricName::QualityFlagsRaised => "qol_quality_flags_raised_total",
            MetricName::FeaturesRowsScored => "qol_features_rows_scored_total",
            MetricName::PipelineDuration => "qol_pipeline_duration_seconds",
        }
    }
}

pub mod sources {
    use super::*;

    pub fn request_success(origin: &str, duration_secs: f64) {
        counter!(MetricName::SourcesRequestsSuccess.as_str(), "source" => origin.to_string()).increment(1);
        histogram!(MetricName::SourcesRequestDuration.as_str(), "source" => origin.to_string())
            .record(duration_secs);
    }

    pub fn request_error(origin: &str) {
        counter!(MetricName::SourcesRequestsError.as_str(), "source" => origin.to_string()).increment(1);
    }

    pub fn records_fetched(origin: &str, count: usize) {
        counter!(MetricName::SourcesRecordsFetched.as_str(), "source" => origin.to_string())
            .increment(count as u64);
    }

    pub fn optional_missing(origin: &str) {
        counter!(MetricName::OptionalSourceMissing.as_str(), "source" => origin.to_string()).increment(1);
    }
}

pub mod pipeline {
    use super::*;

    pub fn rows_merged(count: usize) {
        counter!(MetricName::CleanRowsMerged.as_str()).increment(count as u64);
    }

    pub fn values_imputed(field: &str, count: usize) {
        counter!(MetricName::CleanValuesImputed.as_str(), "field" => field.to_string())
            .increment(count as u64);
    }

    pub fn quality_flags(count: usize) {
        counter!(MetricName::QualityFlagsRaised.as_str()).increment(count as u64);
    }

    pub fn rows_scored(count: usize) {
        counter!(MetricName::FeaturesRowsScored.as_str()).increment(count as u64);
    }

    pub fn completed(duration_secs: f64) {
        histogram!(MetricName::PipelineDuration.as_str()).record(duration_secs);
    }
}

/// Install the Prometheus recorder as the global metrics sink
pub fn init() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| QolError::Config(format!("Failed to install Prometheus recorder: {e}")))?;
    info!("Metrics recorder installed");
    Ok(handle)
}

/// Write the current Prometheus text snapshot to `path`
pub fn write_snapshot(handle: &PrometheusHandle, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, handle.render())?;
    info!("Metrics snapshot written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_follow_prometheus_conventions() {
        let names = [
            MetricName::SourcesRequestsSuccess,
            MetricName::SourcesRequestsError,
            MetricName::CleanValuesImputed,
            MetricName::PipelineDuration,
        ];
        for name in names {
            let s = name.to_string();
            assert!(s.starts_with("qol_"));
            assert!(s.ends_with("_total") || s.ends_with("_seconds"));
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        sources::request_success("census_acs", 0.25);
        sources::request_error("bls_cpi");
        pipeline::rows_merged(12);
    }
}
