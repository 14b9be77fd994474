// Pipeline processing: merging, imputation, quality checks and derived features

pub mod clean;
pub mod features;
pub mod quality_gate;

pub use clean::{impute_missing, merge_sources};
pub use features::{engineer_features, FeatureSettings};
pub use quality_gate::{QualityGate, QualityGateConfig, QualityWarning};
