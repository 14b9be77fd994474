//! Flat-file persistence for the processed table and the tax metrics.
//!
//! Rows are written sorted by (state, year) so identical runs produce
//! identical bytes; the SHA-256 of those bytes identifies a run's output.

use crate::apis::bea_tax::TaxMetricsRow;
use crate::error::{QolError, Result};
use crate::types::ObservationRow;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn to_csv_bytes<T: Serialize>(records: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| QolError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
}

/// Render observation rows as CSV, sorted by (state, year)
pub fn observations_to_csv(rows: &[ObservationRow]) -> Result<Vec<u8>> {
    let mut sorted: Vec<&ObservationRow> = rows.iter().collect();
    sorted.sort_by_key(|r| r.key());
    to_csv_bytes(&sorted)
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    let digest = sha256_hex(bytes);
    debug!(path = %path.display(), bytes = bytes.len(), "File written");
    Ok(digest)
}

/// Write the output table; returns the SHA-256 hex digest of the file
pub fn write_observations(path: &Path, rows: &[ObservationRow]) -> Result<String> {
    let bytes = observations_to_csv(rows)?;
    let digest = write_bytes(path, &bytes)?;
    info!("💾 Saved {} rows to {} (sha256 {})", rows.len(), path.display(), digest);
    Ok(digest)
}

/// Load a table previously written by [`write_observations`]
pub fn read_observations(path: &Path) -> Result<Vec<ObservationRow>> {
    if !path.exists() {
        return Err(QolError::Config(format!("input file {} does not exist", path.display())));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<ObservationRow>, _>>()?;
    info!("Loaded {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Write BEA tax metrics in the layout the tax file loader accepts
pub fn write_tax_metrics(path: &Path, rows: &[TaxMetricsRow]) -> Result<String> {
    let bytes = to_csv_bytes(rows)?;
    let digest = write_bytes(path, &bytes)?;
    info!("💾 Saved {} tax metric rows to {}", rows.len(), path.display());
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::tax_file::read_tax_file;
    use crate::apis::FetchRequest;
    use crate::types::{NormalizationScope, StateCode};
    use tempfile::tempdir;

    fn sample_rows() -> Vec<ObservationRow> {
        let mut ut = ObservationRow::new(StateCode::UT, 2024);
        ut.median_income = Some(96_658.0);
        ut.qol_score = Some(0.653);
        ut.qol_scope = Some(NormalizationScope::AllYears);
        ut.imputed_fields.insert("cpi".to_string());
        ut.imputed_fields.insert("median_rent_monthly".to_string());
        let mut ca = ObservationRow::new(StateCode::CA, 2024);
        ca.median_income = Some(100_149.0);
        ca.high_moe_flag = true;
        vec![ut, ca]
    }

    #[test]
    fn test_rows_written_sorted_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");
        let digest = write_observations(&path, &sample_rows()).unwrap();
        assert_eq!(digest.len(), 64);

        let rows = read_observations(&path).unwrap();
        assert_eq!(rows[0].state, StateCode::CA);
        assert!(rows[0].high_moe_flag);
        assert_eq!(rows[1].qol_scope, Some(NormalizationScope::AllYears));
        assert_eq!(rows[1].imputed_fields.len(), 2);
        assert_eq!(rows[1].cpi, None);
    }

    #[test]
    fn test_output_is_deterministic() {
        let rows = sample_rows();
        let mut reversed = rows.clone();
        reversed.reverse();
        assert_eq!(observations_to_csv(&rows).unwrap(), observations_to_csv(&reversed).unwrap());
    }

    #[test]
    fn test_tax_metrics_readable_by_tax_loader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state_tax_metrics.csv");
        let rows = vec![TaxMetricsRow {
            state: StateCode::TX,
            year: 2024,
            personal_income: 2_000_000.0,
            personal_taxes: 180_000.0,
            tax_burden_pct: 9.0,
        }];
        write_tax_metrics(&path, &rows).unwrap();

        let request = FetchRequest::new(vec![2024], vec![StateCode::TX]).unwrap();
        let records = read_tax_file(&path, &request).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tax_burden_rate, Some(0.09));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
