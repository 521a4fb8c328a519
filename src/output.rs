//! Serialization of evaluation artifacts.
//!
//! Two outputs per run: the metrics summary as indented JSON under
//! `<prefix>/metrics.json`, and the full-length (unfiltered) region-wise
//! arrays as a named multi-array npz container at
//! `<prefix>region_wise_predictions_and_metrics.npz` with the coordinate
//! identifiers in a sibling CSV. Writes are not atomic; a failure mid-write
//! leaves a partial file, which is acceptable for a one-shot offline run.

use ndarray_npy::NpzWriter;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::EvalError;
use crate::metrics::MetricsReport;
use crate::predict::PredictionSet;

/// Write the metrics summary as `<prefix>/metrics.json` (4-space indent).
pub fn write_metrics_report(
    report: &MetricsReport,
    output_prefix: &Path,
) -> Result<PathBuf, EvalError> {
    fs::create_dir_all(output_prefix)?;
    let path = output_prefix.join("metrics.json");
    let file = File::create(&path)?;
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(file, formatter);
    report.serialize(&mut ser)?;
    log::info!("wrote metrics summary to {}", path.display());
    Ok(path)
}

/// Persist the full-length prediction arrays and their region identifiers.
///
/// The npz container holds `log_counts_labels`, `log_counts_preds`,
/// `true_counts` and `profile_preds`; region identifiers (npz has no string
/// dataset type) go to the sibling `region_wise_coordinates.csv`.
pub fn write_region_store(
    set: &PredictionSet,
    output_prefix: &Path,
) -> Result<(PathBuf, PathBuf), EvalError> {
    if let Some(parent) = output_prefix.parent() {
        fs::create_dir_all(parent)?;
    }
    // The container paths concatenate onto the prefix without a separator,
    // matching the established output layout.
    let npz_path = PathBuf::from(format!(
        "{}region_wise_predictions_and_metrics.npz",
        output_prefix.display()
    ));
    let coords_path = PathBuf::from(format!(
        "{}region_wise_coordinates.csv",
        output_prefix.display()
    ));

    let mut npz = NpzWriter::new(File::create(&npz_path)?);
    npz.add_array("log_counts_labels", &set.true_counts_sum)?;
    npz.add_array("log_counts_preds", &set.counts_sum_preds)?;
    npz.add_array("true_counts", &set.true_counts)?;
    npz.add_array("profile_preds", &set.profile_probs)?;
    npz.finish()?;

    let mut writer = csv::Writer::from_path(&coords_path)?;
    writer.write_record(["region_id", "chrom", "start", "end", "peak"])?;
    for coord in &set.coords {
        writer.write_record([
            coord.region_id(),
            coord.chrom.clone(),
            coord.start.to_string(),
            coord.end.to_string(),
            coord.peak.as_char().to_string(),
        ])?;
    }
    writer.flush()?;

    log::info!(
        "wrote region-wise predictions to {} and coordinates to {}",
        npz_path.display(),
        coords_path.display()
    );
    Ok((npz_path, coords_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{Coordinate, PeakTag};
    use ndarray::array;
    use ndarray_npy::NpzReader;

    fn small_set() -> PredictionSet {
        PredictionSet {
            true_counts: array![[4.0, 6.0], [1.0, 9.0]],
            profile_probs: array![[0.4, 0.6], [0.1, 0.9]],
            true_counts_sum: array![2.3, 2.3],
            counts_sum_preds: array![2.2, 2.4],
            coords: vec![
                Coordinate {
                    chrom: "chr1".to_string(),
                    start: 0,
                    end: 100,
                    peak: PeakTag::Peak,
                },
                Coordinate {
                    chrom: "chr2".to_string(),
                    start: 50,
                    end: 150,
                    peak: PeakTag::NonPeak,
                },
            ],
        }
    }

    #[test]
    fn test_metrics_report_json_schema() {
        let dir = std::env::temp_dir().join("profile_eval_metrics_json");
        let _ = std::fs::remove_dir_all(&dir);

        let mut report = MetricsReport::default();
        report
            .counts_metrics
            .insert("pearsonr_peaks".to_string(), 0.9);
        let path = write_metrics_report(&report, &dir).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["counts_metrics"]["pearsonr_peaks"], 0.9);
        assert!(value["profile_metrics"].as_object().unwrap().is_empty());
        // indented, not a single line
        assert!(raw.lines().count() > 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_region_store_roundtrip() {
        let dir = std::env::temp_dir().join("profile_eval_region_store");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        // prefix ends with a separator so the store lands inside the dir
        let prefix = PathBuf::from(format!("{}/", dir.display()));

        let set = small_set();
        let (npz_path, coords_path) = write_region_store(&set, &prefix).unwrap();
        assert!(npz_path.exists());
        assert!(coords_path.exists());

        let mut npz = NpzReader::new(File::open(&npz_path).unwrap()).unwrap();
        let labels: ndarray::Array1<f64> = npz.by_name("log_counts_labels.npy").unwrap();
        assert_eq!(labels.to_vec(), vec![2.3, 2.3]);
        let profiles: ndarray::Array2<f64> = npz.by_name("profile_preds.npy").unwrap();
        assert_eq!(profiles.dim(), (2, 2));

        let coords_raw = std::fs::read_to_string(&coords_path).unwrap();
        assert!(coords_raw.contains("chr1:0-100"));
        assert!(coords_raw.contains("chr2:50-150"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
