//! Batched inference over the test partition.
//!
//! Batches are consumed strictly in order on a single thread; a failing
//! batch aborts the whole run. Results are accumulated in memory and turned
//! into fixed-size arrays only after the last batch, so the entire test
//! partition's predictions are resident at once.

use ndarray::{Array1, Array2, Axis};

use crate::error::EvalError;
use crate::generator::{BatchGenerator, Coordinate};
use crate::model::Predictor;

/// How often to log loop progress, in batches.
const PROGRESS_INTERVAL: usize = 100;

/// Five parallel sequences over the full test partition, one entry per
/// region, in generator order.
#[derive(Debug)]
pub struct PredictionSet {
    /// True per-position read counts, `[n, positions]`.
    pub true_counts: Array2<f64>,
    /// Predicted post-softmax profile distributions, `[n, positions]`.
    pub profile_probs: Array2<f64>,
    /// True scalar log-counts, `[n]`.
    pub true_counts_sum: Array1<f64>,
    /// Predicted scalar log-counts, `[n]`.
    pub counts_sum_preds: Array1<f64>,
    pub coords: Vec<Coordinate>,
}

impl PredictionSet {
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Mask selecting regions tagged `'1'`.
    pub fn peak_mask(&self) -> Vec<bool> {
        self.coords.iter().map(|c| c.peak.is_peak()).collect()
    }

    /// Mask selecting regions tagged `'0'`.
    pub fn nonpeak_mask(&self) -> Vec<bool> {
        self.coords.iter().map(|c| !c.peak.is_peak()).collect()
    }
}

/// Temperature softmax over each row, stabilized by subtracting the row mean
/// before exponentiation.
pub fn temperature_softmax(logits: &Array2<f64>, temperature: f64) -> Array2<f64> {
    if logits.ncols() == 0 {
        return logits.clone();
    }
    let mean = logits.mean_axis(Axis(1)).unwrap();
    let centered = logits - &mean.insert_axis(Axis(1));
    let exps = centered.mapv(|v| (temperature * v).exp());
    let sums = exps.sum_axis(Axis(1)).insert_axis(Axis(1));
    exps / &sums
}

/// Run the model over every batch of the generator and collect the five
/// parallel result arrays.
pub fn predict_on_batches(
    model: &dyn Predictor,
    generator: &dyn BatchGenerator,
    temperature: f64,
) -> Result<PredictionSet, EvalError> {
    let num_batches = generator.len();

    let mut true_counts: Vec<f64> = Vec::new();
    let mut profile_probs: Vec<f64> = Vec::new();
    let mut true_counts_sum: Vec<f64> = Vec::new();
    let mut counts_sum_preds: Vec<f64> = Vec::new();
    let mut coords: Vec<Coordinate> = Vec::new();
    let mut positions: Option<usize> = None;

    for index in 0..num_batches {
        if index % PROGRESS_INTERVAL == 0 {
            log::info!("{index}/{num_batches}");
        }
        let batch = generator.batch(index)?;
        let rows = batch.x.nrows();
        if batch.y_profile.nrows() != rows
            || batch.y_counts.len() != rows
            || batch.coords.len() != rows
        {
            return Err(EvalError::ShapeMismatch(format!(
                "batch {index} disagrees on row count"
            )));
        }

        let (logits, counts_pred) = model.predict(&batch.x)?;
        if logits.nrows() != rows || counts_pred.len() != rows {
            return Err(EvalError::ShapeMismatch(format!(
                "model returned {} predictions for a batch of {rows}",
                logits.nrows()
            )));
        }
        let width = *positions.get_or_insert(logits.ncols());
        if logits.ncols() != width || batch.y_profile.ncols() != width {
            return Err(EvalError::ShapeMismatch(format!(
                "batch {index} has profile width {} but the run started with {width}",
                logits.ncols()
            )));
        }

        let probs = temperature_softmax(&logits, temperature);
        true_counts.extend(batch.y_profile.iter());
        profile_probs.extend(probs.iter());
        true_counts_sum.extend(batch.y_counts.iter());
        counts_sum_preds.extend(counts_pred.iter());
        coords.extend(batch.coords);
    }

    let n = coords.len();
    let width = positions.unwrap_or(0);
    let true_counts = Array2::from_shape_vec((n, width), true_counts)
        .map_err(|e| EvalError::ShapeMismatch(format!("true counts: {e}")))?;
    let profile_probs = Array2::from_shape_vec((n, width), profile_probs)
        .map_err(|e| EvalError::ShapeMismatch(format!("profile predictions: {e}")))?;
    Ok(PredictionSet {
        true_counts,
        profile_probs,
        true_counts_sum: Array1::from_vec(true_counts_sum),
        counts_sum_preds: Array1::from_vec(counts_sum_preds),
        coords,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{Batch, MemoryBatchGenerator, PeakTag};
    use ndarray::array;

    fn coord(start: i64, tag: PeakTag) -> Coordinate {
        Coordinate {
            chrom: "chr1".to_string(),
            start,
            end: start + 10,
            peak: tag,
        }
    }

    #[test]
    fn test_softmax_rows_are_distributions() {
        let logits = array![[0.0, 1.0, 2.0], [-5.0, 0.0, 5.0], [3.0, 3.0, 3.0]];
        let probs = temperature_softmax(&logits, 1.0);
        for row in probs.rows() {
            let sum: f64 = row.sum();
            assert!((sum - 1.0).abs() < 1e-12);
            assert!(row.iter().all(|&p| p >= 0.0));
        }
        // equal logits give the uniform distribution
        assert!((probs[[2, 0]] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_matches_unstabilized_form() {
        let logits = array![[1.0, 2.0, 4.0]];
        let probs = temperature_softmax(&logits, 1.0);
        let raw: Vec<f64> = logits.row(0).iter().map(|&v| v.exp()).collect();
        let total: f64 = raw.iter().sum();
        for (p, r) in probs.row(0).iter().zip(&raw) {
            assert!((p - r / total).abs() < 1e-12);
        }
    }

    #[test]
    fn test_softmax_temperature_sharpens() {
        let logits = array![[0.0, 1.0]];
        let soft = temperature_softmax(&logits, 0.5);
        let sharp = temperature_softmax(&logits, 2.0);
        assert!(sharp[[0, 1]] > soft[[0, 1]]);
    }

    #[test]
    fn test_parallel_lengths_after_run() {
        let batches = vec![
            Batch {
                x: array![[0.1, 0.7, 0.2], [0.3, 0.3, 0.4]],
                y_profile: array![[1.0, 7.0, 2.0], [3.0, 3.0, 4.0]],
                y_counts: array![2.3, 2.3],
                coords: vec![coord(0, PeakTag::Peak), coord(100, PeakTag::NonPeak)],
            },
            Batch {
                x: array![[0.5, 0.4, 0.1]],
                y_profile: array![[5.0, 4.0, 1.0]],
                y_counts: array![2.3],
                coords: vec![coord(200, PeakTag::Peak)],
            },
        ];
        let generator = MemoryBatchGenerator::new(batches);
        let model = LogitEcho { positions: 3 };
        let set = predict_on_batches(&model, &generator, 1.0).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.true_counts.nrows(), 3);
        assert_eq!(set.profile_probs.nrows(), 3);
        assert_eq!(set.true_counts_sum.len(), 3);
        assert_eq!(set.counts_sum_preds.len(), 3);
        assert_eq!(set.coords.len(), 3);
    }

    #[test]
    fn test_masks_partition_regions() {
        let batches = vec![Batch {
            x: array![[0.1], [0.2], [0.3]],
            y_profile: array![[1.0], [2.0], [3.0]],
            y_counts: array![1.0, 2.0, 3.0],
            coords: vec![
                coord(0, PeakTag::Peak),
                coord(100, PeakTag::NonPeak),
                coord(200, PeakTag::Peak),
            ],
        }];
        let generator = MemoryBatchGenerator::new(batches);
        let model = LogitEcho { positions: 1 };
        let set = predict_on_batches(&model, &generator, 1.0).unwrap();
        let peaks = set.peak_mask();
        let nonpeaks = set.nonpeak_mask();
        assert_eq!(peaks.len(), set.len());
        for i in 0..set.len() {
            // exactly one of the two masks selects each region
            assert!(peaks[i] ^ nonpeaks[i]);
        }
    }

    /// Predictor whose profile logits are the inputs themselves and whose
    /// count prediction is the input row sum.
    struct LogitEcho {
        positions: usize,
    }

    impl Predictor for LogitEcho {
        fn predict(&self, x: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>), EvalError> {
            assert_eq!(x.ncols(), self.positions);
            Ok((x.clone(), x.sum_axis(Axis(1))))
        }
    }
}
