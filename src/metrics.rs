//! Accuracy metrics over predicted profiles and counts.
//!
//! Profile metrics (multinomial NLL, Jensen-Shannon divergence and their
//! normalized / random-baseline variants) are computed exactly once over the
//! full region set and yield one value per region; subset reporting masks
//! those per-region arrays after the fact. Count metrics (Spearman, Pearson,
//! MSE) depend on the filtered values and are recomputed per subset. Summary
//! aggregation is the median, which tolerates outlier regions better than
//! the mean.

use ndarray::{Array1, Array2};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use crate::error::EvalError;
use crate::predict::PredictionSet;

/// Floor applied to predicted probabilities before taking logs.
const PROB_FLOOR: f64 = 1e-12;

/// Per-region profile metric arrays, all of length `n`.
pub struct ProfileMetrics {
    /// Multinomial negative log-likelihood of the true counts under the
    /// predicted distribution.
    pub mnll: Array1<f64>,
    /// MNLL divided by the region's total true count.
    pub mnll_norm: Array1<f64>,
    /// Jensen-Shannon distance between true and predicted profiles.
    pub jsd: Array1<f64>,
    /// JSD divided by the JSD of the uniform predictor on the same region.
    pub jsd_norm: Array1<f64>,
    /// JSD of the true profile against a random baseline profile.
    pub jsd_rnd: Array1<f64>,
    /// Random-baseline JSD, uniform-normalized like `jsd_norm`.
    pub jsd_rnd_norm: Array1<f64>,
}

/// Summary document serialized to `metrics.json`.
#[derive(Debug, Default, Serialize)]
pub struct MetricsReport {
    pub counts_metrics: BTreeMap<String, f64>,
    pub profile_metrics: BTreeMap<String, f64>,
}

impl MetricsReport {
    pub fn is_empty(&self) -> bool {
        self.counts_metrics.is_empty() && self.profile_metrics.is_empty()
    }
}

// Lanczos approximation, g = 7, n = 9.
const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_13,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        PI.ln() - (PI * x).sin().abs().ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut acc = LANCZOS[0];
        for (i, &c) in LANCZOS.iter().enumerate().skip(1) {
            acc += c / (x + i as f64);
        }
        let t = x + 7.5;
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
    }
}

/// Negative log-likelihood of observing `counts` under a multinomial with
/// the given event probabilities.
pub fn multinomial_nll(counts: &[f64], probs: &[f64]) -> f64 {
    let total: f64 = counts.iter().sum();
    let mut ll = ln_gamma(total + 1.0);
    for (&c, &p) in counts.iter().zip(probs) {
        ll -= ln_gamma(c + 1.0);
        ll += c * p.max(PROB_FLOOR).ln();
    }
    -ll
}

/// The loss symbol registered under `MultichannelMultinomialNLL` in the
/// model artifact. This evaluation tool only sees single-channel profiles.
pub fn multichannel_multinomial_nll(counts: &[f64], probs: &[f64]) -> f64 {
    multinomial_nll(counts, probs)
}

fn kl_sum(p: &[f64], m: &[f64]) -> f64 {
    p.iter()
        .zip(m)
        .map(|(&a, &b)| if a > 0.0 { a * (a / b).ln() } else { 0.0 })
        .sum()
}

/// Jensen-Shannon distance (square root of the divergence, natural log)
/// between two distributions of equal length.
pub fn jensen_shannon(p: &[f64], q: &[f64]) -> f64 {
    let m: Vec<f64> = p.iter().zip(q).map(|(&a, &b)| 0.5 * (a + b)).collect();
    let jsd = 0.5 * kl_sum(p, &m) + 0.5 * kl_sum(q, &m);
    jsd.max(0.0).sqrt()
}

/// Normalize raw counts into a distribution; a zero-total region maps to the
/// uniform distribution.
fn normalize_counts(counts: &[f64]) -> Vec<f64> {
    let total: f64 = counts.iter().sum();
    if total > 0.0 {
        counts.iter().map(|&c| c / total).collect()
    } else {
        vec![1.0 / counts.len() as f64; counts.len()]
    }
}

/// Random baseline profile: uniform random weights normalized to sum to 1.
fn random_profile<R: Rng>(len: usize, rng: &mut R) -> Vec<f64> {
    let weights: Vec<f64> = (0..len).map(|_| rng.gen::<f64>()).collect();
    normalize_counts(&weights)
}

/// Compute the six per-region profile metric arrays over the full set.
pub fn profile_metrics<R: Rng>(
    true_counts: &Array2<f64>,
    profile_probs: &Array2<f64>,
    rng: &mut R,
) -> Result<ProfileMetrics, EvalError> {
    if true_counts.dim() != profile_probs.dim() {
        return Err(EvalError::ShapeMismatch(format!(
            "true counts are {:?} but predictions are {:?}",
            true_counts.dim(),
            profile_probs.dim()
        )));
    }
    let n = true_counts.nrows();
    let width = true_counts.ncols();
    let uniform = vec![1.0 / width.max(1) as f64; width];

    let mut mnll = Vec::with_capacity(n);
    let mut mnll_norm = Vec::with_capacity(n);
    let mut jsd = Vec::with_capacity(n);
    let mut jsd_norm = Vec::with_capacity(n);
    let mut jsd_rnd = Vec::with_capacity(n);
    let mut jsd_rnd_norm = Vec::with_capacity(n);

    for (t_row, p_row) in true_counts.rows().into_iter().zip(profile_probs.rows()) {
        let t = t_row.to_vec();
        let p = p_row.to_vec();
        let total: f64 = t.iter().sum();

        let nll = multinomial_nll(&t, &p);
        mnll.push(nll);
        mnll_norm.push(nll / total.max(1.0));

        let true_dist = normalize_counts(&t);
        let d = jensen_shannon(&true_dist, &p);
        let d_uniform = jensen_shannon(&true_dist, &uniform);
        jsd.push(d);
        jsd_norm.push(if d_uniform > PROB_FLOOR {
            d / d_uniform
        } else {
            0.0
        });

        let baseline = random_profile(width, rng);
        let d_rnd = jensen_shannon(&true_dist, &baseline);
        jsd_rnd.push(d_rnd);
        jsd_rnd_norm.push(if d_uniform > PROB_FLOOR {
            d_rnd / d_uniform
        } else {
            0.0
        });
    }

    Ok(ProfileMetrics {
        mnll: Array1::from_vec(mnll),
        mnll_norm: Array1::from_vec(mnll_norm),
        jsd: Array1::from_vec(jsd),
        jsd_norm: Array1::from_vec(jsd_norm),
        jsd_rnd: Array1::from_vec(jsd_rnd),
        jsd_rnd_norm: Array1::from_vec(jsd_rnd_norm),
    })
}

fn pearson(x: &[f64], y: &[f64]) -> Result<f64, EvalError> {
    let n = x.len();
    if n < 2 {
        return Err(EvalError::Computation(format!(
            "correlation over {n} regions is undefined"
        )));
    }
    let mx = x.iter().sum::<f64>() / n as f64;
    let my = y.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (&a, &b) in x.iter().zip(y) {
        cov += (a - mx) * (b - my);
        vx += (a - mx) * (a - mx);
        vy += (b - my) * (b - my);
    }
    if vx == 0.0 || vy == 0.0 {
        return Err(EvalError::Computation(
            "correlation is undefined for zero-variance input".to_string(),
        ));
    }
    Ok(cov / (vx.sqrt() * vy.sqrt()))
}

/// Ranks with ties assigned their average rank (1-based).
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = avg;
        }
        i = j + 1;
    }
    ranks
}

fn spearman(x: &[f64], y: &[f64]) -> Result<f64, EvalError> {
    pearson(&average_ranks(x), &average_ranks(y))
}

fn mean_squared_error(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().max(1);
    x.iter()
        .zip(y)
        .map(|(&a, &b)| (a - b) * (a - b))
        .sum::<f64>()
        / n as f64
}

/// Count-level accuracy between true and predicted log-counts.
///
/// Returns `(spearman, pearson, mse)`. Side effect: dumps the paired values
/// as `<out_path>_scatter.csv` for offline plotting.
pub fn counts_metrics(
    true_sum: &Array1<f64>,
    pred_sum: &Array1<f64>,
    out_path: &Path,
    label: &str,
) -> Result<(f64, f64, f64), EvalError> {
    if true_sum.len() != pred_sum.len() {
        return Err(EvalError::ShapeMismatch(format!(
            "count arrays disagree: {} vs {}",
            true_sum.len(),
            pred_sum.len()
        )));
    }
    let t = true_sum.to_vec();
    let p = pred_sum.to_vec();
    let spearman_cor = spearman(&t, &p)?;
    let pearson_cor = pearson(&t, &p)?;
    let mse = mean_squared_error(&t, &p);

    let scatter = format!("{}_scatter.csv", out_path.display());
    if let Some(parent) = Path::new(&scatter).parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(&scatter)?;
    writer.write_record(["true_log_counts", "predicted_log_counts"])?;
    for (a, b) in t.iter().zip(&p) {
        writer.write_record([a.to_string(), b.to_string()])?;
    }
    writer.flush()?;

    log::info!("{label}: spearmanr={spearman_cor:.4} pearsonr={pearson_cor:.4} mse={mse:.4}");
    Ok((spearman_cor, pearson_cor, mse))
}

/// Select the entries of `values` where `mask` is true.
pub fn filter_by_mask(values: &Array1<f64>, mask: &[bool]) -> Array1<f64> {
    values
        .iter()
        .zip(mask)
        .filter(|(_, &keep)| keep)
        .map(|(&v, _)| v)
        .collect()
}

fn median(values: &mut Vec<f64>) -> Result<f64, EvalError> {
    if values.is_empty() {
        return Err(EvalError::Computation(
            "median of an empty subset is undefined".to_string(),
        ));
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Ok(values[mid])
    } else {
        Ok(0.5 * (values[mid - 1] + values[mid]))
    }
}

/// Median of the masked entries; an empty selection is a fatal
/// [`EvalError::Computation`].
pub fn masked_median(values: &Array1<f64>, mask: &[bool]) -> Result<f64, EvalError> {
    let mut selected: Vec<f64> = values
        .iter()
        .zip(mask)
        .filter(|(_, &keep)| keep)
        .map(|(&v, _)| v)
        .collect();
    median(&mut selected)
}

fn median_of(values: &Array1<f64>) -> Result<f64, EvalError> {
    let mut all = values.to_vec();
    median(&mut all)
}

/// Assemble the metrics report from up to three conditional evaluation
/// passes: combined, non-peaks only, peaks only.
///
/// Count metrics are recomputed on the filtered scalars; profile metrics are
/// the medians of the already-computed per-region arrays under each mask.
pub fn aggregate_report(
    set: &PredictionSet,
    profile: &ProfileMetrics,
    peaks_configured: bool,
    nonpeaks_configured: bool,
    output_prefix: &Path,
) -> Result<MetricsReport, EvalError> {
    let mut report = MetricsReport::default();

    if peaks_configured && nonpeaks_configured {
        let (spearman_cor, pearson_cor, mse) = counts_metrics(
            &set.true_counts_sum,
            &set.counts_sum_preds,
            &output_prefix.join("peaks_and_nonpeaks"),
            "Both peaks and non peaks",
        )?;
        let counts = &mut report.counts_metrics;
        counts.insert("spearmanr_peaks_and_nonpeaks".to_string(), spearman_cor);
        counts.insert("pearsonr_peaks_and_nonpeaks".to_string(), pearson_cor);
        counts.insert("mse_peaks_and_nonpeaks".to_string(), mse);

        let profiles = &mut report.profile_metrics;
        profiles.insert(
            "median_jsd_peaks_and_nonpeaks".to_string(),
            median_of(&profile.jsd)?,
        );
        profiles.insert(
            "median_normjsd_peaks_and_nonpeaks".to_string(),
            median_of(&profile.jsd_norm)?,
        );
        profiles.insert(
            "median_mnll_peaks_and_nonpeaks".to_string(),
            median_of(&profile.mnll)?,
        );
        profiles.insert(
            "median_normmnll_peaks_and_nonpeaks".to_string(),
            median_of(&profile.mnll_norm)?,
        );
    }

    if nonpeaks_configured {
        let mask = set.nonpeak_mask();
        let true_sum = filter_by_mask(&set.true_counts_sum, &mask);
        let pred_sum = filter_by_mask(&set.counts_sum_preds, &mask);
        let (spearman_cor, pearson_cor, mse) = counts_metrics(
            &true_sum,
            &pred_sum,
            &output_prefix.join("only_nonpeaks"),
            "Only non peaks",
        )?;
        let counts = &mut report.counts_metrics;
        counts.insert("spearmanr_nonpeaks".to_string(), spearman_cor);
        counts.insert("pearsonr_nonpeaks".to_string(), pearson_cor);
        counts.insert("mse_nonpeaks".to_string(), mse);

        let profiles = &mut report.profile_metrics;
        profiles.insert(
            "median_jsd_nonpeaks".to_string(),
            masked_median(&profile.jsd, &mask)?,
        );
        profiles.insert(
            "median_normjsd_nonpeaks".to_string(),
            masked_median(&profile.jsd_norm, &mask)?,
        );
        profiles.insert(
            "median_random_jsd_nonpeaks".to_string(),
            masked_median(&profile.jsd_rnd, &mask)?,
        );
        profiles.insert(
            "median_random_normjsd_nonpeaks".to_string(),
            masked_median(&profile.jsd_rnd_norm, &mask)?,
        );
        profiles.insert(
            "median_mnll_nonpeaks".to_string(),
            masked_median(&profile.mnll, &mask)?,
        );
        profiles.insert(
            "median_normmnll_nonpeaks".to_string(),
            masked_median(&profile.mnll_norm, &mask)?,
        );
    }

    if peaks_configured {
        let mask = set.peak_mask();
        let true_sum = filter_by_mask(&set.true_counts_sum, &mask);
        let pred_sum = filter_by_mask(&set.counts_sum_preds, &mask);
        let (spearman_cor, pearson_cor, mse) = counts_metrics(
            &true_sum,
            &pred_sum,
            &output_prefix.join("only_peaks"),
            "Only peaks",
        )?;
        let counts = &mut report.counts_metrics;
        counts.insert("spearmanr_peaks".to_string(), spearman_cor);
        counts.insert("pearsonr_peaks".to_string(), pearson_cor);
        counts.insert("mse_peaks".to_string(), mse);

        let profiles = &mut report.profile_metrics;
        profiles.insert(
            "median_jsd_peaks".to_string(),
            masked_median(&profile.jsd, &mask)?,
        );
        profiles.insert(
            "median_normjsd_peaks".to_string(),
            masked_median(&profile.jsd_norm, &mask)?,
        );
        profiles.insert(
            "median_mnll_peaks".to_string(),
            masked_median(&profile.mnll, &mask)?,
        );
        profiles.insert(
            "median_normmnll_peaks".to_string(),
            masked_median(&profile.mnll_norm, &mask)?,
        );
    }

    Ok(report)
}
