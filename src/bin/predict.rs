//! Evaluate a trained profile model on the held-out test partition.
//!
//! One-shot offline job: load the model, run batched inference, compute
//! count- and profile-level metrics over the configured subsets, and write
//! the summary JSON plus the region-wise prediction arrays. Any failure
//! aborts the run; partial output files are not cleaned up.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use profile_eval::generator::initialize_generator;
use profile_eval::metrics::{aggregate_report, profile_metrics};
use profile_eval::model::{load_model, CustomObjects};
use profile_eval::output::{write_metrics_report, write_region_store};
use profile_eval::predict::predict_on_batches;

/// Sentinel identifier meaning a subset was not configured. This is the
/// literal flag value, not an absent flag.
const NOT_CONFIGURED: &str = "None";

#[derive(Parser, Debug)]
#[command(
    name = "predict",
    about = "Run a trained profile model over the test set and report accuracy metrics"
)]
struct PredictArgs {
    /// Trained model artifact (JSON weights).
    #[arg(long)]
    model: PathBuf,

    /// Output directory/prefix for the metrics summary, scatter dumps and
    /// region-wise arrays.
    #[arg(long)]
    output_prefix: PathBuf,

    /// Peak-set identifier; "None" means no peak subset was configured.
    #[arg(long, default_value = NOT_CONFIGURED)]
    peaks: String,

    /// Non-peak-set identifier; "None" means no non-peak subset was configured.
    #[arg(long, default_value = NOT_CONFIGURED)]
    nonpeaks: String,

    /// Batch generator to use for the test partition.
    #[arg(long, default_value = "file")]
    generator: String,

    /// Test partition tensors (.npz with a sibling .coords.csv table).
    #[arg(long)]
    test_data: PathBuf,

    #[arg(long, default_value_t = 64)]
    batch_size: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = PredictArgs::parse();

    let model = load_model(&args.model, &CustomObjects::builtin())?;
    let generator = initialize_generator(&args.generator, &args.test_data, args.batch_size)?;

    let set = predict_on_batches(&model, generator.as_ref(), 1.0)?;
    println!("true_counts: {:?}", set.true_counts.dim());
    println!("profile_probs: {:?}", set.profile_probs.dim());
    println!("true_counts_sum: {}", set.true_counts_sum.len());
    println!("counts_sum_preds: {}", set.counts_sum_preds.len());
    println!("coordinates: {}", set.coords.len());

    let mut rng = rand::thread_rng();
    let profile = profile_metrics(&set.true_counts, &set.profile_probs, &mut rng)?;

    let report = aggregate_report(
        &set,
        &profile,
        args.peaks != NOT_CONFIGURED,
        args.nonpeaks != NOT_CONFIGURED,
        &args.output_prefix,
    )?;

    let metrics_path = write_metrics_report(&report, &args.output_prefix)?;
    let (npz_path, coords_path) = write_region_store(&set, &args.output_prefix)?;
    println!("metrics: {}", metrics_path.display());
    println!("predictions: {}", npz_path.display());
    println!("coordinates: {}", coords_path.display());

    Ok(())
}
