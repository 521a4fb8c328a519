//! Test-set batch generation.
//!
//! A generator is indexable with a known batch count and yields
//! `(inputs, (profile targets, count targets), coordinates)` triples for the
//! held-out test partition. Generators are selected by name through
//! [`initialize_generator`]; the `file` generator reads tensors from an npz
//! container with a sibling coordinate table.

use ndarray::{s, Array1, Array2};
use ndarray_npy::NpzReader;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

use crate::error::EvalError;

/// Binary region tag carried in the coordinate's 4th field.
///
/// Round-trips through `'1'` (peak) / `'0'` (non-peak).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakTag {
    Peak,
    NonPeak,
}

impl PeakTag {
    pub fn is_peak(self) -> bool {
        matches!(self, PeakTag::Peak)
    }

    pub fn as_char(self) -> char {
        match self {
            PeakTag::Peak => '1',
            PeakTag::NonPeak => '0',
        }
    }

    pub fn parse(s: &str) -> Result<Self, EvalError> {
        match s.trim() {
            "1" => Ok(PeakTag::Peak),
            "0" => Ok(PeakTag::NonPeak),
            other => Err(EvalError::InvalidPeakTag(other.to_string())),
        }
    }
}

/// A genomic interval with its peak tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinate {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
    pub peak: PeakTag,
}

impl Coordinate {
    /// Identifier used in the region-wise output table.
    pub fn region_id(&self) -> String {
        format!("{}:{}-{}", self.chrom, self.start, self.end)
    }
}

/// One batch of the test partition.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Model inputs, `[batch, features]`.
    pub x: Array2<f64>,
    /// True per-position read counts, `[batch, positions]`.
    pub y_profile: Array2<f64>,
    /// True scalar log-counts, `[batch]`.
    pub y_counts: Array1<f64>,
    pub coords: Vec<Coordinate>,
}

/// Indexable source of test batches. Accessed strictly sequentially; not
/// thread-safe.
pub trait BatchGenerator: std::fmt::Debug {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn batch(&self, index: usize) -> Result<Batch, EvalError>;
}

/// Generator over batches already resident in memory. Used by tests and by
/// library consumers that assemble their own partitions.
#[derive(Debug)]
pub struct MemoryBatchGenerator {
    batches: Vec<Batch>,
}

impl MemoryBatchGenerator {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches }
    }
}

impl BatchGenerator for MemoryBatchGenerator {
    fn len(&self) -> usize {
        self.batches.len()
    }

    fn batch(&self, index: usize) -> Result<Batch, EvalError> {
        self.batches
            .get(index)
            .cloned()
            .ok_or(EvalError::BatchIndex {
                index,
                len: self.batches.len(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct CoordRow {
    chrom: String,
    start: i64,
    end: i64,
    peak: String,
}

/// File-backed generator over the test partition.
///
/// Expects an `.npz` file with datasets `inputs [n, d]`,
/// `profile_targets [n, L]` and `count_targets [n]`, plus a sibling
/// `<stem>.coords.csv` table (`chrom,start,end,peak`) with one row per
/// region. The whole partition is loaded up front; batches are row slices.
#[derive(Debug)]
pub struct FileBatchGenerator {
    inputs: Array2<f64>,
    profile_targets: Array2<f64>,
    count_targets: Array1<f64>,
    coords: Vec<Coordinate>,
    batch_size: usize,
}

impl FileBatchGenerator {
    pub fn open(data: &Path, batch_size: usize) -> Result<Self, EvalError> {
        if batch_size == 0 {
            return Err(EvalError::InvalidArgument(
                "batch size must be positive".to_string(),
            ));
        }
        let mut npz = NpzReader::new(File::open(data)?)?;
        let inputs: Array2<f64> = npz.by_name("inputs.npy")?;
        let profile_targets: Array2<f64> = npz.by_name("profile_targets.npy")?;
        let count_targets: Array1<f64> = npz.by_name("count_targets.npy")?;
        let coords = read_coords(&data.with_extension("coords.csv"))?;

        let n = inputs.nrows();
        if profile_targets.nrows() != n || count_targets.len() != n || coords.len() != n {
            return Err(EvalError::ShapeMismatch(format!(
                "test partition disagrees on region count: inputs={n} profiles={} counts={} coords={}",
                profile_targets.nrows(),
                count_targets.len(),
                coords.len()
            )));
        }
        log::info!(
            "opened test partition {}: {} regions, {} features, {} positions",
            data.display(),
            n,
            inputs.ncols(),
            profile_targets.ncols()
        );
        Ok(Self {
            inputs,
            profile_targets,
            count_targets,
            coords,
            batch_size,
        })
    }
}

impl BatchGenerator for FileBatchGenerator {
    fn len(&self) -> usize {
        let n = self.inputs.nrows();
        (n + self.batch_size - 1) / self.batch_size
    }

    fn batch(&self, index: usize) -> Result<Batch, EvalError> {
        let len = self.len();
        if index >= len {
            return Err(EvalError::BatchIndex { index, len });
        }
        let lo = index * self.batch_size;
        let hi = (lo + self.batch_size).min(self.inputs.nrows());
        Ok(Batch {
            x: self.inputs.slice(s![lo..hi, ..]).to_owned(),
            y_profile: self.profile_targets.slice(s![lo..hi, ..]).to_owned(),
            y_counts: self.count_targets.slice(s![lo..hi]).to_owned(),
            coords: self.coords[lo..hi].to_vec(),
        })
    }
}

fn read_coords(path: &Path) -> Result<Vec<Coordinate>, EvalError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut coords = Vec::new();
    for row in reader.deserialize() {
        let row: CoordRow = row?;
        coords.push(Coordinate {
            chrom: row.chrom,
            start: row.start,
            end: row.end,
            peak: PeakTag::parse(&row.peak)?,
        });
    }
    Ok(coords)
}

/// Select a generator implementation by name, mirroring the training-side
/// generator registry.
pub fn initialize_generator(
    name: &str,
    data: &Path,
    batch_size: usize,
) -> Result<Box<dyn BatchGenerator>, EvalError> {
    match name {
        "file" => Ok(Box::new(FileBatchGenerator::open(data, batch_size)?)),
        other => Err(EvalError::UnknownGenerator(other.to_string())),
    }
}
