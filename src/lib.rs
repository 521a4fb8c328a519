//! Post-training evaluation pipeline for genomic profile models.
//!
//! Loads a trained model artifact, runs batched inference over the held-out
//! test partition, aggregates count-level and profile-level accuracy
//! metrics over peak / non-peak subsets, and serializes the results to disk.

pub mod error;
pub mod generator;
pub mod metrics;
pub mod model;
pub mod output;
pub mod predict;
