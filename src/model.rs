//! Model artifact loading and the batched forward pass.
//!
//! The trained model is a serialized two-headed dense network: a shared
//! hidden layer feeding a profile-logits head (one logit per position) and a
//! scalar log-counts head. The artifact also names the custom loss symbols
//! the model was trained with; those are supplied explicitly by the caller
//! through [`CustomObjects`] instead of a process-global registry.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::EvalError;

/// A registered loss symbol: maps a true-counts row and a predicted
/// distribution to a scalar loss.
pub type LossFn = fn(&[f64], &[f64]) -> f64;

/// Explicit name-to-symbol map handed to [`load_model`].
///
/// Loading fails with [`EvalError::MissingCustomObject`] if the artifact
/// declares a symbol that is absent here.
#[derive(Default)]
pub struct CustomObjects {
    symbols: HashMap<String, LossFn>,
}

impl CustomObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: &str, f: LossFn) -> Self {
        self.symbols.insert(name.to_string(), f);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<LossFn> {
        self.symbols.get(name).copied()
    }

    /// The loss symbols shipped with this crate.
    pub fn builtin() -> Self {
        Self::new().register(
            "MultichannelMultinomialNLL",
            crate::metrics::multichannel_multinomial_nll,
        )
    }
}

/// On-disk representation of a trained model (JSON document).
///
/// Weight matrices are stored flat in row-major order with their dimensions
/// given by `input_dim`, `hidden_dim` and `profile_len`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub profile_len: usize,
    /// Loss symbols this model was trained with.
    #[serde(default)]
    pub custom_objects: Vec<String>,
    pub dense_w: Vec<f64>,
    pub dense_b: Vec<f64>,
    pub profile_w: Vec<f64>,
    pub profile_b: Vec<f64>,
    pub counts_w: Vec<f64>,
    pub counts_b: f64,
}

/// Anything that can produce `(profile logits, scalar counts)` for a batch.
pub trait Predictor {
    fn predict(&self, x: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>), EvalError>;
}

/// A loaded model ready for batched inference.
#[derive(Debug)]
pub struct ProfileModel {
    dense_w: Array2<f64>,   // hidden x input
    dense_b: Array1<f64>,   // hidden
    profile_w: Array2<f64>, // profile_len x hidden
    profile_b: Array1<f64>, // profile_len
    counts_w: Array1<f64>,  // hidden
    counts_b: f64,
}

impl ProfileModel {
    pub fn from_artifact(artifact: &ModelArtifact) -> Result<Self, EvalError> {
        let dense_w = Array2::from_shape_vec(
            (artifact.hidden_dim, artifact.input_dim),
            artifact.dense_w.clone(),
        )
        .map_err(|e| EvalError::ShapeMismatch(format!("dense_w: {e}")))?;
        let profile_w = Array2::from_shape_vec(
            (artifact.profile_len, artifact.hidden_dim),
            artifact.profile_w.clone(),
        )
        .map_err(|e| EvalError::ShapeMismatch(format!("profile_w: {e}")))?;
        if artifact.dense_b.len() != artifact.hidden_dim {
            return Err(EvalError::ShapeMismatch(format!(
                "dense_b has {} entries, expected {}",
                artifact.dense_b.len(),
                artifact.hidden_dim
            )));
        }
        if artifact.profile_b.len() != artifact.profile_len {
            return Err(EvalError::ShapeMismatch(format!(
                "profile_b has {} entries, expected {}",
                artifact.profile_b.len(),
                artifact.profile_len
            )));
        }
        if artifact.counts_w.len() != artifact.hidden_dim {
            return Err(EvalError::ShapeMismatch(format!(
                "counts_w has {} entries, expected {}",
                artifact.counts_w.len(),
                artifact.hidden_dim
            )));
        }
        Ok(Self {
            dense_w,
            dense_b: Array1::from_vec(artifact.dense_b.clone()),
            profile_w,
            profile_b: Array1::from_vec(artifact.profile_b.clone()),
            counts_w: Array1::from_vec(artifact.counts_w.clone()),
            counts_b: artifact.counts_b,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.dense_w.ncols()
    }

    pub fn profile_len(&self) -> usize {
        self.profile_w.nrows()
    }

    /// Total trainable parameter count, for the post-load summary.
    pub fn param_count(&self) -> usize {
        self.dense_w.len()
            + self.dense_b.len()
            + self.profile_w.len()
            + self.profile_b.len()
            + self.counts_w.len()
            + 1
    }
}

impl Predictor for ProfileModel {
    fn predict(&self, x: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>), EvalError> {
        if x.ncols() != self.input_dim() {
            return Err(EvalError::ShapeMismatch(format!(
                "input has {} features, model expects {}",
                x.ncols(),
                self.input_dim()
            )));
        }
        let mut hidden = x.dot(&self.dense_w.t());
        hidden += &self.dense_b.view().insert_axis(Axis(0));
        let hidden = hidden.mapv(|v| v.max(0.0)); // relu
        let mut logits = hidden.dot(&self.profile_w.t());
        logits += &self.profile_b.view().insert_axis(Axis(0));
        let counts = hidden.dot(&self.counts_w) + self.counts_b;
        Ok((logits, counts))
    }
}

/// Deserialize a trained model, checking its declared custom loss symbols
/// against the injected map.
pub fn load_model(path: &Path, custom_objects: &CustomObjects) -> Result<ProfileModel, EvalError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| EvalError::ModelLoad(format!("{}: {e}", path.display())))?;
    let artifact: ModelArtifact = serde_json::from_str(&raw)
        .map_err(|e| EvalError::ModelLoad(format!("{}: {e}", path.display())))?;
    for name in &artifact.custom_objects {
        if !custom_objects.contains(name) {
            return Err(EvalError::MissingCustomObject(name.clone()));
        }
    }
    let model = ProfileModel::from_artifact(&artifact)?;
    log::info!(
        "loaded model {}: input_dim={} hidden_dim={} profile_len={} params={}",
        path.display(),
        model.input_dim(),
        artifact.hidden_dim,
        model.profile_len(),
        model.param_count()
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn tiny_artifact() -> ModelArtifact {
        // input_dim 2, hidden_dim 2, profile_len 3
        ModelArtifact {
            input_dim: 2,
            hidden_dim: 2,
            profile_len: 3,
            custom_objects: vec!["MultichannelMultinomialNLL".to_string()],
            dense_w: vec![1.0, 0.0, 0.0, 1.0],
            dense_b: vec![0.0, 0.0],
            profile_w: vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            profile_b: vec![0.0, 0.0, 0.0],
            counts_w: vec![1.0, 1.0],
            counts_b: 0.5,
        }
    }

    #[test]
    fn test_forward_shapes() {
        let model = ProfileModel::from_artifact(&tiny_artifact()).unwrap();
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let (logits, counts) = model.predict(&x).unwrap();
        assert_eq!(logits.dim(), (2, 3));
        assert_eq!(counts.len(), 2);
        // identity dense layer, relu is a no-op on positive inputs
        assert!((counts[0] - 3.5).abs() < 1e-12);
        assert!((counts[1] - 7.5).abs() < 1e-12);
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let model = ProfileModel::from_artifact(&tiny_artifact()).unwrap();
        let x = Array2::<f64>::zeros((1, 5));
        assert!(matches!(
            model.predict(&x),
            Err(EvalError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_load_checks_custom_objects() {
        let path = std::env::temp_dir().join("profile_eval_missing_custom.json");
        let mut artifact = tiny_artifact();
        artifact.custom_objects = vec!["SomeUnknownLoss".to_string()];
        std::fs::write(&path, serde_json::to_string(&artifact).unwrap()).unwrap();

        let err = load_model(&path, &CustomObjects::builtin()).unwrap_err();
        assert!(matches!(err, EvalError::MissingCustomObject(name) if name == "SomeUnknownLoss"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_artifact_roundtrip() {
        let path = std::env::temp_dir().join("profile_eval_artifact_roundtrip.json");
        let artifact = tiny_artifact();
        std::fs::write(&path, serde_json::to_string(&artifact).unwrap()).unwrap();

        let model = load_model(&path, &CustomObjects::builtin()).unwrap();
        assert_eq!(model.input_dim(), 2);
        assert_eq!(model.profile_len(), 3);
        assert_eq!(model.param_count(), 4 + 2 + 6 + 3 + 2 + 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_builtin_custom_objects() {
        let objects = CustomObjects::builtin();
        assert!(objects.contains("MultichannelMultinomialNLL"));
        assert!(objects.get("MultichannelMultinomialNLL").is_some());
        assert!(!objects.contains("SomethingElse"));
    }
}
