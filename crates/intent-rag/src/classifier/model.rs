//! Standard scaling and multinomial logistic regression

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-feature standardization fitted on training data only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Array1<f32>,
    pub scale: Array1<f32>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<f32>) -> Result<Self> {
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::validation("Cannot fit a scaler on zero samples"))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f32::EPSILON { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: ArrayView2<f32>) -> Array2<f32> {
        (&x - &self.mean) / &self.scale
    }
}

/// Gradient descent settings
#[derive(Debug, Clone, Copy)]
pub struct TrainParams {
    pub epochs: usize,
    pub learning_rate: f32,
    pub l2_penalty: f32,
}

/// Softmax regression: `p = softmax(x · W + b)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftmaxRegression {
    /// `features x classes`
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

impl SoftmaxRegression {
    /// Full-batch gradient descent on weighted cross-entropy with L2 penalty
    pub fn fit(
        x: ArrayView2<f32>,
        y: &[usize],
        n_classes: usize,
        sample_weights: &[f32],
        params: TrainParams,
    ) -> Result<Self> {
        let (n, d) = x.dim();
        if n == 0 || n != y.len() || n != sample_weights.len() {
            return Err(Error::validation(format!(
                "Training set shape mismatch: {} rows, {} labels, {} weights",
                n,
                y.len(),
                sample_weights.len()
            )));
        }

        let mut targets = Array2::<f32>::zeros((n, n_classes));
        for (i, &label) in y.iter().enumerate() {
            targets[[i, label]] = 1.0;
        }
        let w = Array1::from(sample_weights.to_vec());
        let total_weight = w.sum().max(f32::EPSILON);
        let w_col = w.insert_axis(Axis(1));

        let mut model = Self {
            weights: Array2::zeros((d, n_classes)),
            bias: Array1::zeros(n_classes),
        };

        for _ in 0..params.epochs {
            let probs = model.predict_proba(x);
            let residual = (&probs - &targets) * &w_col;

            let grad_w = x.t().dot(&residual) / total_weight + &model.weights * params.l2_penalty;
            let grad_b = residual.sum_axis(Axis(0)) / total_weight;

            model.weights.scaled_add(-params.learning_rate, &grad_w);
            model.bias.scaled_add(-params.learning_rate, &grad_b);
        }

        Ok(model)
    }

    pub fn n_features(&self) -> usize {
        self.weights.nrows()
    }

    pub fn n_classes(&self) -> usize {
        self.weights.ncols()
    }

    /// Row-wise class probabilities
    pub fn predict_proba(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut logits = x.dot(&self.weights) + &self.bias;
        for mut row in logits.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        logits
    }

    /// Most probable class per row; ties go to the lower class index
    pub fn predict(&self, x: ArrayView2<f32>) -> Vec<usize> {
        self.predict_proba(x)
            .rows()
            .into_iter()
            .map(|row| argmax(&row.to_vec()))
            .collect()
    }

    /// Normalized sum of absolute weights per feature
    pub fn feature_importance(&self) -> Vec<f32> {
        let raw = self.weights.mapv(f32::abs).sum_axis(Axis(1));
        let total = raw.sum();
        if total > 0.0 {
            (raw / total).to_vec()
        } else {
            raw.to_vec()
        }
    }
}

pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_v), (i, &v)| {
            if v > best_v {
                (i, v)
            } else {
                (best, best_v)
            }
        })
        .0
}

pub fn accuracy(predicted: &[usize], truth: &[usize]) -> f32 {
    if truth.is_empty() {
        return 0.0;
    }
    let correct = predicted.iter().zip(truth).filter(|(p, t)| p == t).count();
    correct as f32 / truth.len() as f32
}

/// Build a `rows x d` matrix from owned rows of equal width
pub fn to_matrix(rows: &[Vec<f32>]) -> Result<Array2<f32>> {
    let d = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = rows.iter().find(|r| r.len() != d) {
        return Err(Error::validation(format!(
            "Inconsistent feature width: {} vs {}",
            bad.len(),
            d
        )));
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), d), flat)
        .map_err(|e| Error::internal(format!("Matrix shape error: {}", e)))
}
