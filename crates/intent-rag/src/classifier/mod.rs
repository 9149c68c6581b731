//! Intent classification over sentence embeddings
//!
//! The classifier moves through `Untrained -> Training -> Ready`. Once ready
//! the fitted state is immutable and shared behind an `Arc`; a persisted
//! bundle is loaded at startup and training only happens when none exists.

pub mod dataset;
pub mod model;

use chrono::{DateTime, Utc};
use ndarray::{Array2, Axis};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use self::model::{accuracy, argmax, to_matrix, SoftmaxRegression, StandardScaler, TrainParams};
use crate::config::ClassifierConfig;
use crate::embeddings::{EmbedMode, TextEmbedder};
use crate::error::{Error, Result};
use crate::types::{Intent, LabeledExample};

/// Format tag of the persisted bundle
pub const BUNDLE_VERSION: &str = "1.0";

/// Evaluation recorded at training time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub train_accuracy: f32,
    /// Absent when no validation split was held out
    pub validation_accuracy: Option<f32>,
    pub cross_val_scores: Vec<f32>,
    /// Normalized per-feature importance
    pub feature_importance: Vec<f32>,
    pub class_distribution: BTreeMap<Intent, usize>,
    /// Validation confusion matrix, rows are true classes in `classes` order
    pub confusion_matrix: Vec<Vec<usize>>,
    pub n_train: usize,
    pub n_validation: usize,
}

/// Everything needed to predict, persisted as one JSON bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierState {
    pub version: String,
    pub classes: Vec<Intent>,
    pub scaler: StandardScaler,
    pub model: SoftmaxRegression,
    pub metrics: TrainingMetrics,
    pub trained_at: DateTime<Utc>,
}

impl ClassifierState {
    pub fn n_features(&self) -> usize {
        self.scaler.n_features()
    }

    /// Load a bundle written by [`ClassifierState::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)?;
        let state: ClassifierState = serde_json::from_slice(&raw).map_err(|e| {
            Error::persistence(format!("Corrupt classifier bundle {}: {}", path.display(), e))
        })?;

        if state.version != BUNDLE_VERSION {
            return Err(Error::persistence(format!(
                "Unsupported classifier bundle version {} (expected {})",
                state.version, BUNDLE_VERSION
            )));
        }
        if state.model.n_features() != state.n_features()
            || state.model.n_classes() != state.classes.len()
        {
            return Err(Error::persistence("Classifier bundle shapes are inconsistent"));
        }
        Ok(state)
    }

    /// Write the bundle via a temp file and rename
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        tracing::info!("Saved classifier bundle to {}", path.display());
        Ok(())
    }
}

/// Lifecycle of the classifier
#[derive(Debug, Clone)]
pub enum ClassifierPhase {
    Untrained,
    Training,
    Ready(Arc<ClassifierState>),
}

impl ClassifierPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ClassifierPhase::Untrained => "untrained",
            ClassifierPhase::Training => "training",
            ClassifierPhase::Ready(_) => "ready",
        }
    }
}

/// Classification result
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub best_intent: Intent,
    /// Equals the largest value in `all_probabilities`
    pub confidence: f32,
    pub all_probabilities: BTreeMap<Intent, f32>,
    /// Most probable intents, descending
    pub top_options: Vec<(Intent, f32)>,
}

/// Importance statistics reported by [`ModelSummary`]
#[derive(Debug, Clone, Serialize)]
pub struct ImportanceStats {
    pub mean: f32,
    pub std: f32,
    pub max: f32,
    pub non_zero_features: usize,
}

/// Human-facing description of a trained classifier
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub version: String,
    pub model_type: &'static str,
    pub classes: Vec<Intent>,
    pub n_features: usize,
    pub train_accuracy: f32,
    pub validation_accuracy: Option<f32>,
    pub cross_val_mean: Option<f32>,
    pub cross_val_std: Option<f32>,
    pub feature_importance: ImportanceStats,
    pub class_distribution: BTreeMap<Intent, usize>,
    pub trained_at: DateTime<Utc>,
}

/// Intent classifier
pub struct IntentClassifier {
    embedder: Arc<dyn TextEmbedder>,
    config: ClassifierConfig,
    phase: RwLock<ClassifierPhase>,
}

impl IntentClassifier {
    pub fn new(embedder: Arc<dyn TextEmbedder>, config: ClassifierConfig) -> Self {
        Self {
            embedder,
            config,
            phase: RwLock::new(ClassifierPhase::Untrained),
        }
    }

    pub fn phase(&self) -> ClassifierPhase {
        self.phase.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.phase.read(), ClassifierPhase::Ready(_))
    }

    fn state(&self) -> Result<Arc<ClassifierState>> {
        match &*self.phase.read() {
            ClassifierPhase::Ready(state) => Ok(state.clone()),
            other => Err(Error::not_ready(format!(
                "Intent classifier is {}",
                other.name()
            ))),
        }
    }

    /// Install an already fitted state
    pub fn install(&self, state: ClassifierState) -> Result<()> {
        if state.n_features() != self.embedder.dimensions() {
            return Err(Error::validation(format!(
                "Classifier expects {} features, embedder produces {}",
                state.n_features(),
                self.embedder.dimensions()
            )));
        }
        *self.phase.write() = ClassifierPhase::Ready(Arc::new(state));
        Ok(())
    }

    /// Load the persisted bundle, or train from the configured data when
    /// there is none
    ///
    /// Stays untrained when neither is available.
    pub fn load_or_train(&self) -> Result<()> {
        let path = &self.config.model_path;
        if path.exists() {
            match ClassifierState::load(path).and_then(|state| self.install(state)) {
                Ok(()) => {
                    tracing::info!("Loaded intent classifier from {}", path.display());
                    return Ok(());
                }
                Err(e) => tracing::warn!("Ignoring classifier bundle {}: {}", path.display(), e),
            }
        }

        match &self.config.training_data {
            Some(data) => {
                tracing::info!("No usable classifier bundle, training from {}", data.display());
                let examples = dataset::load_labeled(data)?;
                self.train_examples(&examples)?;
                Ok(())
            }
            None => {
                tracing::warn!("No classifier bundle and no training data; classifier stays untrained");
                Ok(())
            }
        }
    }

    /// Embed labeled examples and train on them
    pub fn train_examples(&self, examples: &[LabeledExample]) -> Result<TrainingMetrics> {
        let texts: Vec<&str> = examples.iter().map(|e| e.text.as_str()).collect();
        let vectors = self.embedder.embed(&texts, EmbedMode::Document)?;
        let labels: Vec<Intent> = examples.iter().map(|e| e.intent).collect();
        self.train(&vectors, &labels)
    }

    /// Fit, evaluate, persist and install a new model
    ///
    /// The model is only served once its bundle is on disk; a failed fit or
    /// save restores the previous phase.
    pub fn train(&self, vectors: &[Vec<f32>], labels: &[Intent]) -> Result<TrainingMetrics> {
        let previous = std::mem::replace(&mut *self.phase.write(), ClassifierPhase::Training);

        let fitted = self
            .fit(vectors, labels)
            .and_then(|state| state.save(&self.config.model_path).map(|()| state));

        match fitted {
            Ok(state) => {
                let metrics = state.metrics.clone();
                *self.phase.write() = ClassifierPhase::Ready(Arc::new(state));
                Ok(metrics)
            }
            Err(e) => {
                *self.phase.write() = previous;
                Err(e)
            }
        }
    }

    fn fit(&self, vectors: &[Vec<f32>], labels: &[Intent]) -> Result<ClassifierState> {
        let start = Instant::now();

        if vectors.is_empty() || vectors.len() != labels.len() {
            return Err(Error::validation(format!(
                "Need matching, non-empty vectors and labels ({} vs {})",
                vectors.len(),
                labels.len()
            )));
        }
        let x = to_matrix(vectors)?;
        if x.ncols() != self.embedder.dimensions() {
            return Err(Error::validation(format!(
                "Training vectors have {} features, embedder produces {}",
                x.ncols(),
                self.embedder.dimensions()
            )));
        }

        let mut class_distribution: BTreeMap<Intent, usize> = BTreeMap::new();
        for &label in labels {
            *class_distribution.entry(label).or_default() += 1;
        }
        let classes: Vec<Intent> = class_distribution.keys().copied().collect();
        if classes.len() < 2 {
            return Err(Error::validation("Training data needs at least two intents"));
        }
        log_distribution(&class_distribution, labels.len());

        let y: Vec<usize> = labels
            .iter()
            .map(|l| classes.iter().position(|c| c == l).unwrap_or(0))
            .collect();

        let (train_idx, val_idx) =
            dataset::stratified_split(&y, self.config.validation_fraction, self.config.seed);
        let x_train = x.select(Axis(0), &train_idx);
        let y_train: Vec<usize> = train_idx.iter().map(|&i| y[i]).collect();

        let scaler = StandardScaler::fit(x_train.view())?;
        let x_train = scaler.transform(x_train.view());
        let params = self.train_params();

        let model = fit_weighted(&x_train, &y_train, classes.len(), params)?;
        let train_accuracy = accuracy(&model.predict(x_train.view()), &y_train);

        let mut confusion = vec![vec![0usize; classes.len()]; classes.len()];
        let validation_accuracy = if val_idx.is_empty() {
            None
        } else {
            let x_val = scaler.transform(x.select(Axis(0), &val_idx).view());
            let y_val: Vec<usize> = val_idx.iter().map(|&i| y[i]).collect();
            let predicted = model.predict(x_val.view());
            for (&p, &t) in predicted.iter().zip(&y_val) {
                confusion[t][p] += 1;
            }
            Some(accuracy(&predicted, &y_val))
        };

        let cross_val_scores = self.cross_validate(&x_train, &y_train, classes.len(), params)?;

        tracing::info!(
            "Trained intent classifier on {} examples in {:?} (train acc {:.3}, validation acc {})",
            train_idx.len(),
            start.elapsed(),
            train_accuracy,
            validation_accuracy
                .map(|a| format!("{:.3}", a))
                .unwrap_or_else(|| "n/a".into())
        );
        if let Some(val) = validation_accuracy {
            if train_accuracy - val > 0.1 {
                tracing::warn!("Classifier may be overfitting (gap {:.3})", train_accuracy - val);
            }
        }

        let metrics = TrainingMetrics {
            train_accuracy,
            validation_accuracy,
            cross_val_scores,
            feature_importance: model.feature_importance(),
            class_distribution,
            confusion_matrix: confusion,
            n_train: train_idx.len(),
            n_validation: val_idx.len(),
        };

        Ok(ClassifierState {
            version: BUNDLE_VERSION.to_string(),
            classes,
            scaler,
            model,
            metrics,
            trained_at: Utc::now(),
        })
    }

    fn train_params(&self) -> TrainParams {
        TrainParams {
            epochs: self.config.epochs,
            learning_rate: self.config.learning_rate,
            l2_penalty: self.config.l2_penalty,
        }
    }

    /// Stratified k-fold accuracy on the (already scaled) training split
    fn cross_validate(
        &self,
        x: &Array2<f32>,
        y: &[usize],
        n_classes: usize,
        params: TrainParams,
    ) -> Result<Vec<f32>> {
        let k = self.config.cv_folds.min(y.len());
        if k < 2 {
            return Ok(Vec::new());
        }

        let folds = dataset::stratified_folds(y, k, self.config.seed);
        let mut scores = Vec::with_capacity(k);

        for (f, held_out) in folds.iter().enumerate() {
            if held_out.is_empty() {
                continue;
            }
            let train_idx: Vec<usize> = folds
                .iter()
                .enumerate()
                .filter(|(g, _)| *g != f)
                .flat_map(|(_, idx)| idx.iter().copied())
                .collect();
            if train_idx.is_empty() {
                continue;
            }

            let y_fold: Vec<usize> = train_idx.iter().map(|&i| y[i]).collect();
            let model = fit_weighted(&x.select(Axis(0), &train_idx), &y_fold, n_classes, params)?;

            let y_held: Vec<usize> = held_out.iter().map(|&i| y[i]).collect();
            let predicted = model.predict(x.select(Axis(0), held_out).view());
            scores.push(accuracy(&predicted, &y_held));
        }

        Ok(scores)
    }

    /// Classify a query
    pub fn predict(&self, text: &str) -> Result<Prediction> {
        let state = self.state()?;
        let vector = self
            .embedder
            .embed(&[text], EmbedMode::Document)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("Empty embedding result"))?;
        predict_with(&state, &vector, self.config.top_n_options)
    }

    /// Classify a precomputed embedding
    pub fn predict_vector(&self, vector: &[f32]) -> Result<Prediction> {
        let state = self.state()?;
        predict_with(&state, vector, self.config.top_n_options)
    }

    /// Describe the trained model, if any
    pub fn summary(&self) -> Option<ModelSummary> {
        let state = self.state().ok()?;
        let metrics = &state.metrics;

        let (cv_mean, cv_std) = mean_std(&metrics.cross_val_scores);
        let (imp_mean, imp_std) = mean_std(&metrics.feature_importance);

        Some(ModelSummary {
            version: state.version.clone(),
            model_type: "SoftmaxRegression",
            classes: state.classes.clone(),
            n_features: state.n_features(),
            train_accuracy: metrics.train_accuracy,
            validation_accuracy: metrics.validation_accuracy,
            cross_val_mean: cv_mean,
            cross_val_std: cv_std,
            feature_importance: ImportanceStats {
                mean: imp_mean.unwrap_or(0.0),
                std: imp_std.unwrap_or(0.0),
                max: metrics
                    .feature_importance
                    .iter()
                    .copied()
                    .fold(0.0, f32::max),
                non_zero_features: metrics
                    .feature_importance
                    .iter()
                    .filter(|&&v| v > 0.0)
                    .count(),
            },
            class_distribution: metrics.class_distribution.clone(),
            trained_at: state.trained_at,
        })
    }
}

fn fit_weighted(
    x: &Array2<f32>,
    y: &[usize],
    n_classes: usize,
    params: TrainParams,
) -> Result<SoftmaxRegression> {
    let class_weights = dataset::balanced_class_weights(y, n_classes);
    let sample_weights: Vec<f32> = y.iter().map(|&c| class_weights[c]).collect();
    SoftmaxRegression::fit(x.view(), y, n_classes, &sample_weights, params)
}

fn predict_with(state: &ClassifierState, vector: &[f32], top_n: usize) -> Result<Prediction> {
    if vector.len() != state.n_features() {
        return Err(Error::validation(format!(
            "Expected {} features, got {}",
            state.n_features(),
            vector.len()
        )));
    }

    let x = to_matrix(&[vector.to_vec()])?;
    let scaled = state.scaler.transform(x.view());
    let probs = state.model.predict_proba(scaled.view());
    let probs: Vec<f32> = probs.row(0).to_vec();

    let best = argmax(&probs);
    let all_probabilities = state
        .classes
        .iter()
        .copied()
        .zip(probs.iter().copied())
        .collect();

    let mut ranked: Vec<(Intent, f32)> = state.classes.iter().copied().zip(probs.iter().copied()).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(top_n.max(1));

    Ok(Prediction {
        best_intent: state.classes[best],
        confidence: probs[best],
        all_probabilities,
        top_options: ranked,
    })
}

fn mean_std(values: &[f32]) -> (Option<f32>, Option<f32>) {
    if values.is_empty() {
        return (None, None);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (Some(mean), Some(var.sqrt()))
}

fn log_distribution(distribution: &BTreeMap<Intent, usize>, total: usize) {
    for (intent, count) in distribution {
        tracing::debug!(
            "  {:<10} {:>5} ({:.1}%)",
            intent.as_str(),
            count,
            *count as f32 * 100.0 / total as f32
        );
    }
    let max = distribution.values().copied().max().unwrap_or(0);
    let min = distribution.values().copied().min().unwrap_or(0).max(1);
    if max as f32 / min as f32 > 3.0 {
        tracing::warn!(
            "Training data is imbalanced ({}:{}); using balanced class weights",
            max,
            min
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// One-hot-ish vectors keyed on a leading keyword
    struct KeywordEmbedder;

    const KEYWORDS: [&str; 3] = ["library", "squat", "thesis"];

    impl TextEmbedder for KeywordEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        fn embed(&self, texts: &[&str], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; 4];
                    match KEYWORDS.iter().position(|k| t.contains(k)) {
                        Some(i) => v[i] = 1.0,
                        None => v[3] = 1.0,
                    }
                    v[3] += t.len() as f32 * 0.001;
                    v
                })
                .collect())
        }
    }

    fn config(dir: &Path) -> ClassifierConfig {
        ClassifierConfig {
            model_path: dir.join("classifier.json"),
            epochs: 150,
            ..Default::default()
        }
    }

    fn examples() -> Vec<LabeledExample> {
        let mut out = Vec::new();
        for i in 0..10 {
            out.push(LabeledExample {
                text: format!("where is the library {}", i),
                intent: Intent::Campus,
            });
            out.push(LabeledExample {
                text: format!("how to squat deeper {}", i),
                intent: Intent::Fitness,
            });
            out.push(LabeledExample {
                text: format!("thesis outline help {}", i),
                intent: Intent::Paper,
            });
        }
        out
    }

    fn trained(dir: &Path) -> IntentClassifier {
        let classifier = IntentClassifier::new(Arc::new(KeywordEmbedder), config(dir));
        classifier.train_examples(&examples()).unwrap();
        classifier
    }

    #[test]
    fn test_predict_before_training_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = IntentClassifier::new(Arc::new(KeywordEmbedder), config(dir.path()));
        assert!(matches!(classifier.predict("hello"), Err(Error::NotReady(_))));
        assert!(classifier.summary().is_none());
    }

    #[test]
    fn test_train_and_predict() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = trained(dir.path());
        assert!(classifier.is_ready());

        let prediction = classifier.predict("is the library open").unwrap();
        assert_eq!(prediction.best_intent, Intent::Campus);
        assert_eq!(prediction.top_options.len(), 1);
        assert_eq!(prediction.top_options[0].0, Intent::Campus);

        let summary = classifier.summary().unwrap();
        assert_eq!(summary.classes, vec![Intent::Campus, Intent::Fitness, Intent::Paper]);
        assert_eq!(summary.n_features, 4);
        assert!(summary.train_accuracy > 0.9);
        assert_eq!(summary.class_distribution[&Intent::Paper], 10);
        assert!(summary.cross_val_mean.is_some());
    }

    #[test]
    fn test_bundle_roundtrip_through_load_or_train() {
        let dir = tempfile::tempdir().unwrap();
        let original = trained(dir.path());
        let expected = original.predict("thesis structure").unwrap();

        let reloaded = IntentClassifier::new(Arc::new(KeywordEmbedder), config(dir.path()));
        reloaded.load_or_train().unwrap();
        let got = reloaded.predict("thesis structure").unwrap();

        assert_eq!(got.best_intent, expected.best_intent);
        assert!((got.confidence - expected.confidence).abs() < 1e-6);
    }

    #[test]
    fn test_load_or_train_without_data_stays_untrained() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = IntentClassifier::new(Arc::new(KeywordEmbedder), config(dir.path()));
        classifier.load_or_train().unwrap();
        assert_eq!(classifier.phase().name(), "untrained");
    }

    #[test]
    fn test_single_class_rejected_and_phase_restored() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = IntentClassifier::new(Arc::new(KeywordEmbedder), config(dir.path()));
        let vectors = vec![vec![1.0, 0.0, 0.0, 0.0]; 3];
        let labels = vec![Intent::Campus; 3];
        assert!(matches!(classifier.train(&vectors, &labels), Err(Error::Validation(_))));
        assert_eq!(classifier.phase().name(), "untrained");
    }

    #[test]
    fn test_failed_save_keeps_previous_model() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let classifier = IntentClassifier::new(
            Arc::new(KeywordEmbedder),
            config(&blocker.join("nested")),
        );
        assert!(matches!(classifier.train_examples(&examples()), Err(Error::Io(_))));
        assert_eq!(classifier.phase().name(), "untrained");
        assert!(matches!(classifier.predict("library"), Err(Error::NotReady(_))));

        let trained = trained(dir.path());
        let before = trained.predict("thesis structure").unwrap();
        let mut vectors = Vec::new();
        let mut labels = Vec::new();
        for (i, intent) in [Intent::Campus, Intent::Fitness].into_iter().enumerate() {
            let mut v = vec![0.0; 4];
            v[i] = 1.0;
            for _ in 0..5 {
                vectors.push(v.clone());
                labels.push(intent);
            }
        }
        std::fs::remove_file(dir.path().join("classifier.json")).unwrap();
        std::fs::create_dir(dir.path().join("classifier.json")).unwrap();
        assert!(trained.train(&vectors, &labels).is_err());

        let after = trained.predict("thesis structure").unwrap();
        assert_eq!(after.best_intent, before.best_intent);
        assert_eq!(trained.summary().unwrap().classes.len(), 3);
    }

    #[test]
    fn test_top_options_ranked() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.top_n_options = 3;
        let classifier = IntentClassifier::new(Arc::new(KeywordEmbedder), cfg);
        classifier.train_examples(&examples()).unwrap();

        let prediction = classifier.predict("squat form").unwrap();
        assert_eq!(prediction.top_options.len(), 3);
        assert_eq!(prediction.top_options[0].0, Intent::Fitness);
        assert!(prediction.top_options.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_confidence_is_max_probability(v in prop::collection::vec(-3.0f32..3.0, 4)) {
            let dir = tempfile::tempdir().unwrap();
            let classifier = trained(dir.path());
            let prediction = classifier.predict_vector(&v).unwrap();

            let max = prediction
                .all_probabilities
                .values()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);
            prop_assert_eq!(prediction.confidence, max);
            prop_assert_eq!(prediction.all_probabilities[&prediction.best_intent], max);
            let total: f32 = prediction.all_probabilities.values().sum();
            prop_assert!((total - 1.0).abs() < 1e-4);
        }
    }
}
