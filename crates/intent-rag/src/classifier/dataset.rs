//! Labeled data loading, stratified splits and class weighting

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::LabeledExample;

/// Read `{text, intent}` lines; blank lines are skipped
pub fn load_labeled(path: impl AsRef<Path>) -> Result<Vec<LabeledExample>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let mut examples = Vec::new();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let example: LabeledExample = serde_json::from_str(&line).map_err(|e| {
            Error::validation(format!("{}:{}: {}", path.display(), line_no + 1, e))
        })?;
        if example.text.trim().is_empty() {
            continue;
        }
        examples.push(example);
    }

    tracing::info!("Loaded {} labeled examples from {}", examples.len(), path.display());
    Ok(examples)
}

/// Sample indices grouped by class label, in ascending label order
fn by_class(labels: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(i);
    }
    groups
}

/// Split sample indices into `(train, validation)` keeping class proportions
///
/// Every class keeps at least one training sample.
pub fn stratified_split(
    labels: &[usize],
    validation_fraction: f32,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut validation = Vec::new();

    for (_, mut indices) in by_class(labels) {
        indices.shuffle(&mut rng);
        let n = indices.len();
        let n_val = ((n as f32 * validation_fraction).round() as usize).min(n - 1);
        validation.extend_from_slice(&indices[..n_val]);
        train.extend_from_slice(&indices[n_val..]);
    }

    train.sort_unstable();
    validation.sort_unstable();
    (train, validation)
}

/// Assign sample indices to `k` folds, spreading each class round-robin
pub fn stratified_folds(labels: &[usize], k: usize, seed: u64) -> Vec<Vec<usize>> {
    let k = k.max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds = vec![Vec::new(); k];
    let mut next = 0;

    for (_, mut indices) in by_class(labels) {
        indices.shuffle(&mut rng);
        for i in indices {
            folds[next % k].push(i);
            next += 1;
        }
    }

    folds.iter_mut().for_each(|f| f.sort_unstable());
    folds
}

/// Inverse-frequency weights: `n_samples / (n_present_classes * count)`
pub fn balanced_class_weights(labels: &[usize], n_classes: usize) -> Vec<f32> {
    let mut counts = vec![0usize; n_classes];
    for &label in labels {
        counts[label] += 1;
    }
    let present = counts.iter().filter(|&&c| c > 0).count().max(1);

    counts
        .iter()
        .map(|&c| {
            if c == 0 {
                0.0
            } else {
                labels.len() as f32 / (present as f32 * c as f32)
            }
        })
        .collect()
}
