use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bayes::NaiveBayesClassifier;
use crate::config::{EvaluationConfig, FallbackMode};
use crate::error::ModelPreconditionError;
use crate::models::LabeledDocument;

#[derive(Debug, Clone)]
pub struct Split {
    pub train: Vec<LabeledDocument>,
    pub test: Vec<LabeledDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationSummary {
    pub seed: u64,
    pub fallback: FallbackMode,
    pub train_size: usize,
    pub test_size: usize,
    pub correct: usize,
    pub accuracy: f64,
    /// Test documents that carried at least one out-of-vocabulary token.
    pub out_of_vocabulary: usize,
}

/// Seeded shuffle; the first `ceil(n * test_fraction)` documents form the test split.
pub fn train_test_split(documents: &[LabeledDocument], test_fraction: f64, seed: u64) -> Split {
    let mut order: Vec<usize> = (0..documents.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let test_size = ((documents.len() as f64) * test_fraction).ceil() as usize;
    let test_size = test_size.min(documents.len());
    let (test_idx, train_idx) = order.split_at(test_size);

    Split {
        train: train_idx.iter().map(|i| documents[*i].clone()).collect(),
        test: test_idx.iter().map(|i| documents[*i].clone()).collect(),
    }
}

pub fn evaluate(
    documents: &[LabeledDocument],
    config: &EvaluationConfig,
) -> Result<(NaiveBayesClassifier, EvaluationSummary), ModelPreconditionError> {
    let split = train_test_split(documents, config.test_fraction, config.seed);
    let model = NaiveBayesClassifier::train(&split.train, config.fallback)?;

    if split.test.is_empty() {
        return Err(ModelPreconditionError::EmptyEvaluationSet);
    }

    let mut correct = 0;
    let mut out_of_vocabulary = 0;

    for document in &split.test {
        let prediction = model.classify(&document.tokens);
        if !prediction.warnings.is_empty() {
            out_of_vocabulary += 1;
            warn!(
                key = %document.key,
                tokens = ?prediction.warnings,
                "scored with out-of-vocabulary fallback"
            );
        }
        if prediction.label == document.label {
            correct += 1;
        } else {
            debug!(
                key = %document.key,
                scores = ?prediction.scores,
                "misclassified"
            );
        }
    }

    let summary = EvaluationSummary {
        seed: config.seed,
        fallback: config.fallback,
        train_size: split.train.len(),
        test_size: split.test.len(),
        correct,
        accuracy: correct as f64 / split.test.len() as f64,
        out_of_vocabulary,
    };

    info!(
        train = summary.train_size,
        test = summary.test_size,
        accuracy = summary.accuracy,
        "evaluation finished"
    );

    Ok((model, summary))
}
