//! Multinomial naive Bayes over categorical outcome tokens.
//!
//! Every token of a document counts as one occurrence of evidence. Conditional
//! probabilities use add-one smoothing over the training vocabulary, so only
//! tokens never seen in training reach the out-of-vocabulary path.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::config::FallbackMode;
use crate::error::ModelPreconditionError;
use crate::models::{Label, LabeledDocument, Token};

#[derive(Debug, Clone, Serialize)]
pub struct ClassModel {
    pub prior: f64,
    pub token_count: usize,
    pub conditional: BTreeMap<Token, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NaiveBayesClassifier {
    classes: BTreeMap<Label, ClassModel>,
    vocabulary: BTreeSet<Token>,
    fallback: FallbackMode,
}

/// A document token outside the trained vocabulary. Scored through the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InferenceWarning {
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: Label,
    /// Log scores in [`Label::ALL`] order.
    pub scores: Vec<(Label, f64)>,
    pub warnings: Vec<InferenceWarning>,
}

impl NaiveBayesClassifier {
    pub fn train(
        documents: &[LabeledDocument],
        fallback: FallbackMode,
    ) -> Result<Self, ModelPreconditionError> {
        if documents.is_empty() {
            return Err(ModelPreconditionError::EmptyTrainingSet);
        }

        let mut doc_counts: BTreeMap<Label, usize> = BTreeMap::new();
        let mut token_counts: BTreeMap<Label, BTreeMap<Token, usize>> = BTreeMap::new();
        let mut vocabulary = BTreeSet::new();

        for document in documents {
            *doc_counts.entry(document.label).or_insert(0) += 1;
            let counts = token_counts.entry(document.label).or_default();
            for token in document.tokens {
                *counts.entry(token).or_insert(0) += 1;
                vocabulary.insert(token);
            }
        }

        let total_documents = documents.len() as f64;
        let vocabulary_size = vocabulary.len();
        let mut classes = BTreeMap::new();

        for label in Label::ALL {
            let doc_count = doc_counts.get(&label).copied().unwrap_or(0);
            if doc_count == 0 {
                return Err(ModelPreconditionError::MissingLabel(label.as_str()));
            }

            let counts = token_counts.remove(&label).unwrap_or_default();
            let token_count: usize = counts.values().sum();
            let denominator = (token_count + vocabulary_size) as f64;
            let conditional = vocabulary
                .iter()
                .map(|token| {
                    let seen = counts.get(token).copied().unwrap_or(0);
                    (*token, (seen + 1) as f64 / denominator)
                })
                .collect();

            classes.insert(
                label,
                ClassModel {
                    prior: doc_count as f64 / total_documents,
                    token_count,
                    conditional,
                },
            );
        }

        debug!(
            documents = documents.len(),
            vocabulary = vocabulary_size,
            "trained classifier"
        );

        Ok(Self {
            classes,
            vocabulary,
            fallback,
        })
    }

    pub fn vocabulary(&self) -> &BTreeSet<Token> {
        &self.vocabulary
    }

    pub fn class(&self, label: Label) -> Option<&ClassModel> {
        self.classes.get(&label)
    }

    pub fn prior(&self, label: Label) -> f64 {
        self.class(label).map(|class| class.prior).unwrap_or(0.0)
    }

    pub fn conditional(&self, label: Label, token: Token) -> Option<f64> {
        self.class(label)
            .and_then(|class| class.conditional.get(&token).copied())
    }

    /// Probability used for a token the class table has no entry for.
    pub fn fallback_probability(&self, label: Label) -> f64 {
        let vocabulary_size = self.vocabulary.len();
        let Some(class) = self.class(label) else {
            return 1.0 / (vocabulary_size + 1) as f64;
        };

        match self.fallback {
            // Inverse of the inverse of the first stored value, i.e. that value.
            FallbackMode::Reference => match class.conditional.values().next() {
                Some(reference) => 1.0 / (1.0 / reference),
                None => 1.0 / (vocabulary_size + 1) as f64,
            },
            FallbackMode::Oov => 1.0 / (class.token_count + vocabulary_size + 1) as f64,
        }
    }

    pub fn classify(&self, tokens: &[Token]) -> Prediction {
        let warnings: Vec<InferenceWarning> = tokens
            .iter()
            .filter(|token| !self.vocabulary.contains(*token))
            .map(|token| InferenceWarning { token: *token })
            .collect();

        let scores: Vec<(Label, f64)> = Label::ALL
            .iter()
            .map(|label| (*label, self.log_score(*label, tokens)))
            .collect();

        let mut best = scores[0];
        for candidate in &scores[1..] {
            if candidate.1 > best.1 {
                best = *candidate;
            }
        }

        if !warnings.is_empty() {
            debug!(?warnings, "document has tokens outside the vocabulary");
        }

        Prediction {
            label: best.0,
            scores,
            warnings,
        }
    }

    fn log_score(&self, label: Label, tokens: &[Token]) -> f64 {
        let mut score = self.prior(label).ln();
        for token in tokens {
            let probability = self
                .conditional(label, *token)
                .unwrap_or_else(|| self.fallback_probability(label));
            score += probability.ln();
        }
        score
    }
}
