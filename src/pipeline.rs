//! Pipeline orchestration
//!
//! raw rows -> metrics (with a fresh adjustment scheduler) -> outcome documents
//! -> seeded split -> naive Bayes training and held-out accuracy.

use tracing::info;
use uuid::Uuid;

use crate::bayes::NaiveBayesClassifier;
use crate::config::{EvaluationConfig, GradeWeights};
use crate::error::ModelPreconditionError;
use crate::evaluation::{self, EvaluationSummary};
use crate::metrics::{MetricsEngine, MetricsReport};
use crate::models::{LabeledDocument, RawActivityRow};
use crate::tokenizer;

pub struct PipelineRun {
    pub run_id: Uuid,
    pub metrics: MetricsReport,
    pub documents: Vec<LabeledDocument>,
    pub model: NaiveBayesClassifier,
    pub summary: EvaluationSummary,
}

/// Metrics only. Each call builds its own scheduler.
pub fn compute_outcomes(rows: &[RawActivityRow], weights: GradeWeights) -> MetricsReport {
    info!(
        rows = rows.len(),
        w_presence = weights.presence,
        w_todo = weights.todo,
        "computing outcomes"
    );
    MetricsEngine::new(weights).compute(rows)
}

pub fn run(
    rows: &[RawActivityRow],
    weights: GradeWeights,
    config: &EvaluationConfig,
) -> Result<PipelineRun, ModelPreconditionError> {
    let metrics = compute_outcomes(rows, weights);
    let documents = tokenizer::to_documents(&metrics.outcomes);
    let (model, summary) = evaluation::evaluate(&documents, config)?;

    Ok(PipelineRun {
        run_id: Uuid::new_v4(),
        metrics,
        documents,
        model,
        summary,
    })
}
