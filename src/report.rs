use std::collections::BTreeMap;
use std::fmt::Write;

use crate::bayes::NaiveBayesClassifier;
use crate::config::{FallbackMode, GradeWeights};
use crate::evaluation::EvaluationSummary;
use crate::metrics::MetricsReport;
use crate::models::{Label, Outcome};

#[derive(Debug, Clone, PartialEq)]
pub struct LabelSummary {
    pub label: Label,
    pub count: usize,
    pub avg_grade: f64,
}

pub fn summarize_by_label(outcomes: &[Outcome]) -> Vec<LabelSummary> {
    let mut map: BTreeMap<Label, (usize, f64)> = BTreeMap::new();

    for outcome in outcomes {
        let entry = map.entry(outcome.label).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += outcome.approximate_grade;
    }

    Label::ALL
        .iter()
        .filter_map(|label| {
            map.get(label).map(|(count, total)| LabelSummary {
                label: *label,
                count: *count,
                avg_grade: total / *count as f64,
            })
        })
        .collect()
}

pub fn build_report(
    weights: GradeWeights,
    metrics: &MetricsReport,
    model: Option<(&NaiveBayesClassifier, &EvaluationSummary)>,
) -> String {
    let summaries = summarize_by_label(&metrics.outcomes);
    let mut output = String::new();

    let _ = writeln!(output, "# Course Outcome Report");
    let _ = writeln!(
        output,
        "Grades blend presences at {}% and todos at {}%",
        weights.presence, weights.todo
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Outcome Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No outcomes computed.");
    } else {
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {}: {} students x courses (avg grade {:.2})",
                summary.label, summary.count, summary.avg_grade
            );
        }
    }

    let mut lowest = metrics.outcomes.clone();
    lowest.sort_by(|a, b| {
        a.approximate_grade
            .partial_cmp(&b.approximate_grade)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let _ = writeln!(output);
    let _ = writeln!(output, "## Lowest Grades");

    if lowest.is_empty() {
        let _ = writeln!(output, "No outcomes computed.");
    } else {
        for outcome in lowest.iter().take(10) {
            let _ = writeln!(
                output,
                "- {}: grade {:.2} (todos {:.1}, presences {:.1}, adjustment {:+.2})",
                outcome.key,
                outcome.approximate_grade,
                outcome.exam_component_score,
                outcome.presence_score,
                outcome.delay_bonus_adjustment
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Data Issues");

    if metrics.failures.is_empty() {
        let _ = writeln!(output, "None.");
    } else {
        for failure in &metrics.failures {
            match failure.key {
                Some(key) => {
                    let _ = writeln!(output, "- {}: {}", key, failure.error);
                }
                None => {
                    let _ = writeln!(output, "- unattributed row: {}", failure.error);
                }
            }
        }
    }

    if let Some((classifier, summary)) = model {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Classifier");
        let _ = writeln!(
            output,
            "Accuracy {:.2}% on {} held-out documents ({} train, seed {})",
            summary.accuracy * 100.0,
            summary.test_size,
            summary.train_size,
            summary.seed
        );
        let _ = writeln!(
            output,
            "Vocabulary of {} tokens, {} fallback",
            classifier.vocabulary().len(),
            match summary.fallback {
                FallbackMode::Reference => "reference",
                FallbackMode::Oov => "out-of-vocabulary",
            }
        );
        if summary.out_of_vocabulary > 0 {
            let _ = writeln!(
                output,
                "{} test documents used the out-of-vocabulary fallback",
                summary.out_of_vocabulary
            );
        }

        for label in Label::ALL {
            let Some(class) = classifier.class(label) else {
                continue;
            };
            let _ = writeln!(output);
            let _ = writeln!(output, "### {} (prior {:.3})", label, class.prior);
            for (token, probability) in &class.conditional {
                let _ = writeln!(output, "- {}: {:.4}", token, probability);
            }
        }
    }

    output
}
