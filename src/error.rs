//! Error kinds raised by the grading pipeline.

use thiserror::Error;

/// Problems with the raw activity data. Scoped to a single (student, course).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataIntegrityError {
    #[error("missing join key: {0}")]
    MissingJoinKey(&'static str),

    #[error("todo {todo_id} is missing {field}")]
    MissingTodoField { todo_id: i64, field: &'static str },

    #[error("todo {todo_id} has zero max points")]
    ZeroMaxPoints { todo_id: i64 },

    #[error("exam type {exam_type_id} has no weighted todos")]
    ZeroTodoWeight { exam_type_id: i64 },

    #[error("exam weights sum to zero")]
    ZeroExamWeight,

    #[error("exam type {exam_type_id} has conflicting {field} values")]
    InconsistentComponent {
        exam_type_id: i64,
        field: &'static str,
    },

    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("{name} weight {value} is outside [0, 100]")]
    WeightOutOfRange { name: &'static str, value: f64 },

    #[error("presence and todo weights must sum to 100, got {0}")]
    WeightSum(f64),

    #[error("test fraction {0} must be strictly between 0 and 1")]
    TestFraction(f64),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelPreconditionError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("label {0} has no training examples")]
    MissingLabel(&'static str),

    #[error("evaluation split is empty")]
    EmptyEvaluationSet,
}
