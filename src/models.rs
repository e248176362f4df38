use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One student x course x exam type x todo row, left-joined with submission
/// and presence data. Dates stay as text until the metrics engine parses them.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RawActivityRow {
    pub student_id: Option<i64>,
    pub course_id: Option<i64>,
    pub exam_type_id: Option<i64>,
    pub todo_id: Option<i64>,
    pub exam_weight: f64,
    pub required_presences: i32,
    pub max_points: Option<f64>,
    pub todo_weight: Option<f64>,
    pub deadline: Option<String>,
    pub points: Option<f64>,
    pub handled: Option<String>,
    pub presences: Option<i32>,
}

/// (student, course) pair. Ordering is student first, then course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntityKey {
    pub student_id: i64,
    pub course_id: i64,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "student {} / course {}", self.student_id, self.course_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Label {
    Pass,
    Fail,
}

impl Label {
    /// Fixed order used wherever labels are enumerated, including tie-breaks.
    pub const ALL: [Label; 2] = [Label::Pass, Label::Fail];

    pub fn from_grade(grade: f64) -> Self {
        if grade >= 5.0 {
            Label::Pass
        } else {
            Label::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Pass => "Pass",
            Label::Fail => "Fail",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computed outcome for one student in one course.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub key: EntityKey,
    /// Percent per exam type, before the delay/bonus adjustment.
    pub normalized_todo_score: BTreeMap<i64, f64>,
    /// Signed percent, one value per (student, course).
    pub delay_bonus_adjustment: f64,
    pub adjusted_todo_score: BTreeMap<i64, f64>,
    pub exam_component_score: f64,
    pub presence_score: f64,
    /// 0-10 scale.
    pub approximate_grade: f64,
    pub label: Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Token {
    LowTodo,
    MediumTodo,
    GoodTodo,
    LowPresences,
    MediumPresences,
    GoodPresences,
    LowMotivation,
    MediumMotivation,
    HighMotivation,
}

impl Token {
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::LowTodo => "low_todo",
            Token::MediumTodo => "medium_todo",
            Token::GoodTodo => "good_todo",
            Token::LowPresences => "low_presences",
            Token::MediumPresences => "medium_presences",
            Token::GoodPresences => "good_presences",
            Token::LowMotivation => "low_motivation",
            Token::MediumMotivation => "medium_motivation",
            Token::HighMotivation => "high_motivation",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered (todo, presences, motivation) token triple.
pub type Document = [Token; 3];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledDocument {
    pub key: EntityKey,
    pub tokens: Document,
    pub label: Label,
}

/// Stored form of an outcome, as read back from persistence.
#[derive(Debug, Clone)]
pub struct StoredOutcome {
    pub student_id: i64,
    pub course_id: i64,
    pub final_grade: f64,
    pub success: String,
    pub exam_component_score: f64,
    pub presence_score: f64,
    pub delay_bonus_adjustment: f64,
    pub run_id: uuid::Uuid,
}
