//! Aggregation of raw activity rows into per (student, course) outcomes.
//!
//! Order of work:
//! 1. rows are grouped by (student, course) in ascending order
//! 2. the delay/bonus pass walks every group, drawing scheduler rates
//! 3. each group is scored independently; a data error drops only that group

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::config::GradeWeights;
use crate::error::DataIntegrityError;
use crate::models::{EntityKey, Label, Outcome, RawActivityRow};
use crate::scheduler::AdjustmentScheduler;

/// Late or early days beyond this count are not rewarded or penalized further.
const MAX_DELAY_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct EntityFailure {
    /// `None` when the row could not be attributed to a student and course.
    pub key: Option<EntityKey>,
    pub error: DataIntegrityError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsReport {
    pub outcomes: Vec<Outcome>,
    pub failures: Vec<EntityFailure>,
}

pub struct MetricsEngine {
    weights: GradeWeights,
}

impl MetricsEngine {
    pub fn new(weights: GradeWeights) -> Self {
        Self { weights }
    }

    /// Run with a fresh scheduler.
    pub fn compute(&self, rows: &[RawActivityRow]) -> MetricsReport {
        let mut scheduler = AdjustmentScheduler::new();
        self.compute_with(rows, &mut scheduler)
    }

    pub fn compute_with(
        &self,
        rows: &[RawActivityRow],
        scheduler: &mut AdjustmentScheduler,
    ) -> MetricsReport {
        let mut report = MetricsReport::default();
        let mut groups: BTreeMap<EntityKey, Vec<&RawActivityRow>> = BTreeMap::new();

        for row in rows {
            match entity_key(row) {
                Ok(key) => groups.entry(key).or_default().push(row),
                Err(error) => {
                    warn!(?row, %error, "dropping unattributable row");
                    report.failures.push(EntityFailure { key: None, error });
                }
            }
        }

        // Every group takes part in the delay pass, failed or not, so the
        // student's cursor advances exactly as the ordering dictates.
        let adjustments: BTreeMap<EntityKey, f64> = groups
            .iter()
            .map(|(key, group)| {
                let adjustment = delay_bonus_adjustment(key.student_id, group, scheduler);
                (*key, adjustment)
            })
            .collect();

        for (key, group) in &groups {
            let adjustment = adjustments.get(key).copied().unwrap_or(0.0);
            match score_entity(*key, group, adjustment, self.weights) {
                Ok(outcome) => {
                    debug!(
                        %key,
                        grade = outcome.approximate_grade,
                        label = %outcome.label,
                        "scored entity"
                    );
                    report.outcomes.push(outcome);
                }
                Err(error) => {
                    warn!(%key, %error, "skipping entity");
                    report.failures.push(EntityFailure {
                        key: Some(*key),
                        error,
                    });
                }
            }
        }

        info!(
            outcomes = report.outcomes.len(),
            failures = report.failures.len(),
            "metrics computed"
        );

        report
    }
}

fn entity_key(row: &RawActivityRow) -> Result<EntityKey, DataIntegrityError> {
    let student_id = row
        .student_id
        .ok_or(DataIntegrityError::MissingJoinKey("student_id"))?;
    let course_id = row
        .course_id
        .ok_or(DataIntegrityError::MissingJoinKey("course_id"))?;

    Ok(EntityKey {
        student_id,
        course_id,
    })
}

/// Accepts `DD.MM.YYYY` and ISO dates; anything else counts as missing.
pub fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    let value = value?.trim();
    NaiveDate::parse_from_str(value, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}

/// Days between submission and deadline; 0 when either date is missing.
pub fn diff_days(row: &RawActivityRow) -> i64 {
    match (
        parse_date(row.handled.as_deref()),
        parse_date(row.deadline.as_deref()),
    ) {
        (Some(handled), Some(deadline)) => (handled - deadline).num_days(),
        _ => 0,
    }
}

/// Running delay/bonus total for one (student, course) group, rows taken by
/// ascending deadline. Rows without a deadline go last, keeping input order.
pub fn delay_bonus_adjustment(
    student_id: i64,
    group: &[&RawActivityRow],
    scheduler: &mut AdjustmentScheduler,
) -> f64 {
    let mut ordered: Vec<(Option<NaiveDate>, &RawActivityRow)> = group
        .iter()
        .map(|row| (parse_date(row.deadline.as_deref()), *row))
        .collect();
    ordered.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let mut total = 0.0;
    for (_, row) in ordered {
        let days = diff_days(row);
        if days == 0 || row.handled.is_none() {
            continue;
        }

        let rate = scheduler.next_rate(student_id);
        let magnitude = rate * days.abs().min(MAX_DELAY_DAYS) as f64 * 100.0;
        if days > 0 {
            total -= magnitude;
        } else {
            total += magnitude;
        }
    }

    debug!(
        student_id,
        slots = scheduler.consumed(student_id),
        adjustment = total,
        "delay pass"
    );
    total
}

#[derive(Debug)]
struct Component {
    exam_weight: f64,
    required_presences: i32,
    presences: Option<i32>,
    raw_score: f64,
    todo_weight: f64,
}

impl Component {
    fn from_row(row: &RawActivityRow) -> Self {
        Self {
            exam_weight: row.exam_weight,
            required_presences: row.required_presences,
            presences: row.presences,
            raw_score: 0.0,
            todo_weight: 0.0,
        }
    }

    fn check_consistent(
        &self,
        exam_type_id: i64,
        row: &RawActivityRow,
    ) -> Result<(), DataIntegrityError> {
        let field = if self.exam_weight != row.exam_weight {
            "exam_weight"
        } else if self.required_presences != row.required_presences {
            "required_presences"
        } else if self.presences != row.presences {
            "presences"
        } else {
            return Ok(());
        };

        Err(DataIntegrityError::InconsistentComponent {
            exam_type_id,
            field,
        })
    }

    fn presence_met(&self) -> bool {
        self.presences
            .map(|count| count >= self.required_presences)
            .unwrap_or(false)
    }
}

/// `(points / max_points) * todo_weight` and the weight it was scored against.
pub fn raw_todo_score(
    row: &RawActivityRow,
    todo_id: i64,
) -> Result<(f64, f64), DataIntegrityError> {
    let max_points = row.max_points.ok_or(DataIntegrityError::MissingTodoField {
        todo_id,
        field: "max_points",
    })?;
    let todo_weight = row.todo_weight.ok_or(DataIntegrityError::MissingTodoField {
        todo_id,
        field: "todo_weight",
    })?;

    let points = row.points.unwrap_or(0.0);
    ensure_finite("points", points)?;
    ensure_finite("max_points", max_points)?;
    ensure_finite("todo_weight", todo_weight)?;

    if max_points == 0.0 {
        return Err(DataIntegrityError::ZeroMaxPoints { todo_id });
    }

    Ok(((points / max_points) * todo_weight, todo_weight))
}

fn ensure_finite(field: &'static str, value: f64) -> Result<f64, DataIntegrityError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DataIntegrityError::NonFinite { field })
    }
}

fn score_entity(
    key: EntityKey,
    group: &[&RawActivityRow],
    adjustment: f64,
    weights: GradeWeights,
) -> Result<Outcome, DataIntegrityError> {
    let mut components: BTreeMap<i64, Component> = BTreeMap::new();

    for row in group {
        let exam_type_id = row
            .exam_type_id
            .ok_or(DataIntegrityError::MissingJoinKey("exam_type_id"))?;
        ensure_finite("exam_weight", row.exam_weight)?;
        let component = match components.entry(exam_type_id) {
            Entry::Occupied(entry) => {
                let component = entry.into_mut();
                component.check_consistent(exam_type_id, row)?;
                component
            }
            Entry::Vacant(entry) => entry.insert(Component::from_row(row)),
        };

        // No todo means the left join found nothing graded for this exam type.
        if let Some(todo_id) = row.todo_id {
            let (raw, weight) = raw_todo_score(row, todo_id)?;
            component.raw_score += raw;
            component.todo_weight += weight;
        }
    }

    let mut normalized_todo_score = BTreeMap::new();
    let mut adjusted_todo_score = BTreeMap::new();
    let mut exam_component_score = 0.0;
    let mut total_exam_weight = 0.0;
    let mut met_exam_weight = 0.0;

    for (exam_type_id, component) in &components {
        if component.todo_weight == 0.0 {
            return Err(DataIntegrityError::ZeroTodoWeight {
                exam_type_id: *exam_type_id,
            });
        }

        let normalized = 100.0 * component.raw_score / component.todo_weight;
        let adjusted = normalized * (1.0 + adjustment / 100.0);
        exam_component_score += adjusted * component.exam_weight / 100.0;

        total_exam_weight += component.exam_weight;
        if component.presence_met() {
            met_exam_weight += component.exam_weight;
        }

        normalized_todo_score.insert(*exam_type_id, normalized);
        adjusted_todo_score.insert(*exam_type_id, adjusted);
    }

    if total_exam_weight == 0.0 {
        return Err(DataIntegrityError::ZeroExamWeight);
    }

    let exam_component_score = ensure_finite("exam_component_score", exam_component_score)?;
    let presence_score = ensure_finite(
        "presence_score",
        100.0 * met_exam_weight / total_exam_weight,
    )?;
    let approximate_grade = ensure_finite(
        "approximate_grade",
        (exam_component_score * weights.todo + presence_score * weights.presence) / 1000.0,
    )?;

    Ok(Outcome {
        key,
        normalized_todo_score,
        delay_bonus_adjustment: adjustment,
        adjusted_todo_score,
        exam_component_score,
        presence_score,
        approximate_grade,
        label: Label::from_grade(approximate_grade),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn weights() -> GradeWeights {
        GradeWeights::new(60.0, 40.0).unwrap()
    }

    fn row(student: i64, course: i64, exam_type: i64, todo: i64) -> RawActivityRow {
        RawActivityRow {
            student_id: Some(student),
            course_id: Some(course),
            exam_type_id: Some(exam_type),
            todo_id: Some(todo),
            exam_weight: 100.0,
            required_presences: 5,
            max_points: Some(10.0),
            todo_weight: Some(100.0),
            deadline: Some("01.11.2025".to_string()),
            points: Some(10.0),
            handled: Some("01.11.2025".to_string()),
            presences: Some(7),
        }
    }

    fn submitted(mut row: RawActivityRow, deadline: &str, handled: &str) -> RawActivityRow {
        row.deadline = Some(deadline.to_string());
        row.handled = Some(handled.to_string());
        row
    }

    fn outcome_for(report: &MetricsReport, student: i64, course: i64) -> &Outcome {
        report
            .outcomes
            .iter()
            .find(|o| o.key.student_id == student && o.key.course_id == course)
            .unwrap()
    }

    #[test]
    fn normalized_score_matches_hand_computation() {
        let mut first = row(1, 1, 1, 1);
        first.points = Some(8.0);
        first.todo_weight = Some(40.0);
        let mut second = row(1, 1, 1, 2);
        second.points = Some(15.0);
        second.max_points = Some(20.0);
        second.todo_weight = Some(60.0);

        let report = MetricsEngine::new(weights()).compute(&[first, second]);
        let outcome = outcome_for(&report, 1, 1);

        let expected = 100.0 * ((8.0 / 10.0) * 40.0 + (15.0 / 20.0) * 60.0) / (40.0 + 60.0);
        assert_eq!(outcome.normalized_todo_score[&1], expected);
        assert_eq!(outcome.delay_bonus_adjustment, 0.0);
        assert_eq!(outcome.adjusted_todo_score[&1], expected);
    }

    #[test]
    fn missing_points_count_as_zero() {
        let mut missing = row(1, 1, 1, 1);
        missing.points = None;
        missing.handled = None;

        let report = MetricsEngine::new(weights()).compute(&[missing]);
        assert_eq!(outcome_for(&report, 1, 1).normalized_todo_score[&1], 0.0);
    }

    #[test]
    fn late_and_early_submissions_adjust_in_deadline_order() {
        // Given out of order: the early row has the later deadline.
        let early = submitted(row(1, 1, 1, 2), "20.12.2025", "01.11.2025");
        let late = submitted(row(1, 1, 1, 1), "01.11.2025", "11.11.2025");

        let report = MetricsEngine::new(weights()).compute(&[early, late]);
        let outcome = outcome_for(&report, 1, 1);

        // late first: 0.0005 * 10 * 100 = 0.5 penalty
        // early next: 0.001 * min(49, 30) * 100 = 3.0 bonus
        let expected = -(0.0005 * 10.0 * 100.0) + 0.001 * 30.0 * 100.0;
        assert_eq!(outcome.delay_bonus_adjustment, expected);
        assert_eq!(
            outcome.adjusted_todo_score[&1],
            100.0 * (1.0 + expected / 100.0)
        );
    }

    #[test]
    fn scheduler_cursor_spans_courses_of_a_student() {
        let first_course = submitted(row(1, 1, 1, 1), "01.11.2025", "02.11.2025");
        let second_course = submitted(row(1, 2, 1, 2), "01.11.2025", "02.11.2025");
        let other_student = submitted(row(2, 1, 1, 1), "01.11.2025", "02.11.2025");

        let mut scheduler = AdjustmentScheduler::new();
        let report = MetricsEngine::new(weights())
            .compute_with(&[second_course, other_student, first_course], &mut scheduler);

        let first_rate = -(0.0005 * 1.0 * 100.0);
        let second_rate = -(0.001 * 1.0 * 100.0);
        assert_eq!(outcome_for(&report, 1, 1).delay_bonus_adjustment, first_rate);
        assert_eq!(outcome_for(&report, 1, 2).delay_bonus_adjustment, second_rate);
        assert_eq!(outcome_for(&report, 2, 1).delay_bonus_adjustment, first_rate);
        assert_eq!(scheduler.consumed(1), 2);
    }

    #[test]
    fn on_time_missing_and_unparsable_dates_consume_no_slot() {
        let on_time = row(1, 1, 1, 1);
        let mut never_handed = row(1, 1, 1, 2);
        never_handed.handled = None;
        let garbled = submitted(row(1, 1, 1, 3), "01.11.2025", "not a date");
        let late = submitted(row(1, 1, 1, 4), "05.11.2025", "06.11.2025");

        let mut scheduler = AdjustmentScheduler::new();
        let report = MetricsEngine::new(weights())
            .compute_with(&[on_time, never_handed, garbled, late], &mut scheduler);

        assert_eq!(scheduler.consumed(1), 1);
        assert_eq!(
            outcome_for(&report, 1, 1).delay_bonus_adjustment,
            -(0.0005 * 1.0 * 100.0)
        );
    }

    #[test]
    fn undated_submission_sorts_last_and_draws_nothing() {
        let mut undated = row(1, 1, 1, 1);
        undated.deadline = None;
        undated.handled = Some("15.11.2025".to_string());
        let later = submitted(row(1, 1, 1, 2), "20.11.2025", "10.11.2025");
        let earlier = submitted(row(1, 1, 1, 3), "01.11.2025", "05.11.2025");

        let mut scheduler = AdjustmentScheduler::new();
        let report = MetricsEngine::new(weights())
            .compute_with(&[undated, later, earlier], &mut scheduler);

        // 01.11 row draws the first rate, 20.11 row the second.
        let expected = -(0.0005 * 4.0 * 100.0) + 0.001 * 10.0 * 100.0;
        assert_eq!(scheduler.consumed(1), 2);
        assert_eq!(outcome_for(&report, 1, 1).delay_bonus_adjustment, expected);
    }

    #[test]
    fn non_finite_inputs_are_reported_instead_of_graded() {
        let mut nan_points = row(1, 1, 1, 1);
        nan_points.points = Some(f64::NAN);
        let mut infinite_max = row(2, 1, 1, 1);
        infinite_max.max_points = Some(f64::INFINITY);
        let mut infinite_weight = row(3, 1, 1, 1);
        infinite_weight.exam_weight = f64::INFINITY;

        let report = MetricsEngine::new(weights()).compute(&[
            nan_points,
            infinite_max,
            infinite_weight,
            row(4, 1, 1, 1),
        ]);

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].key.student_id, 4);
        let errors: Vec<DataIntegrityError> =
            report.failures.iter().map(|f| f.error.clone()).collect();
        assert_eq!(
            errors,
            vec![
                DataIntegrityError::NonFinite { field: "points" },
                DataIntegrityError::NonFinite { field: "max_points" },
                DataIntegrityError::NonFinite {
                    field: "exam_weight"
                },
            ]
        );
    }

    #[test]
    fn csv_nan_cells_never_reach_a_grade() {
        let data = "student_id,course_id,exam_type_id,todo_id,exam_weight,required_presences,max_points,todo_weight,deadline,points,handled,presences\n\
                    1,1,1,1,100,5,10,100,01.11.2025,NaN,01.11.2025,6\n\
                    2,1,1,1,100,5,inf,100,01.11.2025,8,01.11.2025,6\n";
        let rows = crate::source::read_activity_rows(data.as_bytes()).unwrap();

        let report = MetricsEngine::new(weights()).compute(&rows);

        assert!(report.outcomes.is_empty());
        assert_eq!(report.failures.len(), 2);
    }

    #[test]
    fn presence_score_weights_exam_types() {
        let mut lecture = row(1, 1, 1, 1);
        lecture.exam_weight = 60.0;
        let mut lab = row(1, 1, 2, 2);
        lab.exam_weight = 40.0;
        lab.presences = Some(2);

        let report = MetricsEngine::new(weights()).compute(&[lecture, lab]);
        let outcome = outcome_for(&report, 1, 1);

        assert_eq!(outcome.presence_score, 60.0);
        assert_eq!(
            outcome.exam_component_score,
            100.0 * 60.0 / 100.0 + 100.0 * 40.0 / 100.0
        );
    }

    #[test]
    fn missing_presence_record_is_not_satisfied() {
        let mut absent = row(1, 1, 1, 1);
        absent.presences = None;

        let report = MetricsEngine::new(weights()).compute(&[absent]);
        assert_eq!(outcome_for(&report, 1, 1).presence_score, 0.0);
    }

    #[test]
    fn grade_blends_components_and_labels() {
        let mut weak = row(2, 1, 1, 1);
        weak.points = Some(2.0);
        weak.presences = Some(0);

        let report = MetricsEngine::new(weights()).compute(&[row(1, 1, 1, 1), weak]);

        let strong = outcome_for(&report, 1, 1);
        assert_eq!(strong.approximate_grade, (100.0 * 40.0 + 100.0 * 60.0) / 1000.0);
        assert_eq!(strong.label, Label::Pass);

        let weak = outcome_for(&report, 2, 1);
        let normalized = 100.0 * ((2.0 / 10.0) * 100.0) / 100.0;
        let exam_component = normalized * (1.0 + 0.0 / 100.0) * 100.0 / 100.0;
        assert_eq!(
            weak.approximate_grade,
            (exam_component * 40.0 + 0.0 * 60.0) / 1000.0
        );
        assert_eq!(weak.label, Label::Fail);
    }

    #[test]
    fn zero_max_points_fails_only_that_entity() {
        let mut broken = row(1, 1, 1, 1);
        broken.max_points = Some(0.0);

        let report = MetricsEngine::new(weights()).compute(&[broken, row(2, 1, 1, 1)]);

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].key.student_id, 2);
        assert_eq!(
            report.failures,
            vec![EntityFailure {
                key: Some(EntityKey {
                    student_id: 1,
                    course_id: 1
                }),
                error: DataIntegrityError::ZeroMaxPoints { todo_id: 1 },
            }]
        );
    }

    #[test]
    fn exam_type_without_todos_is_reported() {
        let mut empty = row(1, 1, 2, 0);
        empty.todo_id = None;
        empty.max_points = None;
        empty.todo_weight = None;

        let report = MetricsEngine::new(weights()).compute(&[row(1, 1, 1, 1), empty]);

        assert!(report.outcomes.is_empty());
        assert_eq!(
            report.failures[0].error,
            DataIntegrityError::ZeroTodoWeight { exam_type_id: 2 }
        );
    }

    #[test]
    fn zero_exam_weight_is_reported() {
        let mut weightless = row(1, 1, 1, 1);
        weightless.exam_weight = 0.0;

        let report = MetricsEngine::new(weights()).compute(&[weightless]);
        assert_eq!(report.failures[0].error, DataIntegrityError::ZeroExamWeight);
    }

    #[test]
    fn unattributable_rows_are_reported_without_key() {
        let mut orphan = row(1, 1, 1, 1);
        orphan.student_id = None;

        let report = MetricsEngine::new(weights()).compute(&[orphan, row(2, 1, 1, 1)]);

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(
            report.failures,
            vec![EntityFailure {
                key: None,
                error: DataIntegrityError::MissingJoinKey("student_id"),
            }]
        );
    }

    #[test]
    fn conflicting_component_values_are_reported() {
        let mut conflicting = row(1, 1, 1, 2);
        conflicting.exam_weight = 50.0;

        let report = MetricsEngine::new(weights()).compute(&[row(1, 1, 1, 1), conflicting]);
        assert_eq!(
            report.failures[0].error,
            DataIntegrityError::InconsistentComponent {
                exam_type_id: 1,
                field: "exam_weight"
            }
        );
    }

    #[test]
    fn repeated_runs_are_identical() {
        let rows = vec![
            submitted(row(1, 1, 1, 1), "01.11.2025", "08.11.2025"),
            submitted(row(1, 2, 1, 2), "03.11.2025", "2025-10-30"),
            submitted(row(2, 1, 1, 1), "01.11.2025", "20.10.2025"),
        ];
        let engine = MetricsEngine::new(weights());
        assert_eq!(engine.compute(&rows), engine.compute(&rows));
    }

    #[test]
    fn parses_both_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 11, 1);
        assert_eq!(parse_date(Some("01.11.2025")), expected);
        assert_eq!(parse_date(Some(" 2025-11-01 ")), expected);
        assert_eq!(parse_date(Some("11/01/2025")), None);
        assert_eq!(parse_date(None), None);
    }
}
