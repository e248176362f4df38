use std::collections::BTreeSet;

use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Outcome, RawActivityRow, StoredOutcome};
use crate::source;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Every student against every course component, left-joined to todos,
/// submissions and presences, in (student, course, exam type, todo) order.
pub async fn fetch_activity_rows(pool: &PgPool) -> anyhow::Result<Vec<RawActivityRow>> {
    let records = sqlx::query(
        r#"
        SELECT
            s.id AS student_id,
            cw.course_id,
            cw.exam_type_id,
            cw.weight AS exam_weight,
            cw.required_presences,
            t.todo_id,
            t.max_points,
            t.weight AS todo_weight,
            t.deadline,
            sub.points,
            sub.handled,
            p.presences
        FROM student_outcomes.students s
        CROSS JOIN student_outcomes.courses c
        JOIN student_outcomes.course_weights cw ON cw.course_id = c.id
        LEFT JOIN student_outcomes.todos t
            ON t.course_id = c.id AND t.exam_type_id = cw.exam_type_id
        LEFT JOIN student_outcomes.submissions sub
            ON sub.student_id = s.id AND sub.todo_id = t.todo_id
        LEFT JOIN student_outcomes.presences p
            ON p.student_id = s.id AND p.course_id = c.id AND p.exam_type_id = cw.exam_type_id
        ORDER BY s.id, cw.course_id, cw.exam_type_id, t.todo_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        rows.push(RawActivityRow {
            student_id: record.get("student_id"),
            course_id: record.get("course_id"),
            exam_type_id: record.get("exam_type_id"),
            todo_id: record.get("todo_id"),
            exam_weight: record.get("exam_weight"),
            required_presences: record.get("required_presences"),
            max_points: record.get("max_points"),
            todo_weight: record.get("todo_weight"),
            deadline: record.get("deadline"),
            points: record.get("points"),
            handled: record.get("handled"),
            presences: record.get("presences"),
        });
    }

    info!(rows = rows.len(), "fetched activity rows");
    Ok(rows)
}

/// Distinct student and course ids an outcome batch points at, ascending.
pub fn referenced_keys(outcomes: &[Outcome]) -> (Vec<i64>, Vec<i64>) {
    let students: BTreeSet<i64> = outcomes.iter().map(|o| o.key.student_id).collect();
    let courses: BTreeSet<i64> = outcomes.iter().map(|o| o.key.course_id).collect();
    (students.into_iter().collect(), courses.into_iter().collect())
}

/// Replace attendance_stats with this run's outcomes. Students and courses are
/// registered first so rows read from CSV satisfy the foreign keys; rows left
/// over from earlier runs are removed in the same transaction.
pub async fn store_outcomes(
    pool: &PgPool,
    run_id: Uuid,
    outcomes: &[Outcome],
) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;
    let mut stored = 0usize;
    let (students, courses) = referenced_keys(outcomes);

    for student_id in students {
        sqlx::query("INSERT INTO student_outcomes.students (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
    }
    for course_id in courses {
        sqlx::query("INSERT INTO student_outcomes.courses (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
    }

    for outcome in outcomes {
        let result = sqlx::query(
            r#"
            INSERT INTO student_outcomes.attendance_stats
            (course_id, student_id, final_grade, success,
             exam_component_score, presence_score, delay_bonus_adjustment, run_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (course_id, student_id) DO UPDATE
            SET final_grade = EXCLUDED.final_grade,
                success = EXCLUDED.success,
                exam_component_score = EXCLUDED.exam_component_score,
                presence_score = EXCLUDED.presence_score,
                delay_bonus_adjustment = EXCLUDED.delay_bonus_adjustment,
                run_id = EXCLUDED.run_id
            "#,
        )
        .bind(outcome.key.course_id)
        .bind(outcome.key.student_id)
        .bind(outcome.approximate_grade)
        .bind(outcome.label.as_str())
        .bind(outcome.exam_component_score)
        .bind(outcome.presence_score)
        .bind(outcome.delay_bonus_adjustment)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        stored += result.rows_affected() as usize;
    }

    let stale = sqlx::query("DELETE FROM student_outcomes.attendance_stats WHERE run_id <> $1")
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
    if stale.rows_affected() > 0 {
        info!(removed = stale.rows_affected(), "dropped outcomes from earlier runs");
    }

    tx.commit().await?;
    Ok(stored)
}

pub async fn fetch_outcomes(pool: &PgPool) -> anyhow::Result<Vec<StoredOutcome>> {
    let records = sqlx::query(
        r#"
        SELECT student_id, course_id, final_grade, success,
               exam_component_score, presence_score, delay_bonus_adjustment, run_id
        FROM student_outcomes.attendance_stats
        ORDER BY student_id, course_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(records
        .into_iter()
        .map(|record| StoredOutcome {
            student_id: record.get("student_id"),
            course_id: record.get("course_id"),
            final_grade: record.get("final_grade"),
            success: record.get("success"),
            exam_component_score: record.get("exam_component_score"),
            presence_score: record.get("presence_score"),
            delay_bonus_adjustment: record.get("delay_bonus_adjustment"),
            run_id: record.get("run_id"),
        })
        .collect())
}

/// Load a flat activity CSV into the normalized tables. Returns the number of
/// rows written; rows without student, course or exam type are skipped.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let rows = source::read_activity_csv(csv_path)?;
    let mut tx = pool.begin().await?;
    let mut imported = 0usize;

    for (index, row) in rows.iter().enumerate() {
        let (Some(student_id), Some(course_id), Some(exam_type_id)) =
            (row.student_id, row.course_id, row.exam_type_id)
        else {
            warn!(line = index + 2, "skipping row without join keys");
            continue;
        };

        sqlx::query("INSERT INTO student_outcomes.students (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO student_outcomes.courses (id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO student_outcomes.exam_types (id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(exam_type_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO student_outcomes.course_weights
            (course_id, exam_type_id, weight, required_presences)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (course_id, exam_type_id) DO UPDATE
            SET weight = EXCLUDED.weight, required_presences = EXCLUDED.required_presences
            "#,
        )
        .bind(course_id)
        .bind(exam_type_id)
        .bind(row.exam_weight)
        .bind(row.required_presences)
        .execute(&mut *tx)
        .await?;

        if let (Some(todo_id), Some(max_points), Some(todo_weight)) =
            (row.todo_id, row.max_points, row.todo_weight)
        {
            sqlx::query(
                r#"
                INSERT INTO student_outcomes.todos
                (todo_id, course_id, exam_type_id, max_points, weight, deadline)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (todo_id) DO UPDATE
                SET max_points = EXCLUDED.max_points,
                    weight = EXCLUDED.weight,
                    deadline = EXCLUDED.deadline
                "#,
            )
            .bind(todo_id)
            .bind(course_id)
            .bind(exam_type_id)
            .bind(max_points)
            .bind(todo_weight)
            .bind(row.deadline.as_deref())
            .execute(&mut *tx)
            .await?;

            if row.points.is_some() || row.handled.is_some() {
                sqlx::query(
                    r#"
                    INSERT INTO student_outcomes.submissions (student_id, todo_id, points, handled)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (student_id, todo_id) DO UPDATE
                    SET points = EXCLUDED.points, handled = EXCLUDED.handled
                    "#,
                )
                .bind(student_id)
                .bind(todo_id)
                .bind(row.points)
                .bind(row.handled.as_deref())
                .execute(&mut *tx)
                .await?;
            }
        }

        if let Some(presences) = row.presences {
            sqlx::query(
                r#"
                INSERT INTO student_outcomes.presences
                (student_id, course_id, exam_type_id, presences)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (student_id, course_id, exam_type_id) DO UPDATE
                SET presences = EXCLUDED.presences
                "#,
            )
            .bind(student_id)
            .bind(course_id)
            .bind(exam_type_id)
            .bind(presences)
            .execute(&mut *tx)
            .await?;
        }

        imported += 1;
    }

    tx.commit().await?;
    Ok(imported)
}
