use std::collections::HashMap;

/// Rates handed out in order to each student; exhausted cursors yield 0.
pub const ADJUSTMENT_RATES: [f64; 5] = [0.0005, 0.001, 0.002, 0.004, 0.008];

/// Per-student cursor into [`ADJUSTMENT_RATES`].
///
/// The cursor is shared across all courses of a student and is never reset,
/// so callers must draw in ascending (student, course, deadline) order.
/// Build a fresh scheduler for every pipeline run.
#[derive(Debug, Default)]
pub struct AdjustmentScheduler {
    cursors: HashMap<i64, usize>,
}

impl AdjustmentScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_rate(&mut self, student_id: i64) -> f64 {
        let cursor = self.cursors.entry(student_id).or_insert(0);
        let rate = ADJUSTMENT_RATES.get(*cursor).copied().unwrap_or(0.0);
        *cursor = (*cursor + 1).min(ADJUSTMENT_RATES.len());
        rate
    }

    /// Number of slots already drawn for a student.
    pub fn consumed(&self, student_id: i64) -> usize {
        self.cursors.get(&student_id).copied().unwrap_or(0)
    }
}
