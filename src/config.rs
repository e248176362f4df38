use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::ConfigurationError;

/// Calc dates from January 1st of this year on use the (60, 40) pair.
const WEIGHT_SWITCH_YEAR: i32 = 2026;

/// Blend weights for the final grade: attendance share and todo share, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeWeights {
    pub presence: f64,
    pub todo: f64,
}

impl GradeWeights {
    pub fn new(presence: f64, todo: f64) -> Result<Self, ConfigurationError> {
        for (name, value) in [("presence", presence), ("todo", todo)] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigurationError::WeightOutOfRange { name, value });
            }
        }

        let sum = presence + todo;
        if (sum - 100.0).abs() > 1e-9 {
            return Err(ConfigurationError::WeightSum(sum));
        }

        Ok(Self { presence, todo })
    }

    /// Attendance weighs more before the new year, todos gain ground after it.
    pub fn for_calc_date(calc_date: NaiveDate) -> Self {
        // The earlier threshold never changes the outcome; only the new-year cut matters.
        if calc_date.year() < WEIGHT_SWITCH_YEAR {
            Self {
                presence: 80.0,
                todo: 20.0,
            }
        } else {
            Self {
                presence: 60.0,
                todo: 40.0,
            }
        }
    }
}

/// Out-of-vocabulary handling at inference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Reuse the first stored conditional probability of the class.
    #[default]
    Reference,
    /// `1 / (tokens_in_class + vocabulary_size + 1)`.
    Oov,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationConfig {
    pub seed: u64,
    pub test_fraction: f64,
    pub fallback: FallbackMode,
}

impl EvaluationConfig {
    pub fn new(
        seed: u64,
        test_fraction: f64,
        fallback: FallbackMode,
    ) -> Result<Self, ConfigurationError> {
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(ConfigurationError::TestFraction(test_fraction));
        }

        Ok(Self {
            seed,
            test_fraction,
            fallback,
        })
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            test_fraction: 0.2,
            fallback: FallbackMode::Reference,
        }
    }
}
