//! Weighted grade math for the campus grade book.
//!
//! Marks are on a 0–10 scale and weights are percentages of the final mark.
//! A grade without a mark is "not yet graded": it contributes nothing to the
//! final mark and its weight counts as still remaining.
//!
//! Pure logic with no I/O, shared by the client core and any front end that
//! lets a user edit grades.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Final mark needed to pass.
pub const PASS_MARK: f64 = 5.0;
/// Highest mark on the scale.
pub const MAX_MARK: f64 = 10.0;
/// Weights are percentages.
pub const MAX_WEIGHT: f64 = 100.0;

const EPSILON: f64 = 1e-9;

/// One weighted entry of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weighted {
    pub weight: f64,
    pub mark: Option<f64>,
}

impl Weighted {
    pub fn graded(weight: f64, mark: f64) -> Self {
        Self { weight, mark: Some(mark) }
    }

    pub fn pending(weight: f64) -> Self {
        Self { weight, mark: None }
    }
}

/// Rejected grade input. Raised before anything reaches the store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidInput {
    #[error("{field} must be a number, got {input:?}")]
    NotANumber { field: &'static str, input: String },
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{0} is required")]
    Missing(&'static str),
}

/// Sum of `mark * weight / 100` over graded entries.
pub fn final_mark(entries: &[Weighted]) -> f64 {
    entries
        .iter()
        .filter_map(|e| e.mark.map(|mark| mark * (e.weight / MAX_WEIGHT)))
        .sum()
}

/// Total weight of the entries that have no mark yet.
pub fn remaining_weight(entries: &[Weighted]) -> f64 {
    entries
        .iter()
        .filter(|e| e.mark.is_none())
        .map(|e| e.weight)
        .sum()
}

/// Mark needed on the remaining weight to reach [`PASS_MARK`], clamped to
/// `0..=MAX_MARK`.
///
/// With no remaining weight the outcome is already decided: `Some(0.0)` when
/// the final mark passes, `None` when passing is no longer reachable.
pub fn pass_mark(entries: &[Weighted]) -> Option<f64> {
    let current = final_mark(entries);
    let remaining = remaining_weight(entries);

    if remaining <= EPSILON {
        return if current + EPSILON >= PASS_MARK {
            Some(0.0)
        } else {
            None
        };
    }

    let needed = (PASS_MARK - current) / (remaining / MAX_WEIGHT);
    Some(needed.clamp(0.0, MAX_MARK))
}

/// Parse a weight typed by the user. Required, `0..=100`.
pub fn parse_weight(input: &str) -> Result<f64, InvalidInput> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(InvalidInput::Missing("weight"));
    }
    let value = parse_number("weight", trimmed)?;
    check_range("weight", value, 0.0, MAX_WEIGHT)
}

/// Parse a mark typed by the user. Blank means "not yet graded".
pub fn parse_mark(input: &str) -> Result<Option<f64>, InvalidInput> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value = parse_number("mark", trimmed)?;
    check_range("mark", value, 0.0, MAX_MARK).map(Some)
}

fn parse_number(field: &'static str, input: &str) -> Result<f64, InvalidInput> {
    match input.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(InvalidInput::NotANumber {
            field,
            input: input.to_string(),
        }),
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, InvalidInput> {
    if value < min || value > max {
        Err(InvalidInput::OutOfRange { field, value, min, max })
    } else {
        Ok(value)
    }
}
