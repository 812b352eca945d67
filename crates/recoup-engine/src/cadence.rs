//! Cadence validation and step scheduling.
//!
//! A cadence is a list of day offsets from the due date; step `i`
//! (1-indexed) fires on `due_date + cadence[i - 1]`.

use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

/// Why a stored cadence cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceDefect {
    /// The stored JSON is not a list of integers.
    Undecodable,
    Empty,
}

impl CadenceDefect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undecodable => "undecodable",
            Self::Empty => "empty",
        }
    }
}

impl fmt::Display for CadenceDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a decoded cadence column.
pub fn validate(cadence: Option<&[i64]>) -> Result<&[i64], CadenceDefect> {
    match cadence {
        None => Err(CadenceDefect::Undecodable),
        Some([]) => Err(CadenceDefect::Empty),
        Some(days) => Ok(days),
    }
}

/// One step of a cadence with its target date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceStep {
    /// 1-indexed.
    pub number: u32,
    pub day_offset: i64,
    pub target: NaiveDate,
}

/// Steps whose target date is on or before `today`, in step order.
///
/// Offsets so large that the target date overflows are never due.
pub fn due_steps(
    due_date: NaiveDate,
    cadence: &[i64],
    today: NaiveDate,
) -> impl Iterator<Item = CadenceStep> + '_ {
    cadence
        .iter()
        .enumerate()
        .filter_map(move |(i, &day_offset)| {
            let target = Duration::try_days(day_offset)
                .and_then(|offset| due_date.checked_add_signed(offset))?;
            Some(CadenceStep {
                number: u32::try_from(i + 1).ok()?,
                day_offset,
                target,
            })
        })
        .filter(move |step| step.target <= today)
}

// ── tests ────────────────────────────────────────────────────────────
