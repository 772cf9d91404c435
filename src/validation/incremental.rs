//! Period-over-period consistency checks for reported financial series
//!
//! A series passes when every element relates to its predecessor according to a
//! step rule. Missing or non-finite values are reported as [`EtlError::InvalidInput`]
//! instead of being skipped, so a gap in the data is never mistaken for a pass.

use std::fmt;
use std::str::FromStr;

use crate::error::{EtlError, Result};

/// Relationship every element must have with its predecessor
pub trait StepRule {
    fn holds(&self, previous: f64, next: f64) -> bool;
}

impl<F> StepRule for F
where
    F: Fn(f64, f64) -> bool,
{
    fn holds(&self, previous: f64, next: f64) -> bool {
        self(previous, next)
    }
}

/// Built-in step rules
#[derive(Debug, Clone, PartialEq)]
pub enum IncrementRule {
    /// Each value is greater than the one before
    StrictlyIncreasing,
    /// Each value is at least the one before, as with cumulative year-to-date totals
    NonDecreasing,
    /// Each value exceeds the one before by `step`. `tolerance` is relative:
    /// it is scaled by the largest magnitude among the two values and the step.
    FixedStep { step: f64, tolerance: f64 },
}

impl IncrementRule {
    pub fn fixed_step(step: f64) -> Self {
        IncrementRule::FixedStep {
            step,
            tolerance: f64::EPSILON * 16.0,
        }
    }
}

impl StepRule for IncrementRule {
    fn holds(&self, previous: f64, next: f64) -> bool {
        match self {
            IncrementRule::StrictlyIncreasing => next > previous,
            IncrementRule::NonDecreasing => next >= previous,
            IncrementRule::FixedStep { step, tolerance } => {
                let scale = previous.abs().max(next.abs()).max(step.abs()).max(1.0);
                ((next - previous) - step).abs() <= tolerance * scale
            }
        }
    }
}

impl fmt::Display for IncrementRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncrementRule::StrictlyIncreasing => f.write_str("strict"),
            IncrementRule::NonDecreasing => f.write_str("non_decreasing"),
            IncrementRule::FixedStep { step, .. } => write!(f, "step:{}", step),
        }
    }
}

impl FromStr for IncrementRule {
    type Err = EtlError;

    /// Accepts `strict`, `non_decreasing` (alias `cumulative`) and `step:<n>`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "strict" | "strictly_increasing" => Ok(IncrementRule::StrictlyIncreasing),
            "non_decreasing" | "cumulative" => Ok(IncrementRule::NonDecreasing),
            _ => {
                let step = s
                    .strip_prefix("step:")
                    .and_then(|n| n.trim().parse::<f64>().ok())
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| EtlError::Config(format!("unknown increment rule: {}", s)))?;
                Ok(IncrementRule::fixed_step(step))
            }
        }
    }
}

/// Checks sequences against a step rule, tolerating a fixed number of breaks
#[derive(Debug, Clone)]
pub struct SequenceChecker<R = IncrementRule> {
    rule: R,
    tolerated_breaks: usize,
}

impl Default for SequenceChecker<IncrementRule> {
    fn default() -> Self {
        Self::new(IncrementRule::StrictlyIncreasing)
    }
}

impl<R: StepRule> SequenceChecker<R> {
    pub fn new(rule: R) -> Self {
        Self {
            rule,
            tolerated_breaks: 0,
        }
    }

    /// Allow up to `breaks` rule violations before rejecting a sequence
    pub fn tolerating(mut self, breaks: usize) -> Self {
        self.tolerated_breaks = breaks;
        self
    }

    /// Positions whose value breaks the rule relative to the previous one
    pub fn breaks(&self, values: &[Option<f64>]) -> Result<Vec<usize>> {
        let values = finite_values(values)?;
        Ok(values
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| !self.rule.holds(pair[0], pair[1]))
            .map(|(i, _)| i + 1)
            .collect())
    }

    pub fn check(&self, values: &[Option<f64>]) -> Result<bool> {
        Ok(self.breaks(values)?.len() <= self.tolerated_breaks)
    }

    pub fn check_values(&self, values: &[f64]) -> Result<bool> {
        let values: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
        self.check(&values)
    }
}

/// Strict check with no tolerated breaks
pub fn are_incremental<R: StepRule>(values: &[Option<f64>], rule: R) -> Result<bool> {
    SequenceChecker::new(rule).check(values)
}

fn finite_values(values: &[Option<f64>]) -> Result<Vec<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| match value {
            Some(v) if v.is_finite() => Ok(*v),
            Some(v) => Err(EtlError::InvalidInput {
                index,
                reason: format!("{} is not a finite number", v),
            }),
            None => Err(EtlError::InvalidInput {
                index,
                reason: "value is missing".to_string(),
            }),
        })
        .collect()
}
