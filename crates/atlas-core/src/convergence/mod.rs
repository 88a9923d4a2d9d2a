//! Convergence bookkeeping for ATLAS iteration logs.

pub mod parser;

pub use parser::{RawBlock, iteration_blocks, last_iteration_table, normalize_table_text};

use crate::domain::errors::UNKNOWN_TERMINATION;
use crate::domain::{AtlasError, AtlasResult};
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Stands in for fields ATLAS printed as asterisks and for unreadable tables.
pub const OVERFLOW_SENTINEL: f64 = 99999.999;
/// Error values of an iteration whose chemical equilibrium failed.
pub const CHEMISTRY_FAILURE_SENTINEL: f64 = 88888.888;

pub const TOLERANCE_REACHED_MARKER: &str = "CONVERGENCE TOLERANCE REACHED";
pub const DIVERGENCE_MARKER: &str = "MODEL DIVERGED";
pub const HYDROSTATIC_FAILURE_MARKER: &str = "HYDROSTATIC EQUILIBRIUM FAILED";

/// Quality tiers, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConvergenceTier {
    Gold,
    Silver,
    Bronze,
    Unconverged,
}

impl ConvergenceTier {
    pub fn classify(max_flux_error: f64, max_flux_derivative_error: f64) -> Self {
        if max_flux_error < 1.0 && max_flux_derivative_error < 10.0 {
            Self::Gold
        } else if max_flux_error < 10.0 && max_flux_derivative_error < 100.0 {
            Self::Silver
        } else if max_flux_error < 1000.0 {
            Self::Bronze
        } else {
            Self::Unconverged
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gold => "GOLD",
            Self::Silver => "SILVER",
            Self::Bronze => "BRONZE",
            Self::Unconverged => "UNCONVERGED",
        }
    }
}

impl fmt::Display for ConvergenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceRecord {
    /// 1-based iteration number within the run.
    pub iteration: usize,
    pub max_flux_error: f64,
    pub max_flux_derivative_error: f64,
    pub tier: ConvergenceTier,
    pub chemistry_failed: bool,
    #[serde(skip)]
    pub table: String,
}

impl ConvergenceRecord {
    pub fn from_block(iteration: usize, block: RawBlock) -> Self {
        Self {
            iteration,
            tier: ConvergenceTier::classify(block.max_flux_error, block.max_flux_derivative_error),
            max_flux_error: block.max_flux_error,
            max_flux_derivative_error: block.max_flux_derivative_error,
            chemistry_failed: block.chemistry_failed,
            table: block.table,
        }
    }
}

/// Records for every iteration table in `log`, numbered from `first_iteration`.
pub fn parse_log(log: &str, first_iteration: usize) -> Vec<ConvergenceRecord> {
    iteration_blocks(log)
        .into_iter()
        .enumerate()
        .map(|(offset, block)| ConvergenceRecord::from_block(first_iteration + offset, block))
        .collect()
}

/// Index of the best iteration: best tier, then smallest flux error, then the
/// earliest.
pub fn select_best(records: &[ConvergenceRecord]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, record) in records.iter().enumerate() {
        let better = match best {
            None => true,
            Some(current) => {
                let current = &records[current];
                (record.tier, record.max_flux_error) < (current.tier, current.max_flux_error)
            }
        };
        if better {
            best = Some(index);
        }
    }
    best
}

/// Why a batch of iterations stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Termination {
    BudgetExhausted,
    ToleranceReached,
    Diverged,
    HydrostaticFailure,
}

impl Termination {
    pub fn warning(self) -> Option<&'static str> {
        match self {
            Self::Diverged => Some("ATLAS reported that the model diverged"),
            Self::HydrostaticFailure => Some("ATLAS failed to reach hydrostatic equilibrium"),
            Self::BudgetExhausted | Self::ToleranceReached => None,
        }
    }
}

/// Accepts a batch that ran its full budget or stopped for a reason ATLAS
/// reported; anything else is fatal.
pub fn check_termination(log: &str, completed: usize, budget: usize) -> AtlasResult<Termination> {
    let termination = if completed >= budget {
        Termination::BudgetExhausted
    } else if log.contains(TOLERANCE_REACHED_MARKER) {
        Termination::ToleranceReached
    } else if log.contains(DIVERGENCE_MARKER) {
        Termination::Diverged
    } else if log.contains(HYDROSTATIC_FAILURE_MARKER) {
        Termination::HydrostaticFailure
    } else {
        return Err(AtlasError::computation(
            UNKNOWN_TERMINATION,
            format!(
                "ATLAS stopped after {completed} of {budget} iterations without a recognised reason"
            ),
        ));
    };
    if let Some(message) = termination.warning() {
        warn!("{message}");
    }
    Ok(termination)
}

#[cfg(test)]
mod tests {
    use super::parser::tests::block;
    use super::{
        CHEMISTRY_FAILURE_SENTINEL, ConvergenceRecord, ConvergenceTier, DIVERGENCE_MARKER,
        Termination, check_termination, parse_log, select_best,
    };
    use crate::domain::errors::UNKNOWN_TERMINATION;

    fn record(iteration: usize, err: f64, de: f64) -> ConvergenceRecord {
        ConvergenceRecord {
            iteration,
            max_flux_error: err,
            max_flux_derivative_error: de,
            tier: ConvergenceTier::classify(err, de),
            chemistry_failed: false,
            table: String::new(),
        }
    }

    #[test]
    fn tiers_partition_the_error_plane() {
        assert_eq!(ConvergenceTier::classify(0.5, 5.0), ConvergenceTier::Gold);
        assert_eq!(ConvergenceTier::classify(5.0, 50.0), ConvergenceTier::Silver);
        assert_eq!(ConvergenceTier::classify(500.0, 5000.0), ConvergenceTier::Bronze);
        assert_eq!(ConvergenceTier::classify(50000.0, 50000.0), ConvergenceTier::Unconverged);
        assert_eq!(ConvergenceTier::classify(1.0, 5.0), ConvergenceTier::Silver);
        assert_eq!(ConvergenceTier::classify(0.5, 10.0), ConvergenceTier::Silver);
        assert_eq!(ConvergenceTier::classify(5.0, 100.0), ConvergenceTier::Bronze);
        assert_eq!(
            ConvergenceTier::classify(CHEMISTRY_FAILURE_SENTINEL, CHEMISTRY_FAILURE_SENTINEL),
            ConvergenceTier::Unconverged
        );
    }

    #[test]
    fn best_iteration_prefers_tier_then_error() {
        let records = vec![
            record(1, 500.0, 5000.0),
            record(2, 0.8, 1.0),
            record(3, 0.3, 1.0),
            record(4, 5.0, 50.0),
        ];
        assert_eq!(select_best(&records), Some(2));
        assert_eq!(select_best(&[]), None);
    }

    #[test]
    fn ties_keep_the_earliest_iteration() {
        let records = vec![record(1, 0.3, 1.0), record(2, 0.3, 2.0)];
        assert_eq!(select_best(&records), Some(0));
    }

    #[test]
    fn parsed_logs_number_iterations_from_the_offset() {
        let log = format!("{}{}", block(1, 20.0, 200.0), block(2, 0.2, 2.0));
        let records = parse_log(&log, 16);
        assert_eq!(records[0].iteration, 16);
        assert_eq!(records[1].tier, ConvergenceTier::Gold);
        assert_eq!(select_best(&records), Some(1));
    }

    #[test]
    fn termination_requires_budget_or_known_marker() {
        assert_eq!(
            check_termination("", 15, 15).expect("budget reached"),
            Termination::BudgetExhausted
        );
        let diverged = format!("...\n {DIVERGENCE_MARKER}\n");
        let termination = check_termination(&diverged, 7, 15).expect("divergence is accepted");
        assert_eq!(termination, Termination::Diverged);
        assert!(termination.warning().is_some());

        let error = check_termination("segfault", 3, 15).expect_err("unknown stop");
        assert!(error.is(UNKNOWN_TERMINATION));
    }
}
