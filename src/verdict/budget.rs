/// CPU budget classification
///
/// The kernel reports a budget kill exactly like any other fatal signal, so
/// after the child exits its recorded CPU time is compared against the budget
/// to tell the two apart. The classification is advisory: it never changes
/// the child's exit code by itself.
use crate::config::types::CpuBudget;
use crate::core::types::SupervisionResult;
use serde::{Deserialize, Serialize};

/// Why the budget check came out the way it did
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetVerdict {
    /// No budget configured
    #[serde(rename = "unlimited")]
    Unlimited,
    /// Child exited 0; a clean exit is never a budget overrun
    #[serde(rename = "clean_exit")]
    CleanExit,
    /// Failed, but well short of the budget
    #[serde(rename = "within_budget")]
    WithinBudget { used_secs: u64, limit_secs: u64 },
    /// Failed after consuming the whole budget
    #[serde(rename = "exceeded")]
    Exceeded { used_secs: u64, limit_secs: u64 },
}

impl BudgetVerdict {
    pub fn classify(result: &SupervisionResult, budget: CpuBudget) -> Self {
        let Some(limit_secs) = budget.as_secs() else {
            return BudgetVerdict::Unlimited;
        };
        if result.success() {
            return BudgetVerdict::CleanExit;
        }

        // Whole-second granularity, matching the precision of the budget
        let used_secs = result.cpu_time().as_secs_f64().round() as u64;
        if used_secs >= limit_secs {
            BudgetVerdict::Exceeded {
                used_secs,
                limit_secs,
            }
        } else {
            BudgetVerdict::WithinBudget {
                used_secs,
                limit_secs,
            }
        }
    }

    pub fn is_exceeded(&self) -> bool {
        matches!(self, BudgetVerdict::Exceeded { .. })
    }
}

/// Whether the child died because it used up its CPU budget.
///
/// Sums user and system time, rounds to whole seconds and compares with
/// `>=`. Always false without a budget or when the child exited 0.
pub fn is_budget_exceeded(result: &SupervisionResult, budget: CpuBudget) -> bool {
    BudgetVerdict::classify(result, budget).is_exceeded()
}
