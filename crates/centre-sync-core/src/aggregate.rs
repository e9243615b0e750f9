//! Budget-vs-actual aggregation
//!
//! Turns a tenant's report results into a complete category x month grid.
//! Every cell of the requested grid is present in the output: cells that
//! were never fetched, or whose request failed, hold zero and carry the
//! reason.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::models::{
    AccountCodeMapping, AggregateResult, BudgetCell, BudgetComparison, Cell, CellFailure,
    ReportRequest, ReportResult,
};
use crate::period::MonthPeriod;
use crate::store::BudgetStore;

/// The cells requested for one tenant and year
#[derive(Debug, Clone)]
pub struct ReportGrid {
    pub tenant_id: String,
    pub year: i32,
    pub mapping: AccountCodeMapping,
}

impl ReportGrid {
    pub fn new(tenant_id: &str, year: i32, mapping: AccountCodeMapping) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            year,
            mapping,
        }
    }

    pub fn months(&self) -> Vec<MonthPeriod> {
        MonthPeriod::year(self.year)
    }

    /// One `(category, request)` job per mapped category and month
    ///
    /// Categories without an account code are skipped; `aggregate` marks
    /// their cells `Unmapped`.
    pub fn jobs(&self) -> Vec<(String, ReportRequest)> {
        let months = self.months();
        self.mapping
            .entries()
            .iter()
            .filter(|entry| !entry.code.trim().is_empty())
            .flat_map(|entry| {
                months.iter().map(move |period| {
                    (
                        entry.name.clone(),
                        ReportRequest {
                            tenant_id: self.tenant_id.clone(),
                            account_code: entry.code.trim().to_string(),
                            year: period.year_number(),
                            month: period.month(),
                        },
                    )
                })
            })
            .collect()
    }

    /// Grid where every cell is zero with `NotFetched` (or `Unmapped`)
    pub fn empty(&self) -> AggregateResult {
        let months = self.months();
        let categories = self
            .mapping
            .entries()
            .iter()
            .map(|entry| {
                let failure = if entry.code.trim().is_empty() {
                    CellFailure::Unmapped
                } else {
                    CellFailure::NotFetched
                };
                let cells = months
                    .iter()
                    .map(|p| (p.key(), Cell::failed(failure.clone())))
                    .collect();
                (entry.name.clone(), cells)
            })
            .collect();

        AggregateResult {
            tenant_id: self.tenant_id.clone(),
            year: self.year,
            categories,
        }
    }
}

/// Fold report results into the grid
///
/// Later results for the same cell replace earlier ones, so re-issued
/// requests can simply be appended. Results for categories or months outside
/// the grid are dropped, so the shape always matches `grid.empty()`.
/// Pure: the same inputs always give the same output.
pub fn aggregate(grid: &ReportGrid, results: &[ReportResult]) -> AggregateResult {
    let mut result = grid.empty();

    for item in results {
        let Some(period) = item.request.period() else {
            warn!(
                tenant_id = %item.request.tenant_id,
                "Ignoring result with invalid period {}-{}",
                item.request.year,
                item.request.month
            );
            continue;
        };

        let cell = match &item.outcome {
            Ok(amount) => Cell::actual(*amount),
            Err(failure) => Cell::failed(failure.clone()),
        };
        match result
            .categories
            .get_mut(&item.category)
            .and_then(|months| months.get_mut(&period.key()))
        {
            Some(slot) => *slot = cell,
            None => warn!(
                tenant_id = %item.request.tenant_id,
                category = %item.category,
                "Ignoring result outside the requested grid for {}",
                period.key()
            ),
        }
    }

    result
}

/// Merge actuals with monthly budgets
///
/// Variance is `budget - actual`. A missing budget, or a budget that could
/// not be read, counts as zero and is flagged.
pub fn compare_with_budget(
    aggregate: &AggregateResult,
    budgets: &dyn BudgetStore,
) -> BudgetComparison {
    let months = MonthPeriod::year(aggregate.year);
    let mut categories = BTreeMap::new();

    for (category, cells) in &aggregate.categories {
        let mut row = BTreeMap::new();
        for period in &months {
            let key = period.key();
            let (actual, actual_failed) = match cells.get(&key) {
                Some(cell) => (cell.amount, cell.is_failed()),
                None => (0.0, true),
            };

            let budget = match budgets.monthly_budget(
                &aggregate.tenant_id,
                category,
                period.year_number(),
                period.month(),
            ) {
                Ok(budget) => budget,
                Err(e) => {
                    warn!(
                        tenant_id = %aggregate.tenant_id,
                        category = %category,
                        month = %key,
                        "Budget lookup failed: {}",
                        e
                    );
                    None
                }
            };

            row.insert(
                key,
                BudgetCell {
                    budget: budget.unwrap_or(0.0),
                    actual,
                    variance: budget.unwrap_or(0.0) - actual,
                    actual_failed,
                    budget_missing: budget.is_none(),
                },
            );
        }
        categories.insert(category.clone(), row);
    }

    BudgetComparison {
        tenant_id: aggregate.tenant_id.clone(),
        year: aggregate.year,
        categories,
    }
}

/// Year totals for one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub category: String,
    pub budget: f64,
    pub actual: f64,
    pub variance: f64,
    /// Months whose actual is a failure placeholder
    pub failed_months: usize,
}

/// Per-category totals, ordered by category name
pub fn summary(comparison: &BudgetComparison) -> Vec<CategorySummary> {
    comparison
        .categories
        .iter()
        .map(|(category, months)| {
            let budget: f64 = months.values().map(|c| c.budget).sum();
            let actual: f64 = months.values().map(|c| c.actual).sum();
            CategorySummary {
                category: category.clone(),
                budget,
                actual,
                variance: budget - actual,
                failed_months: months.values().filter(|c| c.actual_failed).count(),
            }
        })
        .collect()
}
