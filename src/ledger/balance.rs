//! Net balance aggregation between group members

use std::collections::BTreeMap;
use tracing::debug;

use crate::traits::*;
use crate::types::*;

/// Computes directional balances from the expenses and shares of a group
pub struct BalanceAggregator<S: LedgerStorage> {
    storage: S,
}

impl<S: LedgerStorage> BalanceAggregator<S> {
    /// Create a new balance aggregator
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Balances in `group_id` where `viewer` is the debtor or the creditor
    pub async fn compute_balances(
        &self,
        group_id: GroupId,
        viewer: UserId,
    ) -> LedgerResult<Vec<Balance>> {
        let expenses = self.storage.group_expenses(group_id).await?;
        let balances = aggregate_balances(&expenses, Some(viewer));
        debug!(
            group_id,
            viewer,
            expenses = expenses.len(),
            balances = balances.len(),
            "computed balances"
        );
        Ok(balances)
    }

    /// Every positive balance in `group_id`
    pub async fn group_balances(&self, group_id: GroupId) -> LedgerResult<Vec<Balance>> {
        let expenses = self.storage.group_expenses(group_id).await?;
        Ok(aggregate_balances(&expenses, None))
    }
}

/// Aggregate outstanding share amounts into net debtor → creditor balances.
///
/// Every share accrues `share_amount - paid_amount` under (share user, expense
/// creator). Pairs are summed across all expenses before filtering, so the
/// viewer filter never changes the amount of a reported pair. Pairs that net to
/// zero or less are dropped. A creator's unpaid share of their own expense is
/// reported as a pair with itself. The result is ordered
/// by amount descending, then debtor and creditor ascending.
pub fn aggregate_balances(expenses: &[Expense], viewer: Option<UserId>) -> Vec<Balance> {
    let mut totals: BTreeMap<(UserId, UserId), Money> = BTreeMap::new();

    for expense in expenses {
        for share in &expense.shares {
            let total = totals
                .entry((share.user_id, expense.created_by))
                .or_default();
            *total = total.saturating_add(share.outstanding());
        }
    }

    let mut balances: Vec<Balance> = totals
        .into_iter()
        .filter(|(_, amount)| amount.is_positive())
        .filter(|((debtor, creditor), _)| {
            viewer.map_or(true, |v| v == *debtor || v == *creditor)
        })
        .map(|((user_id, owed_to), amount)| Balance {
            user_id,
            owed_to,
            amount,
        })
        .collect();

    balances.sort_by(|a, b| {
        b.amount
            .cmp(&a.amount)
            .then(a.user_id.cmp(&b.user_id))
            .then(a.owed_to.cmp(&b.owed_to))
    });

    balances
}
