//! Settlement recording and allocation against outstanding shares

use tracing::{debug, info};

use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_settlement_request;

/// The portion of a settlement applied to one share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub expense_id: ExpenseId,
    pub user_id: UserId,
    pub applied: Money,
}

/// Records settlements and applies them to the payer's oldest debts first
pub struct SettlementAllocator<S: LedgerStorage> {
    storage: S,
}

impl<S: LedgerStorage> SettlementAllocator<S> {
    /// Create a new settlement allocator
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Record `request` and apply its amount to the payer's outstanding shares
    /// on expenses the payee created in the group.
    ///
    /// The settlement row always carries the full requested amount; any part
    /// exceeding the outstanding debt is recorded but applied to no share.
    /// Everything happens in one transaction: on error nothing is persisted.
    pub async fn apply_settlement(&self, request: &SettlementRequest) -> LedgerResult<Settlement> {
        validate_settlement_request(request)?;

        let mut tx = self.storage.begin().await?;

        let outstanding = tx
            .outstanding_shares(request.payer_id, request.payee_id, request.group_id)
            .await?;
        let allocations = allocate(request.amount, &outstanding);

        for allocation in &allocations {
            tx.add_paid_amount(allocation.expense_id, allocation.user_id, allocation.applied)
                .await?;
            debug!(
                expense_id = allocation.expense_id,
                user_id = allocation.user_id,
                applied = %allocation.applied,
                "applied settlement to share"
            );
        }

        let settlement = tx.insert_settlement(request).await?;
        tx.commit().await?;

        let applied: Money = allocations.iter().map(|a| a.applied).sum();
        info!(
            settlement_id = settlement.settlement_id,
            group_id = settlement.group_id,
            payer_id = settlement.payer_id,
            payee_id = settlement.payee_id,
            amount = %settlement.amount,
            applied = %applied,
            unapplied = %(settlement.amount - applied),
            "settlement recorded"
        );

        Ok(settlement)
    }
}

/// Walk `shares` in order, applying as much of `amount` to each as it still owes.
///
/// Stops once the amount is used up; shares with nothing outstanding are skipped.
pub fn allocate(amount: Money, shares: &[OutstandingShare]) -> Vec<Allocation> {
    let mut remaining = amount;
    let mut allocations = Vec::new();

    for share in shares {
        if !remaining.is_positive() {
            break;
        }
        let outstanding = share.outstanding();
        if !outstanding.is_positive() {
            continue;
        }

        let applied = remaining.min(outstanding);
        remaining -= applied;
        allocations.push(Allocation {
            expense_id: share.expense_id,
            user_id: share.user_id,
            applied,
        });
    }

    allocations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn share(expense_id: ExpenseId, owed: i64, paid: i64) -> OutstandingShare {
        OutstandingShare {
            expense_id,
            user_id: 2,
            share_amount: Money::from_minor(owed),
            paid_amount: Money::from_minor(paid),
            expense_created_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, expense_id as u32)
                .unwrap(),
        }
    }

    fn applied(allocations: &[Allocation]) -> Vec<(ExpenseId, i64)> {
        allocations
            .iter()
            .map(|a| (a.expense_id, a.applied.minor_units()))
            .collect()
    }

    #[test]
    fn test_partial_settlement_pays_oldest_first() {
        let shares = vec![share(1, 1000, 0), share(2, 2000, 500), share(3, 700, 0)];
        let allocations = allocate(Money::from_minor(2000), &shares);
        assert_eq!(applied(&allocations), vec![(1, 1000), (2, 1000)]);
    }

    #[test]
    fn test_over_settlement_stops_at_outstanding() {
        let shares = vec![share(1, 1000, 250), share(2, 300, 0)];
        let allocations = allocate(Money::from_minor(5000), &shares);
        assert_eq!(applied(&allocations), vec![(1, 750), (2, 300)]);
    }

    #[test]
    fn test_skips_settled_shares() {
        let shares = vec![share(1, 1000, 1000), share(2, 300, 0)];
        let allocations = allocate(Money::from_minor(100), &shares);
        assert_eq!(applied(&allocations), vec![(2, 100)]);
    }

    #[test]
    fn test_nothing_outstanding() {
        assert!(allocate(Money::from_minor(100), &[]).is_empty());
    }

    proptest! {
        #[test]
        fn prop_applies_min_of_amount_and_outstanding(
            amount in 1i64..100_000,
            debts in proptest::collection::vec((1i64..10_000, 0i64..100), 0..20),
        ) {
            let shares: Vec<OutstandingShare> = debts
                .iter()
                .enumerate()
                .map(|(i, &(owed, paid_pct))| share(i as i64 + 1, owed, owed * paid_pct / 100))
                .collect();
            let total_outstanding: i64 = shares.iter().map(|s| s.outstanding().minor_units()).sum();

            let allocations = allocate(Money::from_minor(amount), &shares);
            let total_applied: i64 = allocations.iter().map(|a| a.applied.minor_units()).sum();

            prop_assert_eq!(total_applied, amount.min(total_outstanding));
            for allocation in &allocations {
                let target = &shares[(allocation.expense_id - 1) as usize];
                prop_assert!(allocation.applied <= target.outstanding());
                prop_assert!(allocation.applied.is_positive());
            }
        }
    }
}
