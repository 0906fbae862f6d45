//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeSet<UserId>,
    groups: BTreeMap<GroupId, BTreeSet<UserId>>,
    expenses: BTreeMap<ExpenseId, Expense>,
    settlements: Vec<Settlement>,
    last_expense_id: ExpenseId,
    last_settlement_id: SettlementId,
}

impl MemoryState {
    fn require_group(&self, group_id: GroupId) -> LedgerResult<()> {
        if self.groups.contains_key(&group_id) {
            Ok(())
        } else {
            Err(LedgerError::GroupNotFound(group_id))
        }
    }

    fn require_user(&self, user_id: UserId) -> LedgerResult<()> {
        if self.users.contains(&user_id) {
            Ok(())
        } else {
            Err(LedgerError::UserNotFound(user_id))
        }
    }
}

/// In-memory storage implementation for testing and development
///
/// Write transactions work on a private copy of the state and hold the state
/// lock until they commit or are dropped, so writers are serialized and
/// readers only ever see committed data.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Register a user
    pub async fn add_user(&self, user_id: UserId) {
        self.state.lock().await.users.insert(user_id);
    }

    /// Register a group with its members; every member must already be registered
    pub async fn add_group(
        &self,
        group_id: GroupId,
        members: impl IntoIterator<Item = UserId>,
    ) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        let members: BTreeSet<UserId> = members.into_iter().collect();
        for user_id in &members {
            state.require_user(*user_id)?;
        }
        state.groups.entry(group_id).or_default().extend(members);
        Ok(())
    }

    /// Clear all data (useful for testing)
    pub async fn clear(&self) {
        *self.state.lock().await = MemoryState::default();
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }

    async fn get_expense(&self, expense_id: ExpenseId) -> LedgerResult<Option<Expense>> {
        Ok(self.state.lock().await.expenses.get(&expense_id).cloned())
    }

    async fn group_expenses(&self, group_id: GroupId) -> LedgerResult<Vec<Expense>> {
        let state = self.state.lock().await;
        let mut expenses: Vec<Expense> = state
            .expenses
            .values()
            .filter(|expense| expense.group_id == group_id)
            .cloned()
            .collect();
        expenses.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.expense_id.cmp(&a.expense_id))
        });
        Ok(expenses)
    }

    async fn group_settlements(&self, group_id: GroupId) -> LedgerResult<Vec<Settlement>> {
        Ok(self
            .state
            .lock()
            .await
            .settlements
            .iter()
            .filter(|settlement| settlement.group_id == group_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GroupDirectory for MemoryStorage {
    async fn group_exists(&self, group_id: GroupId) -> LedgerResult<bool> {
        Ok(self.state.lock().await.groups.contains_key(&group_id))
    }

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> LedgerResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .groups
            .get(&group_id)
            .is_some_and(|members| members.contains(&user_id)))
    }
}

/// Write transaction over [`MemoryStorage`]; changes are discarded on drop
struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn insert_expense(&mut self, expense: &NewExpense) -> LedgerResult<Expense> {
        let state = &mut self.staged;
        state.require_group(expense.group_id)?;
        state.require_user(expense.created_by)?;
        for share in &expense.shares {
            state.require_user(share.user_id)?;
        }

        state.last_expense_id += 1;
        let expense_id = state.last_expense_id;
        let created = Expense {
            expense_id,
            group_id: expense.group_id,
            description: expense.description.clone(),
            amount: expense.amount,
            created_by: expense.created_by,
            split_type: expense.split_type,
            created_at: chrono::Utc::now().naive_utc(),
            shares: expense
                .shares
                .iter()
                .map(|share| Share {
                    expense_id,
                    user_id: share.user_id,
                    share_amount: share.share_amount,
                    share_percentage: share.share_percentage.clone(),
                    paid_amount: share.paid_amount,
                })
                .collect(),
        };

        state.expenses.insert(expense_id, created.clone());
        Ok(created)
    }

    async fn outstanding_shares(
        &mut self,
        payer: UserId,
        payee: UserId,
        group_id: GroupId,
    ) -> LedgerResult<Vec<OutstandingShare>> {
        let mut shares: Vec<OutstandingShare> = self
            .staged
            .expenses
            .values()
            .filter(|expense| expense.group_id == group_id && expense.created_by == payee)
            .flat_map(|expense| {
                expense
                    .shares
                    .iter()
                    .filter(|share| share.user_id == payer && share.outstanding().is_positive())
                    .map(|share| OutstandingShare {
                        expense_id: expense.expense_id,
                        user_id: share.user_id,
                        share_amount: share.share_amount,
                        paid_amount: share.paid_amount,
                        expense_created_at: expense.created_at,
                    })
            })
            .collect();

        shares.sort_by(|a, b| {
            a.expense_created_at
                .cmp(&b.expense_created_at)
                .then(a.expense_id.cmp(&b.expense_id))
        });
        Ok(shares)
    }

    async fn add_paid_amount(
        &mut self,
        expense_id: ExpenseId,
        user_id: UserId,
        amount: Money,
    ) -> LedgerResult<()> {
        let share = self
            .staged
            .expenses
            .get_mut(&expense_id)
            .and_then(|expense| expense.shares.iter_mut().find(|s| s.user_id == user_id))
            .ok_or(LedgerError::ExpenseNotFound(expense_id))?;

        let paid = share.paid_amount + amount;
        if amount.is_negative() || paid > share.share_amount {
            return Err(LedgerError::Validation(
                "paid amount exceeds share amount".to_string(),
            ));
        }
        share.paid_amount = paid;
        Ok(())
    }

    async fn insert_settlement(&mut self, request: &SettlementRequest) -> LedgerResult<Settlement> {
        let state = &mut self.staged;
        state.require_group(request.group_id)?;
        state.require_user(request.payer_id)?;
        state.require_user(request.payee_id)?;

        state.last_settlement_id += 1;
        let settlement = Settlement {
            settlement_id: state.last_settlement_id,
            payer_id: request.payer_id,
            payee_id: request.payee_id,
            amount: request.amount,
            group_id: request.group_id,
            settled_at: chrono::Utc::now().naive_utc(),
            notes: request.notes.clone(),
        };

        state.settlements.push(settlement.clone());
        Ok(settlement)
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
