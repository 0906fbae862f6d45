//! Main ledger orchestrator that coordinates expenses, balances and settlements

use tracing::warn;

use crate::ledger::{BalanceAggregator, ExpenseManager, SettlementAllocator};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_settlement_request;

/// Main ledger system that orchestrates all expense-sharing operations
///
/// Membership of the acting users is checked through the storage's
/// [`GroupDirectory`] before any write.
pub struct Ledger<S: LedgerStorage + GroupDirectory> {
    directory: S,
    expense_manager: ExpenseManager<S>,
    balance_aggregator: BalanceAggregator<S>,
    settlement_allocator: SettlementAllocator<S>,
}

impl<S: LedgerStorage + GroupDirectory + Clone> Ledger<S> {
    /// Create a new ledger with the given storage backend
    pub fn new(storage: S) -> Self {
        Self::with_validator(storage, Box::new(DefaultExpenseValidator))
    }

    /// Create a new ledger with a custom expense validator
    pub fn with_validator(storage: S, validator: Box<dyn ExpenseValidator>) -> Self {
        Self {
            directory: storage.clone(),
            expense_manager: ExpenseManager::with_validator(storage.clone(), validator),
            balance_aggregator: BalanceAggregator::new(storage.clone()),
            settlement_allocator: SettlementAllocator::new(storage),
        }
    }

    // Expense operations
    /// Validate an expense request without recording it
    pub fn validate_expense(&self, expense: &ExpenseCreate) -> LedgerResult<Vec<NormalizedShare>> {
        self.expense_manager.validate(expense)
    }

    /// Record a new expense created by `created_by`
    pub async fn create_expense(
        &self,
        expense: ExpenseCreate,
        created_by: UserId,
    ) -> LedgerResult<Expense> {
        let new_expense = self.expense_manager.prepare(expense, created_by)?;

        let participants = std::iter::once(created_by)
            .chain(new_expense.shares.iter().map(|s| s.user_id));
        self.ensure_members(new_expense.group_id, participants).await?;

        self.expense_manager.insert(&new_expense).await
    }

    /// Get an expense by ID
    pub async fn get_expense(&self, expense_id: ExpenseId) -> LedgerResult<Option<Expense>> {
        self.expense_manager.get_expense(expense_id).await
    }

    /// Get an expense by ID, returning an error if not found
    pub async fn get_expense_required(&self, expense_id: ExpenseId) -> LedgerResult<Expense> {
        self.expense_manager.get_expense_required(expense_id).await
    }

    /// List a group's expenses, newest first
    pub async fn group_expenses(&self, group_id: GroupId) -> LedgerResult<Vec<Expense>> {
        self.expense_manager.group_expenses(group_id).await
    }

    // Balance operations
    /// Balances in a group that involve `viewer`, largest first
    pub async fn compute_balances(
        &self,
        group_id: GroupId,
        viewer: UserId,
    ) -> LedgerResult<Vec<Balance>> {
        self.balance_aggregator
            .compute_balances(group_id, viewer)
            .await
    }

    /// Every outstanding balance in a group, largest first
    pub async fn group_balances(&self, group_id: GroupId) -> LedgerResult<Vec<Balance>> {
        self.balance_aggregator.group_balances(group_id).await
    }

    // Settlement operations
    /// Record a payment and apply it to the payer's outstanding shares
    pub async fn apply_settlement(&self, request: SettlementRequest) -> LedgerResult<Settlement> {
        validate_settlement_request(&request)?;
        self.ensure_members(request.group_id, [request.payer_id, request.payee_id])
            .await?;

        self.settlement_allocator.apply_settlement(&request).await
    }

    /// The settlement log of a group, oldest first
    pub async fn group_settlements(&self, group_id: GroupId) -> LedgerResult<Vec<Settlement>> {
        self.directory.group_settlements(group_id).await
    }

    async fn ensure_members(
        &self,
        group_id: GroupId,
        users: impl IntoIterator<Item = UserId>,
    ) -> LedgerResult<()> {
        if !self.directory.group_exists(group_id).await? {
            return Err(LedgerError::GroupNotFound(group_id));
        }

        for user_id in users {
            if !self.directory.is_member(group_id, user_id).await? {
                warn!(group_id, user_id, "rejected request from non-member");
                return Err(LedgerError::NotMember { group_id, user_id });
            }
        }

        Ok(())
    }
}
