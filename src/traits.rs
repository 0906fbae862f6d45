//! Traits for storage abstraction and extensibility

use async_trait::async_trait;

use crate::ledger::split::SplitValidator;
use crate::types::*;
use crate::utils::validation::{validate_description, validate_group_id};

/// Storage abstraction for the expense ledger
///
/// Reads go straight through the storage and must observe a consistent
/// snapshot: an expense is never visible without its shares. Writes go through
/// a [`LedgerTransaction`] obtained from [`LedgerStorage::begin`]; only one
/// write transaction is in flight at a time.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Start a write transaction. Waits until no other write transaction is open.
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTransaction>>;

    /// Get an expense and its shares by ID
    async fn get_expense(&self, expense_id: ExpenseId) -> LedgerResult<Option<Expense>>;

    /// List a group's expenses with their shares, newest first
    async fn group_expenses(&self, group_id: GroupId) -> LedgerResult<Vec<Expense>>;

    /// List a group's settlements, oldest first
    async fn group_settlements(&self, group_id: GroupId) -> LedgerResult<Vec<Settlement>>;
}

/// A unit of work against the ledger storage
///
/// Nothing written through a transaction is visible until [`commit`] succeeds.
/// Dropping the transaction without committing rolls everything back.
///
/// [`commit`]: LedgerTransaction::commit
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Insert an expense and all of its shares.
    ///
    /// Fails with `GroupNotFound` / `UserNotFound` when a reference is unknown.
    async fn insert_expense(&mut self, expense: &NewExpense) -> LedgerResult<Expense>;

    /// Shares of `payer` on expenses in `group_id` created by `payee` that still
    /// carry debt, oldest expense first.
    async fn outstanding_shares(
        &mut self,
        payer: UserId,
        payee: UserId,
        group_id: GroupId,
    ) -> LedgerResult<Vec<OutstandingShare>>;

    /// Add `amount` to the `paid_amount` of one share
    async fn add_paid_amount(
        &mut self,
        expense_id: ExpenseId,
        user_id: UserId,
        amount: Money,
    ) -> LedgerResult<()>;

    /// Append a settlement to the log.
    ///
    /// Fails with `GroupNotFound` / `UserNotFound` when a reference is unknown.
    async fn insert_settlement(&mut self, request: &SettlementRequest) -> LedgerResult<Settlement>;

    /// Make every write of this transaction durable and visible
    async fn commit(self: Box<Self>) -> LedgerResult<()>;
}

/// Group membership lookups supplied by the group-management service
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn group_exists(&self, group_id: GroupId) -> LedgerResult<bool>;

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> LedgerResult<bool>;
}

/// Trait for implementing custom expense validation rules
pub trait ExpenseValidator: Send + Sync {
    /// Validate an expense request and return its normalized shares
    fn validate_expense(&self, expense: &ExpenseCreate) -> LedgerResult<Vec<NormalizedShare>>;
}

/// Default expense validator: input checks followed by the split rules
pub struct DefaultExpenseValidator;

impl ExpenseValidator for DefaultExpenseValidator {
    fn validate_expense(&self, expense: &ExpenseCreate) -> LedgerResult<Vec<NormalizedShare>> {
        validate_group_id(expense.group_id)?;
        validate_description(&expense.description)?;
        SplitValidator::validate(expense.amount, expense.split_type, &expense.shares)
    }
}
