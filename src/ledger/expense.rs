//! Expense creation and retrieval

use tracing::info;

use crate::traits::*;
use crate::types::*;

/// Expense manager for validating and persisting expenses
pub struct ExpenseManager<S: LedgerStorage> {
    storage: S,
    validator: Box<dyn ExpenseValidator>,
}

impl<S: LedgerStorage> ExpenseManager<S> {
    /// Create a new expense manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultExpenseValidator),
        }
    }

    /// Create a new expense manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn ExpenseValidator>) -> Self {
        Self { storage, validator }
    }

    /// Validate the split rule for `expense` without persisting anything
    pub fn validate(&self, expense: &ExpenseCreate) -> LedgerResult<Vec<NormalizedShare>> {
        self.validator.validate_expense(expense)
    }

    /// Validate `expense` and build the rows to persist for it
    pub fn prepare(&self, expense: ExpenseCreate, created_by: UserId) -> LedgerResult<NewExpense> {
        let shares = self.validator.validate_expense(&expense)?;

        Ok(NewExpense {
            group_id: expense.group_id,
            description: expense.description,
            amount: expense.amount,
            created_by,
            split_type: expense.split_type,
            shares,
        })
    }

    /// Persist a prepared expense with its shares in one transaction
    pub async fn insert(&self, new_expense: &NewExpense) -> LedgerResult<Expense> {
        let mut tx = self.storage.begin().await?;
        let created = tx.insert_expense(new_expense).await?;
        tx.commit().await?;

        info!(
            expense_id = created.expense_id,
            group_id = created.group_id,
            created_by = created.created_by,
            amount = %created.amount,
            split_type = %created.split_type,
            shares = created.shares.len(),
            "expense created"
        );

        Ok(created)
    }

    /// Get an expense by ID
    pub async fn get_expense(&self, expense_id: ExpenseId) -> LedgerResult<Option<Expense>> {
        self.storage.get_expense(expense_id).await
    }

    /// Get an expense by ID, returning an error if not found
    pub async fn get_expense_required(&self, expense_id: ExpenseId) -> LedgerResult<Expense> {
        self.storage
            .get_expense(expense_id)
            .await?
            .ok_or(LedgerError::ExpenseNotFound(expense_id))
    }

    /// List a group's expenses, newest first
    pub async fn group_expenses(&self, group_id: GroupId) -> LedgerResult<Vec<Expense>> {
        self.storage.group_expenses(group_id).await
    }
}
