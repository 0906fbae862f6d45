//! SQLite storage backed by rusqlite
//!
//! Money columns hold integer minor units. Foreign keys are enforced by the
//! engine; the transaction methods still check references up front so callers
//! get a specific not-found error instead of a constraint failure.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, warn};

use crate::traits::*;
use crate::types::*;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS groups (
    group_id INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(group_id),
    FOREIGN KEY (user_id) REFERENCES users(user_id)
);

CREATE TABLE IF NOT EXISTS expenses (
    expense_id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL,
    description TEXT NOT NULL,
    amount INTEGER NOT NULL CHECK (amount > 0),
    created_by INTEGER NOT NULL,
    split_type TEXT NOT NULL CHECK (split_type IN ('EQUAL', 'EXACT', 'PERCENTAGE')),
    created_at TEXT NOT NULL,
    FOREIGN KEY (group_id) REFERENCES groups(group_id),
    FOREIGN KEY (created_by) REFERENCES users(user_id)
);

CREATE TABLE IF NOT EXISTS expense_shares (
    expense_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    share_amount INTEGER NOT NULL CHECK (share_amount >= 0),
    share_percentage TEXT,
    paid_amount INTEGER NOT NULL DEFAULT 0 CHECK (paid_amount >= 0 AND paid_amount <= share_amount),
    PRIMARY KEY (expense_id, user_id),
    FOREIGN KEY (expense_id) REFERENCES expenses(expense_id),
    FOREIGN KEY (user_id) REFERENCES users(user_id)
);

CREATE TABLE IF NOT EXISTS settlements (
    settlement_id INTEGER PRIMARY KEY AUTOINCREMENT,
    payer_id INTEGER NOT NULL,
    payee_id INTEGER NOT NULL,
    amount INTEGER NOT NULL CHECK (amount > 0),
    group_id INTEGER NOT NULL,
    settled_at TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    FOREIGN KEY (payer_id) REFERENCES users(user_id),
    FOREIGN KEY (payee_id) REFERENCES users(user_id),
    FOREIGN KEY (group_id) REFERENCES groups(group_id)
);

CREATE INDEX IF NOT EXISTS idx_expense_shares_user_id ON expense_shares(user_id);
CREATE INDEX IF NOT EXISTS idx_expenses_group_id ON expenses(group_id);
CREATE INDEX IF NOT EXISTS idx_settlements_group_id ON settlements(group_id);
";

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        error!(error = %err, "sqlite operation failed");
        LedgerError::Persistence(err.to_string())
    }
}

/// SQLite storage for the expense ledger
///
/// A single connection is shared behind an async mutex. Write transactions
/// keep the connection for their whole lifetime and start with
/// `BEGIN IMMEDIATE`, so there is exactly one writer at a time.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) a database file and make sure the schema exists
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> LedgerResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Register a user
    pub async fn add_user(&self, user_id: UserId) -> LedgerResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO users (user_id) VALUES (?1)",
            params![user_id],
        )?;
        Ok(())
    }

    /// Register a group with its members; every member must already be registered
    pub async fn add_group(
        &self,
        group_id: GroupId,
        members: impl IntoIterator<Item = UserId>,
    ) -> LedgerResult<()> {
        let members: Vec<UserId> = members.into_iter().collect();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for user_id in &members {
            require_user(&tx, *user_id)?;
        }
        tx.execute(
            "INSERT OR IGNORE INTO groups (group_id) VALUES (?1)",
            params![group_id],
        )?;
        for user_id in &members {
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                params![group_id, user_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStorage for SqliteStorage {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTransaction>> {
        let conn = self.conn.clone().lock_owned().await;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }

    async fn get_expense(&self, expense_id: ExpenseId) -> LedgerResult<Option<Expense>> {
        let conn = self.conn.lock().await;
        let expense = conn
            .query_row(
                "SELECT expense_id, group_id, description, amount, created_by, split_type, created_at
                 FROM expenses WHERE expense_id = ?1",
                params![expense_id],
                expense_from_row,
            )
            .optional()?;

        match expense {
            Some(mut expense) => {
                expense.shares = load_shares(&conn, expense.expense_id)?;
                Ok(Some(expense))
            }
            None => Ok(None),
        }
    }

    async fn group_expenses(&self, group_id: GroupId) -> LedgerResult<Vec<Expense>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT expense_id, group_id, description, amount, created_by, split_type, created_at
             FROM expenses WHERE group_id = ?1
             ORDER BY created_at DESC, expense_id DESC",
        )?;
        let mut expenses = stmt
            .query_map(params![group_id], expense_from_row)?
            .collect::<Result<Vec<Expense>, _>>()?;

        for expense in &mut expenses {
            expense.shares = load_shares(&conn, expense.expense_id)?;
        }
        Ok(expenses)
    }

    async fn group_settlements(&self, group_id: GroupId) -> LedgerResult<Vec<Settlement>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT settlement_id, payer_id, payee_id, amount, group_id, settled_at, notes
             FROM settlements WHERE group_id = ?1
             ORDER BY settlement_id ASC",
        )?;
        let settlements = stmt
            .query_map(params![group_id], |row| {
                Ok(Settlement {
                    settlement_id: row.get(0)?,
                    payer_id: row.get(1)?,
                    payee_id: row.get(2)?,
                    amount: Money::from_minor(row.get(3)?),
                    group_id: row.get(4)?,
                    settled_at: row.get(5)?,
                    notes: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<Settlement>, _>>()?;
        Ok(settlements)
    }
}

#[async_trait]
impl GroupDirectory for SqliteStorage {
    async fn group_exists(&self, group_id: GroupId) -> LedgerResult<bool> {
        let conn = self.conn.lock().await;
        exists(
            &conn,
            "SELECT EXISTS(SELECT 1 FROM groups WHERE group_id = ?1)",
            params![group_id],
        )
    }

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> LedgerResult<bool> {
        let conn = self.conn.lock().await;
        exists(
            &conn,
            "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2)",
            params![group_id, user_id],
        )
    }
}

/// Write transaction holding the connection; rolls back on drop unless committed
struct SqliteTransaction {
    conn: OwnedMutexGuard<Connection>,
    finished: bool,
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "rollback failed");
            }
        }
    }
}

#[async_trait]
impl LedgerTransaction for SqliteTransaction {
    async fn insert_expense(&mut self, expense: &NewExpense) -> LedgerResult<Expense> {
        let conn = &*self.conn;
        require_group(conn, expense.group_id)?;
        require_user(conn, expense.created_by)?;
        for share in &expense.shares {
            require_user(conn, share.user_id)?;
        }

        let created_at = chrono::Utc::now().naive_utc();
        conn.execute(
            "INSERT INTO expenses (group_id, description, amount, created_by, split_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                expense.group_id,
                expense.description,
                expense.amount.minor_units(),
                expense.created_by,
                expense.split_type.as_str(),
                created_at,
            ],
        )?;
        let expense_id = conn.last_insert_rowid();

        let mut shares = Vec::with_capacity(expense.shares.len());
        for share in &expense.shares {
            conn.execute(
                "INSERT INTO expense_shares (expense_id, user_id, share_amount, share_percentage, paid_amount)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    expense_id,
                    share.user_id,
                    share.share_amount.minor_units(),
                    share.share_percentage.as_ref().map(|p| p.to_string()),
                    share.paid_amount.minor_units(),
                ],
            )?;
            shares.push(Share {
                expense_id,
                user_id: share.user_id,
                share_amount: share.share_amount,
                share_percentage: share.share_percentage.clone(),
                paid_amount: share.paid_amount,
            });
        }

        Ok(Expense {
            expense_id,
            group_id: expense.group_id,
            description: expense.description.clone(),
            amount: expense.amount,
            created_by: expense.created_by,
            split_type: expense.split_type,
            created_at,
            shares,
        })
    }

    async fn outstanding_shares(
        &mut self,
        payer: UserId,
        payee: UserId,
        group_id: GroupId,
    ) -> LedgerResult<Vec<OutstandingShare>> {
        let mut stmt = self.conn.prepare(
            "SELECT es.expense_id, es.user_id, es.share_amount, es.paid_amount, e.created_at
             FROM expense_shares es
             JOIN expenses e ON e.expense_id = es.expense_id
             WHERE es.user_id = ?1
               AND e.created_by = ?2
               AND e.group_id = ?3
               AND es.share_amount - es.paid_amount > 0
             ORDER BY e.created_at ASC, e.expense_id ASC",
        )?;
        let shares = stmt
            .query_map(params![payer, payee, group_id], |row| {
                Ok(OutstandingShare {
                    expense_id: row.get(0)?,
                    user_id: row.get(1)?,
                    share_amount: Money::from_minor(row.get(2)?),
                    paid_amount: Money::from_minor(row.get(3)?),
                    expense_created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<OutstandingShare>, _>>()?;
        Ok(shares)
    }

    async fn add_paid_amount(
        &mut self,
        expense_id: ExpenseId,
        user_id: UserId,
        amount: Money,
    ) -> LedgerResult<()> {
        let over_paid = || LedgerError::Validation("paid amount exceeds share amount".to_string());
        if amount.is_negative() {
            return Err(over_paid());
        }

        let updated = self.conn.execute(
            "UPDATE expense_shares
             SET paid_amount = paid_amount + ?3
             WHERE expense_id = ?1 AND user_id = ?2 AND paid_amount + ?3 <= share_amount",
            params![expense_id, user_id, amount.minor_units()],
        )?;
        if updated == 1 {
            return Ok(());
        }

        let share_exists = exists(
            &self.conn,
            "SELECT EXISTS(SELECT 1 FROM expense_shares WHERE expense_id = ?1 AND user_id = ?2)",
            params![expense_id, user_id],
        )?;
        if share_exists {
            Err(over_paid())
        } else {
            Err(LedgerError::ExpenseNotFound(expense_id))
        }
    }

    async fn insert_settlement(&mut self, request: &SettlementRequest) -> LedgerResult<Settlement> {
        let conn = &*self.conn;
        require_group(conn, request.group_id)?;
        require_user(conn, request.payer_id)?;
        require_user(conn, request.payee_id)?;

        let settled_at = chrono::Utc::now().naive_utc();
        conn.execute(
            "INSERT INTO settlements (payer_id, payee_id, amount, group_id, settled_at, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.payer_id,
                request.payee_id,
                request.amount.minor_units(),
                request.group_id,
                settled_at,
                request.notes,
            ],
        )?;

        Ok(Settlement {
            settlement_id: conn.last_insert_rowid(),
            payer_id: request.payer_id,
            payee_id: request.payee_id,
            amount: request.amount,
            group_id: request.group_id,
            settled_at,
            notes: request.notes.clone(),
        })
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let mut tx = self;
        tx.conn.execute_batch("COMMIT")?;
        tx.finished = true;
        Ok(())
    }
}

fn exists(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> LedgerResult<bool> {
    Ok(conn.query_row(sql, params, |row| row.get(0))?)
}

fn require_group(conn: &Connection, group_id: GroupId) -> LedgerResult<()> {
    if exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM groups WHERE group_id = ?1)",
        params![group_id],
    )? {
        Ok(())
    } else {
        Err(LedgerError::GroupNotFound(group_id))
    }
}

fn require_user(conn: &Connection, user_id: UserId) -> LedgerResult<()> {
    if exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM users WHERE user_id = ?1)",
        params![user_id],
    )? {
        Ok(())
    } else {
        Err(LedgerError::UserNotFound(user_id))
    }
}

fn expense_from_row(row: &Row<'_>) -> rusqlite::Result<Expense> {
    let split_type: String = row.get(5)?;
    Ok(Expense {
        expense_id: row.get(0)?,
        group_id: row.get(1)?,
        description: row.get(2)?,
        amount: Money::from_minor(row.get(3)?),
        created_by: row.get(4)?,
        split_type: split_type
            .parse()
            .map_err(|err| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(err)))?,
        created_at: row.get(6)?,
        shares: Vec::new(),
    })
}

fn load_shares(conn: &Connection, expense_id: ExpenseId) -> LedgerResult<Vec<Share>> {
    let mut stmt = conn.prepare(
        "SELECT expense_id, user_id, share_amount, share_percentage, paid_amount
         FROM expense_shares WHERE expense_id = ?1
         ORDER BY rowid ASC",
    )?;
    let shares = stmt
        .query_map(params![expense_id], |row| {
            let percentage: Option<String> = row.get(3)?;
            let share_percentage = percentage
                .map(|p| BigDecimal::from_str(&p))
                .transpose()
                .map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err))
                })?;
            Ok(Share {
                expense_id: row.get(0)?,
                user_id: row.get(1)?,
                share_amount: Money::from_minor(row.get(2)?),
                share_percentage,
                paid_amount: Money::from_minor(row.get(4)?),
            })
        })?
        .collect::<Result<Vec<Share>, _>>()?;
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> SqliteStorage {
        let storage = SqliteStorage::open_in_memory().unwrap();
        for user_id in 1..=3 {
            storage.add_user(user_id).await.unwrap();
        }
        storage.add_group(10, [1, 2, 3]).await.unwrap();
        storage
    }

    fn new_expense(created_by: UserId, shares: Vec<NormalizedShare>) -> NewExpense {
        NewExpense {
            group_id: 10,
            description: "Cabin rental".to_string(),
            amount: shares.iter().map(|s| s.share_amount).sum(),
            created_by,
            split_type: SplitType::Percentage,
            shares,
        }
    }

    fn share(user_id: UserId, minor: i64, percentage: &str) -> NormalizedShare {
        NormalizedShare {
            user_id,
            share_amount: Money::from_minor(minor),
            share_percentage: Some(BigDecimal::from_str(percentage).unwrap()),
            paid_amount: Money::ZERO,
        }
    }

    #[tokio::test]
    async fn test_expense_round_trips_through_sqlite() {
        let storage = seeded().await;

        let mut tx = storage.begin().await.unwrap();
        let created = tx
            .insert_expense(&new_expense(1, vec![share(2, 6000, "60"), share(3, 4000, "40")]))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = storage.get_expense(created.expense_id).await.unwrap().unwrap();
        assert_eq!(stored.split_type, SplitType::Percentage);
        assert_eq!(stored.shares, created.shares);
        assert_eq!(
            stored.shares[0].share_percentage,
            Some(BigDecimal::from(60))
        );
        assert_eq!(storage.group_expenses(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let storage = seeded().await;

        {
            let mut tx = storage.begin().await.unwrap();
            tx.insert_expense(&new_expense(1, vec![share(2, 1000, "100")]))
                .await
                .unwrap();
        }

        assert!(storage.group_expenses(10).await.unwrap().is_empty());

        // The connection is usable again after the rollback.
        let tx = storage.begin().await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_paid_amount_cannot_exceed_share() {
        let storage = seeded().await;
        let mut tx = storage.begin().await.unwrap();
        let created = tx
            .insert_expense(&new_expense(1, vec![share(2, 1000, "100")]))
            .await
            .unwrap();

        tx.add_paid_amount(created.expense_id, 2, Money::from_minor(600))
            .await
            .unwrap();
        assert!(matches!(
            tx.add_paid_amount(created.expense_id, 2, Money::from_minor(500)).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            tx.add_paid_amount(created.expense_id, 3, Money::from_minor(1)).await,
            Err(LedgerError::ExpenseNotFound(_))
        ));

        let outstanding = tx.outstanding_shares(2, 1, 10).await.unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].outstanding(), Money::from_minor(400));
    }

    #[tokio::test]
    async fn test_unknown_references() {
        let storage = seeded().await;
        let mut tx = storage.begin().await.unwrap();

        let request = SettlementRequest {
            payer_id: 2,
            payee_id: 9,
            group_id: 10,
            amount: Money::from_major(1),
            notes: String::new(),
        };
        assert!(matches!(
            tx.insert_settlement(&request).await,
            Err(LedgerError::UserNotFound(9))
        ));

        let mut unknown_group = new_expense(1, vec![share(2, 1000, "100")]);
        unknown_group.group_id = 99;
        assert!(matches!(
            tx.insert_expense(&unknown_group).await,
            Err(LedgerError::GroupNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_group_directory() {
        let storage = seeded().await;
        assert!(storage.group_exists(10).await.unwrap());
        assert!(!storage.group_exists(11).await.unwrap());
        assert!(storage.is_member(10, 2).await.unwrap());
        assert!(!storage.is_member(10, 4).await.unwrap());
        assert!(matches!(
            storage.add_group(11, [4]).await,
            Err(LedgerError::UserNotFound(4))
        ));
    }
}
