//! Core types and data structures for the expense ledger

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

pub type UserId = i64;
pub type GroupId = i64;
pub type ExpenseId = i64;
pub type SettlementId = i64;

/// Number of decimal places carried by [`Money`].
pub const MONEY_SCALE: i64 = 2;

const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// A monetary amount stored as an integer count of minor units (cents).
///
/// All sums and equality checks in the ledger happen on the integer
/// representation. Conversion from [`BigDecimal`] rejects values carrying more
/// than two decimal places instead of rounding them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "BigDecimal", into = "BigDecimal")]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Create an amount from a count of minor units
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Create an amount from whole major units
    pub const fn from_major(major: i64) -> Self {
        Money(major * MINOR_UNITS_PER_MAJOR)
    }

    /// The amount in minor units
    pub const fn minor_units(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Add two amounts, returning `None` on overflow
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn saturating_add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }

    /// Convert to a decimal with exactly two decimal places
    pub fn to_decimal(self) -> BigDecimal {
        BigDecimal::new(self.0.into(), MONEY_SCALE)
    }

    /// Convert from a decimal, failing if it cannot be represented exactly in minor units
    pub fn from_decimal(value: &BigDecimal) -> LedgerResult<Self> {
        let scaled = value * &BigDecimal::from(MINOR_UNITS_PER_MAJOR);
        if !scaled.is_integer() {
            return Err(LedgerError::Validation(format!(
                "amount {} has more than {} decimal places",
                value, MONEY_SCALE
            )));
        }
        scaled
            .to_i64()
            .map(Money)
            .ok_or_else(|| LedgerError::Validation(format!("amount {} is out of range", value)))
    }
}

impl TryFrom<BigDecimal> for Money {
    type Error = LedgerError;

    fn try_from(value: BigDecimal) -> Result<Self, Self::Error> {
        Money::from_decimal(&value)
    }
}

impl From<Money> for BigDecimal {
    fn from(value: Money) -> Self {
        value.to_decimal()
    }
}

impl FromStr for Money {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = BigDecimal::from_str(s.trim())
            .map_err(|_| LedgerError::Validation(format!("invalid amount: {}", s)))?;
        Money::from_decimal(&value)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Rule governing how an expense amount is divided among participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SplitType {
    /// Every participant owes the same amount (up to one minor unit)
    Equal,
    /// Participants owe explicitly supplied amounts
    Exact,
    /// Participants owe a percentage of the total
    Percentage,
}

impl SplitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitType::Equal => "EQUAL",
            SplitType::Exact => "EXACT",
            SplitType::Percentage => "PERCENTAGE",
        }
    }
}

impl fmt::Display for SplitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SplitType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EQUAL" => Ok(SplitType::Equal),
            "EXACT" => Ok(SplitType::Exact),
            "PERCENTAGE" => Ok(SplitType::Percentage),
            _ => Err(LedgerError::Validation("invalid split type".to_string())),
        }
    }
}

/// Raw share input supplied by the expense creator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareCreate {
    pub user_id: UserId,
    /// Amount owed; required for EXACT, optional for EQUAL and PERCENTAGE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_amount: Option<Money>,
    /// Percentage of the total; required for PERCENTAGE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_percentage: Option<BigDecimal>,
    /// Amount already paid toward this share at creation time
    #[serde(default)]
    pub paid_amount: Money,
}

impl ShareCreate {
    /// A share whose amount is computed by the split rule
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            share_amount: None,
            share_percentage: None,
            paid_amount: Money::ZERO,
        }
    }

    /// A share with an explicit amount
    pub fn exact(user_id: UserId, share_amount: Money) -> Self {
        Self {
            share_amount: Some(share_amount),
            ..Self::new(user_id)
        }
    }

    /// A share expressed as a percentage of the total
    pub fn percentage(user_id: UserId, share_percentage: BigDecimal) -> Self {
        Self {
            share_percentage: Some(share_percentage),
            ..Self::new(user_id)
        }
    }

    pub fn with_paid(mut self, paid_amount: Money) -> Self {
        self.paid_amount = paid_amount;
        self
    }
}

/// Request to create an expense together with its shares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseCreate {
    pub group_id: GroupId,
    pub description: String,
    pub amount: Money,
    pub split_type: SplitType,
    pub shares: Vec<ShareCreate>,
}

/// A share after split validation, ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedShare {
    pub user_id: UserId,
    pub share_amount: Money,
    pub share_percentage: Option<BigDecimal>,
    pub paid_amount: Money,
}

/// Expense row plus normalized shares, handed to storage for insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExpense {
    pub group_id: GroupId,
    pub description: String,
    pub amount: Money,
    pub created_by: UserId,
    pub split_type: SplitType,
    pub shares: Vec<NormalizedShare>,
}

/// One user's portion of an expense
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub expense_id: ExpenseId,
    pub user_id: UserId,
    pub share_amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_percentage: Option<BigDecimal>,
    pub paid_amount: Money,
}

impl Share {
    /// `share_amount - paid_amount`; only positive values are real debt
    pub fn outstanding(&self) -> Money {
        self.share_amount - self.paid_amount
    }
}

/// A persisted expense with its shares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub expense_id: ExpenseId,
    pub group_id: GroupId,
    pub description: String,
    pub amount: Money,
    pub created_by: UserId,
    pub split_type: SplitType,
    pub created_at: NaiveDateTime,
    pub shares: Vec<Share>,
}

/// A share still carrying debt, as seen by the settlement allocator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingShare {
    pub expense_id: ExpenseId,
    pub user_id: UserId,
    pub share_amount: Money,
    pub paid_amount: Money,
    pub expense_created_at: NaiveDateTime,
}

impl OutstandingShare {
    pub fn outstanding(&self) -> Money {
        self.share_amount - self.paid_amount
    }
}

/// Request to record a payment from one member to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub group_id: GroupId,
    pub amount: Money,
    #[serde(default)]
    pub notes: String,
}

/// Recorded payment; settlements are append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub settlement_id: SettlementId,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub amount: Money,
    pub group_id: GroupId,
    pub settled_at: NaiveDateTime,
    pub notes: String,
}

/// Net amount `user_id` still owes `owed_to` within a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: UserId,
    pub owed_to: UserId,
    pub amount: Money,
}

/// Errors that can occur in the ledger system
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Expense not found: {0}")]
    ExpenseNotFound(ExpenseId),
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),
    #[error("User not found: {0}")]
    UserNotFound(UserId),
    #[error("User {user_id} is not a member of group {group_id}")]
    NotMember { group_id: GroupId, user_id: UserId },
    /// Storage failure; the engine detail is kept for `Debug` only
    #[error("persistence failure")]
    Persistence(String),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::ExpenseNotFound(_)
                | LedgerError::GroupNotFound(_)
                | LedgerError::UserNotFound(_)
        )
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
