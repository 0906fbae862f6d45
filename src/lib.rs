//! # Expense Ledger Core
//!
//! The money-handling core of a shared-expense service: members of a group
//! record expenses split between them, see who owes whom, and record
//! payments that pay down what they owe.
//!
//! ## Features
//!
//! - **Split validation**: EQUAL, EXACT and PERCENTAGE splits normalized to per-user amounts in cents
//! - **Balances**: pairwise debtor/creditor amounts derived from unpaid shares
//! - **Settlements**: payments applied to the oldest outstanding shares first, atomically
//! - **Storage abstraction**: trait-based storage with in-memory and SQLite backends
//!
//! ## Quick Start
//!
//! ```rust
//! use expense_ledger_core::utils::MemoryStorage;
//! use expense_ledger_core::{ExpenseCreate, Ledger, Money, ShareCreate, SplitType};
//!
//! # tokio_test_block(async {
//! let storage = MemoryStorage::new();
//! for user in [1, 2, 3] {
//!     storage.add_user(user).await;
//! }
//! storage.add_group(10, [1, 2, 3]).await?;
//!
//! let ledger = Ledger::new(storage);
//! ledger
//!     .create_expense(
//!         ExpenseCreate {
//!             group_id: 10,
//!             description: "Dinner".to_string(),
//!             amount: Money::from_major(90),
//!             split_type: SplitType::Equal,
//!             shares: vec![ShareCreate::new(1), ShareCreate::new(2), ShareCreate::new(3)],
//!         },
//!         1,
//!     )
//!     .await?;
//!
//! let balances = ledger.compute_balances(10, 2).await?;
//! assert_eq!(balances[0].amount, Money::from_major(30));
//! # Ok::<(), expense_ledger_core::LedgerError>(())
//! # }).unwrap();
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod config;
pub mod ledger;
pub mod telemetry;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::{LedgerConfig, StorageBackend, StorageConfig};
pub use ledger::*;
pub use traits::*;
pub use types::*;
