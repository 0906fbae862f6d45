//! Ledger module containing split validation, balances and settlements

pub mod balance;
pub mod core;
pub mod expense;
pub mod settlement;
pub mod split;

pub use balance::*;
pub use self::core::*;
pub use expense::*;
pub use settlement::*;
pub use split::*;
