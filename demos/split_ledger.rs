//! Shared-expense ledger example
//!
//! Storage is picked from `config/ledger.toml` or `EXPENSE_LEDGER__*`
//! environment variables, e.g. `EXPENSE_LEDGER__STORAGE__BACKEND=memory`.

use expense_ledger_core::utils::{MemoryStorage, SqliteStorage};
use expense_ledger_core::{
    telemetry, ExpenseCreate, GroupDirectory, Ledger, LedgerConfig, LedgerStorage, Money,
    SettlementRequest, ShareCreate, SplitType, StorageBackend,
};

const GROUP: i64 = 1;
const ALICE: i64 = 1;
const BOB: i64 = 2;
const CAROL: i64 = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LedgerConfig::load()?;
    telemetry::init(&config.log_filter);

    println!("Expense Ledger - Split Example\n");

    match config.storage.backend {
        StorageBackend::Memory => {
            println!("Using in-memory storage\n");
            let storage = MemoryStorage::new();
            for user in [ALICE, BOB, CAROL] {
                storage.add_user(user).await;
            }
            storage.add_group(GROUP, [ALICE, BOB, CAROL]).await?;
            run(Ledger::new(storage)).await?;
        }
        StorageBackend::Sqlite => {
            println!("Using SQLite storage at {}\n", config.storage.sqlite_path);
            let storage = SqliteStorage::open(&config.storage.sqlite_path)?;
            for user in [ALICE, BOB, CAROL] {
                storage.add_user(user).await?;
            }
            storage.add_group(GROUP, [ALICE, BOB, CAROL]).await?;
            run(Ledger::new(storage)).await?;
        }
    }

    Ok(())
}

async fn run<S>(ledger: Ledger<S>) -> Result<(), Box<dyn std::error::Error>>
where
    S: LedgerStorage + GroupDirectory + Clone,
{
    // 1. Alice pays for a cabin and Bob owes all of it
    let cabin = ledger
        .create_expense(
            ExpenseCreate {
                group_id: GROUP,
                description: "Cabin deposit".to_string(),
                amount: Money::from_major(40),
                split_type: SplitType::Exact,
                shares: vec![ShareCreate::exact(BOB, Money::from_major(40))],
            },
            ALICE,
        )
        .await?;
    println!("  Recorded expense #{}: {} ({})", cabin.expense_id, cabin.description, cabin.amount);

    // 2. Carol buys groceries split three ways
    let groceries = ledger
        .create_expense(
            ExpenseCreate {
                group_id: GROUP,
                description: "Groceries".to_string(),
                amount: Money::from_minor(10_000),
                split_type: SplitType::Equal,
                shares: vec![
                    ShareCreate::new(ALICE),
                    ShareCreate::new(BOB),
                    ShareCreate::new(CAROL),
                ],
            },
            CAROL,
        )
        .await?;
    println!("  Recorded expense #{}: {} ({})", groceries.expense_id, groceries.description, groceries.amount);
    for share in &groceries.shares {
        println!("    user {} owes {}", share.user_id, share.share_amount);
    }
    println!();

    print_balances(&ledger, BOB, "Bob's balances before settling").await?;

    // 3. Bob pays Alice part of what he owes
    let settlement = ledger
        .apply_settlement(SettlementRequest {
            payer_id: BOB,
            payee_id: ALICE,
            group_id: GROUP,
            amount: Money::from_major(25),
            notes: "Bank transfer".to_string(),
        })
        .await?;
    println!(
        "  Settlement #{}: user {} paid user {} {}\n",
        settlement.settlement_id, settlement.payer_id, settlement.payee_id, settlement.amount
    );

    print_balances(&ledger, BOB, "Bob's balances after settling").await?;

    println!("All group balances:");
    for balance in ledger.group_balances(GROUP).await? {
        println!("  user {} owes user {} {}", balance.user_id, balance.owed_to, balance.amount);
    }

    Ok(())
}

async fn print_balances<S>(
    ledger: &Ledger<S>,
    viewer: i64,
    title: &str,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: LedgerStorage + GroupDirectory + Clone,
{
    println!("{title}:");
    for balance in ledger.compute_balances(GROUP, viewer).await? {
        println!("  user {} owes user {} {}", balance.user_id, balance.owed_to, balance.amount);
    }
    println!();
    Ok(())
}
