use accounts::types::Currency;
use accounts::{Accounts, InMemoryStorage, NewUser, Settings};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const USERS: usize = 16;
const STARTING_SHINIES: i64 = 1_000;

#[derive(Serialize)]
struct Summary {
    scenario: &'static str,
    threads: usize,
    operations: u64,
    duration_secs: f64,
    ops_per_second: f64,
    expected_total: i64,
    actual_total: i64,
    conserved: bool,
}

/// Load testing tool: hammers wallet transfers from several threads and
/// checks that no currency is created or lost
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = match Settings::load(None) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("Failed to load settings: {}", e);
            std::process::exit(1);
        }
    };

    let summaries = [
        test_sustained_transfers(settings.clone()),
        test_concurrent_transfers(settings, 4),
    ];

    let mut failed = false;
    for summary in &summaries {
        match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!("Failed to serialize summary: {}", e),
        }
        failed |= !summary.conserved;
    }

    if failed {
        tracing::error!("Currency was not conserved");
        std::process::exit(1);
    }
}

fn setup_accounts(settings: Settings) -> Accounts<InMemoryStorage> {
    let accounts = Accounts::new(InMemoryStorage::new(), settings);

    for i in 0..USERS {
        let new_user = NewUser {
            email: format!("load{}@email.com", i),
            username: format!("load{}", i),
            password: "loadPassword".to_string(),
            date_of_birth: None,
        };
        if let Err(e) = accounts.create_user(&new_user) {
            tracing::error!("Failed to create {}: {}", new_user.username, e);
            std::process::exit(1);
        }
        if let Err(e) = accounts.adjust(&new_user.username, STARTING_SHINIES, Currency::Shinies) {
            tracing::error!("Failed to fund {}: {}", new_user.username, e);
            std::process::exit(1);
        }
    }

    accounts
}

fn total_shinies(accounts: &Accounts<InMemoryStorage>) -> i64 {
    (0..USERS)
        .filter_map(|i| accounts.balance_of(&format!("load{}", i)).ok())
        .map(|balance| balance.shinies)
        .sum()
}

fn test_sustained_transfers(settings: Settings) -> Summary {
    tracing::info!("Testing sustained transfers...");

    let accounts = setup_accounts(settings);
    let duration = Duration::from_secs(5);
    let start = Instant::now();
    let mut operations: u64 = 0;

    while start.elapsed() < duration {
        let from = format!("load{}", operations as usize % USERS);
        let to = format!("load{}", (operations as usize + 1) % USERS);
        let amount = 1 + (operations % 10) as i64;

        if let Err(e) = accounts.transfer(&from, &to, amount, "shinies") {
            tracing::warn!("Transfer failed: {}", e);
        }
        operations += 1;
    }

    summarize("sustained", 1, operations, start.elapsed(), &accounts)
}

fn test_concurrent_transfers(settings: Settings, num_threads: usize) -> Summary {
    tracing::info!("Testing concurrent transfers...");

    let accounts = Arc::new(setup_accounts(settings));
    let operations = Arc::new(AtomicU64::new(0));
    let duration = Duration::from_secs(5);
    let start = Instant::now();

    let mut handles = vec![];
    for thread_id in 0..num_threads {
        let accounts = Arc::clone(&accounts);
        let ops = Arc::clone(&operations);

        handles.push(thread::spawn(move || {
            let start = Instant::now();
            let mut local_ops: u64 = 0;

            while start.elapsed() < duration {
                // Even threads walk forwards, odd threads backwards, so pairs
                // of wallets see transfers in both directions at once
                let a = (thread_id + local_ops as usize) % USERS;
                let b = (a + 1) % USERS;
                let (from, to) = if thread_id % 2 == 0 { (a, b) } else { (b, a) };

                if let Err(e) = accounts.transfer(
                    &format!("load{}", from),
                    &format!("load{}", to),
                    1 + (local_ops % 5) as i64,
                    "shinies",
                ) {
                    tracing::warn!("Transfer failed: {}", e);
                }
                local_ops += 1;
            }

            ops.fetch_add(local_ops, Ordering::Relaxed);
        }));
    }

    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("Load thread panicked");
        }
    }

    summarize(
        "concurrent",
        num_threads,
        operations.load(Ordering::Relaxed),
        start.elapsed(),
        &accounts,
    )
}

fn summarize(
    scenario: &'static str,
    threads: usize,
    operations: u64,
    elapsed: Duration,
    accounts: &Accounts<InMemoryStorage>,
) -> Summary {
    let expected_total = STARTING_SHINIES * USERS as i64;
    let actual_total = total_shinies(accounts);

    Summary {
        scenario,
        threads,
        operations,
        duration_secs: elapsed.as_secs_f64(),
        ops_per_second: operations as f64 / elapsed.as_secs_f64(),
        expected_total,
        actual_total,
        conserved: expected_total == actual_total,
    }
}
