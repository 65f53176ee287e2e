//! Basic Keel Usage Example
//!
//! This example demonstrates:
//! - Opening a database
//! - Appending to streams with expected versions
//! - Handling a version conflict
//! - Running a projector to catch up
//! - Truncating a stream
//!
//! Run with: cargo run --example basic_usage

use keel::prelude::*;
use keel::RunSummary;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Deposited {
    amount: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Withdrawn {
    amount: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("keel=info").init();

    let temp_dir = tempfile::tempdir()?;
    let db_path = temp_dir.path().join("keel.db");

    println!("Step 1: Opening database at {}", db_path.display());
    let keel = Keel::open(&db_path)?;
    let store = keel.store();

    println!("Step 2: Appending to account-1");
    let opened = store
        .append_to_stream(
            "account-1",
            ExpectedVersion::NoStream,
            UncommittedMessages::new(
                Uuid::new_v4(),
                vec![
                    Message::new("deposited", Deposited { amount: 100 })
                        .with_metadata("source", "teller")
                        .encode()?,
                    Message::new("withdrawn", Withdrawn { amount: 30 }).encode()?,
                ],
            )?,
        )
        .await?;
    println!(
        "   version {} at positions {}..={}",
        opened.current_version, opened.first_position, opened.last_position
    );

    println!("Step 3: Appending with a stale expected version");
    let stale = store
        .append_to_stream(
            "account-1",
            ExpectedVersion::Exact(1),
            UncommittedMessages::single(Message::new("deposited", Deposited { amount: 5 }).encode()?),
        )
        .await;
    match stale {
        Err(e) if e.is_wrong_expected_version() => println!("   rejected: {e}"),
        other => println!("   unexpected outcome: {other:?}"),
    }

    store
        .append_to_stream(
            "account-2",
            ExpectedVersion::Any,
            UncommittedMessages::single(Message::new("deposited", Deposited { amount: 42 }).encode()?),
        )
        .await?;

    println!("Step 4: Projecting balances");
    let balances = Arc::new(Mutex::new(HashMap::<String, i64>::new()));
    let deposits = Arc::clone(&balances);
    let withdrawals = Arc::clone(&balances);

    let projection = Projection::builder("balances")
        .on::<Deposited, _>("deposited", move |msg, _, ctx| {
            *deposits.lock().entry(ctx.stream.clone()).or_default() += msg.amount;
            Ok(())
        })
        .on::<Withdrawn, _>("withdrawn", move |msg, _, ctx| {
            *withdrawals.lock().entry(ctx.stream.clone()).or_default() -= msg.amount;
            Ok(())
        })
        .build();

    let mut projector = keel.projector("read-models").add_projection(projection).build()?;
    let results = projector.run().await?;
    let summary = RunSummary::from_results(&results);
    println!("   {} messages, {} dispatched", summary.messages, summary.dispatched);

    for (account, balance) in balances.lock().iter() {
        println!("   {account}: {balance}");
    }

    println!("Step 5: Truncating account-1 to its head");
    let removed = store
        .truncate_stream_to_version("account-1", ExpectedVersion::Exact(2), 2)
        .await?;
    let remaining = store.read_stream_forward("account-1", 1).await?;
    println!(
        "   removed {removed}, remaining versions {:?}",
        remaining.messages().iter().map(|m| m.version).collect::<Vec<_>>()
    );

    Ok(())
}
