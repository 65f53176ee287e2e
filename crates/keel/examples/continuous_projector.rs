//! Continuous Projector Example
//!
//! Demonstrates:
//! - A runner supervising a long-running projector
//! - A background writer appending to streams
//! - Wake-up on append instead of polling
//! - Graceful shutdown on Ctrl-C or after a fixed time
//!
//! Run with: cargo run --example continuous_projector

use keel::prelude::*;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Deposited {
    amount: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("keel=info").init();

    let temp_dir = tempfile::tempdir()?;
    let keel = Keel::open(temp_dir.path().join("keel.db"))?;

    let total = Arc::new(AtomicI64::new(0));
    let projected = Arc::clone(&total);
    let projection = Projection::builder("total-deposits")
        .on::<Deposited, _>("deposited", move |msg, _, _| {
            projected.fetch_add(msg.amount, Ordering::Relaxed);
            Ok(())
        })
        .build();

    let projector = keel
        .projector("live")
        .add_projection(projection)
        .with_config(ProjectorConfig::new().with_poll_interval_ms(5_000))
        .build()?;

    let mut runner = ProjectorRunner::new();
    runner.add(projector, Some(Duration::from_secs(10)));
    runner.start();

    let store = Arc::clone(keel.store());
    let writer = tokio::spawn(async move {
        for i in 1..=20i64 {
            let record = Message::new("deposited", Deposited { amount: i }).encode()?;
            store
                .append_to_stream(
                    &format!("account-{}", i % 3),
                    ExpectedVersion::Any,
                    UncommittedMessages::new(Uuid::new_v4(), vec![record])?,
                )
                .await?;
            sleep(Duration::from_millis(100)).await;
        }
        Ok::<_, KeelError>(())
    });

    tokio::select! {
        result = writer => result??,
        _ = tokio::signal::ctrl_c() => println!("Interrupted"),
    }

    sleep(Duration::from_millis(200)).await;
    for report in runner.stop().await {
        println!(
            "{}: {} runs, {} messages, {} faults",
            report.projector, report.runs, report.messages, report.faults
        );
    }
    println!("Total deposited: {}", total.load(Ordering::Relaxed));

    Ok(())
}
