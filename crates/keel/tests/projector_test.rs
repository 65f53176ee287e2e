//! Integration tests for projectors over the SQLite store

use keel::prelude::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Deposited {
    amount: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Withdrawn {
    amount: i64,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("keel=debug")
        .with_test_writer()
        .try_init();
}

fn create_test_db() -> (Keel, TempDir) {
    init_tracing();
    let temp_dir = tempfile::tempdir().unwrap();
    let keel = Keel::open(temp_dir.path().join("keel.db")).unwrap();
    (keel, temp_dir)
}

async fn deposit(keel: &Keel, account: &str, amounts: &[i64]) {
    let records = amounts
        .iter()
        .map(|amount| Message::new("deposited", Deposited { amount: *amount }).encode().unwrap())
        .collect();
    keel.store()
        .append_to_stream(
            account,
            ExpectedVersion::Any,
            UncommittedMessages::new(Uuid::new_v4(), records).unwrap(),
        )
        .await
        .unwrap();
}

fn balances(state: Arc<Mutex<HashMap<String, i64>>>) -> Projection {
    let on_withdraw = Arc::clone(&state);
    Projection::builder("balances")
        .on::<Deposited, _>("deposited", move |msg, _, ctx| {
            *state.lock().entry(ctx.stream.clone()).or_default() += msg.amount;
            Ok(())
        })
        .on::<Withdrawn, _>("withdrawn", move |msg, _, ctx| {
            *on_withdraw.lock().entry(ctx.stream.clone()).or_default() -= msg.amount;
            Ok(())
        })
        .build()
}

#[tokio::test]
async fn test_projector_catches_up_to_head() {
    let (keel, _temp) = create_test_db();
    deposit(&keel, "account-1", &[10, 20]).await;
    deposit(&keel, "account-2", &[5]).await;
    deposit(&keel, "account-1", &[1, 1, 1]).await;

    let state = Arc::new(Mutex::new(HashMap::new()));
    let mut projector = keel
        .projector("read-models")
        .add_projection(balances(Arc::clone(&state)))
        .with_config(ProjectorConfig::new().with_batch_size(2))
        .build()
        .unwrap();

    let results = projector.run().await.unwrap();
    assert!(results.iter().all(|r| !r.has_error()));

    assert_eq!(state.lock()["account-1"], 33);
    assert_eq!(state.lock()["account-2"], 5);

    let head = keel.store().read_head_message_position().await.unwrap();
    let checkpoints = keel.checkpoints().fetch("read-models").await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].position, head);
    assert_eq!(projector.lag().await.unwrap(), 0);
}

#[tokio::test]
async fn test_checkpoint_survives_new_projector_instance() {
    let (keel, _temp) = create_test_db();
    deposit(&keel, "account-1", &[1, 2, 3]).await;

    let first = Arc::new(Mutex::new(HashMap::new()));
    keel.projector("read-models")
        .add_projection(balances(Arc::clone(&first)))
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    deposit(&keel, "account-1", &[100]).await;

    let second = Arc::new(Mutex::new(HashMap::new()));
    keel.projector("read-models")
        .add_projection(balances(Arc::clone(&second)))
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(first.lock()["account-1"], 6);
    assert_eq!(second.lock()["account-1"], 100);
}

#[tokio::test]
async fn test_failing_handler_attempts_and_checkpoint() {
    let (keel, _temp) = create_test_db();
    deposit(&keel, "account-1", &[1, 2, 3]).await;

    let attempts = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&attempts);
    let poisoned = Projection::builder("poisoned")
        .on::<Deposited, _>("deposited", move |msg, _, _| {
            if msg.amount == 2 {
                counted.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("amount 2 is not accepted");
            }
            Ok(())
        })
        .build();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let mut projector = keel
        .projector("read-models")
        .add_projection(poisoned)
        .with_config(ProjectorConfig::new().with_max_projecting_retries(4))
        .on_projecting_error(move |e| sink.lock().push(e.position))
        .build()
        .unwrap();

    let results = projector.run().await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(*errors.lock(), vec![2]);
    assert_eq!(projector.state(), ProjectorState::Faulted);

    let fault = results.iter().find_map(|r| r.error.as_ref()).unwrap();
    assert_eq!(fault.attempts, 4);
    assert_eq!(fault.projection, "poisoned");

    let checkpoint = &keel.checkpoints().fetch("read-models").await.unwrap()[0];
    assert!(checkpoint.position < 2);
}

#[tokio::test]
async fn test_runner_follows_appends() {
    let (keel, _temp) = create_test_db();
    deposit(&keel, "account-1", &[1]).await;

    let state = Arc::new(Mutex::new(HashMap::new()));
    let projector = keel
        .projector("live")
        .add_projection(balances(Arc::clone(&state)))
        .with_config(ProjectorConfig::new().with_poll_interval_ms(1000))
        .build()
        .unwrap();

    let mut runner = ProjectorRunner::new();
    runner.add(projector, None);
    runner.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    deposit(&keel, "account-1", &[41]).await;

    // woken by the append notification well before the poll interval
    let deadline = tokio::time::Instant::now() + Duration::from_millis(800);
    while state.lock().get("account-1").copied() != Some(42) {
        assert!(tokio::time::Instant::now() < deadline, "projector did not catch up");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let reports = runner.stop().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].messages, 2);
}

#[tokio::test]
async fn test_unhandled_contracts_advance_checkpoint() {
    let (keel, _temp) = create_test_db();
    keel.store()
        .append_to_stream(
            "audit",
            ExpectedVersion::NoStream,
            UncommittedMessages::single(
                Message::new("login", serde_json::json!({ "user": "u1" }))
                    .encode()
                    .unwrap(),
            ),
        )
        .await
        .unwrap();

    let state = Arc::new(Mutex::new(HashMap::new()));
    let mut projector = keel
        .projector("read-models")
        .add_projection(balances(Arc::clone(&state)))
        .build()
        .unwrap();

    let results = projector.run().await.unwrap();
    assert_eq!(results.iter().map(|r| r.dispatched).sum::<usize>(), 0);
    assert!(state.lock().is_empty());
    assert_eq!(keel.checkpoints().fetch("read-models").await.unwrap()[0].position, 1);
}

#[tokio::test]
async fn test_checkpoint_reaches_head_after_newest_stream_deleted() {
    let (keel, _temp) = create_test_db();
    deposit(&keel, "account-a", &[7]).await;
    deposit(&keel, "account-b", &[3]).await;
    keel.store()
        .delete_stream("account-b", ExpectedVersion::Exact(1))
        .await
        .unwrap();

    let state = Arc::new(Mutex::new(HashMap::new()));
    let mut projector = keel
        .projector("read-models")
        .add_projection(balances(Arc::clone(&state)))
        .build()
        .unwrap();
    projector.run().await.unwrap();

    assert_eq!(state.lock()["account-a"], 7);
    assert!(!state.lock().contains_key("account-b"));

    let head = keel.store().read_head_message_position().await.unwrap();
    assert_eq!(head, 2);
    let checkpoints = keel.checkpoints().fetch("read-models").await.unwrap();
    assert_eq!(checkpoints[0].position, head);
    assert_eq!(projector.lag().await.unwrap(), 0);
}
