//! Crash-recovery demo -- a tick is interrupted mid-flight and redone on restart.
//!
//! Run with:
//!   cargo run --example crash_recovery -p tickline-engine
//!
//! Set `RUST_LOG=debug` to watch the `ecb.tick.*` spans.

use anyhow::Context;
use serde_json::json;
use tickline_engine::prelude::*;
use tickline_storage::{FileBackend, KvBackend};

// ---------------------------------------------------------------------------
// Messages and systems
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Deposit {
    account: String,
    amount: u64,
}

/// Credits each deposit to a new ledger entity.
fn apply_deposits<S: KvBackend>(
    ecb: &mut EntityCommandBuffer<S>,
    messages: &MessageRegistry,
    pool: &TxPool,
) -> Result<(), TickError> {
    let Some(deposit) = messages.by_name("deposit") else {
        return Ok(());
    };
    for entry in pool.for_id(deposit) {
        ecb.create_entity(vec![("ledger", entry.msg.clone())])?;
    }
    Ok(())
}

fn open_loop(path: &std::path::Path) -> anyhow::Result<TickLoop<FileBackend>> {
    let storage = FileBackend::open(path).context("failed to open store")?;
    let mut ecb = EntityCommandBuffer::new(storage, BufferConfig::default());
    ecb.register_component("ledger")?;

    let mut messages = MessageRegistry::new();
    messages.register::<Deposit>("deposit")?;

    let mut tick_loop = TickLoop::new(ecb, messages, TickConfig::default());
    tick_loop.add_system("apply_deposits", apply_deposits::<FileBackend>);
    Ok(tick_loop)
}

fn deposit_pool(messages: &MessageRegistry, deposits: &[(&str, u64)]) -> anyhow::Result<TxPool> {
    let id = messages
        .by_name("deposit")
        .context("deposit message not registered")?;
    let mut pool = TxPool::new();
    for (nonce, (account, amount)) in deposits.iter().enumerate() {
        let body = json!({ "account": account, "amount": amount });
        let tx = SignedTransaction::new(account, "demo", nonce as u64, body.clone());
        pool.add_transaction(id, body, tx);
    }
    Ok(pool)
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ledger.json");

    // -- First run: two clean ticks, then a crash after start ----------------
    {
        let mut tick_loop = open_loop(&path)?;
        for round in 0..2u64 {
            let pool = deposit_pool(tick_loop.messages(), &[("alice", 10 + round), ("bob", 5)])?;
            let report = tick_loop.tick(&pool)?;
            println!(
                "tick {}: {} transactions, {} mutations",
                report.tick, report.transactions, report.mutations
            );
        }

        let pool = deposit_pool(tick_loop.messages(), &[("carol", 99)])?;
        let (mut ecb, messages) = tick_loop.into_parts();
        ecb.start_next_tick(&messages, &pool)?;
        println!("tick 3 started; simulating crash before finalize");
    }

    // -- Second run: recovery re-simulates tick 3 ----------------------------
    let mut tick_loop = open_loop(&path)?;
    let counters = tick_loop.buffer_mut().get_tick_numbers()?;
    println!("restart: start={} end={}", counters.start, counters.end);

    match tick_loop.recover_if_needed()? {
        Some(tick) => println!("recovered tick {tick}"),
        None => println!("nothing to recover"),
    }

    let ecb = tick_loop.buffer_mut();
    for raw in 0..5 {
        let entity = EntityId::new(raw);
        let entry: Deposit = ecb.get_component_as(entity, "ledger")?;
        println!("  {entity}: {} +{}", entry.account, entry.amount);
    }
    let counters = ecb.get_tick_numbers()?;
    println!("final: start={} end={}", counters.start, counters.end);
    Ok(())
}
