//! Property tests for journal round trip, recovery equivalence and the
//! counter invariant under injected failures and crashes.

use proptest::prelude::*;
use serde_json::json;
use tickline_engine::pending::{collect_pending, decode_journal, encode_journal, rebuild_pool};
use tickline_engine::prelude::*;
use tickline_storage::MemoryBackend;

#[derive(serde::Serialize, serde::Deserialize)]
struct Move {
    dx: i32,
    dy: i32,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Chat {
    text: String,
}

#[derive(Debug, Clone)]
enum Tx {
    Move(i32, i32),
    Chat(String),
}

fn tx_strategy() -> impl Strategy<Value = Tx> {
    prop_oneof![
        (any::<i32>(), any::<i32>()).prop_map(|(dx, dy)| Tx::Move(dx, dy)),
        "[a-z ]{0,12}".prop_map(Tx::Chat),
    ]
}

fn registry() -> MessageRegistry {
    let mut messages = MessageRegistry::new();
    messages.register::<Move>("move").unwrap();
    messages.register::<Chat>("chat").unwrap();
    messages
}

fn build_pool(messages: &MessageRegistry, txs: &[Tx]) -> TxPool {
    let mut pool = TxPool::new();
    for (nonce, tx) in txs.iter().enumerate() {
        let (name, body) = match tx {
            Tx::Move(dx, dy) => ("move", json!({ "dx": dx, "dy": dy })),
            Tx::Chat(text) => ("chat", json!({ "text": text })),
        };
        let id = messages.by_name(name).unwrap();
        let signed = SignedTransaction::new("persona", "w1", nonce as u64, body.clone());
        pool.add_transaction(id, body, signed);
    }
    pool
}

fn buffer(storage: MemoryBackend) -> EntityCommandBuffer<MemoryBackend> {
    let mut ecb = EntityCommandBuffer::new(storage, BufferConfig::default());
    ecb.register_component("step").unwrap();
    ecb
}

#[derive(Debug, Clone)]
struct Step {
    txs: Vec<Tx>,
    fail_start: bool,
    crash_after_start: bool,
    fail_finalize: bool,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    (
        prop::collection::vec(tx_strategy(), 0..5),
        prop::bool::weighted(0.2),
        prop::bool::weighted(0.3),
        prop::bool::weighted(0.2),
    )
        .prop_map(|(txs, fail_start, crash_after_start, fail_finalize)| Step {
            txs,
            fail_start,
            crash_after_start,
            fail_finalize,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn journal_round_trip(txs in prop::collection::vec(tx_strategy(), 0..20)) {
        let messages = registry();
        let pool = build_pool(&messages, &txs);

        let pending = collect_pending(&messages, &pool).unwrap();
        prop_assert_eq!(pending.len(), txs.len());
        let decoded = decode_journal(&encode_journal(&pending).unwrap()).unwrap();
        prop_assert_eq!(&decoded, &pending);
        prop_assert_eq!(rebuild_pool(&messages, decoded).unwrap(), pool);
    }

    #[test]
    fn recovery_reproduces_started_pool(txs in prop::collection::vec(tx_strategy(), 0..20)) {
        let messages = registry();
        let pool = build_pool(&messages, &txs);

        let mut ecb = buffer(MemoryBackend::new());
        ecb.start_next_tick(&messages, &pool).unwrap();

        let mut restarted = buffer(ecb.into_storage());
        prop_assert!(restarted.get_tick_numbers().unwrap().in_flight());
        prop_assert_eq!(restarted.recover(&registry()).unwrap(), pool);
    }

    #[test]
    fn counters_stay_valid_under_failures(steps in prop::collection::vec(step_strategy(), 1..12)) {
        let messages = registry();
        let mut ecb = buffer(MemoryBackend::new());
        let mut completed = 0u64;

        for step in steps {
            let pool = build_pool(&messages, &step.txs);

            if step.fail_start {
                ecb.storage_mut().fail_next_commit();
                prop_assert!(ecb.start_next_tick(&messages, &pool).is_err());
                let counters = ecb.get_tick_numbers().unwrap().check().unwrap();
                prop_assert_eq!(counters, TickCounters { start: completed, end: completed });
                continue;
            }

            ecb.start_next_tick(&messages, &pool).unwrap();
            let counters = ecb.get_tick_numbers().unwrap().check().unwrap();
            prop_assert_eq!(counters, TickCounters { start: completed + 1, end: completed });

            if step.crash_after_start {
                ecb.create_entity(vec![("step", json!("lost"))]).unwrap();
                ecb = buffer(ecb.into_storage());
                prop_assert!(ecb.get_tick_numbers().unwrap().in_flight());
                prop_assert_eq!(ecb.recover(&messages).unwrap(), pool);
                prop_assert!(ecb.mutations().is_empty());
            }

            ecb.create_entity(vec![("step", json!(completed + 1))]).unwrap();

            if step.fail_finalize {
                ecb.storage_mut().fail_next_commit();
                prop_assert!(ecb.finalize_tick().is_err());
                let counters = ecb.get_tick_numbers().unwrap().check().unwrap();
                prop_assert_eq!(counters, TickCounters { start: completed + 1, end: completed });
                prop_assert_eq!(ecb.mutations().len(), 1);
            }

            let report = ecb.finalize_tick().unwrap();
            prop_assert_eq!(report.mutation_count, 1);
            completed += 1;
            let counters = ecb.get_tick_numbers().unwrap().check().unwrap();
            prop_assert_eq!(counters, TickCounters { start: completed, end: completed });
        }

        // One committed entity per completed tick, with dense ids.
        let mut fresh = buffer(ecb.into_storage());
        for raw in 0..completed {
            let value = fresh.get_component(EntityId::new(raw), "step").unwrap();
            prop_assert_eq!(value, json!(raw + 1));
        }
    }
}
