//! The two-phase tick protocol.
//!
//! ```text
//!            start_next_tick                 finalize_tick
//!  (n, n) ───────────────────▶ (n+1, n) ───────────────────▶ (n+1, n+1)
//!             journal + start++     │        mutations + end++
//!                                   │ crash
//!                                   ▼
//!                        get_tick_numbers → (n+1, n)
//!                        recover → pool of tick n+1
//! ```
//!
//! Both transitions are single atomic backend batches, so the durable
//! counters always satisfy `end <= start <= end + 1`.

use serde::{Deserialize, Serialize};
use tickline_ecs::mutation::FlushReport;
use tickline_storage::KvBackend;
use tickline_tx::message::MessageRegistry;
use tickline_tx::pool::TxPool;
use tracing::{debug, error, info, info_span, warn};

use crate::buffer::EntityCommandBuffer;
use crate::pending::{collect_pending, decode_journal, encode_journal, rebuild_pool};
use crate::TickError;

// ---------------------------------------------------------------------------
// TickCounters
// ---------------------------------------------------------------------------

/// The durable `start` and `end` tick counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickCounters {
    /// Number of ticks started.
    pub start: u64,
    /// Number of ticks finalized.
    pub end: u64,
}

impl TickCounters {
    /// Whether a tick was started but not finalized.
    pub fn in_flight(&self) -> bool {
        self.start != self.end
    }

    /// The last finalized tick (0 before the first).
    pub fn last_completed(&self) -> u64 {
        self.end
    }

    /// Validate `end <= start <= end + 1`.
    ///
    /// # Errors
    ///
    /// [`TickError::CorruptCounters`] if the invariant does not hold.
    pub fn check(self) -> Result<Self, TickError> {
        if self.end > self.start || self.start - self.end > 1 {
            return Err(TickError::CorruptCounters {
                start: self.start,
                end: self.end,
            });
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

impl<S: KvBackend> EntityCommandBuffer<S> {
    /// Read both counters from storage. Never-written counters read as 0.
    ///
    /// Refreshes the in-process counter view.
    pub fn get_tick_numbers(&mut self) -> Result<TickCounters, TickError> {
        let start = self
            .storage
            .get_u64(&self.keys.start_tick())
            .map_err(TickError::storage("failed to get start tick"))?
            .unwrap_or(0);
        let end = self
            .storage
            .get_u64(&self.keys.end_tick())
            .map_err(TickError::storage("failed to get end tick"))?
            .unwrap_or(0);
        let counters = TickCounters { start, end };
        self.counters = Some(counters);
        Ok(counters)
    }

    /// The in-process counter view, if it has been loaded.
    pub fn cached_counters(&self) -> Option<TickCounters> {
        self.counters
    }

    /// Durably record `pool` as the next tick's inputs and bump `start`.
    ///
    /// The journal write and the increment commit as one batch: either both
    /// become visible or neither does.
    ///
    /// # Errors
    ///
    /// [`TickError::TickInFlight`] if the previous tick was not finalized,
    /// [`TickError::MessageNotFound`] / [`TickError::Encode`] for pool entries
    /// that cannot be journaled, [`TickError::Storage`] if the commit fails.
    /// Counters are unchanged on every error.
    pub fn start_next_tick(
        &mut self,
        messages: &MessageRegistry,
        pool: &TxPool,
    ) -> Result<(), TickError> {
        let span = info_span!("ecb.tick.start", transactions = pool.len());
        let _enter = span.enter();

        let result = self.start_next_tick_inner(messages, pool);
        if let Err(e) = &result {
            error!(error = %e, "failed to start tick");
        }
        result
    }

    fn start_next_tick_inner(
        &mut self,
        messages: &MessageRegistry,
        pool: &TxPool,
    ) -> Result<(), TickError> {
        let counters = self.loaded_counters()?;
        if counters.in_flight() {
            return Err(TickError::TickInFlight {
                start: counters.start,
                end: counters.end,
            });
        }

        let mut batch = self.storage.start_transaction();
        {
            let span = info_span!("ecb.tick.start.add-pending-transaction");
            let _enter = span.enter();
            let pending = collect_pending(messages, pool)?;
            let journal = encode_journal(&pending)?;
            debug!(entries = pending.len(), bytes = journal.len(), "journaled pool");
            batch.set(self.keys.pending_transactions(), journal);
        }
        batch.incr(self.keys.start_tick());

        self.storage
            .commit(batch)
            .map_err(TickError::storage("failed to increment start tick key"))?;

        let next = TickCounters {
            start: counters.start + 1,
            end: counters.end,
        };
        self.counters = Some(next);
        debug!(tick = next.start, "tick started");
        Ok(())
    }

    /// Flush the buffered mutation set and bump `end`, as one batch.
    ///
    /// On success the mutation set and pending archetypes are cleared. On
    /// failure they are kept so the call can be retried.
    ///
    /// # Errors
    ///
    /// [`TickError::NoTickInFlight`] if no tick was started,
    /// [`TickError::Storage`] if the commit fails.
    pub fn finalize_tick(&mut self) -> Result<FlushReport, TickError> {
        let span = info_span!("ecb.tick.finalize", mutations = self.mutations().len());
        let _enter = span.enter();

        let result = self.finalize_tick_inner();
        if let Err(e) = &result {
            error!(error = %e, "failed to finalize tick");
        }
        result
    }

    fn finalize_tick_inner(&mut self) -> Result<FlushReport, TickError> {
        let counters = self.loaded_counters()?;
        if !counters.in_flight() {
            return Err(TickError::NoTickInFlight { tick: counters.end });
        }

        let mut batch = self.storage.start_transaction();
        self.stage_mutations(&mut batch)?;
        batch.incr(self.keys.end_tick());

        self.storage
            .commit(batch)
            .map_err(TickError::storage("failed to increment end tick key"))?;

        let report = self.mark_flushed();
        let next = TickCounters {
            start: counters.start,
            end: counters.end + 1,
        };
        self.counters = Some(next);
        info!(
            tick = next.end,
            mutations = report.mutation_count,
            conflicts = report.conflict_count,
            "tick finalized"
        );
        Ok(report)
    }

    /// Rebuild the transaction pool of the interrupted tick from the journal.
    ///
    /// Buffered mutations are discarded first, so re-simulation starts from
    /// the last committed state. An absent journal yields an empty pool.
    /// A fresh store (no tick ever started) recovers an empty pool too.
    ///
    /// # Errors
    ///
    /// [`TickError::NoTickInFlight`] if the last started tick was already
    /// finalized; nothing is discarded in that case.
    /// [`TickError::MessageNotFound`] if a journaled type is not in
    /// `messages`; [`TickError::Journal`] / [`TickError::Decode`] for
    /// undecodable data; [`TickError::Storage`] if the read fails.
    pub fn recover(&mut self, messages: &MessageRegistry) -> Result<TxPool, TickError> {
        let span = info_span!("ecb.tick.recover");
        let _enter = span.enter();

        let result = self.recover_inner(messages);
        if let Err(e) = &result {
            error!(error = %e, "failed to recover tick");
        }
        result
    }

    fn recover_inner(&mut self, messages: &MessageRegistry) -> Result<TxPool, TickError> {
        let counters = self.loaded_counters()?;
        if !counters.in_flight() && counters.end > 0 {
            return Err(TickError::NoTickInFlight { tick: counters.end });
        }
        self.discard_pending();

        let raw = self
            .storage
            .get_bytes(&self.keys.pending_transactions())
            .map_err(TickError::storage("failed to get pending transactions"))?;
        let Some(bytes) = raw else {
            warn!("no pending-transaction journal; recovering an empty pool");
            return Ok(TxPool::new());
        };

        let pending = decode_journal(&bytes)?;
        let pool = rebuild_pool(messages, pending)?;
        info!(transactions = pool.len(), "recovered pending transactions");
        Ok(pool)
    }

    /// Cached counters, or a checked read from storage on first use.
    fn loaded_counters(&mut self) -> Result<TickCounters, TickError> {
        let counters = match self.counters {
            Some(counters) => counters,
            None => self.get_tick_numbers()?,
        };
        counters.check()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::BufferConfig;
    use serde_json::json;
    use tickline_storage::MemoryBackend;
    use tickline_tx::message::MessageId;
    use tickline_tx::sign::SignedTransaction;

    #[derive(Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    fn setup() -> (EntityCommandBuffer<MemoryBackend>, MessageRegistry, MessageId) {
        let mut messages = MessageRegistry::new();
        let ping = messages.register::<Ping>("ping").unwrap();
        let mut ecb = EntityCommandBuffer::new(MemoryBackend::new(), BufferConfig::default());
        ecb.register_component("score").unwrap();
        (ecb, messages, ping)
    }

    fn one_ping(ping: MessageId, n: u32) -> TxPool {
        let mut pool = TxPool::new();
        pool.add_transaction(
            ping,
            json!({ "n": n }),
            SignedTransaction::new("alice", "w1", n as u64, json!({ "n": n })),
        );
        pool
    }

    // -- 1. Counters ----------------------------------------------------------

    #[test]
    fn counter_invariant_check() {
        assert!(TickCounters { start: 0, end: 0 }.check().is_ok());
        assert!(TickCounters { start: 4, end: 3 }.check().is_ok());
        assert!(matches!(
            TickCounters { start: 3, end: 4 }.check(),
            Err(TickError::CorruptCounters { start: 3, end: 4 })
        ));
        assert!(matches!(
            TickCounters { start: 5, end: 3 }.check(),
            Err(TickError::CorruptCounters { .. })
        ));
    }

    #[test]
    fn in_flight_and_last_completed() {
        let idle = TickCounters { start: 2, end: 2 };
        let busy = TickCounters { start: 3, end: 2 };
        assert!(!idle.in_flight());
        assert!(busy.in_flight());
        assert_eq!(busy.last_completed(), 2);
    }

    #[test]
    fn fresh_store_reads_zero() {
        let (mut ecb, _, _) = setup();
        assert_eq!(ecb.cached_counters(), None);
        assert_eq!(ecb.get_tick_numbers().unwrap(), TickCounters::default());
        assert_eq!(ecb.get_tick_numbers().unwrap(), TickCounters::default());
        assert_eq!(ecb.cached_counters(), Some(TickCounters::default()));
    }

    // -- 2. Start / finalize --------------------------------------------------

    #[test]
    fn start_bumps_start_only() {
        let (mut ecb, messages, ping) = setup();
        ecb.start_next_tick(&messages, &one_ping(ping, 1)).unwrap();
        assert_eq!(ecb.get_tick_numbers().unwrap(), TickCounters { start: 1, end: 0 });
        assert!(ecb
            .storage()
            .get_bytes(&ecb.keys().pending_transactions())
            .unwrap()
            .is_some());
    }

    #[test]
    fn finalize_bumps_end_and_clears_mutations() {
        let (mut ecb, messages, ping) = setup();
        ecb.start_next_tick(&messages, &one_ping(ping, 1)).unwrap();
        ecb.create_entity(vec![("score", json!(1))]).unwrap();
        assert_eq!(ecb.mutations().len(), 1);

        let report = ecb.finalize_tick().unwrap();
        assert_eq!(report.mutation_count, 1);
        assert!(ecb.mutations().is_empty());
        assert_eq!(ecb.get_tick_numbers().unwrap(), TickCounters { start: 1, end: 1 });
    }

    #[test]
    fn start_twice_is_rejected() {
        let (mut ecb, messages, ping) = setup();
        ecb.start_next_tick(&messages, &TxPool::new()).unwrap();
        let err = ecb.start_next_tick(&messages, &one_ping(ping, 2)).unwrap_err();
        assert!(matches!(err, TickError::TickInFlight { start: 1, end: 0 }));
        assert_eq!(ecb.get_tick_numbers().unwrap(), TickCounters { start: 1, end: 0 });
    }

    #[test]
    fn finalize_without_start_is_rejected() {
        let (mut ecb, _, _) = setup();
        let err = ecb.finalize_tick().unwrap_err();
        assert!(matches!(err, TickError::NoTickInFlight { tick: 0 }));
        assert_eq!(ecb.get_tick_numbers().unwrap(), TickCounters::default());
    }

    #[test]
    fn corrupt_stored_counters_block_the_protocol() {
        let (mut ecb, messages, _) = setup();
        ecb.storage_mut().set_bytes("ECB:START-TICK", b"1").unwrap();
        ecb.storage_mut().set_bytes("ECB:END-TICK", b"5").unwrap();
        let err = ecb.start_next_tick(&messages, &TxPool::new()).unwrap_err();
        assert!(matches!(err, TickError::CorruptCounters { start: 1, end: 5 }));
    }

    // -- 3. Recovery ----------------------------------------------------------

    #[test]
    fn recover_discards_buffered_mutations() {
        let (mut ecb, messages, ping) = setup();
        let pool = one_ping(ping, 7);
        ecb.start_next_tick(&messages, &pool).unwrap();
        ecb.create_entity(vec![("score", json!(1))]).unwrap();

        let recovered = ecb.recover(&messages).unwrap();
        assert_eq!(recovered, pool);
        assert!(ecb.mutations().is_empty());
    }

    #[test]
    fn recover_without_journal_is_empty() {
        let (mut ecb, messages, _) = setup();
        let pool = ecb.recover(&messages).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn recover_after_finalize_is_rejected() {
        let (mut ecb, messages, ping) = setup();
        ecb.start_next_tick(&messages, &one_ping(ping, 1)).unwrap();
        ecb.finalize_tick().unwrap();

        let err = ecb.recover(&messages).unwrap_err();
        assert!(matches!(err, TickError::NoTickInFlight { tick: 1 }));
    }

    #[test]
    fn recover_with_unknown_type_fails() {
        let (mut ecb, messages, ping) = setup();
        ecb.start_next_tick(&messages, &one_ping(ping, 1)).unwrap();

        let err = ecb.recover(&MessageRegistry::new()).unwrap_err();
        assert!(matches!(err, TickError::MessageNotFound { id } if id == ping));
    }
}
