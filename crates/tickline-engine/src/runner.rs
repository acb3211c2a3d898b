//! Tick loop driver with startup recovery.
//!
//! The [`TickLoop`] wraps an [`EntityCommandBuffer`] and drives it through the
//! tick protocol. Each tick:
//!
//! 1. The tick's pool is journaled and the start counter bumped.
//! 2. All registered systems run in declaration order, each receiving the
//!    command buffer, the message registry and the pool.
//! 3. The buffered mutations are flushed and the end counter bumped.
//!
//! Before its first tick the loop checks the durable counters. If the
//! previous process crashed mid-tick, the interrupted tick's pool is recovered
//! from the journal, re-simulated and finalized before any new tick starts.
//!
//! # Example
//!
//! ```
//! use tickline_engine::prelude::*;
//! use tickline_storage::MemoryBackend;
//!
//! let ecb = EntityCommandBuffer::new(MemoryBackend::new(), BufferConfig::default());
//! let mut tick_loop = TickLoop::new(ecb, MessageRegistry::new(), TickConfig::default());
//!
//! tick_loop.add_system("noop", |_ecb, _messages, _pool| Ok(()));
//!
//! for _ in 0..3 {
//!     tick_loop.tick(&TxPool::new()).unwrap();
//! }
//!
//! assert_eq!(tick_loop.tick_count(), Some(3));
//! ```

use std::time::{Duration, Instant};

use tickline_storage::KvBackend;
use tickline_tx::message::MessageRegistry;
use tickline_tx::pool::TxPool;
use tracing::{error, info, info_span};

use crate::buffer::EntityCommandBuffer;
use crate::TickError;

// ---------------------------------------------------------------------------
// TickConfig
// ---------------------------------------------------------------------------

/// Configuration for the tick loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Run [`TickLoop::recover_if_needed`] automatically before the first
    /// tick and after a failed tick.
    pub auto_recover: bool,
}

impl Default for TickConfig {
    /// Defaults to automatic recovery.
    fn default() -> Self {
        Self { auto_recover: true }
    }
}

// ---------------------------------------------------------------------------
// TickDiagnostics / TickReport
// ---------------------------------------------------------------------------

/// Timing diagnostics for the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Wall-clock time per system (in order of execution).
    pub system_times: Vec<(String, Duration)>,
    /// Total time for the tick (start + systems + finalize).
    pub total_time: Duration,
    /// Time spent in `finalize_tick`.
    pub finalize_time: Duration,
}

/// Outcome of one finalized tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// The tick number (value of the end counter after finalizing).
    pub tick: u64,
    /// Transactions in the tick's pool.
    pub transactions: usize,
    /// Mutations flushed.
    pub mutations: usize,
    /// (entity, component) pairs written more than once.
    pub conflicts: usize,
}

// ---------------------------------------------------------------------------
// SystemFn
// ---------------------------------------------------------------------------

/// A system run once per tick.
///
/// Systems read and record mutations through the command buffer and read the
/// tick's transactions from the pool. An error aborts the tick; it stays in
/// flight and is redone by recovery.
pub type SystemFn<S> =
    fn(&mut EntityCommandBuffer<S>, &MessageRegistry, &TxPool) -> Result<(), TickError>;

struct RegisteredSystem<S> {
    name: String,
    func: SystemFn<S>,
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

/// Serial tick driver over one command buffer.
pub struct TickLoop<S> {
    buffer: EntityCommandBuffer<S>,
    messages: MessageRegistry,
    systems: Vec<RegisteredSystem<S>>,
    config: TickConfig,
    /// Whether the durable counters were checked since the last failure.
    recovery_checked: bool,
    last_diagnostics: TickDiagnostics,
}

impl<S: KvBackend> TickLoop<S> {
    /// Create a tick loop over `buffer`, journaling with `messages`.
    pub fn new(
        buffer: EntityCommandBuffer<S>,
        messages: MessageRegistry,
        config: TickConfig,
    ) -> Self {
        Self {
            buffer,
            messages,
            systems: Vec::new(),
            config,
            recovery_checked: false,
            last_diagnostics: TickDiagnostics::default(),
        }
    }

    /// Register a system to run each tick, after those already registered.
    ///
    /// # Panics
    ///
    /// Panics if a system with the same name is already registered.
    pub fn add_system(&mut self, name: &str, func: SystemFn<S>) {
        assert!(
            !self.systems.iter().any(|s| s.name == name),
            "duplicate system name: {name:?}"
        );
        self.systems.push(RegisteredSystem {
            name: name.to_owned(),
            func,
        });
    }

    /// Finish an interrupted tick, if the durable counters show one.
    ///
    /// Returns the number of the recovered tick, or `None` if no tick was in
    /// flight.
    ///
    /// # Errors
    ///
    /// [`TickError::CorruptCounters`] if the stored counters are invalid, or
    /// any error from recovery, the systems, or finalization.
    pub fn recover_if_needed(&mut self) -> Result<Option<u64>, TickError> {
        let span = info_span!("tick_loop.recover");
        let _enter = span.enter();

        let counters = self.buffer.get_tick_numbers()?.check()?;
        if !counters.in_flight() {
            self.recovery_checked = true;
            return Ok(None);
        }

        info!(tick = counters.start, "found interrupted tick; recovering");
        let pool = self.buffer.recover(&self.messages)?;
        self.run_systems(&pool)?;
        let report = self.buffer.finalize_tick()?;
        self.recovery_checked = true;
        info!(
            tick = counters.start,
            transactions = pool.len(),
            mutations = report.mutation_count,
            "interrupted tick re-simulated"
        );
        Ok(Some(counters.start))
    }

    /// Run one tick over `pool`.
    ///
    /// On error the tick is left in flight; with `auto_recover` the next call
    /// redoes it from the journal before starting a new one.
    pub fn tick(&mut self, pool: &TxPool) -> Result<TickReport, TickError> {
        if self.config.auto_recover && !self.recovery_checked {
            self.recover_if_needed()?;
        }

        let result = self.run_tick(pool);
        if result.is_err() {
            self.recovery_checked = false;
        }
        result
    }

    /// Run `count` ticks with empty pools. Returns the total mutations flushed.
    pub fn run_ticks(&mut self, count: u64) -> Result<usize, TickError> {
        let empty = TxPool::new();
        let mut total = 0;
        for _ in 0..count {
            total += self.tick(&empty)?.mutations;
        }
        Ok(total)
    }

    // -- accessors ------------------------------------------------------------

    /// Number of finalized ticks, if the counters have been read.
    pub fn tick_count(&self) -> Option<u64> {
        self.buffer.cached_counters().map(|c| c.end)
    }

    /// The command buffer.
    pub fn buffer(&self) -> &EntityCommandBuffer<S> {
        &self.buffer
    }

    /// Mutable access to the command buffer (setup and tests).
    pub fn buffer_mut(&mut self) -> &mut EntityCommandBuffer<S> {
        &mut self.buffer
    }

    /// Give the command buffer and message registry back.
    pub fn into_parts(self) -> (EntityCommandBuffer<S>, MessageRegistry) {
        (self.buffer, self.messages)
    }

    /// The message registry.
    pub fn messages(&self) -> &MessageRegistry {
        &self.messages
    }

    /// The number of registered systems.
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// The names of all registered systems, in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }

    /// Diagnostics from the last tick (timing per system).
    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }

    // -- internal helpers -----------------------------------------------------

    fn run_tick(&mut self, pool: &TxPool) -> Result<TickReport, TickError> {
        let tick_start = Instant::now();

        self.buffer.start_next_tick(&self.messages, pool)?;
        let system_times = self.run_systems(pool)?;

        let finalize_start = Instant::now();
        let report = self.buffer.finalize_tick()?;
        let finalize_time = finalize_start.elapsed();

        self.last_diagnostics = TickDiagnostics {
            system_times,
            total_time: tick_start.elapsed(),
            finalize_time,
        };

        Ok(TickReport {
            tick: self.buffer.cached_counters().map_or(0, |c| c.end),
            transactions: pool.len(),
            mutations: report.mutation_count,
            conflicts: report.conflict_count,
        })
    }

    fn run_systems(&mut self, pool: &TxPool) -> Result<Vec<(String, Duration)>, TickError> {
        let mut system_times = Vec::with_capacity(self.systems.len());
        for system in &self.systems {
            let sys_start = Instant::now();
            if let Err(e) = (system.func)(&mut self.buffer, &self.messages, pool) {
                error!(system = %system.name, error = %e, "system failed; tick left in flight");
                return Err(e);
            }
            system_times.push((system.name.clone(), sys_start.elapsed()));
        }
        Ok(system_times)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
