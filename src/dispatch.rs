use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, info};

use crate::event::{Observation, parse_event_json};
use crate::outbox::Outbox;
use crate::signal::SignalEngine;
use crate::state::Delta;

const EVICT_SWEEP_EVERY: u32 = 256;

enum ShardMsg {
    Observe(Observation),
    Shutdown,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    evicted: AtomicU64,
    // Held shared for every send; shutdown takes it exclusively to close
    // ingress, so no accepted send can land behind a shutdown marker.
    closed: RwLock<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub accepted: u64,
    pub rejected: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub workers: usize,
    pub ingress_capacity: usize,
    pub evict_idle_ms: Option<i64>,
    pub risk_scoring: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            ingress_capacity: 1024,
            evict_idle_ms: None,
            risk_scoring: true,
        }
    }
}

/// Stable shard assignment; every observation of a key lands on one worker.
pub fn shard_for(key: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

/// Cloneable submit side held by transports. Dropping or replacing a
/// transport never touches engine state.
#[derive(Clone)]
pub struct DispatchHandle {
    shards: Arc<Vec<SyncSender<ShardMsg>>>,
    counters: Arc<Counters>,
    outbox: Arc<Outbox<Delta>>,
}

impl DispatchHandle {
    /// Blocks while the key's shard queue is full.
    pub fn submit(&self, obs: Observation) -> Result<()> {
        if let Err(err) = obs.validate() {
            self.reject(&err.to_string());
            return Err(err.into());
        }
        let shard = shard_for(&obs.key(), self.shards.len());
        let closed = self
            .counters
            .closed
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(anyhow!("dispatcher is shut down"));
        }
        self.shards[shard]
            .send(ShardMsg::Observe(obs))
            .map_err(|_| anyhow!("dispatcher is shut down"))
    }

    pub fn submit_raw(&self, raw: &str) -> Result<()> {
        match parse_event_json(raw) {
            Ok(obs) => self.submit(obs),
            Err(err) => {
                self.reject(&err.to_string());
                Err(err.into())
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    pub fn outbox(&self) -> &Arc<Outbox<Delta>> {
        &self.outbox
    }

    fn reject(&self, reason: &str) {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        debug!(error = %reason, "dropping malformed record");
        self.outbox
            .push(Delta::Log(format!("[WARN] Dropped record: {reason}")));
    }
}

pub struct DispatchReport {
    pub stats: DispatchStats,
    pub engines: Vec<SignalEngine>,
}

pub struct Dispatcher {
    handle: DispatchHandle,
    workers: Vec<JoinHandle<SignalEngine>>,
}

impl Dispatcher {
    pub fn spawn(config: DispatchConfig, outbox: Arc<Outbox<Delta>>) -> Result<Self> {
        let workers = config.workers.max(1);
        let counters = Arc::new(Counters::default());
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for shard in 0..workers {
            let (tx, rx) = mpsc::sync_channel(config.ingress_capacity.max(1));
            let engine = if config.risk_scoring {
                SignalEngine::new()
            } else {
                SignalEngine::without_risk_scoring()
            };
            let outbox = outbox.clone();
            let counters = counters.clone();
            let evict_idle_ms = config.evict_idle_ms;
            let handle = thread::Builder::new()
                .name(format!("signal-shard-{shard}"))
                .spawn(move || run_shard(shard, rx, engine, outbox, counters, evict_idle_ms))
                .with_context(|| format!("failed to spawn signal shard {shard}"))?;
            senders.push(tx);
            handles.push(handle);
        }

        info!(workers, "signal dispatcher started");
        Ok(Self {
            handle: DispatchHandle {
                shards: Arc::new(senders),
                counters,
                outbox,
            },
            workers: handles,
        })
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Closes ingress, lets every queued observation finish, then stops the
    /// workers. Submits racing with this call either land or return `Err`.
    pub fn shutdown(self) -> Result<DispatchReport> {
        *self
            .handle
            .counters
            .closed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = true;
        for tx in self.handle.shards.iter() {
            // A worker that already exited has nothing left to drain.
            let _ = tx.send(ShardMsg::Shutdown);
        }
        let mut engines = Vec::with_capacity(self.workers.len());
        for worker in self.workers {
            let engine = worker
                .join()
                .map_err(|_| anyhow!("signal shard panicked"))?;
            engines.push(engine);
        }
        let stats = self.handle.stats();
        info!(
            accepted = stats.accepted,
            rejected = stats.rejected,
            "signal dispatcher stopped"
        );
        Ok(DispatchReport { stats, engines })
    }
}

fn run_shard(
    shard: usize,
    rx: Receiver<ShardMsg>,
    mut engine: SignalEngine,
    outbox: Arc<Outbox<Delta>>,
    counters: Arc<Counters>,
    evict_idle_ms: Option<i64>,
) -> SignalEngine {
    let mut latest_ts = i64::MIN;
    let mut since_sweep = 0u32;

    while let Ok(msg) = rx.recv() {
        let obs = match msg {
            ShardMsg::Observe(obs) => obs,
            ShardMsg::Shutdown => break,
        };
        latest_ts = latest_ts.max(obs.ts);

        match engine.observe(&obs) {
            Ok(insight) => {
                counters.accepted.fetch_add(1, Ordering::Relaxed);
                if insight.drift {
                    debug!(shard, key = %insight.key, "cusum drift detected");
                }
                outbox.push(Delta::Insight(insight));
            }
            Err(err) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(shard, error = %err, "observation rejected");
                outbox.push(Delta::Log(format!("[WARN] Rejected observation: {err}")));
            }
        }

        if let Some(max_idle) = evict_idle_ms {
            since_sweep += 1;
            if since_sweep >= EVICT_SWEEP_EVERY {
                since_sweep = 0;
                let evicted = engine.evict_idle(latest_ts, max_idle);
                if evicted > 0 {
                    counters.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
                    debug!(shard, evicted, "evicted idle keys");
                }
            }
        }
    }

    debug!(shard, keys = engine.len(), "signal shard stopped");
    engine
}
