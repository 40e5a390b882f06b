//! Contention simulation: many signers sharing a few key slots.
//!
//! Each worker repeatedly leases a key slot, "submits" a transaction while
//! holding it, releases it, and records the transaction id, the same flow a
//! web frontend follows per request. A slot-occupancy table kept by the
//! simulator itself detects any slot handed to two workers at once.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::debug;

use keypool_core::{Keypool, KeypoolConfig, PoolError};
use keypool_store::InMemoryStore;

use crate::cli::SimulateArgs;

const TRANSACTIONS_CHANNEL: &str = "Transactions";
const RETRY_DELAY: Duration = Duration::from_millis(5);

/// Outcome of a simulation run.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub address: String,
    pub workers: usize,
    pub submissions: usize,
    pub max_slots: u32,
    pub slots_created: u32,
    pub slot_usage: Vec<usize>,
    pub retries: usize,
    pub overlaps: usize,
    pub key_lookups: usize,
    pub recent: Vec<String>,
}

/// Counters shared by the workers. Only the simulator uses these; the
/// keypool components themselves hold no shared state.
struct Tally {
    busy: Mutex<Vec<bool>>,
    usage: Vec<AtomicUsize>,
    retries: AtomicUsize,
    overlaps: AtomicUsize,
    key_lookups: AtomicUsize,
}

impl Tally {
    fn new(slots: u32) -> Self {
        Self {
            busy: Mutex::new(vec![false; slots as usize]),
            usage: (0..slots).map(|_| AtomicUsize::new(0)).collect(),
            retries: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
            key_lookups: AtomicUsize::new(0),
        }
    }

    /// Mark `index` busy, counting an overlap if it already was.
    fn enter(&self, index: u32) {
        let i = index as usize;
        if let Ok(mut busy) = self.busy.lock() {
            if busy[i] {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            busy[i] = true;
        }
        self.usage[i].fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self, index: u32) {
        if let Ok(mut busy) = self.busy.lock() {
            busy[index as usize] = false;
        }
    }
}

pub async fn run(mut config: KeypoolConfig, args: &SimulateArgs) -> anyhow::Result<SimulationReport> {
    if let Some(slots) = args.slots {
        config.max_capacity = slots;
    }
    anyhow::ensure!(config.max_capacity > 0, "at least one key slot is required");
    let max_slots = config.max_capacity;

    let keypool = Keypool::new(config, Arc::new(InMemoryStore::new()))?;
    let tally = Arc::new(Tally::new(max_slots));

    let mut workers = JoinSet::new();
    for worker in 0..args.workers {
        let keypool = keypool.clone();
        let tally = Arc::clone(&tally);
        let args = args.clone();
        workers.spawn(async move { run_worker(worker, keypool, tally, args).await });
    }
    let mut submissions = 0;
    while let Some(joined) = workers.join_next().await {
        submissions += joined??;
    }

    let slots_created = keypool.leases().capacity(&args.address).await?;
    let recent = keypool
        .ledger()
        .list_recent(TRANSACTIONS_CHANNEL, Some(args.recent))
        .await?;

    Ok(SimulationReport {
        address: args.address.clone(),
        workers: args.workers,
        submissions,
        max_slots,
        slots_created,
        slot_usage: tally.usage.iter().map(|u| u.load(Ordering::SeqCst)).collect(),
        retries: tally.retries.load(Ordering::SeqCst),
        overlaps: tally.overlaps.load(Ordering::SeqCst),
        key_lookups: tally.key_lookups.load(Ordering::SeqCst),
        recent,
    })
}

async fn run_worker(
    worker: usize,
    keypool: Keypool,
    tally: Arc<Tally>,
    args: SimulateArgs,
) -> anyhow::Result<usize> {
    let max_capacity = keypool.config().max_capacity;
    let ttl = keypool.config().lease_ttl();
    let hold = Duration::from_millis(args.hold_ms);

    for round in 0..args.rounds {
        // Every submission needs the account's key list; it is looked up
        // once and then served from the cache.
        let keys: Vec<u32> = keypool
            .cache()
            .memoize(&format!("account-keys:{}", args.address), || async {
                tally.key_lookups.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>((0..max_capacity).collect())
            })
            .await?;

        let txid = loop {
            let submitted = keypool
                .leases()
                .with_lease(&args.address, max_capacity, ttl, |lease| {
                    let tally = Arc::clone(&tally);
                    let keys = &keys;
                    async move {
                        anyhow::ensure!(
                            keys.contains(&lease.index),
                            "leased unknown key index {}",
                            lease.index
                        );
                        tally.enter(lease.index);
                        tokio::time::sleep(hold).await;
                        tally.leave(lease.index);
                        debug!(worker, round, index = lease.index, "submitted");
                        Ok(uuid::Uuid::now_v7().to_string())
                    }
                })
                .await;
            match submitted {
                Ok(txid) => break txid,
                Err(e) if is_exhausted(&e) => {
                    tally.retries.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        };
        keypool.ledger().append(TRANSACTIONS_CHANNEL, &txid).await?;
    }
    Ok(args.rounds)
}

fn is_exhausted(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PoolError>()
        .is_some_and(PoolError::is_capacity_exhausted)
}
