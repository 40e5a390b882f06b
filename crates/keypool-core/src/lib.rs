//! Coordination primitives for sharing a few signing credentials among many
//! concurrent callers.
//!
//! Submitting two transactions from the same signing key at once causes
//! sequence-number conflicts, so every key slot is handed out under an
//! exclusive, time-bounded lease. All state lives in one shared store
//! ([`keypool_store::SharedStore`]), which lets any number of stateless
//! frontend processes contend on the same pools safely.
//!
//! # Components
//!
//! - **Lease pool** -- leases the longest-idle index of a resource, grows the
//!   pool up to a capacity, and lets abandoned leases lapse at their TTL.
//! - **Memoizer** -- cache-aside wrapper around idempotent lookups.
//! - **Recency ledger** -- newest-first record of tokens per channel, such
//!   as submitted transaction ids.
//!
//! The three are independent; [`Keypool`] merely wires them to one store.
//!
//! # Modules
//!
//! - [`config`] -- [`KeypoolConfig`] and [`FallbackMode`]
//! - [`context`] -- the [`Keypool`] bundle
//! - [`error`] -- [`PoolError`] and [`PoolResult`]
//! - [`keyspace`] -- store key layout
//! - [`lease`] -- [`LeasePool`] and [`Lease`]
//! - [`memo`] -- [`Memoizer`]
//! - [`recency`] -- [`RecencyLedger`]

pub mod config;
pub mod context;
pub mod error;
pub mod keyspace;
pub mod lease;
pub mod memo;
pub mod recency;

pub use config::{FallbackMode, KeypoolConfig};
pub use context::Keypool;
pub use error::{PoolError, PoolResult};
pub use keyspace::KeySpace;
pub use lease::{Lease, LeasePool};
pub use memo::Memoizer;
pub use recency::{RecencyLedger, DEFAULT_RECENT_LIMIT};
