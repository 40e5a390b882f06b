//! Shared ordered key-value store adapter for keypool.
//!
//! Every piece of keypool state lives in one external store that many
//! stateless frontend processes contend on. This crate defines the minimum
//! surface that store must offer and a process-local implementation of it.
//!
//! # Operations
//!
//! - Scalar values: `get`, `set` with optional expiry
//! - Counters: `incr`, and the bounded `incr_below`
//! - Sorted sets: `zadd`, `zpopmin`, `zrevrange`, `zscore`, `zcard`
//!
//! # Storage Backends
//!
//! All backends implement the [`SharedStore`] trait:
//!
//! - [`InMemoryStore`] -- `HashMap`/`BTreeSet` store for tests and single-process use
//!
//! # Design Rules
//!
//! 1. Each call is atomic with respect to the single key or collection it names.
//! 2. Nothing is atomic across two calls; callers must not assume otherwise.
//! 3. Sorted-set scores are integer milliseconds since the Unix epoch.
//! 4. Connection-level failures surface as [`StoreError::Unavailable`] so
//!    callers can decide whether to degrade.

pub mod clock;
pub mod error;
pub mod memory;
pub mod traits;

pub use clock::{deadline_after, duration_ms, Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use traits::SharedStore;
