//! corespace-state — the placement registry.
//!
//! Backed by [redb](https://docs.rs/redb), records the services that can
//! host workloads (with their heartbeats) and the instances, volumes, and
//! network bindings waiting for or holding a host.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Service keys are `{kind}:{host}` so per-kind listings are prefix scans.
//!
//! Per-host load is never stored; it is derived from the workload tables on
//! every read, so it cannot drift from the assignments themselves.
//! [`StateStore::reserve`] re-derives it inside a write transaction, and redb
//! admits one writer at a time, which makes admission a serialized ledger.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across threads.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
