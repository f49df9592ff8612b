//! # tributo-store — Operational Store
//!
//! The only cross-worker shared state in the back-office. This crate owns:
//!
//! - The record structs for every persisted entity ([`records`]).
//! - The storage traits the pipeline and the process engine are generic
//!   over ([`traits`]).
//! - The Postgres backend ([`PgStore`]), written in the per-entity module
//!   style with runtime-bound queries and `FromRow` row structs.
//! - An in-memory backend ([`MemStore`]) with identical semantics, used by
//!   tests and local stubs.
//!
//! ## Transaction Discipline
//!
//! Multi-step mutations (document upsert, process materialisation,
//! recurrence generation) run inside one transaction in the Postgres
//! backend. Read-modify-write sites — credential failure counters,
//! execution counters, process status — take row locks
//! (`SELECT … FOR UPDATE`). The in-memory backend serialises the same
//! sites through per-key entry locks so both backends observe the same
//! lost-update guarantees.

pub mod config;
pub mod error;
pub mod mem;
pub mod pg;
pub mod records;
pub mod traits;

pub use config::StoreConfig;
pub use error::StoreError;
pub use mem::MemStore;
pub use pg::PgStore;
pub use records::*;
pub use traits::*;
