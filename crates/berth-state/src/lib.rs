//! Berth-State: Trace Persistence for Berth Test Runs
//!
//! This crate provides the persistence layer for the run trace: the
//! hierarchical, time-annotated record of everything a test run did.
//! It is backend-agnostic; the run pipeline only ever talks to the
//! [`TraceStore`] trait.
//!
//! ## Key Components
//!
//! - `TraceStore`: append-only hierarchical trace storage
//! - `TraceHandle`: opaque address of one scope/entry in a trace
//! - `MemoryTraceStore`: in-memory fake satisfying the trait contract

mod error;
pub mod fakes;
mod storage_traits;

pub use error::StorageError;
pub use storage_traits::{EntryStyle, StorageResult, TraceEntry, TraceHandle, TraceStore};
