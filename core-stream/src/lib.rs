//! # Stream Fan-In
//!
//! Combines many per-source paginated streams into one batch stream.
//!
//! ## Overview
//!
//! Connectors fetch each account/region/project as its own paginated
//! producer. This crate provides the three pieces that turn that fleet of
//! producers into one consumable stream:
//!
//! - **Merger** (`merge`): fair first-ready multiplexing of N producers
//! - **Bounded Concurrency** (`bounded`): a semaphore permit held for a
//!   producer's whole lifetime, capping how many run at once
//! - **Failure Isolation** (`safe`): access-denied sources terminate quietly
//!   instead of aborting the merge
//!
//! ## Usage
//!
//! ```ignore
//! use core_stream::{merge_batches, safe_stream, semaphore_stream};
//! use std::sync::Arc;
//! use tokio::sync::Semaphore;
//!
//! let sem = Arc::new(Semaphore::new(10));
//! let producers = accounts
//!     .into_iter()
//!     .map(|account| {
//!         let sem = Arc::clone(&sem);
//!         semaphore_stream(sem, move || safe_stream(account.fetch(), account.name()))
//!     })
//!     .collect();
//! let mut batches = merge_batches(producers);
//! ```

pub mod bounded;
pub mod merge;
pub mod safe;

pub use bounded::semaphore_stream;
pub use merge::merge_batches;
pub use safe::safe_stream;
