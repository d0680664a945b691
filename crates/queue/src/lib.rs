//! Upload queue state.
//!
//! Tracks every queued file through its upload lifecycle, across all of its
//! destinations, for whoever is watching (a UI, a CLI progress display, a
//! test). The [`QueueStore`] is the single owner of that state and is safe to
//! write from any number of concurrent destination tasks.
//!
//! # Architecture
//! - **Items** ([`QueueItem`]) move `pending -> running -> success | error`
//!   and carry one [`DestinationProgress`] slot per destination.
//! - **Progress** is throttled: events are coalesced per item and applied on
//!   a tick by [`spawn_flusher`], so a chatty adapter costs one write per
//!   tick instead of one per event.
//! - **Terminal states** win. Once an item has succeeded or failed, nothing
//!   queued before (or after) that point can drag it back to running.

pub mod error;
mod flusher;
mod models;
mod pending;
mod store;

pub use crate::flusher::{FlusherHandle, MIN_FLUSH_INTERVAL, spawn_flusher};
pub use crate::models::{DestinationProgress, QueueItem, QueueItemId, QueueStatus, SlotStatus};
pub use crate::store::QueueStore;
