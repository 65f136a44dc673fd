//! band-sync - background sync of NFC wristband toolkit transactions
//!
//! Reconciles the toolkit's locally buffered wristband transactions (balance
//! reads, recharges) with the sync server: a periodic task with network
//! constraints, bounded retries with exponential backoff, manual one-shot
//! syncs and a small HTTP control API.

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod otel;
pub mod server;
pub mod session;
pub mod sync;
