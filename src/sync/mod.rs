//! Background synchronization
//!
//! # Components
//!
//! - [`provider`]: the external collaborator performing one sync attempt
//! - [`http_client`]: HTTP implementation of the provider
//! - [`constraints`]: preconditions checked before every attempt
//! - [`retry`]: backoff policy between failed attempts
//! - [`worker`]: one attempt and its classification into an outcome
//! - [`scheduler`]: periodic loops, retry chains and manual triggers
//!
//! # Example
//!
//! ```ignore
//! use band_sync::sync::{SyncScheduler, SyncWorker, SchedulerConfig, AssumeConnected};
//!
//! let worker = SyncWorker::new(provider, Arc::new(AssumeConnected));
//! let scheduler = SyncScheduler::new(SchedulerConfig::default(), database, Arc::new(worker));
//! scheduler.schedule(SyncTask::default()).await?;
//! ```

pub mod constraints;
pub mod http_client;
pub mod provider;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use constraints::{AssumeConnected, ConnectivityProbe, TcpProbe};
pub use http_client::HttpSyncProvider;
pub use provider::SyncProvider;
pub use retry::{BackoffKind, BackoffPolicy};
pub use scheduler::{ScheduleOutcome, SchedulerConfig, SyncScheduler};
pub use worker::{Firing, SyncWorker};
