//! `reposter-scheduler`: due checks, dispatch and delivery reconciliation.
//!
//! # Overview
//!
//! Two periodic loops share one SQLite-backed [`reposter_store::Store`]:
//!
//! | Loop       | Component                        | Effect                                   |
//! |------------|----------------------------------|------------------------------------------|
//! | Due check  | [`due::DueCheck`] + [`materialize::Materializer`] | Pending repost records for due groups |
//! | Dispatch   | [`dispatch::Dispatcher`]          | Due records run on a bounded worker pool |
//!
//! Each worker hands its record to the [`reconcile::Reconciler`], which
//! performs delete-previous, send, pin and bookkeeping, then persists the
//! record's new state. [`manual::ManualOps`] runs operator sends through the
//! same per-channel claims.

pub mod clock;
pub mod dispatch;
pub mod due;
pub mod engine;
pub mod error;
pub mod locks;
pub mod manual;
pub mod materialize;
pub mod reconcile;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{DispatchReport, Pacing};
pub use engine::{DueTickReport, EngineSettings, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use manual::{ChannelOutcome, ManualOps, ManualReport};
pub use reconcile::{apply_failure, CleanupWarning, ClearOutcome, Outcome, RetryPolicy};
