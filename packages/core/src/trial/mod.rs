//! Trial Access Module
//!
//! Resolves whether a user currently holds a time-boxed trial grant, and
//! manages the lifecycle of those grants.

pub mod clock;
pub mod manager;
pub mod resolver;
pub mod store;
pub mod tracker;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use manager::{ReminderSweep, TrialError, TrialManager};
pub use resolver::TrialResolver;
pub use store::{ReminderQueue, StoreError, TrialStore};
pub use tracker::{TrialAccessTracker, TrialAccessView};
pub use types::*;
