//! Calendar engine and schedule registry.
//!
//! # Overview
//!
//! [`SchedulerEngine`] keeps a set of entries, each a parsed [`Schedule`]
//! bound to a [`Runnable`]. Its loop wakes every second and fires every due
//! entry on its own tokio task. [`ScheduleRegistry`] maps service names to
//! live entries and is the only place entries are created or removed.
//!
//! # Schedule expressions
//!
//! | Form                 | Example            |
//! |----------------------|--------------------|
//! | 5-field cron         | `*/5 * * * *`      |
//! | 6-field cron         | `30 0 3 * * 1-5`   |
//! | Descriptor           | `@daily`           |
//! | Fixed interval       | `@every 1h30m`     |

pub mod engine;
pub mod error;
pub mod registry;
pub mod schedule;
pub mod types;

pub use engine::{Runnable, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use registry::ScheduleRegistry;
pub use schedule::Schedule;
pub use types::{EntryId, EntryInfo};
