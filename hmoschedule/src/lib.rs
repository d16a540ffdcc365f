//! # hmoschedule - timer substrate for the playlist engine
//!
//! Three primitives, all running on the tokio runtime the job was
//! registered from:
//!
//! - recurring cron jobs ([`Scheduler::add_cron_job`])
//! - one-shot jobs at a date or after a delay ([`Scheduler::add_date_job`],
//!   [`Scheduler::add_job_in`])
//! - lookup, listing and cancellation by id
//!
//! Job ids are unique: registering an id again replaces the previous job.
//! A panicking job is logged and does not take the runtime down.
//!
//! ```no_run
//! use hmoschedule::{Scheduler, job_fn};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let scheduler = Scheduler::new();
//! scheduler.add_cron_job("wake_up", "30 7 * * 1-5", job_fn(|| async {
//!     tracing::info!("Good morning");
//! }));
//! # }
//! ```

pub mod cron_expr;
mod error;
mod scheduler;

pub use cron_expr::{next_fire, normalize_expression, parse_cron};
pub use error::{Result, ScheduleError};
pub use scheduler::{Job, JobCallback, JobFuture, Scheduler, Trigger, job_fn};
