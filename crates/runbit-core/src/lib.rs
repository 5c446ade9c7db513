//! Runbit Core - per-model rate-limited call queue
//!
//! Calls are queued per model-class key and admitted in FIFO order while the
//! key's request and token budget allows. Each admitted call runs through the
//! [`CallExecutor`], which streams deltas to the caller's [`CallHandle`] and
//! forwards vendor rate-limit headers back to the [`Scheduler`].
//!
//! ```no_run
//! use runbit_core::{CallExecutor, Scheduler, SchedulerConfig};
//! use runbit_llm::{CallRequest, HistoryStore, Message, Transports};
//!
//! # async fn demo(transports: Transports) -> runbit_core::Result<()> {
//! let executor = CallExecutor::new(transports, HistoryStore::disabled());
//! let scheduler = Scheduler::new(executor, SchedulerConfig::new().with_registry_limits(true));
//!
//! let request = CallRequest::new("gpt-4o-mini").with_message(Message::user("Hello"));
//! let count = scheduler.submit(&request).await?.wait().await?;
//! println!("{} (${:.6})", count.text(), count.cost());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod executor;
pub mod limits;
pub mod retry;
pub mod run_bit;
pub mod scheduler;
pub mod usage;

pub use error::{Error, Result};
pub use executor::CallExecutor;
pub use limits::RateLimitState;
pub use retry::{RetryDecision, RetryPolicy};
pub use run_bit::{CallEvent, CallHandle, RunBit, RunStatus};
pub use scheduler::{QueueSnapshot, Scheduler, SchedulerConfig};
pub use usage::{UsageReport, UsageTotals, ALL_KEY};
