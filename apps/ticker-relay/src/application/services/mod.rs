//! Application Services
//!
//! Services that orchestrate the relay pipeline.
//!
//! - `RelayCoordinator`: pops ticks, refreshes the cache, fans out
//! - `RelaySupervisor`: owns background tasks and their shutdown

pub mod relay;
pub mod supervisor;

pub use relay::{RelayCoordinator, RelayQueueReceiver, RelayQueueSender, relay_queue};
pub use supervisor::{DEFAULT_SHUTDOWN_GRACE, RelaySupervisor};
