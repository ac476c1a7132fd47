//! Background sync for a long-running mirror.

mod scheduler;

pub use scheduler::{Scheduler, SchedulerHandle};
