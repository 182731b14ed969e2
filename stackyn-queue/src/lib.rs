pub mod backoff;
pub mod monitor;
pub mod queue;

pub use queue::{EnqueueOptions, Queue, Task};
