// Shared helpers: secure random selection, retry policy, worker runtime

pub mod random;
pub mod retry;
pub mod runtime;

pub use random::{random_element, random_from_set, shuffled};
pub use retry::{retry_if_needed, RetryPolicy};
pub use runtime::worker_runtime;
