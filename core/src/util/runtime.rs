// Worker runtime sized to the machine
//
// Network calls, proof of work and onion construction run on a bounded pool
// of `cores - 1` workers so the caller's thread stays free.

use tokio::runtime::{Builder, Runtime};

/// Number of worker threads: all cores but one, at least one
pub fn recommended_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.saturating_sub(1).max(1)
}

/// Build a multi-threaded runtime named `name`
pub fn worker_runtime(name: &str) -> std::io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(recommended_worker_count())
        .thread_name(format!("{}-worker", name))
        .enable_all()
        .build()
}
