//! The executor abstraction used to schedule deferred maintenance drains,
//! async loads, and refreshes, per §6's `executor` builder field.
//!
//! Grounded on the teacher's background-maintenance shape elsewhere in the
//! buffer pool (a spawned loop draining a queue under a lock); here that
//! spawn point is pulled out behind a trait object so embedders running
//! single-threaded can supply an inline executor instead.

use std::sync::Arc;
use std::thread;

/// Runs a boxed unit of deferred work. Implementations must not deadlock
/// the caller that scheduled the work (§5).
pub trait Executor: Send + Sync {
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs scheduled work synchronously on the calling thread. Appropriate
/// for single-threaded embedding or tests where deterministic ordering of
/// maintenance relative to the triggering operation is wanted.
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// Spawns each unit of work on its own `std::thread`. The default for
/// multi-threaded embedding: opportunistic drains never block a caller
/// behind a shared background thread.
pub struct ThreadSpawnExecutor;

impl Executor for ThreadSpawnExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        thread::spawn(task);
    }
}

pub(crate) fn default_executor() -> Arc<dyn Executor> {
    Arc::new(ThreadSpawnExecutor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn inline_executor_runs_synchronously() {
        let executor = InlineExecutor;
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        executor.execute(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn thread_executor_eventually_runs() {
        let executor = ThreadSpawnExecutor;
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        executor.execute(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            let _ = tx.send(());
        }));
        rx.recv_timeout(std::time::Duration::from_secs(1)).expect("executor task did not run");
        assert!(ran.load(Ordering::SeqCst));
    }
}
