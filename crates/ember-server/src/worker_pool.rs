//! Fixed-size worker pool that runs HTTP request processing off the reactor.
//!
//! The reactor is the only producer; every worker is a consumer parked in
//! [`WorkQueue::take`] until an item is posted.
//!
//! # Design
//!
//! - `submit` never blocks. A full queue hands the item back so the caller
//!   can close the connection behind it.
//! - Workers do no socket I/O and never re-queue. They report back to the
//!   reactor through whatever the [`Handler`] does with its item.
//! - Shutdown closes the queue, which releases every parked worker. Items
//!   still queued at that point are dropped.

use std::sync::Arc;
use std::thread;

use crate::error::{ServerError, ServerResult};
use crate::work_queue::{Rejected, WorkQueue};

/// Processing entrypoint executed on a worker thread.
pub trait Handler: Send + Sync + 'static {
    /// The unit of work handed from the reactor to a worker.
    type Item: Send + 'static;

    /// Processes one item to completion.
    fn handle(&self, item: Self::Item);
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    pub threads: usize,
    /// Maximum number of items waiting for a worker.
    pub max_pending: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            max_pending: 10_000,
        }
    }
}

/// Bounded producer/consumer pool.
///
/// # Lifecycle
///
/// 1. Create with `WorkerPool::new(config, handler)`.
/// 2. Call `start()` to spawn worker threads.
/// 3. Use `submit()` to hand items to the workers.
/// 4. Call `shutdown()` (or drop the pool) to stop and join the workers.
pub struct WorkerPool<H: Handler> {
    queue: Arc<WorkQueue<H::Item>>,
    handler: Arc<H>,
    handles: Vec<Option<thread::JoinHandle<()>>>,
    config: WorkerPoolConfig,
}

impl<H: Handler> WorkerPool<H> {
    /// Creates a pool with the given configuration.
    ///
    /// Threads are not spawned until `start()` is called.
    ///
    /// # Panics
    ///
    /// Panics if `config.threads` is 0 or `config.max_pending` is 0.
    pub fn new(config: WorkerPoolConfig, handler: H) -> Self {
        assert!(config.threads > 0, "threads must be positive");
        assert!(config.max_pending > 0, "max_pending must be positive");

        Self {
            queue: Arc::new(WorkQueue::new(config.max_pending)),
            handler: Arc::new(handler),
            handles: Vec::new(),
            config,
        }
    }

    /// Spawns the worker threads.
    ///
    /// # Panics
    ///
    /// Panics if called more than once without an intervening `shutdown()`.
    pub fn start(&mut self) -> ServerResult<()> {
        assert!(
            self.handles.is_empty(),
            "pool already started; call shutdown() first"
        );

        self.queue.reopen();
        let mut handles = Vec::with_capacity(self.config.threads);

        for worker_id in 0..self.config.threads {
            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            let name = format!("ember-worker-{worker_id}");

            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || Self::worker_loop(&queue, handler.as_ref()));

            match spawned {
                Ok(handle) => handles.push(Some(handle)),
                Err(source) => {
                    // Bring down whatever already started before reporting.
                    self.handles = handles;
                    self.shutdown();
                    return Err(ServerError::ThreadSpawn { name, source });
                }
            }
        }

        self.handles = handles;
        tracing::info!(threads = self.config.threads, "worker pool started");
        Ok(())
    }

    fn worker_loop(queue: &WorkQueue<H::Item>, handler: &H) {
        while let Some(item) = queue.take() {
            handler.handle(item);
        }
    }

    /// Hands an item to the pool.
    ///
    /// Fails without blocking when `max_pending` items are already waiting,
    /// handing the item back.
    pub fn submit(&self, item: H::Item) -> Result<(), Rejected<H::Item>> {
        self.queue.post(item)
    }

    /// Stops the workers and joins their threads.
    ///
    /// Workers exit at their next wake-up; queued items are not drained.
    /// Safe to call multiple times.
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        self.queue.close(self.handles.len());

        for handle in &mut self.handles {
            if let Some(h) = handle.take() {
                if h.join().is_err() {
                    tracing::error!("worker thread panicked");
                }
            }
        }

        self.handles.clear();
        tracing::info!("worker pool stopped");
    }

    /// Returns the number of items waiting for a worker.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Returns the number of worker threads this pool runs.
    pub fn threads(&self) -> usize {
        self.config.threads
    }
}

impl<H: Handler> Drop for WorkerPool<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
