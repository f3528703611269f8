use crate::error::{ServerError, ServerResult};
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A unit of work; fire-and-forget
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    tasks: VecDeque<Task>,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// Fixed set of worker threads draining one FIFO task queue
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn `size` workers
    pub fn new(size: usize) -> ServerResult<Self> {
        Self::with_spawner(size, |id, shared| {
            thread::Builder::new()
                .name(format!("httpd-worker-{}", id))
                .spawn(move || worker_loop(id, shared))
        })
    }

    /// Workers spawned before a failed spawn are shut down and joined
    fn with_spawner<S>(size: usize, mut spawn: S) -> ServerResult<Self>
    where
        S: FnMut(usize, Arc<Shared>) -> io::Result<JoinHandle<()>>,
    {
        if size == 0 {
            return Err(ServerError::Pool("Worker count must be at least 1".to_string()));
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::with_capacity(size * 2),
                closed: false,
            }),
            available: Condvar::new(),
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(size),
        };
        for id in 0..size {
            match spawn(id, pool.shared.clone()) {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(ServerError::Pool(format!("Failed to spawn worker {}: {}", id, e)));
                }
            }
        }

        Ok(pool)
    }

    /// Queue a task and wake one idle worker.
    ///
    /// Returns false, dropping the task, once the pool is shutting down.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                warn!("Task submitted after thread pool shutdown; dropping it");
                return false;
            }
            queue.tasks.push_back(Box::new(task));
        }
        self.shared.available.notify_one();
        true
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// Stop accepting tasks, let workers finish what is queued, and join them
    pub fn shutdown(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.closed && self.workers.is_empty() {
                return;
            }
            queue.closed = true;
        }
        self.shared.available.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread exited abnormally");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.closed {
                    debug!("Worker {} exiting", id);
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("Task panicked on worker {}", id);
        }
    }
}
