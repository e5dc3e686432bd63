use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, mpsc},
    thread,
};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool closed: all worker threads have been terminated")]
    Closed,
    #[error("a thread pool needs at least one worker")]
    EmptyPool,
    #[error("job panicked before producing a result")]
    JobPanicked,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting submissions.
    Running,
    /// Shutdown requested; queued jobs still run, new ones are refused.
    Draining,
    /// Every worker has been joined.
    Stopped,
}

struct Queue {
    jobs: VecDeque<Job>,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// Result slot of a submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Blocks until the job has run.
    pub fn wait(self) -> Result<T, PoolError> {
        self.receiver.recv().map_err(|_| PoolError::JobPanicked)
    }

    /// Returns the result if the job already finished, `Ok(None)` otherwise.
    pub fn try_wait(&self) -> Result<Option<T>, PoolError> {
        match self.receiver.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(PoolError::JobPanicked),
        }
    }
}

/// Fixed set of worker threads consuming a FIFO job queue.
pub struct ThreadPool {
    workers: Vec<Worker>,
    shared: Arc<Shared>,
}

impl ThreadPool {
    pub fn new(size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::EmptyPool);
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        });

        let mut pool = Self {
            workers: Vec::with_capacity(size),
            shared,
        };
        for id in 0..size {
            match Worker::new(id, Arc::clone(&pool.shared)) {
                Ok(worker) => pool.workers.push(worker),
                Err(e) => {
                    pool.shutdown();
                    return Err(PoolError::Spawn(e.to_string()));
                }
            }
        }
        Ok(pool)
    }

    /// Queues `f` and returns a handle to its eventual result.
    pub fn submit<F, T>(&self, f: F) -> Result<JobHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        self.push(Box::new(move || {
            // The submitter may have dropped its handle.
            let _ = sender.send(f());
        }))?;
        Ok(JobHandle { receiver })
    }

    /// Queues `f` without keeping a result slot.
    pub fn execute<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(f))
    }

    fn push(&self, job: Job) -> Result<(), PoolError> {
        {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                return Err(PoolError::Closed);
            }
            queue.jobs.push_back(job);
        }
        self.shared.available.notify_one();
        Ok(())
    }

    /// Refuses new jobs from now on. Workers finish what is queued and exit.
    pub fn close(&self) {
        self.shared.queue.lock().closed = true;
        self.shared.available.notify_all();
    }

    /// Closes the pool and joins every worker once the queue has drained.
    pub fn shutdown(&mut self) {
        self.close();

        for worker in self.workers.drain(..) {
            debug!("shutting down worker {}", worker.id);
            if worker.thread.join().is_err() {
                error!("worker {} terminated abnormally", worker.id);
            }
        }
    }

    pub fn state(&self) -> PoolState {
        let closed = self.shared.queue.lock().closed;
        match (closed, self.workers.is_empty()) {
            (false, _) => PoolState::Running,
            (true, false) => PoolState::Draining,
            (true, true) => PoolState::Stopped,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Number of jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new(id: usize, shared: Arc<Shared>) -> std::io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("netcore-worker-{id}"))
            .spawn(move || {
                loop {
                    let job = {
                        let mut queue = shared.queue.lock();
                        while queue.jobs.is_empty() && !queue.closed {
                            shared.available.wait(&mut queue);
                        }
                        match queue.jobs.pop_front() {
                            Some(job) => job,
                            None => break,
                        }
                    };

                    debug!("worker {id} running a job");
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("worker {id}: job panicked");
                    }
                }
                debug!("worker {id} stopped");
            })?;

        Ok(Self { id, thread })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Barrier,
            atomic::{AtomicUsize, Ordering},
        },
        time::{Duration, Instant},
    };

    use super::*;

    #[test]
    fn zero_workers_rejected() {
        assert_eq!(ThreadPool::new(0).err(), Some(PoolError::EmptyPool));
    }

    #[test]
    fn submit_returns_result() {
        let pool = ThreadPool::new(2).unwrap();
        let handle = pool.submit(|| 6 * 7).unwrap();
        assert_eq!(handle.wait(), Ok(42));
    }

    #[test]
    fn single_worker_runs_jobs_in_order() {
        let pool = ThreadPool::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (1..=3)
            .map(|i| {
                let order = Arc::clone(&order);
                pool.submit(move || {
                    thread::sleep(Duration::from_millis(5));
                    order.lock().push(i);
                })
                .unwrap()
            })
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }

        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn n_workers_run_n_jobs_exactly_once() {
        const N: usize = 8;
        let pool = ThreadPool::new(N).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        // All N jobs must be live at once for the barrier to release.
        let barrier = Arc::new(Barrier::new(N));

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let runs = Arc::clone(&runs);
                let barrier = Arc::clone(&barrier);
                pool.submit(move || {
                    barrier.wait();
                    runs.fetch_add(1, Ordering::SeqCst);
                    i
                })
                .unwrap()
            })
            .collect();

        let mut results: Vec<_> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        results.sort();
        assert_eq!(results, (0..N).collect::<Vec<_>>());
        assert_eq!(runs.load(Ordering::SeqCst), N);
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let mut pool = ThreadPool::new(1).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let runs = Arc::clone(&runs);
            pool.execute(move || {
                thread::sleep(Duration::from_millis(2));
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();

        assert_eq!(runs.load(Ordering::SeqCst), 10);
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let mut pool = ThreadPool::new(2).unwrap();
        assert_eq!(pool.state(), PoolState::Running);
        pool.shutdown();

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        let res = pool.submit(move || flag.fetch_add(1, Ordering::SeqCst));

        assert_eq!(res.err(), Some(PoolError::Closed));
        assert_eq!(pool.queued(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn close_moves_to_draining() {
        let mut pool = ThreadPool::new(1).unwrap();
        let gate = Arc::new(Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        let running = pool.submit(move || worker_gate.wait()).unwrap();
        let queued = pool.submit(|| 5).unwrap();

        pool.close();
        assert_eq!(pool.state(), PoolState::Draining);
        assert_eq!(pool.execute(|| ()).err(), Some(PoolError::Closed));

        gate.wait();
        running.wait().unwrap();
        assert_eq!(queued.wait(), Ok(5));
        pool.shutdown();
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[test]
    fn panicking_job_keeps_worker_alive() {
        let pool = ThreadPool::new(1).unwrap();
        let failed = pool.submit(|| -> u8 { panic!("boom") }).unwrap();
        assert_eq!(failed.wait(), Err(PoolError::JobPanicked));

        let ok = pool.submit(|| 1u8).unwrap();
        assert_eq!(ok.wait(), Ok(1));
    }

    #[test]
    fn try_wait_polls_without_blocking() {
        let pool = ThreadPool::new(1).unwrap();
        let (release, gate) = mpsc::channel::<()>();
        let handle = pool
            .submit(move || {
                gate.recv().unwrap();
                9u32
            })
            .unwrap();

        assert_eq!(handle.try_wait(), Ok(None));
        release.send(()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match handle.try_wait() {
                Ok(Some(value)) => {
                    assert_eq!(value, 9);
                    break;
                }
                Ok(None) => {
                    assert!(Instant::now() < deadline, "job never finished");
                    thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("job failed: {e}"),
            }
        }
        assert_eq!(handle.try_wait(), Err(PoolError::JobPanicked));
    }
}
