use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, SendError, Sender};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<Receiver<Job>>>) -> std::io::Result<Worker> {
        let thread = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                loop {
                    let message = match receiver.lock() {
                        Ok(rx) => rx.recv(),
                        Err(_) => break,
                    };
                    match message {
                        Ok(job) => {
                            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!(worker = id, "job panicked");
                            }
                        }
                        Err(_) => break,
                    }
                }
                debug!(worker = id, "worker stopped");
            })?;

        Ok(Worker { id, thread })
    }
}

pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<Sender<Job>>,
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown(ThreadPool::DEFAULT_GRACE);
    }
}

impl ThreadPool {
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

    pub fn new(size: usize) -> std::io::Result<Self> {
        let size = size.max(1);

        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);

        for id in 0..size {
            workers.push(Worker::new(id, Arc::clone(&receiver))?);
        }

        Ok(ThreadPool {
            workers,
            sender: Some(sender),
        })
    }

    pub fn execute<F>(&self, f: F) -> Result<(), SendError<Job>>
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Box::new(f) as Job;
        match self.sender.as_ref() {
            Some(sender) => sender.send(job),
            None => Err(SendError(job)),
        }
    }

    /// Stops taking jobs and waits up to `grace` for queued and running jobs
    /// to finish. Workers still busy after that are detached.
    pub fn shutdown(&mut self, grace: Duration) {
        drop(self.sender.take());

        let deadline = Instant::now() + grace;

        for worker in self.workers.drain(..) {
            while !worker.thread.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }

            if worker.thread.is_finished() {
                if worker.thread.join().is_err() {
                    error!(worker = worker.id, "worker thread panicked");
                }
            } else {
                warn!(worker = worker.id, "worker still busy after shutdown grace period, detaching");
            }
        }
    }
}
