//! Bounded worker pool driving client loops.
//!
//! Each accepted connection becomes one job; a worker owns that client's
//! loop until it exits. Shutdown closes the intake and joins every worker,
//! which is what makes the server's shutdown sequence deterministic: after
//! the disconnect broadcast, joining the pool waits for every client loop
//! to finish its teardown.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::{Result, ServerError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of named worker threads fed from one queue.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `size` workers. Fails if the OS refuses a thread.
    pub fn new(size: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let receiver = Arc::clone(&receiver);
            let worker = thread::Builder::new()
                .name(format!("client-worker-{i}"))
                .spawn(move || worker_loop(&receiver))?;
            workers.push(worker);
        }
        tracing::debug!(size, "worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue a job for the next free worker.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender
                .send(Box::new(job))
                .map_err(|_| ServerError::PoolClosed),
            None => Err(ServerError::PoolClosed),
        }
    }

    /// Close the intake and join every worker. Jobs already queued still
    /// run to completion. Idempotent.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
        tracing::debug!("worker pool drained");
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Job>>) {
    loop {
        // The guard is released before the job runs, so one long-running
        // client loop does not serialize the others.
        let job = receiver.lock().recv();
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}
