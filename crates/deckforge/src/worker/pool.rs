use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::db::ConversionJob;
use crate::error::{DeckforgeError, QueueError, WorkerError};
use crate::queue::{Delivery, QueueBroker};
use crate::worker::runner::ConversionRunner;

/// Pause after a broker error before polling again.
const BROKER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Consumer loop: one delivery at a time, acknowledged once processed.
pub struct Worker {
    id: usize,
    broker: Arc<dyn QueueBroker>,
    runner: Arc<ConversionRunner>,
    shutdown: Arc<AtomicBool>,
    poll_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        broker: Arc<dyn QueueBroker>,
        runner: Arc<ConversionRunner>,
        shutdown: Arc<AtomicBool>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            id,
            broker,
            runner,
            shutdown,
            poll_timeout,
        }
    }

    /// Runs a delivery to completion and acknowledges it.
    ///
    /// The delivery is acknowledged even when the job row could not be
    /// written; conversions are not retried automatically.
    pub fn process(&self, delivery: &Delivery) -> Result<ConversionJob, DeckforgeError> {
        debug!(
            "Worker {} processing job {} for presentation {}",
            self.id, delivery.id, delivery.task.presentation_id
        );

        let result = self.runner.run(
            delivery.task.presentation_id,
            &delivery.task.filename,
            &delivery.id,
        );

        if let Err(e) = self.broker.acknowledge(&delivery.id) {
            warn!("Worker {} failed to acknowledge {}: {}", self.id, delivery.id, e);
        }

        result
    }

    /// Waits up to the poll timeout for one delivery and processes it.
    /// `Ok(None)` means nothing arrived.
    pub fn process_next(&self) -> Result<Option<ConversionJob>, DeckforgeError> {
        match self.broker.receive(self.poll_timeout)? {
            Some(delivery) => self.process(&delivery).map(Some),
            None => Ok(None),
        }
    }

    pub fn run(&self) {
        debug!("Worker {} started on {} broker", self.id, self.broker.name());

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            match self.broker.receive(self.poll_timeout) {
                Ok(Some(delivery)) => {
                    if let Err(e) = self.process(&delivery) {
                        error!("Worker {} could not record job {}: {}", self.id, delivery.id, e);
                    }
                }
                Ok(None) => continue,
                Err(QueueError::Closed) => {
                    debug!("Worker {} queue closed", self.id);
                    break;
                }
                Err(e) => {
                    error!("Worker {} broker error: {}", self.id, e);
                    thread::sleep(BROKER_RETRY_DELAY);
                }
            }
        }

        debug!("Worker {} stopped", self.id);
    }
}

/// Fixed set of [`Worker`] threads sharing one broker and shutdown flag.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` consumer threads (at least one).
    pub fn start(
        broker: Arc<dyn QueueBroker>,
        runner: Arc<ConversionRunner>,
        worker_count: usize,
        poll_timeout: Duration,
    ) -> Result<Self, WorkerError> {
        Self::with_shutdown_flag(
            broker,
            runner,
            worker_count,
            poll_timeout,
            Arc::new(AtomicBool::new(false)),
        )
    }

    /// Like [`WorkerPool::start`], sharing an existing flag such as one
    /// flipped by a signal handler.
    pub fn with_shutdown_flag(
        broker: Arc<dyn QueueBroker>,
        runner: Arc<ConversionRunner>,
        worker_count: usize,
        poll_timeout: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let worker = Worker::new(
                worker_id,
                Arc::clone(&broker),
                Arc::clone(&runner),
                Arc::clone(&shutdown),
                poll_timeout,
            );

            let handle = thread::Builder::new()
                .name(format!("deckforge-worker-{}", worker_id))
                .spawn(move || worker.run())
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} conversion workers", worker_count);

        Ok(Self { workers, shutdown })
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Blocks until every worker has finished its current job and exited.
    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{job_repo, Database, JobStatus};
    use crate::processor::{
        FormatConverter, MediaTools, PdftoppmRasterizer, SofficeConverter, ThumbnailRenderer,
    };
    use crate::queue::{ConversionTask, MemoryBroker};
    use crate::storage::StorageLayout;
    use tempfile::TempDir;

    fn runner(dir: &TempDir, db: &Database) -> Arc<ConversionRunner> {
        let converter = FormatConverter::new(
            Box::new(SofficeConverter::new("/nonexistent/soffice")),
            ThumbnailRenderer::with_backends(vec![]),
            Box::new(PdftoppmRasterizer::new("/nonexistent/pdftoppm")),
            MediaTools::new("/nonexistent/ffmpeg"),
        );
        Arc::new(ConversionRunner::new(
            db.clone(),
            StorageLayout::new(dir.path()),
            Arc::new(converter),
            10,
        ))
    }

    #[test]
    fn test_worker_processes_next_delivery() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("paper.pdf"), b"%PDF").unwrap();
        let db = Database::open_in_memory().unwrap();
        let broker = Arc::new(MemoryBroker::new());

        let job_id = broker.publish(&ConversionTask::new(11, "paper.pdf")).unwrap();

        let worker = Worker::new(
            0,
            broker.clone(),
            runner(&dir, &db),
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(50),
        );
        let job = worker.process_next().unwrap().unwrap();

        assert_eq!(job.job_id.as_deref(), Some(job_id.as_str()));
        // No rasterizer and no pdftoppm: the PDF still counts as converted.
        assert_eq!(job.status, JobStatus::Finished);
        assert!(job.log.unwrap().contains("continuing without previews"));
        assert!(worker.process_next().unwrap().is_none());
    }

    #[test]
    fn test_pool_drains_queue_and_stops() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF").unwrap();
        let db = Database::open_in_memory().unwrap();
        let broker = Arc::new(MemoryBroker::new());

        broker.publish(&ConversionTask::new(1, "a.pdf")).unwrap();
        broker.publish(&ConversionTask::new(2, "b.pdf")).unwrap();

        let pool = WorkerPool::start(broker.clone(), runner(&dir, &db), 2, Duration::from_millis(20))
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let done = [1, 2].iter().all(|pid| {
                job_repo::find_latest(&db, *pid)
                    .unwrap()
                    .is_some_and(|job| job.status.is_terminal())
            });
            if done || std::time::Instant::now() > deadline {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }

        pool.shutdown();
        assert!(pool.is_shutdown());
        pool.wait();

        for pid in [1, 2] {
            let job = job_repo::find_latest(&db, pid).unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Finished);
        }
        assert_eq!(broker.pending(), 0);
    }

    #[test]
    fn test_zero_workers_starts_one() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let pool = WorkerPool::start(
            Arc::new(MemoryBroker::new()),
            runner(&dir, &db),
            0,
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(pool.workers.len(), 1);
        pool.shutdown();
        pool.wait();
    }
}
