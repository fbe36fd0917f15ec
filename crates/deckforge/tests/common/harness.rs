//! Test harness for isolated conversion pipeline runs.
//!
//! Each harness owns a temporary upload directory and SQLite file, a
//! `ConversionService` configured like production, and a `Worker` bound to
//! the same broker so tests can drive the queue one delivery at a time.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use deckforge::db::Database;
use deckforge::processor::{
    FormatConverter, MediaTools, OfficeConverter, PdftoppmRasterizer, Rasterizer,
    ThumbnailRenderer,
};
use deckforge::queue::{MemoryBroker, QueueAdapter, QueueBroker};
use deckforge::service::ConversionService;
use deckforge::storage::StorageLayout;
use deckforge::worker::{ConversionRunner, Worker};
use deckforge::ConversionJob;

use super::fakes::{build_pdf, FailingBroker, FakeOffice, FakeRasterizer};

enum BrokerChoice {
    Memory,
    Failing,
    Absent,
}

/// Builder for [`TestHarness`]. Defaults: background conversion on a
/// memory broker, a three page office converter, one working rasterizer,
/// and at most ten thumbnails.
pub struct HarnessBuilder {
    office: Box<dyn OfficeConverter>,
    rasterizers: Vec<Box<dyn Rasterizer>>,
    cover: Box<dyn Rasterizer>,
    broker: BrokerChoice,
    background: bool,
    max_pages: usize,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            office: Box::new(FakeOffice::new(3)),
            rasterizers: vec![Box::new(FakeRasterizer)],
            cover: Box::new(PdftoppmRasterizer::new("/nonexistent/pdftoppm")),
            broker: BrokerChoice::Memory,
            background: true,
            max_pages: 10,
        }
    }

    /// Pages in every PDF the fake office converter produces.
    pub fn pages(mut self, pages: usize) -> Self {
        self.office = Box::new(FakeOffice::new(pages));
        self
    }

    pub fn office(mut self, office: Box<dyn OfficeConverter>) -> Self {
        self.office = office;
        self
    }

    pub fn rasterizers(mut self, rasterizers: Vec<Box<dyn Rasterizer>>) -> Self {
        self.rasterizers = rasterizers;
        self
    }

    pub fn cover(mut self, cover: Box<dyn Rasterizer>) -> Self {
        self.cover = cover;
        self
    }

    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Background conversion disabled: every request converts inline.
    pub fn inline(mut self) -> Self {
        self.background = false;
        self
    }

    pub fn failing_broker(mut self) -> Self {
        self.broker = BrokerChoice::Failing;
        self
    }

    pub fn without_broker(mut self) -> Self {
        self.broker = BrokerChoice::Absent;
        self
    }

    pub fn build(self) -> TestHarness {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let upload_dir = temp_dir.path().join("uploads");
        std::fs::create_dir_all(&upload_dir).expect("Failed to create upload dir");

        let db_path = temp_dir.path().join("data").join("deckforge.db");
        let db = Database::open(&db_path).expect("Failed to open database");

        let memory = Arc::new(MemoryBroker::new());
        let broker: Option<Arc<dyn QueueBroker>> = match self.broker {
            BrokerChoice::Memory => Some(memory.clone() as Arc<dyn QueueBroker>),
            BrokerChoice::Failing => Some(Arc::new(FailingBroker) as Arc<dyn QueueBroker>),
            BrokerChoice::Absent => None,
        };

        let storage = StorageLayout::new(&upload_dir);
        let converter = FormatConverter::new(
            self.office,
            ThumbnailRenderer::with_backends(self.rasterizers),
            self.cover,
            MediaTools::new("/nonexistent/ffmpeg"),
        );
        let runner = Arc::new(ConversionRunner::new(
            db.clone(),
            storage.clone(),
            Arc::new(converter),
            self.max_pages,
        ));

        let queue = broker
            .clone()
            .map(|broker| QueueAdapter::new(broker, db.clone()));
        let service =
            ConversionService::new(db.clone(), storage, Arc::clone(&runner), queue, self.background);

        let worker_broker = broker.unwrap_or_else(|| memory.clone() as Arc<dyn QueueBroker>);
        let worker = Worker::new(
            0,
            worker_broker,
            runner,
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(50),
        );

        TestHarness {
            temp_dir,
            upload_dir,
            db_path,
            db,
            memory,
            service,
            worker,
        }
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub upload_dir: PathBuf,
    pub db_path: PathBuf,
    pub db: Database,
    /// The memory broker; unused when the harness was built with another.
    pub memory: Arc<MemoryBroker>,
    pub service: ConversionService,
    pub worker: Worker,
}

impl TestHarness {
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes an uploaded source file.
    pub fn upload(&self, filename: &str, content: &[u8]) -> PathBuf {
        let path = self.upload_dir.join(filename);
        std::fs::write(&path, content).expect("Failed to write upload");
        path
    }

    /// Writes an uploaded PDF with the given number of pages.
    pub fn upload_pdf(&self, filename: &str, pages: usize) -> PathBuf {
        self.upload(filename, &build_pdf(pages))
    }

    pub fn thumbs_dir(&self, presentation_id: i64) -> PathBuf {
        self.upload_dir.join("thumbs").join(presentation_id.to_string())
    }

    /// Processes one queued delivery, panicking if none is waiting.
    pub fn run_worker_once(&self) -> ConversionJob {
        self.worker
            .process_next()
            .expect("Worker failed to record job")
            .expect("No delivery waiting")
    }
}
