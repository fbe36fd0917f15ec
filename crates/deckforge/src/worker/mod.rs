pub mod pool;
pub mod runner;

pub use pool::{Worker, WorkerPool};
pub use runner::ConversionRunner;
