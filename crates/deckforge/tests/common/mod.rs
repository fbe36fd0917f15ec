//! Shared utilities for deckforge integration tests.
//!
//! - `TestHarness` wires a `ConversionService`, a broker and a worker over a
//!   temporary upload directory and database file
//! - `fakes` holds deterministic stand-ins for LibreOffice, the page
//!   rasterizers and an unreachable broker

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::{HarnessBuilder, TestHarness};
