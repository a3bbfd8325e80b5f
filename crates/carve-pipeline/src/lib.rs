//! The chunking, distribution and reassembly pipeline.
//!
//! [`FileProcessor`] implements the per-file stages: splitting a source into
//! staged chunk files, uploading them to their assigned backends, and later
//! downloading, merging and verifying them. [`Orchestrator`] sequences those
//! stages for many files concurrently, owns all metadata persistence, and
//! isolates each file's failures from its siblings.

mod error;
mod orchestrator;
mod processor;

#[cfg(test)]
mod tests;

pub use error::PipelineError;
pub use orchestrator::{BatchOutcome, Orchestrator, aggregate_status};
pub use processor::{FileProcessor, ProcessorConfig};
