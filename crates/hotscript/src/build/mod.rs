//! Build Orchestration
//!
//! Each script runs one [`BuildPipeline`] per platform. The
//! [`BuildCorrelator`] pairs their results into rounds by sequence number and
//! publishes a round only once both platforms have reported it.

mod correlator;
mod pipeline;

#[cfg(test)]
pub mod testing;

pub use correlator::*;
pub use pipeline::*;
