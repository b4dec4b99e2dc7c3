//! Benchmark engine
//!
//! Provides:
//! - Operation cases and their deterministic input data
//! - The per-rank context handed to every stage
//! - The Setup -> CorrectnessCheck -> WarmUp -> TimedReplay -> Report runner
//! - Cross-rank aggregation and report output

mod case;
mod context;
mod data;
mod report;
mod runner;

pub use case::*;
pub use context::*;
pub use data::*;
pub use report::*;
pub use runner::*;

use std::fmt;

use serde::Serialize;

/// Stages a benchmark case passes through, strictly in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    CorrectnessCheck,
    WarmUp,
    TimedReplay,
    Report,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::CorrectnessCheck => "correctness check",
            Stage::WarmUp => "warm-up",
            Stage::TimedReplay => "timed replay",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}
