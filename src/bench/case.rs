//! Operation cases

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::collective::{resolve_roles, CollectiveKind, ExecutionPlan, RolePair};
use crate::error::{Error, Result};
use crate::types::{ByteSize, DataType, PacketType};

use super::Aggregation;

/// One (plan, placement, framing, type, size) combination to benchmark
#[derive(Debug, Clone)]
pub struct OperationCase {
    pub plan: ExecutionPlan,
    pub in_place: bool,
    pub packet: PacketType,
    pub dtype: DataType,
    /// Per-rank contribution in bytes
    pub size_bytes: u64,
}

impl OperationCase {
    pub fn kind(&self) -> CollectiveKind {
        self.plan.kind()
    }

    /// Elements per rank; a trailing partial element is dropped
    pub fn element_count(&self) -> usize {
        self.dtype.elements_in(self.size_bytes as usize)
    }

    /// Buffer roles for this case
    pub fn roles(&self) -> RolePair {
        resolve_roles(self.kind(), self.in_place)
    }

    /// Reject cases that cannot hold a single element, or whose gathered
    /// host buffers for `world_size` ranks would not be addressable
    pub fn validate(&self, world_size: usize) -> Result<()> {
        let too_large = || {
            Error::invalid_size(
                ByteSize(self.size_bytes).to_string(),
                format!("buffers for {} ranks exceed the address space", world_size),
            )
        };

        let bytes = usize::try_from(self.size_bytes).map_err(|_| too_large())?;
        let count = self.dtype.elements_in(bytes);
        if count == 0 {
            return Err(Error::invalid_size(
                ByteSize(self.size_bytes).to_string(),
                format!("smaller than one {} element", self.dtype),
            ));
        }

        // Expected values are kept as f64 for every rank's slice
        let widest = self.dtype.size().max(std::mem::size_of::<f64>());
        match count
            .checked_mul(world_size)
            .and_then(|n| n.checked_mul(widest))
        {
            Some(total) if total <= isize::MAX as usize => Ok(()),
            _ => Err(too_large()),
        }
    }
}

impl fmt::Display for OperationCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.plan.name(),
            ByteSize(self.size_bytes),
            self.dtype,
            self.packet,
            if self.in_place { "in-place" } else { "out-of-place" }
        )
    }
}

/// Knobs shared by every case of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchSettings {
    /// Collective calls recorded into one captured graph
    pub iterations: u32,

    /// Timed launches of the captured graph
    pub replays: u32,

    /// Untimed launches before timing starts
    pub warmup_launches: u32,

    /// Absolute tolerance contributed by each rank
    pub tolerance_per_rank: f64,

    /// Seed shared by every rank for input generation
    pub seed: u64,

    /// How per-rank latencies combine in the report
    pub aggregation: Aggregation,
}

impl BenchSettings {
    /// Absolute tolerance for a group of `world_size` ranks
    pub fn tolerance(&self, world_size: usize) -> f64 {
        self.tolerance_per_rank * world_size as f64
    }
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            iterations: 10,
            replays: 10,
            warmup_launches: 1,
            tolerance_per_rank: 0.01,
            seed: 42,
            aggregation: Aggregation::default(),
        }
    }
}
